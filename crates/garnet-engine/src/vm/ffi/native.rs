//! Native method invocation
//!
//! `call_native` is the interpreter's entry point for foreign methods. It
//! sets up a foreign call context, runs the Rust implementation with a
//! `NativeEnv` view of the runtime and tears the context down on every exit
//! path.

use crate::vm::ffi::context::{CallMessage, ForeignCallContext, ReentryAction};
use crate::vm::ffi::handles::Handle;
use crate::vm::interpreter::frame::Frame;
use crate::vm::interpreter::invoke::{Invoker, NativeDispatcher};
use crate::vm::interpreter::{State, World};
use crate::vm::object::{ExecutableKind, NativeMethod};
use crate::vm::symbol::Symbol;
use crate::vm::value::{ObjectRef, Value};
use crate::vm::{Unwind, VmError, VmResult};
use std::rc::Rc;

/// What a native method sees of the runtime
pub struct NativeEnv<'a> {
    state: &'a mut State,
    context: Rc<ForeignCallContext>,
}

impl<'a> NativeEnv<'a> {
    /// The execution state of the calling unit
    pub fn state(&mut self) -> &mut State {
        self.state
    }

    /// The lock-protected world
    pub fn world(&mut self) -> &mut World {
        self.state.world()
    }

    /// The active foreign call context
    pub fn context(&self) -> &Rc<ForeignCallContext> {
        &self.context
    }

    /// Current receiver
    pub fn receiver(&self) -> VmResult<Value> {
        self.context.receiver()
    }

    /// Current value of argument `index`
    pub fn arg(&self, index: usize) -> VmResult<Value> {
        self.context.arg(index)
    }

    /// Issue a handle that survives collections
    pub fn handle(&self, value: Value) -> VmResult<Handle> {
        self.context.handle(value)
    }

    /// Current value behind a handle
    pub fn resolve(&self, handle: Handle) -> VmResult<Value> {
        self.context.resolve(handle)
    }

    /// Call back into managed code
    pub fn send(&mut self, receiver: Value, selector: Symbol, args: &[Value]) -> VmResult<Value> {
        self.context.set_action(ReentryAction::Callback);
        let result = NativeDispatcher::new().send(self.state, receiver, selector, args);
        self.context.set_action(ReentryAction::OriginalCall);
        result
    }

    /// Start an exception unwind
    pub fn raise(&self, exception: Value) -> VmError {
        VmError::Unwind(Unwind::Exception(exception))
    }

    /// Start a throw unwind
    pub fn throw(&self, tag: Value, value: Value) -> VmError {
        VmError::Unwind(Unwind::Throw { tag, value })
    }
}

/// The Rust implementation behind a native or primitive executable
pub fn resolve_native(world: &World, method: ObjectRef) -> VmResult<NativeMethod> {
    let exec = world.heap.executable(method)?;
    match &exec.kind {
        ExecutableKind::Native(native) => Ok(*native),
        ExecutableKind::Primitive(name) => world.primitive(*name).ok_or_else(|| {
            VmError::NameError(format!("unknown primitive {}", world.symbols.resolve(*name)))
        }),
        ExecutableKind::Bytecode { .. } => Err(VmError::TypeError(format!(
            "{} is a bytecode method",
            world.symbols.resolve(exec.name)
        ))),
    }
}

/// Invoke a foreign method for `message`
pub fn call_native(
    state: &mut State,
    message: &CallMessage,
    method: ObjectRef,
    caller: Option<Frame>,
) -> VmResult<Value> {
    let native = resolve_native(state.world(), method)?;
    if native.arity >= 0 && message.args.len() != native.arity as usize {
        return Err(VmError::ArgumentCount {
            expected: native.arity as usize,
            given: message.args.len(),
        });
    }

    let guard = ForeignCallContext::create(state, message, caller, Some(method))?;
    let args = guard.arg_handles().to_vec();
    let mut env = NativeEnv {
        state,
        context: guard.context().clone(),
    };

    let value = (native.func)(&mut env, &args)?;
    guard.set_return_value(value)?;
    guard.return_value()
}
