//! Foreign call contexts
//!
//! One context exists per activation of a foreign method. It owns a stack
//! buffer and a handle table, keeps the call message reachable through
//! handles, and is the "current" context of the execution unit (thread)
//! that created it until it is torn down.
//!
//! Teardown runs exactly once, whichever exit path triggers it: a normal
//! return, a raised exception, a throw or an exit request. `ContextGuard`
//! ties it to scope exit.

use crate::vm::ffi::handles::{Handle, HandleTable};
use crate::vm::interpreter::frame::{Frame, FrameKind, FrameRecord};
use crate::vm::interpreter::{State, UnitId};
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef, Value};
use crate::vm::{VmError, VmResult};
use log::trace;
use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::Rc;

thread_local! {
    static CURRENT: RefCell<Option<Rc<ForeignCallContext>>> = const { RefCell::new(None) };
}

/// The message that triggered a foreign call
#[derive(Debug, Clone)]
pub struct CallMessage {
    /// Receiver of the call
    pub receiver: Value,
    /// Selector being sent
    pub selector: Symbol,
    /// Arguments
    pub args: Vec<Value>,
    /// Module the method was found in
    pub module: Option<ModuleId>,
}

impl CallMessage {
    /// Build a message with no resolved module
    pub fn new(receiver: Value, selector: Symbol, args: Vec<Value>) -> Self {
        Self {
            receiver,
            selector,
            args,
            module: None,
        }
    }

    /// Record the module the method was found in
    pub fn in_module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }
}

/// Why control re-entered the runtime while this context was current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReentryAction {
    /// Executing the original foreign call
    #[default]
    OriginalCall,
    /// Foreign code called back into managed code
    Callback,
}

#[derive(Debug)]
struct Bindings {
    receiver: Handle,
    selector: Symbol,
    args: Vec<Handle>,
    module: Option<ModuleId>,
    method: Option<Handle>,
}

/// One activation of a foreign-implemented method
#[derive(Debug)]
pub struct ForeignCallContext {
    unit: UnitId,
    frame: Frame,
    bindings: Option<Bindings>,
    stack: RefCell<Vec<u8>>,
    stack_size: usize,
    handles: HandleTable,
    return_value: Cell<Option<Handle>>,
    action: Cell<ReentryAction>,
    previous: RefCell<Option<Rc<ForeignCallContext>>>,
    torn_down: Cell<bool>,
}

impl ForeignCallContext {
    /// Create the context for a foreign method invocation and make it current.
    ///
    /// `caller` defaults to the frame of the context that was current before.
    pub fn create(
        state: &mut State,
        message: &CallMessage,
        caller: Option<Frame>,
        method: Option<ObjectRef>,
    ) -> VmResult<ContextGuard> {
        Self::build(state, Some((message, method)), caller)
    }

    /// Bootstrap path: a context with no call bindings
    pub fn allocate(state: &mut State) -> VmResult<ContextGuard> {
        Self::build(state, None, None)
    }

    fn build(
        state: &mut State,
        message: Option<(&CallMessage, Option<ObjectRef>)>,
        caller: Option<Frame>,
    ) -> VmResult<ContextGuard> {
        let stack_size = state.options().stack_size;
        let max_stack_size = state.options().max_stack_size;
        let handle_capacity = state.options().handle_capacity;
        let unit = state.unit();

        if stack_size > max_stack_size {
            return Err(VmError::ResourceExhausted(format!(
                "foreign stack of {} bytes exceeds limit of {}",
                stack_size, max_stack_size
            )));
        }
        let mut stack = Vec::new();
        stack.try_reserve_exact(stack_size).map_err(|_| {
            VmError::ResourceExhausted(format!("foreign stack of {} bytes", stack_size))
        })?;
        stack.resize(stack_size, 0);

        let handles = HandleTable::new(&mut state.world().handle_roots, handle_capacity)?;

        let previous = Self::current();
        let caller = caller.or_else(|| previous.as_ref().map(|p| p.frame.clone()));

        let bindings = match message {
            Some((message, method)) => {
                let receiver = handles.allocate(message.receiver)?;
                let args = message
                    .args
                    .iter()
                    .map(|arg| handles.allocate(*arg))
                    .collect::<VmResult<Vec<_>>>()?;
                let method = method
                    .map(|m| handles.allocate(Value::Object(m)))
                    .transpose()?;
                Some(Bindings {
                    receiver,
                    selector: message.selector,
                    args,
                    module: message.module,
                    method,
                })
            }
            None => None,
        };

        let frame = match &bindings {
            Some(b) => Rc::new(FrameRecord {
                kind: FrameKind::Foreign,
                name: Some(b.selector),
                module: b.module,
                caller,
            }),
            None => FrameRecord::synthetic(FrameKind::Foreign, caller),
        };

        let context = Rc::new(ForeignCallContext {
            unit,
            frame,
            bindings,
            stack: RefCell::new(stack),
            stack_size,
            handles,
            return_value: Cell::new(None),
            action: Cell::new(ReentryAction::OriginalCall),
            previous: RefCell::new(previous),
            torn_down: Cell::new(false),
        });

        CURRENT.with(|current| *current.borrow_mut() = Some(context.clone()));
        trace!(
            "foreign context created on unit {:?} (handles table {:?})",
            unit,
            context.handles.id()
        );

        Ok(ContextGuard { context })
    }

    /// The context current on this execution unit, if a foreign call is active
    pub fn current() -> Option<Rc<ForeignCallContext>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Execution unit that owns this context
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// This activation's frame in the caller chain
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// The activation that invoked this one
    pub fn caller(&self) -> Option<&Frame> {
        self.frame.caller.as_ref()
    }

    /// Home activation; foreign contexts are their own home
    pub fn home(&self) -> &Frame {
        &self.frame
    }

    /// Whether this is a bootstrap context without call bindings
    pub fn is_bootstrap(&self) -> bool {
        self.bindings.is_none()
    }

    /// Current receiver (nil for bootstrap contexts)
    pub fn receiver(&self) -> VmResult<Value> {
        match &self.bindings {
            Some(b) => self.handles.resolve(b.receiver),
            None => Ok(Value::Nil),
        }
    }

    /// Selector of the originating message
    pub fn name(&self) -> Option<Symbol> {
        self.bindings.as_ref().map(|b| b.selector)
    }

    /// Defining module
    pub fn module(&self) -> Option<ModuleId> {
        self.bindings.as_ref().and_then(|b| b.module)
    }

    /// Current arguments of the originating message
    pub fn args(&self) -> VmResult<Vec<Value>> {
        match &self.bindings {
            Some(b) => b.args.iter().map(|h| self.handles.resolve(*h)).collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Handles of the originating message's arguments
    pub fn arg_handles(&self) -> &[Handle] {
        match &self.bindings {
            Some(b) => &b.args,
            None => &[],
        }
    }

    /// Current value of argument `index`
    pub fn arg(&self, index: usize) -> VmResult<Value> {
        let handle = self.arg_handles().get(index).copied().ok_or_else(|| {
            VmError::ArgumentCount {
                expected: index + 1,
                given: self.arg_handles().len(),
            }
        })?;
        self.handles.resolve(handle)
    }

    /// The foreign method descriptor (current address)
    pub fn method(&self) -> VmResult<Option<ObjectRef>> {
        match self.bindings.as_ref().and_then(|b| b.method) {
            Some(h) => Ok(self.handles.resolve(h)?.as_object()),
            None => Ok(None),
        }
    }

    /// Issue a handle for `value`
    pub fn handle(&self, value: Value) -> VmResult<Handle> {
        self.handles.allocate(value)
    }

    /// Current value behind `handle`
    pub fn resolve(&self, handle: Handle) -> VmResult<Value> {
        self.handles.resolve(handle)
    }

    /// Number of handles issued so far
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Size of the owned stack buffer
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Run `f` with the stack buffer
    pub fn with_stack<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.stack.borrow_mut())
    }

    /// Record the pending return value
    pub fn set_return_value(&self, value: Value) -> VmResult<()> {
        match self.return_value.get() {
            Some(h) => self.handles.set(h, value),
            None => {
                let h = self.handles.allocate(value)?;
                self.return_value.set(Some(h));
                Ok(())
            }
        }
    }

    /// The pending return value (nil if never set)
    pub fn return_value(&self) -> VmResult<Value> {
        match self.return_value.get() {
            Some(h) => self.handles.resolve(h),
            None => Ok(Value::Nil),
        }
    }

    /// Why control last re-entered the runtime
    pub fn action(&self) -> ReentryAction {
        self.action.get()
    }

    /// Record why control is re-entering the runtime
    pub fn set_action(&self, action: ReentryAction) {
        self.action.set(action);
    }

    /// Whether teardown has already run
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    fn teardown(self: &Rc<Self>) {
        if self.torn_down.replace(true) {
            return;
        }

        self.handles.release();
        let mut stack = self.stack.borrow_mut();
        stack.clear();
        stack.shrink_to_fit();

        let mut previous = self.previous.borrow_mut().take();
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.as_ref().is_some_and(|c| Rc::ptr_eq(c, self)) {
                *current = previous.take();
                return;
            }

            // Torn down out of order: splice it out of the chain so the
            // context above it now restores our predecessor.
            trace!("foreign context torn down while not current on its unit");
            let mut cursor = current.clone();
            while let Some(context) = cursor {
                let next = context.previous.borrow().clone();
                if next.as_ref().is_some_and(|n| Rc::ptr_eq(n, self)) {
                    *context.previous.borrow_mut() = previous.take();
                    return;
                }
                cursor = next;
            }
        });
        trace!("foreign context torn down on unit {:?}", self.unit);
    }
}

/// Owns a live context and tears it down when dropped
#[derive(Debug)]
pub struct ContextGuard {
    context: Rc<ForeignCallContext>,
}

impl ContextGuard {
    /// The guarded context
    pub fn context(&self) -> &Rc<ForeignCallContext> {
        &self.context
    }

    /// Tear down now
    pub fn finish(self) {
        drop(self);
    }
}

impl Deref for ContextGuard {
    type Target = ForeignCallContext;

    fn deref(&self) -> &ForeignCallContext {
        &self.context
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.context.teardown();
    }
}
