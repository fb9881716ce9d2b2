//! The "invoke with receiver/selector/args" entry point
//!
//! The object model never dispatches on its own. Constant-missing hooks,
//! `catch` blocks and native callbacks go through an `Invoker`, which the
//! interpreter loop implements for bytecode. `NativeDispatcher` is the
//! implementation this crate provides: it resolves through the dispatch
//! caches and runs foreign methods through `call_native`.

use crate::vm::dispatch::{CacheEntry, CallSiteId};
use crate::vm::ffi::context::CallMessage;
use crate::vm::ffi::call_native;
use crate::vm::interpreter::frame::Frame;
use crate::vm::interpreter::State;
use crate::vm::object::ExecutableKind;
use crate::vm::symbol::Symbol;
use crate::vm::value::Value;
use crate::vm::{MissingReason, VmError, VmResult};

/// Sends a message on behalf of the runtime
pub trait Invoker {
    /// Privileged send: visibility is not checked
    fn send(
        &mut self,
        state: &mut State,
        receiver: Value,
        selector: Symbol,
        args: &[Value],
    ) -> VmResult<Value>;
}

/// Dispatcher for natively implemented methods
#[derive(Debug, Default, Clone)]
pub struct NativeDispatcher {
    caller: Option<Frame>,
}

impl NativeDispatcher {
    /// Dispatcher whose calls have no explicit caller frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher whose calls are made from `caller`
    pub fn with_caller(caller: Frame) -> Self {
        Self {
            caller: Some(caller),
        }
    }

    /// Send honouring visibility as seen from `invoking_self`
    pub fn send_public(
        &mut self,
        state: &mut State,
        receiver: Value,
        selector: Symbol,
        args: &[Value],
        invoking_self: Value,
    ) -> VmResult<Value> {
        if !state.check_callable(receiver, selector, invoking_self)? {
            let reason = state.method_missing_reason();
            return Err(no_method(state, selector, reason));
        }
        self.send(state, receiver, selector, args)
    }

    /// Send through the inline cache of `site`
    pub fn send_at(
        &mut self,
        state: &mut State,
        site: CallSiteId,
        receiver: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let world = state.world();
        let selector = world
            .caches
            .inline
            .selector(site)
            .ok_or_else(|| VmError::RuntimeError(format!("unknown call site {:?}", site)))?;
        let origin = world.lookup_origin(receiver)?;
        let serial = world.caches.serial();

        let entry = match world.caches.inline.lookup(site, origin, serial) {
            Some(entry) => entry,
            None => match world.resolve_method(receiver, selector)? {
                Some(found) => {
                    // A global entry survives serial bumps for other
                    // selectors, so stamp it with the serial it is valid at
                    let entry = CacheEntry { serial, ..found };
                    world.caches.inline.update(site, origin, entry);
                    entry
                }
                None => return Err(no_method(state, selector, MissingReason::Normal)),
            },
        };
        self.invoke(state, receiver, selector, entry, args)
    }

    fn invoke(
        &mut self,
        state: &mut State,
        receiver: Value,
        selector: Symbol,
        entry: CacheEntry,
        args: &[Value],
    ) -> VmResult<Value> {
        let world = state.world();
        if let ExecutableKind::Bytecode { .. } = world.heap.executable(entry.method)?.kind {
            return Err(VmError::RuntimeError(format!(
                "{} is a bytecode method and needs the interpreter loop",
                world.symbols.resolve(selector)
            )));
        }
        let message = CallMessage::new(receiver, selector, args.to_vec()).in_module(entry.module);
        call_native(state, &message, entry.method, self.caller.clone())
    }
}

impl Invoker for NativeDispatcher {
    fn send(
        &mut self,
        state: &mut State,
        receiver: Value,
        selector: Symbol,
        args: &[Value],
    ) -> VmResult<Value> {
        match state.world().resolve_method(receiver, selector)? {
            Some(entry) => self.invoke(state, receiver, selector, entry, args),
            None => Err(no_method(state, selector, MissingReason::Normal)),
        }
    }
}

fn no_method(state: &mut State, selector: Symbol, reason: MissingReason) -> VmError {
    state.set_missing_reason(reason);
    VmError::NoMethod {
        name: state.world().symbols.resolve(selector).to_string(),
        reason,
    }
}
