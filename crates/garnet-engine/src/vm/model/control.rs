//! Non-local control transfers
//!
//! Throws, exceptions and exit requests travel as `VmError::Unwind` through
//! the ordinary `Err` channel, so every foreign call context on the way out
//! runs its teardown.

use crate::vm::interpreter::{Invoker, State};
use crate::vm::value::Value;
use crate::vm::{Unwind, VmError, VmResult};
use log::trace;

/// Start a throw unwind tagged with `tag`
pub fn raise_throw<T>(tag: Value, value: Value) -> VmResult<T> {
    Err(VmError::Unwind(Unwind::Throw { tag, value }))
}

/// Start an exception unwind
pub fn raise_exception<T>(exception: Value) -> VmResult<T> {
    Err(VmError::Unwind(Unwind::Exception(exception)))
}

/// Start an exit unwind
pub fn request_exit<T>(code: i32) -> VmResult<T> {
    Err(VmError::Unwind(Unwind::Exit(code)))
}

impl State {
    /// Send `call` to `receiver`, absorbing a throw whose tag is `tag`.
    ///
    /// Throws with other tags, exceptions and exit requests propagate.
    pub fn catch(
        &mut self,
        invoker: &mut dyn Invoker,
        tag: Value,
        receiver: Value,
    ) -> VmResult<Value> {
        let call = self.world().symbols.intern("call");
        match invoker.send(self, receiver, call, &[]) {
            Err(VmError::Unwind(Unwind::Throw { tag: thrown, value })) if thrown == tag => {
                trace!("caught throw {:?}", tag);
                Ok(value)
            }
            other => other,
        }
    }
}
