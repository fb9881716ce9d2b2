//! Caller-link chain shared by interpreted frames and foreign contexts
//!
//! The frame walker sees one shape: each record names its method (if any)
//! and links to its caller. Foreign call contexts push a `Foreign` record so
//! backtraces treat them the same as interpreted activations.

use crate::vm::symbol::Symbol;
use crate::vm::value::ModuleId;
use std::rc::Rc;

/// Kind of activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Bytecode activation owned by the interpreter loop
    Interpreted,
    /// Foreign call context
    Foreign,
}

/// One activation in the caller chain
#[derive(Debug)]
pub struct FrameRecord {
    /// Activation kind
    pub kind: FrameKind,
    /// Method name; `None` marks a synthetic frame
    pub name: Option<Symbol>,
    /// Module the method was found in
    pub module: Option<ModuleId>,
    /// The activation that made this call
    pub caller: Option<Frame>,
}

/// Shared pointer to a frame record
pub type Frame = Rc<FrameRecord>;

impl FrameRecord {
    /// Frame for an interpreted method activation
    pub fn interpreted(name: Symbol, module: Option<ModuleId>, caller: Option<Frame>) -> Frame {
        Rc::new(FrameRecord {
            kind: FrameKind::Interpreted,
            name: Some(name),
            module,
            caller,
        })
    }

    /// Synthetic frame (no executable), skipped by backtraces
    pub fn synthetic(kind: FrameKind, caller: Option<Frame>) -> Frame {
        Rc::new(FrameRecord {
            kind,
            name: None,
            module: None,
            caller,
        })
    }

    /// Whether this activation has no executable behind it
    pub fn is_synthetic(&self) -> bool {
        self.name.is_none()
    }

    /// Number of activations from here to the outermost one
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.caller.as_ref();
        while let Some(frame) = current {
            depth += 1;
            current = frame.caller.as_ref();
        }
        depth
    }
}

/// Walk the caller chain from `frame`, dropping the first `skip`
/// activations and every synthetic one.
pub fn backtrace(frame: &Frame, skip: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut current = Some(frame.clone());
    while let Some(f) = current {
        current = f.caller.clone();
        frames.push(f);
    }
    frames
        .into_iter()
        .skip(skip)
        .filter(|f| !f.is_synthetic())
        .collect()
}
