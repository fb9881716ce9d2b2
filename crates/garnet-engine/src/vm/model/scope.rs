//! Lexical scopes

use crate::vm::value::ModuleId;
use std::rc::Rc;

/// A lexical scope: the module whose body is being executed plus its
/// enclosing scopes
#[derive(Debug, Clone)]
pub struct StaticScope {
    module: ModuleId,
    current_module: Option<ModuleId>,
    parent: Option<Rc<StaticScope>>,
}

impl StaticScope {
    /// Outermost scope for `module`
    pub fn top(module: ModuleId) -> Rc<Self> {
        Rc::new(Self {
            module,
            current_module: None,
            parent: None,
        })
    }

    /// Scope for a module body nested inside `parent`
    pub fn nested(module: ModuleId, parent: &Rc<StaticScope>) -> Rc<Self> {
        Rc::new(Self {
            module,
            current_module: None,
            parent: Some(parent.clone()),
        })
    }

    /// Same scope, but methods are defined into `module` (class_eval style)
    pub fn with_current_module(&self, module: ModuleId) -> Rc<Self> {
        Rc::new(Self {
            module: self.module,
            current_module: Some(module),
            parent: self.parent.clone(),
        })
    }

    /// Module of this lexical level
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Enclosing scope
    pub fn parent(&self) -> Option<&Rc<StaticScope>> {
        self.parent.as_ref()
    }

    /// Module that receives `def` in this scope
    pub fn for_method_definition(&self) -> ModuleId {
        self.current_module.unwrap_or(self.module)
    }

    /// This scope and its parents, innermost first
    pub fn chain(&self) -> impl Iterator<Item = &StaticScope> + '_ {
        std::iter::successors(Some(self), |scope| scope.parent.as_deref())
    }
}
