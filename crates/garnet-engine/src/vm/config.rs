//! Runtime options and user configuration variables

use crate::vm::defaults::{
    DEFAULT_CODE_CACHE_SIZE, DEFAULT_HANDLE_CAPACITY, DEFAULT_JIT_QUEUE_CAPACITY,
    DEFAULT_STACK_SIZE, MAX_STACK_SIZE,
};
use std::collections::BTreeMap;

/// Options controlling a runtime instance
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Stack buffer size for each foreign call context (bytes)
    pub stack_size: usize,
    /// Upper bound for `stack_size`; larger requests fail as resource exhaustion
    pub max_stack_size: usize,
    /// Initial capacity of each handle table
    pub handle_capacity: usize,
    /// Whether methods may be JIT compiled at all
    pub jit_enabled: bool,
    /// Compile on the background compiler thread instead of inline
    pub jit_background: bool,
    /// Bound of the background compiler's request queue
    pub jit_queue_capacity: usize,
    /// Upper bound on the total bytes of compiled code
    pub code_cache_size: usize,
    /// Maximum number of live heap objects (None = unbounded)
    pub heap_limit: Option<usize>,
    /// User variables (`section.name` -> raw value)
    pub user_variables: BTreeMap<String, String>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_stack_size: MAX_STACK_SIZE,
            handle_capacity: DEFAULT_HANDLE_CAPACITY,
            jit_enabled: true,
            jit_background: true,
            jit_queue_capacity: DEFAULT_JIT_QUEUE_CAPACITY,
            code_cache_size: DEFAULT_CODE_CACHE_SIZE,
            heap_limit: None,
            user_variables: BTreeMap::new(),
        }
    }
}

/// A typed user configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// The raw text parsed as an integer
    Number(i64),
    /// The raw text was a truthy word ("true", "yes", "on")
    True,
    /// Anything else, verbatim
    Str(String),
}

impl ConfigValue {
    fn parse(raw: &str) -> Self {
        if let Ok(n) = raw.trim().parse::<i64>() {
            return ConfigValue::Number(n);
        }
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => ConfigValue::True,
            _ => ConfigValue::Str(raw.to_string()),
        }
    }
}

impl VmOptions {
    /// Set a user variable, returning the updated options
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_variables.insert(name.into(), value.into());
        self
    }

    /// Look up a single user variable
    pub fn config_item(&self, name: &str) -> Option<ConfigValue> {
        self.user_variables.get(name).map(|raw| ConfigValue::parse(raw))
    }

    /// All `(name, value)` pairs whose name starts with `section.`
    pub fn config_section(&self, section: &str) -> Vec<(String, String)> {
        let prefix = format!("{}.", section);
        self.user_variables
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = VmOptions::default();
        assert_eq!(options.stack_size, DEFAULT_STACK_SIZE);
        assert!(options.jit_enabled);
        assert!(options.user_variables.is_empty());
    }

    #[test]
    fn test_config_item_typing() {
        let options = VmOptions::default()
            .with_variable("gc.young_size", "4096")
            .with_variable("jit.inline", "yes")
            .with_variable("jit.log", "/tmp/jit.log");

        assert_eq!(options.config_item("gc.young_size"), Some(ConfigValue::Number(4096)));
        assert_eq!(options.config_item("jit.inline"), Some(ConfigValue::True));
        assert_eq!(
            options.config_item("jit.log"),
            Some(ConfigValue::Str("/tmp/jit.log".to_string()))
        );
        assert_eq!(options.config_item("missing"), None);
    }

    #[test]
    fn test_config_section() {
        let options = VmOptions::default()
            .with_variable("jit.inline", "yes")
            .with_variable("jit.log", "off")
            .with_variable("jitter.x", "1")
            .with_variable("gc.young_size", "4096");

        let section = options.config_section("jit");
        assert_eq!(
            section,
            vec![
                ("jit.inline".to_string(), "yes".to_string()),
                ("jit.log".to_string(), "off".to_string()),
            ]
        );
    }
}
