//! Per-binding plugin configuration.

use toml::{Table, Value};

/// Reserved key that turns a binding off without removing it.
pub const DISABLE_KEY: &str = "disable";

/// Configuration attached to one plugin binding.
///
/// Wraps the TOML table found under `plugins."name[:version]"` in a build
/// section. Accessors return `None` for missing keys or mismatched types so
/// plugins can fall back to their own defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfig {
    values: Table,
}

impl PluginConfig {
    pub fn new(values: Table) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_integer)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Whether the binding carries `disable = true`.
    pub fn is_disabled(&self) -> bool {
        self.get_bool(DISABLE_KEY).unwrap_or(false)
    }

    pub fn table(&self) -> &Table {
        &self.values
    }

    /// JSON rendering used by the external plugin protocol.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}

impl From<Table> for PluginConfig {
    fn from(values: Table) -> Self {
        Self::new(values)
    }
}
