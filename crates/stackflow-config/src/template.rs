//! `{{ ... }}` expansion for plan files
//!
//! - `{{ env.NAME }}` / `{{ env.NAME | default }}` read the process environment
//! - `{{ name }}` / `{{ name | default }}` read the plan's `variables`
//! - `{{ id.attr }}` is left untouched; the reconciler resolves it from outputs

use crate::error::{ConfigError, Result};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TEMPLATE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*(?:\|\s*([^}]*?)\s*)?\}\}").unwrap()
});

/// Values available to expansion
pub struct Context<'a> {
    variables: &'a BTreeMap<String, Value>,
}

impl<'a> Context<'a> {
    pub fn new(variables: &'a BTreeMap<String, Value>) -> Self {
        Self { variables }
    }

    /// `Some(value)` for a resolvable template, `None` for a resource reference
    fn lookup(&self, name: &str, default: Option<&str>) -> Result<Option<Value>> {
        if let Some(var) = name.strip_prefix("env.") {
            return match std::env::var(var) {
                Ok(value) => Ok(Some(Value::String(value))),
                Err(_) => match default {
                    Some(d) => Ok(Some(Value::String(d.to_string()))),
                    None => Err(ConfigError::UndefinedEnv(var.to_string())),
                },
            };
        }

        if name.contains('.') {
            return Ok(None);
        }

        match self.variables.get(name) {
            Some(value) => Ok(Some(value.clone())),
            None => match default {
                Some(d) => Ok(Some(Value::String(d.to_string()))),
                None => Err(ConfigError::UndefinedVariable(name.to_string())),
            },
        }
    }

    /// Expand every string in `value`, recursively
    pub fn expand(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.expand_str(s),
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.expand(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut expanded = serde_yaml::Mapping::new();
                for (key, item) in map {
                    expanded.insert(key.clone(), self.expand(item)?);
                }
                Ok(Value::Mapping(expanded))
            }
            other => Ok(other.clone()),
        }
    }

    fn expand_str(&self, s: &str) -> Result<Value> {
        // A lone template keeps the variable's type: `nodes: "{{ nodes }}"` stays a number
        if let Some(caps) = TEMPLATE.captures(s) {
            if caps[0].len() == s.len() {
                let default = caps.get(2).map(|m| m.as_str());
                if let Some(value) = self.lookup(&caps[1], default)? {
                    return Ok(value);
                }
                return Ok(Value::String(s.to_string()));
            }
        }

        let mut result = String::with_capacity(s.len());
        let mut last = 0;
        for caps in TEMPLATE.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            result.push_str(&s[last..whole.start()]);
            let default = caps.get(2).map(|m| m.as_str());
            match self.lookup(&caps[1], default)? {
                Some(value) => result.push_str(&scalar_to_string(&value)),
                None => result.push_str(whole.as_str()),
            }
            last = whole.end();
        }
        result.push_str(&s[last..]);
        Ok(Value::String(result))
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
