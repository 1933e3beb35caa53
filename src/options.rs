use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::delivery::error::PlingError;

/// Named options handed to gateways and middlewares on construction.
///
/// Values may be native JSON values or strings (as produced by environment
/// overrides); the typed getters accept both. Keys nobody asks for are kept
/// as they are so provider specific code can still read them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Fails with the first missing key.
    pub fn require(&self, keys: &[&str]) -> Result<(), PlingError> {
        match keys.iter().find(|key| !self.contains(key)) {
            Some(key) => Err(PlingError::Argument(format!("Option :{} is missing", key))),
            None => Ok(()),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<String>, PlingError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(Value::Number(value)) => Ok(Some(value.to_string())),
            Some(other) => Err(invalid(key, "a string", other)),
        }
    }

    pub fn str_or(&self, key: &str, default: &str) -> Result<String, PlingError> {
        Ok(self.str(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, PlingError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(value)) => value
                .as_u64()
                .ok_or_else(|| invalid(key, "a positive integer", &Value::Number(value.clone()))),
            Some(Value::String(value)) => value
                .trim()
                .parse()
                .map_err(|_| invalid(key, "a positive integer", &Value::String(value.clone()))),
            Some(other) => Err(invalid(key, "a positive integer", other)),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, PlingError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(value)) => match value.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(invalid(key, "a boolean", &Value::String(value.clone()))),
            },
            Some(other) => Err(invalid(key, "a boolean", other)),
        }
    }

    /// Durations are given in seconds.
    pub fn secs_or(&self, key: &str, default: Duration) -> Result<Duration, PlingError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(value)) => value
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid(key, "a duration in seconds", &Value::Number(value.clone()))),
            _ => Ok(Duration::from_secs(self.u64_or(key, default.as_secs())?)),
        }
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn invalid(key: &str, expected: &str, value: &Value) -> PlingError {
    PlingError::Argument(format!(
        "Option :{} must be {}, got {}",
        key, expected, value
    ))
}
