//! # Execution Context
//!
//! Key/value store shared by every step of one job run. Values are kept as
//! `serde_json::Value` so steps written against different domain types can
//! still exchange progress, timings and results.
//!
//! The map is safe for concurrent access, but it gives no ordering guarantee
//! across keys: steps running side by side inside a split must coordinate
//! multi-key updates themselves. Use [`ExecutionContext::update`] for
//! read-modify-write of a single key.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BatchError, BatchResult};

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: DashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn insert_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> BatchResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| BatchError::InvalidState(format!("Unserializable context value: {e}")))?;
        self.values.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.values.clear();
    }

    /// Atomically replace the value stored under `key`.
    ///
    /// The closure runs while the key's shard is locked, so it must not touch
    /// the context itself.
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut entry = self.values.entry(key.to_string()).or_insert(Value::Null);
        let current = if entry.is_null() { None } else { Some(&*entry) };
        let next = f(current);
        *entry = next.clone();
        next
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Durations are stored as whole milliseconds.
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.values
            .get(key)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
    }

    pub fn insert_duration(&self, key: impl Into<String>, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.values.insert(key.into(), Value::from(millis));
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> BatchResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                BatchError::InvalidState(format!("Context value '{key}' has unexpected shape: {e}"))
            }),
        }
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl From<HashMap<String, Value>> for ExecutionContext {
    fn from(map: HashMap<String, Value>) -> Self {
        Self {
            values: map.into_iter().collect(),
        }
    }
}
