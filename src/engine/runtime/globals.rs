// SPDX-License-Identifier: MIT

//! Process-wide values shared by every run
//!
//! The only mutable state tasks share on purpose. Writes are last-write-wins.

use crate::engine::applet::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    /// Private to the task with this checksum
    Task(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    pub scope: Scope,
    pub name: String,
}

impl ScopedKey {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            scope: Scope::Global,
            name: name.into(),
        }
    }

    pub fn task(checksum: u64, name: impl Into<String>) -> Self {
        Self {
            scope: Scope::Task(checksum),
            name: name.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct GlobalValues {
    values: RwLock<HashMap<ScopedKey, Value>>,
}

impl GlobalValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ScopedKey) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(|p| p.into_inner());
        values.get(key).cloned()
    }

    /// Store `value`, returning the previous one
    pub fn set(&self, key: ScopedKey, value: Value) -> Option<Value> {
        let mut values = self.values.write().unwrap_or_else(|p| p.into_inner());
        values.insert(key, value)
    }

    pub fn get_or_insert_with(&self, key: ScopedKey, init: impl FnOnce() -> Value) -> Value {
        let mut values = self.values.write().unwrap_or_else(|p| p.into_inner());
        values.entry(key).or_insert_with(init).clone()
    }

    pub fn remove(&self, key: &ScopedKey) -> Option<Value> {
        let mut values = self.values.write().unwrap_or_else(|p| p.into_inner());
        values.remove(key)
    }

    /// Drop every value private to one task
    pub fn clear_task(&self, checksum: u64) {
        let mut values = self.values.write().unwrap_or_else(|p| p.into_inner());
        values.retain(|key, _| key.scope != Scope::Task(checksum));
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_are_isolated() {
        let globals = GlobalValues::new();
        globals.set(ScopedKey::global("count"), Value::Int(1));
        globals.set(ScopedKey::task(7, "count"), Value::Int(2));
        assert_eq!(globals.get(&ScopedKey::global("count")), Some(Value::Int(1)));
        assert_eq!(globals.get(&ScopedKey::task(7, "count")), Some(Value::Int(2)));
        assert_eq!(globals.get(&ScopedKey::task(8, "count")), None);
    }

    #[test]
    fn test_last_write_wins() {
        let globals = GlobalValues::new();
        let key = ScopedKey::global("x");
        assert_eq!(globals.set(key.clone(), Value::from("a")), None);
        assert_eq!(globals.set(key.clone(), Value::from("b")), Some(Value::from("a")));
        assert_eq!(globals.get(&key), Some(Value::from("b")));
    }

    #[test]
    fn test_get_or_insert_with_keeps_existing() {
        let globals = GlobalValues::new();
        let key = ScopedKey::global("x");
        assert_eq!(globals.get_or_insert_with(key.clone(), || Value::Int(1)), Value::Int(1));
        assert_eq!(globals.get_or_insert_with(key, || Value::Int(2)), Value::Int(1));
    }

    #[test]
    fn test_clear_task() {
        let globals = GlobalValues::new();
        globals.set(ScopedKey::task(1, "a"), Value::Int(1));
        globals.set(ScopedKey::task(1, "b"), Value::Int(1));
        globals.set(ScopedKey::global("a"), Value::Int(1));
        globals.clear_task(1);
        assert_eq!(globals.len(), 1);
    }
}
