//! Shared fields.
//!
//! A small key/value document owned by the server and mirrored to every
//! client. Mutations go through the setters so the server knows when to
//! broadcast; the `quiet` variants change the value without scheduling a
//! broadcast.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default)]
pub struct SharedFields {
    values: Map<String, Value>,
    dirty: bool,
}

impl SharedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn snapshot(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sets a field and schedules a broadcast.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.set_quiet(key, value);
        self.dirty = true;
    }

    /// Sets a field without scheduling a broadcast.
    pub fn set_quiet(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Sets `item` inside the object stored at `key`, creating the object if
    /// needed. A non-object value at `key` is replaced.
    pub fn set_item(&mut self, key: &str, item: impl Into<String>, value: Value) {
        self.set_item_quiet(key, item, value);
        self.dirty = true;
    }

    pub fn set_item_quiet(&mut self, key: &str, item: impl Into<String>, value: Value) {
        let slot = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(item.into(), value);
        }
    }

    /// Removes a field. Only a real removal schedules a broadcast.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.values.remove(key);
        if old.is_some() {
            self.dirty = true;
        }
        old
    }

    /// Removes `item` from the object at `key`.
    pub fn remove_item(&mut self, key: &str, item: &str) -> Option<Value> {
        let old = self
            .values
            .get_mut(key)
            .and_then(Value::as_object_mut)
            .and_then(|m| m.remove(item));
        if old.is_some() {
            self.dirty = true;
        }
        old
    }

    /// Forces a broadcast on the next step.
    pub fn touch(&mut self) {
        self.dirty = true;
    }

    /// Returns the snapshot to broadcast, if anything changed, and clears the
    /// dirty flag.
    pub fn take_dirty(&mut self) -> Option<Map<String, Value>> {
        if std::mem::take(&mut self.dirty) {
            Some(self.values.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setters_mark_dirty_and_quiet_ones_do_not() {
        let mut f = SharedFields::new();
        f.set_quiet("map", json!("arena"));
        assert!(f.take_dirty().is_none());

        f.set_item("scores", "s1", json!(3));
        let snap = f.take_dirty().unwrap();
        assert_eq!(snap["scores"], json!({"s1": 3}));
        assert!(!f.is_dirty());
    }

    #[test]
    fn removing_missing_keys_is_not_a_change() {
        let mut f = SharedFields::new();
        assert!(f.remove("nope").is_none());
        assert!(f.remove_item("nope", "x").is_none());
        assert!(!f.is_dirty());

        f.set_item_quiet("scores", "s1", json!(1));
        assert_eq!(f.remove_item("scores", "s1"), Some(json!(1)));
        assert!(f.is_dirty());
    }
}
