use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sleuth_core::error::{Result, SleuthError};
use sleuth_core::types::ChatMessage;

/// How a field combines an incoming value with the one already in state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Last writer wins.
    Overwrite,
    /// Incoming values are concatenated after the existing ones. An array
    /// contributes its elements; any other value is pushed as one element.
    Append,
}

/// Declared fields of a graph's state and their merge policies.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: HashMap<String, MergePolicy>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(mut self, field: &str) -> Self {
        self.fields.insert(field.to_string(), MergePolicy::Overwrite);
        self
    }

    pub fn append(mut self, field: &str) -> Self {
        self.fields.insert(field.to_string(), MergePolicy::Append);
        self
    }

    pub fn policy(&self, field: &str) -> Option<MergePolicy> {
        self.fields.get(field).copied()
    }

    /// Apply a partial update, entry by entry, in the order it was built.
    /// Nothing is applied if any entry names an undeclared field.
    pub fn merge(&self, state: &mut WorkflowState, update: StateUpdate) -> Result<()> {
        if let Some((field, _)) = update
            .entries
            .iter()
            .find(|(field, _)| !self.fields.contains_key(field))
        {
            return Err(SleuthError::UndeclaredField(field.clone()));
        }

        for (field, value) in update.entries {
            match self.fields[&field] {
                MergePolicy::Overwrite => {
                    state.data.insert(field, value);
                }
                MergePolicy::Append => {
                    let slot = state
                        .data
                        .entry(field)
                        .or_insert_with(|| serde_json::Value::Array(vec![]));
                    if !slot.is_array() {
                        *slot = serde_json::Value::Array(vec![slot.take()]);
                    }
                    if let serde_json::Value::Array(items) = slot {
                        match value {
                            serde_json::Value::Array(incoming) => items.extend(incoming),
                            other => items.push(other),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// The record threaded through every node of a graph run.
///
/// Keys are field names; values are JSON. Nodes never mutate it directly;
/// they return a `StateUpdate` that the executor merges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    data: HashMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state by merging `update` into an empty one.
    pub fn from_update(schema: &StateSchema, update: StateUpdate) -> Result<Self> {
        let mut state = Self::new();
        schema.merge(&mut state, update)?;
        Ok(state)
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.data.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// A counter field; absent counts as zero.
    pub fn count(&self, key: &str) -> usize {
        self.data.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as usize
    }

    /// An append field of strings, in merge order.
    pub fn strings(&self, key: &str) -> Vec<String> {
        self.items(key)
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// An append field of messages, in merge order.
    pub fn messages(&self, key: &str) -> Vec<ChatMessage> {
        self.items(key)
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn last_message(&self, key: &str) -> Option<ChatMessage> {
        self.items(key)
            .last()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn items(&self, key: &str) -> &[serde_json::Value] {
        self.data
            .get(key)
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }
}

/// A partial update returned by a node: only the fields it changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    entries: Vec<(String, serde_json::Value)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: serde_json::Value) -> Self {
        self.entries.push((field.to_string(), value));
        self
    }

    pub fn text(self, field: &str, value: impl Into<String>) -> Self {
        self.set(field, serde_json::Value::String(value.into()))
    }

    pub fn flag(self, field: &str, value: bool) -> Self {
        self.set(field, serde_json::Value::Bool(value))
    }

    pub fn counter(self, field: &str, value: usize) -> Self {
        self.set(field, serde_json::json!(value))
    }

    pub fn message(self, field: &str, message: &ChatMessage) -> Self {
        self.set(field, serde_json::json!(message))
    }

    pub fn messages(self, field: &str, messages: &[ChatMessage]) -> Self {
        self.set(field, serde_json::json!(messages))
    }

    /// Append another update's entries after this one's.
    pub fn extend(&mut self, other: StateUpdate) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fields touched, in entry order.
    pub fn fields(&self) -> Vec<&str> {
        self.entries.iter().map(|(f, _)| f.as_str()).collect()
    }
}
