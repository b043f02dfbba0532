//! Tasks and action outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Where a delegated task came from, so the worker can report back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOrigin {
    pub assigned_by: String,
    pub plan_id: Uuid,
    /// Index of the task inside the originating plan.
    pub index: usize,
    #[serde(default)]
    pub attempt: u32,
}

/// One atomic unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub action: String,
    #[serde(default, rename = "parameters")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TaskOrigin>,
}

impl Task {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
            origin: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Integer parameter. Whole-number floats are accepted since planners
    /// often emit `10.0` for `10`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let value = self.params.get(key)?;
        if let Some(i) = value.as_i64() {
            return Some(i);
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f.is_finite() => Some(f as i64),
            _ => value.as_str().and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// One-line human description, e.g. `gather {quantity: 10, resource: "iron"}`.
    pub fn describe(&self) -> String {
        if self.params.is_empty() {
            return self.action.clone();
        }
        let mut keys: Vec<&String> = self.params.keys().collect();
        keys.sort();
        let parts: Vec<String> = keys
            .into_iter()
            .map(|k| format!("{}: {}", k, self.params[k]))
            .collect();
        format!("{} {{{}}}", self.action, parts.join(", "))
    }
}

/// Outcome reported by an action when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub requires_replanning: bool,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            requires_replanning: false,
        }
    }

    /// Failure that invalidates the rest of the plan.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            requires_replanning: true,
        }
    }

    /// Failure the plan can continue past.
    pub fn failure_no_replan(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            requires_replanning: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_getters() {
        let task = Task::new("gather")
            .with_param("resource", "iron")
            .with_param("quantity", 10.0)
            .with_param("count", "3")
            .with_param("urgent", true);

        assert_eq!(task.get_str("resource"), Some("iron"));
        assert_eq!(task.get_i64("quantity"), Some(10));
        assert_eq!(task.get_i64("count"), Some(3));
        assert_eq!(task.get_i64_or("missing", 1), 1);
        assert_eq!(task.get_bool("urgent"), Some(true));
        assert!(task.has("resource"));
        assert!(!task.has("position"));
    }

    #[test]
    fn test_wire_shape_uses_parameters_key() {
        let task: Task = serde_json::from_value(json!({
            "action": "place",
            "parameters": {"block": "stone", "x": 1, "y": 2, "z": 3}
        }))
        .unwrap();
        assert_eq!(task.action, "place");
        assert_eq!(task.get_i64("z"), Some(3));
        assert!(task.origin.is_none());

        let back = serde_json::to_value(&task).unwrap();
        assert!(back.get("origin").is_none());
        assert_eq!(back["parameters"]["block"], "stone");
    }

    #[test]
    fn test_failure_defaults_to_replanning() {
        assert!(ActionResult::failure("blocked").requires_replanning);
        assert!(!ActionResult::failure_no_replan("skip").requires_replanning);
        assert!(!ActionResult::success("ok").requires_replanning);
    }
}
