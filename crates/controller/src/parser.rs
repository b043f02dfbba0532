//! Parser for planner responses.
//!
//! Extracts the JSON plan from raw LLM text. Accepted shape:
//!
//! ```json
//! {"reasoning": "...", "plan": "...", "tasks": [{"action": "gather", "parameters": {...}}]}
//! ```
//!
//! The object may be wrapped in a Markdown code fence or surrounded by prose.

use crew_core::{PlanningError, PlanningResult, Task};
use serde_json::{Map, Value};

/// Parse a planner response for `goal`.
pub fn parse_plan_response(goal: &str, response: &str) -> Result<PlanningResult, PlanningError> {
    let response_trimmed = response.trim();
    if response_trimmed.is_empty() {
        return Err(PlanningError::Malformed("empty response".into()));
    }

    let json_text = extract_json(response_trimmed)
        .ok_or_else(|| PlanningError::Malformed("no JSON object in response".into()))?;
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| PlanningError::Malformed(format!("invalid JSON: {}", e)))?;
    let Value::Object(root) = value else {
        return Err(PlanningError::Malformed("plan is not a JSON object".into()));
    };

    let reasoning = string_field(&root, "reasoning");
    let plan = string_field(&root, "plan");

    let tasks = match root.get("tasks") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_task).collect(),
        Some(_) => return Err(PlanningError::Malformed("'tasks' is not an array".into())),
        None => Vec::new(),
    };

    let description = if plan.is_empty() { goal.to_string() } else { plan };
    Ok(PlanningResult::new(description, reasoning, tasks))
}

fn string_field(root: &Map<String, Value>, key: &str) -> String {
    root.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Task objects without an `action` are skipped.
fn parse_task(value: &Value) -> Option<Task> {
    let obj = value.as_object()?;
    let action = obj.get("action")?.as_str()?.trim();
    if action.is_empty() {
        return None;
    }
    let mut task = Task::new(action);
    if let Some(Value::Object(params)) = obj.get("parameters") {
        task.params = params.clone();
    }
    Some(task)
}

/// Strip a code fence, then take the outermost `{ ... }` span.
fn extract_json(response: &str) -> Option<&str> {
    let mut text = response;
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
