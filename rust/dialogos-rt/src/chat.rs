//! OpenAI-compatible HTTP chat transport (spec §6), backed by `ureq` the
//! way the teacher's own VM intrinsics talk to HTTP endpoints.

use dialogos_core::value::{OrderedMap, Value};
use serde_json::{json, Value as Json};

use crate::cancel::CancelToken;
use crate::error::RuntimeError;

/// Fields the interpreter manages itself and must strip before a task's
/// fields are merged into the outgoing request body (spec §6).
const INTERNAL_FIELDS: &[&str] = &["cmd", "output_name", "line", "traceback_label", "messages"];

/// Extra attempts made when a response returns fewer choices than requested
/// via `n_outputs`, before giving up (§2 of the design ledger).
const MAX_SHORT_RESPONSE_RETRIES: u32 = 3;

pub struct ChatConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { endpoint: "http://localhost:8080".to_string(), api_key: "unused".to_string() }
    }
}

/// Build the request body: `completion_args` merged with per-task fields
/// (task fields win on conflict), internal keys stripped, `extra_body`
/// flattened into the top level.
pub fn build_request_body(
    completion_args: &OrderedMap,
    messages: &Value,
    task_fields: &OrderedMap,
) -> Json {
    let mut body = serde_json::Map::new();
    for (k, v) in completion_args.iter() {
        body.insert(k.to_string(), value_to_json(v));
    }
    for (k, v) in task_fields.iter() {
        if INTERNAL_FIELDS.contains(&k) || k == "extra_body" {
            continue;
        }
        body.insert(k.to_string(), value_to_json(v));
    }
    if let Some(Value::Map(extra)) = task_fields.get("extra_body") {
        for (k, v) in extra.iter() {
            body.insert(k.to_string(), value_to_json(v));
        }
    }
    body.insert("messages".to_string(), value_to_json(messages));
    Json::Object(body)
}

fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in m.iter() {
                obj.insert(k.to_string(), value_to_json(v));
            }
            Json::Object(obj)
        }
    }
}

/// Run a (possibly retried) chat completion request and return the list of
/// completion texts (one per choice).
pub fn complete(
    config: &ChatConfig,
    mut body: Json,
    cancel: &CancelToken,
) -> Result<Vec<String>, RuntimeError> {
    let wants = body.get("n_outputs").and_then(Json::as_u64).map(|n| n as usize);
    if let Some(obj) = body.as_object_mut() {
        obj.remove("n_outputs");
        if let Some(n) = wants {
            obj.insert("n".to_string(), json!(n));
        }
    }
    let streaming = body.get("stream").and_then(Json::as_bool).unwrap_or(false);

    let mut attempts = 0;
    loop {
        cancel.check()?;
        let outputs = if streaming {
            send_streaming(config, &body)?
        } else {
            send_once(config, &body)?
        };
        let satisfied = wants.map(|n| outputs.len() >= n).unwrap_or(true);
        if satisfied || attempts >= MAX_SHORT_RESPONSE_RETRIES {
            return Ok(outputs);
        }
        attempts += 1;
    }
}

fn send_once(config: &ChatConfig, body: &Json) -> Result<Vec<String>, RuntimeError> {
    let url = format!("{}/v1/chat/completions", config.endpoint.trim_end_matches('/'));
    let response = ureq::post(&url)
        .set("Authorization", &format!("Bearer {}", config.api_key))
        .set("Content-Type", "application/json")
        .send_json(body.clone())
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;
    let parsed: Json = response
        .into_json()
        .map_err(|e| RuntimeError::Transport(format!("malformed response: {e}")))?;
    extract_choices(&parsed)
}

fn send_streaming(config: &ChatConfig, body: &Json) -> Result<Vec<String>, RuntimeError> {
    use std::io::{BufRead, BufReader};

    let url = format!("{}/v1/chat/completions", config.endpoint.trim_end_matches('/'));
    let response = ureq::post(&url)
        .set("Authorization", &format!("Bearer {}", config.api_key))
        .set("Content-Type", "application/json")
        .send_json(body.clone())
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;

    let reader = BufReader::new(response.into_reader());
    let mut choices: Vec<String> = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data == "[DONE]" {
            break;
        }
        let Ok(chunk) = serde_json::from_str::<Json>(data) else { continue };
        let Some(chunk_choices) = chunk.get("choices").and_then(Json::as_array) else { continue };
        for (i, choice) in chunk_choices.iter().enumerate() {
            let delta = choice.get("delta").and_then(|d| d.get("content")).and_then(Json::as_str);
            if let Some(delta) = delta {
                if choices.len() <= i {
                    choices.resize(i + 1, String::new());
                }
                choices[i].push_str(delta);
            }
        }
    }
    Ok(choices)
}

fn extract_choices(response: &Json) -> Result<Vec<String>, RuntimeError> {
    let choices = response
        .get("choices")
        .and_then(Json::as_array)
        .ok_or_else(|| RuntimeError::Transport("response missing 'choices'".to_string()))?;
    choices
        .iter()
        .map(|choice| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Json::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| RuntimeError::Transport("choice missing message content".to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_body_merges_and_strips_internal_fields() {
        let mut completion_args = OrderedMap::new();
        completion_args.insert("model", Value::String("gpt-test".into()));
        completion_args.insert("temperature", Value::Float(0.7));

        let mut task_fields = OrderedMap::new();
        task_fields.insert("cmd", Value::String("chat".into()));
        task_fields.insert("output_name", Value::String("reply".into()));
        task_fields.insert("line", Value::Int(12));
        task_fields.insert("temperature", Value::Float(1.0));
        let mut extra = OrderedMap::new();
        extra.insert("top_p", Value::Float(0.9));
        task_fields.insert("extra_body", Value::Map(extra));

        let messages = Value::List(vec![]);
        let body = build_request_body(&completion_args, &messages, &task_fields);

        assert_eq!(body["model"], json!("gpt-test"));
        assert_eq!(body["temperature"], json!(1.0));
        assert_eq!(body["top_p"], json!(0.9));
        assert!(body.get("cmd").is_none());
        assert!(body.get("output_name").is_none());
        assert!(body.get("line").is_none());
        assert!(body.get("extra_body").is_none());
    }

    #[test]
    fn extract_choices_reads_message_content() {
        let response = json!({
            "choices": [
                {"message": {"content": "hi"}},
                {"message": {"content": "there"}}
            ]
        });
        let choices = extract_choices(&response).unwrap();
        assert_eq!(choices, vec!["hi".to_string(), "there".to_string()]);
    }

    #[test]
    fn extract_choices_errors_on_missing_field() {
        let response = json!({"nope": true});
        assert!(extract_choices(&response).is_err());
    }
}
