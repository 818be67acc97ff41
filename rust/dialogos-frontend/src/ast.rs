//! Program AST (spec §3): tasks carry their source line; composite commands
//! own a recursively-parsed sub-task list so every nested task, at any
//! depth, still has its own line for diagnostics.

use crate::parser::{JsonValue, Spanned};
use dialogos_core::value::{OrderedMap, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AstError {
    #[error("line {line}: task is missing required 'cmd' field")]
    MissingCmd { line: usize },
    #[error("line {line}: 'cmd' must be a string")]
    CmdNotString { line: usize },
    #[error("line {line}: expected an object")]
    ExpectedObject { line: usize },
    #[error("line {line}: expected an array for '{field}'")]
    ExpectedArray { line: usize, field: &'static str },
    #[error("top-level document must be an object")]
    RootNotObject,
}

/// Command names whose `tasks` field is itself a list of sub-tasks.
pub const COMPOSITE_COMMANDS: &[&str] = &["serial", "for", "parallel_wait", "parallel_race"];

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub line: usize,
    pub cmd: String,
    /// Every field except `cmd` and (for composite commands) `tasks`.
    pub fields: OrderedMap,
    /// Populated only for `serial` / `for` / `parallel_wait` / `parallel_race`.
    pub tasks: Option<Vec<Task>>,
}

impl Task {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub order: Vec<Task>,
    pub named_tasks: HashMap<String, Task>,
    pub default_state: OrderedMap,
    pub completion_args: OrderedMap,
}

pub fn build_program(doc: &Spanned<JsonValue>) -> Result<Program, AstError> {
    let root = doc.value.as_object().ok_or(AstError::RootNotObject)?;

    let order = match root.iter().find(|(k, _)| k == "order") {
        Some((_, v)) => parse_task_list(v, "order")?,
        None => Vec::new(),
    };

    let mut named_tasks = HashMap::new();
    if let Some((_, v)) = root.iter().find(|(k, _)| k == "named_tasks") {
        let fields = v.value.as_object().ok_or(AstError::ExpectedObject { line: v.line })?;
        for (name, task_val) in fields {
            named_tasks.insert(name.clone(), build_task(task_val)?);
        }
    }

    let default_state = match root.iter().find(|(k, _)| k == "default_state") {
        Some((_, v)) => json_to_map(v)?,
        None => OrderedMap::new(),
    };

    let completion_args = match root.iter().find(|(k, _)| k == "completion_args") {
        Some((_, v)) => json_to_map(v)?,
        None => OrderedMap::new(),
    };

    Ok(Program { order, named_tasks, default_state, completion_args })
}

fn parse_task_list(v: &Spanned<JsonValue>, field: &'static str) -> Result<Vec<Task>, AstError> {
    let JsonValue::Array(items) = &v.value else {
        return Err(AstError::ExpectedArray { line: v.line, field });
    };
    items.iter().map(build_task).collect()
}

fn json_to_map(v: &Spanned<JsonValue>) -> Result<OrderedMap, AstError> {
    match json_to_value(v) {
        Value::Map(m) => Ok(m),
        _ => Err(AstError::ExpectedObject { line: v.line }),
    }
}

fn build_task(v: &Spanned<JsonValue>) -> Result<Task, AstError> {
    let fields_src = v.value.as_object().ok_or(AstError::ExpectedObject { line: v.line })?;

    let cmd = match fields_src.iter().find(|(k, _)| k == "cmd") {
        Some((_, cmd_val)) => match &cmd_val.value {
            JsonValue::String(s) => s.clone(),
            _ => return Err(AstError::CmdNotString { line: cmd_val.line }),
        },
        None => return Err(AstError::MissingCmd { line: v.line }),
    };

    let tasks = if COMPOSITE_COMMANDS.contains(&cmd.as_str()) {
        match fields_src.iter().find(|(k, _)| k == "tasks") {
            Some((_, tasks_val)) => Some(parse_task_list(tasks_val, "tasks")?),
            None => Some(Vec::new()),
        }
    } else {
        None
    };

    let mut fields = OrderedMap::new();
    for (k, val) in fields_src {
        if k == "cmd" || (k == "tasks" && tasks.is_some()) {
            continue;
        }
        fields.insert(k.clone(), json_to_value(val));
    }

    Ok(Task { line: v.line, cmd, fields, tasks })
}

/// Drop span/line information and recursively flatten to a plain value —
/// used for fields that aren't executable task lists (`item`, `list`,
/// `target_maps`, `wildcard_maps`, `name_list_map`, …).
pub fn json_to_value(v: &Spanned<JsonValue>) -> Value {
    match &v.value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Int(i) => Value::Int(*i),
        JsonValue::Float(f) => Value::Float(*f),
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        JsonValue::Object(fields) => {
            let mut m = OrderedMap::new();
            for (k, val) in fields {
                m.insert(k.clone(), json_to_value(val));
            }
            Value::Map(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn builds_simple_program() {
        let src = "{order: [{cmd: 'set', item: 'tom', output_name: 'name'}, {cmd: 'print', text: 'hi {name}'}]}";
        let doc = Parser::parse_document(src).unwrap();
        let program = build_program(&doc).unwrap();
        assert_eq!(program.order.len(), 2);
        assert_eq!(program.order[0].cmd, "set");
        assert_eq!(program.order[1].line, 1);
    }

    #[test]
    fn nested_composite_tasks_carry_their_own_lines() {
        let src = "{order: [\n  {cmd: 'serial', tasks: [\n    {cmd: 'print', text: 'a'}\n  ]}\n]}";
        let doc = Parser::parse_document(src).unwrap();
        let program = build_program(&doc).unwrap();
        let serial = &program.order[0];
        assert_eq!(serial.cmd, "serial");
        let nested = serial.tasks.as_ref().unwrap();
        assert_eq!(nested[0].line, 3);
    }

    #[test]
    fn missing_cmd_is_an_error() {
        let src = "{order: [{text: 'no cmd here'}]}";
        let doc = Parser::parse_document(src).unwrap();
        let result = build_program(&doc);
        assert!(matches!(result, Err(AstError::MissingCmd { .. })));
    }

    #[test]
    fn named_tasks_are_parsed_by_name() {
        let src = "{order: [], named_tasks: {greet: {cmd: 'print', text: 'hi'}}}";
        let doc = Parser::parse_document(src).unwrap();
        let program = build_program(&doc).unwrap();
        assert!(program.named_tasks.contains_key("greet"));
    }
}
