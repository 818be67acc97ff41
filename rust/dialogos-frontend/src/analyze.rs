//! Static analysis passes run after parsing and before the interpreter ever
//! sees a [`Program`] (spec §7 `AnalyzeError`, `SPEC_FULL.md` §2).

use crate::ast::{Program, Task, COMPOSITE_COMMANDS};
use dialogos_core::value::Value;
use thiserror::Error;

/// The closed vocabulary of ≈28 commands (spec §1, §4.6).
pub const KNOWN_COMMANDS: &[&str] = &[
    "print",
    "clear",
    "sleep",
    "set",
    "unescape",
    "show_inserts",
    "random_choice",
    "join_list",
    "list_concat",
    "list_append",
    "list_remove",
    "list_index",
    "list_slice",
    "user_input",
    "user_choice",
    "await_insert",
    "label",
    "goto",
    "goto_map",
    "replace_map",
    "for",
    "serial",
    "parallel_wait",
    "parallel_race",
    "run_task",
    "delete",
    "delete_except",
    "math",
    "chat",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyzeError {
    #[error("line {line}: unknown command '{cmd}'")]
    UnknownCommand { line: usize, cmd: String },
    #[error("line {line}: '{cmd}' is missing required field '{field}'")]
    MissingField { line: usize, cmd: String, field: &'static str },
    #[error("line {line}: field '{field}' on '{cmd}' must be {expected}")]
    WrongShape { line: usize, cmd: String, field: &'static str, expected: &'static str },
    #[error("label '{label}' referenced at line {line} does not resolve within its task list")]
    UnresolvableLabel { line: usize, label: String },
}

/// Run every analyzer pass over `program`, returning every error found
/// (not just the first) so a user sees the whole picture at once.
pub fn analyze(program: &Program) -> Vec<AnalyzeError> {
    let mut errors = Vec::new();
    check_task_list(&program.order, &mut errors);
    for task in program.named_tasks.values() {
        check_task(task, &mut errors);
    }
    check_label_resolution(&program.order, &mut errors);
    for task in program.named_tasks.values() {
        if let Some(tasks) = &task.tasks {
            check_label_resolution(tasks, &mut errors);
        }
    }
    errors
}

fn check_task_list(tasks: &[Task], errors: &mut Vec<AnalyzeError>) {
    for task in tasks {
        check_task(task, errors);
    }
}

fn check_task(task: &Task, errors: &mut Vec<AnalyzeError>) {
    if !KNOWN_COMMANDS.contains(&task.cmd.as_str()) {
        errors.push(AnalyzeError::UnknownCommand { line: task.line, cmd: task.cmd.clone() });
        return;
    }

    check_required_fields(task, errors);

    if COMPOSITE_COMMANDS.contains(&task.cmd.as_str()) {
        if let Some(nested) = &task.tasks {
            check_task_list(nested, errors);
        }
    }
}

fn check_required_fields(task: &Task, errors: &mut Vec<AnalyzeError>) {
    let required: &[&'static str] = match task.cmd.as_str() {
        "print" => &["text"],
        "sleep" => &["seconds"],
        "set" => &["item", "output_name"],
        "unescape" => &["item", "output_name"],
        "random_choice" => &["list", "output_name"],
        "join_list" => &["list", "output_name"],
        "list_concat" => &["lists", "output_name"],
        "list_append" => &["list", "item", "output_name"],
        "list_remove" => &["list", "item", "output_name"],
        "list_index" => &["list", "index", "output_name"],
        "list_slice" => &["list", "from_index", "to_index", "output_name"],
        "user_input" => &["output_name"],
        "user_choice" => &["list", "output_name"],
        "await_insert" => &["name"],
        "label" => &["name"],
        "goto" => &["name"],
        "goto_map" => &["text", "target_maps"],
        "replace_map" => &["item", "output_name", "wildcard_maps"],
        "for" => &["name_list_map"],
        "run_task" => &["task_name"],
        "delete" => &["wildcards"],
        "delete_except" => &["wildcards"],
        "math" => &["input", "output_name"],
        "chat" => &["messages", "output_name"],
        _ => &[],
    };
    for field in required {
        if task.field(field).is_none() {
            errors.push(AnalyzeError::MissingField {
                line: task.line,
                cmd: task.cmd.clone(),
                field,
            });
        }
    }

    // Literal-shape checks only make sense when the field isn't a template
    // string waiting on runtime interpolation — arrays/maps are always
    // literal in this grammar (spec.md has no array/map interpolation).
    match task.cmd.as_str() {
        "goto_map" => expect_array_of_single_entry_maps(task, "target_maps", errors),
        "replace_map" => expect_array_of_single_entry_maps(task, "wildcard_maps", errors),
        "for" => {
            if let Some(Value::Map(_)) = task.field("name_list_map") {
                // ok
            } else if task.field("name_list_map").is_some() {
                errors.push(AnalyzeError::WrongShape {
                    line: task.line,
                    cmd: task.cmd.clone(),
                    field: "name_list_map",
                    expected: "an object of lists",
                });
            }
        }
        "delete" | "delete_except" => {
            if !matches!(task.field("wildcards"), Some(Value::List(_))) {
                errors.push(AnalyzeError::WrongShape {
                    line: task.line,
                    cmd: task.cmd.clone(),
                    field: "wildcards",
                    expected: "an array of patterns",
                });
            }
        }
        _ => {}
    }
}

fn expect_array_of_single_entry_maps(
    task: &Task,
    field: &'static str,
    errors: &mut Vec<AnalyzeError>,
) {
    match task.field(field) {
        Some(Value::List(items)) => {
            for item in items {
                let ok = matches!(item, Value::Map(m) if m.len() == 1);
                if !ok {
                    errors.push(AnalyzeError::WrongShape {
                        line: task.line,
                        cmd: task.cmd.clone(),
                        field,
                        expected: "an array of single-entry objects",
                    });
                    break;
                }
            }
        }
        Some(_) => errors.push(AnalyzeError::WrongShape {
            line: task.line,
            cmd: task.cmd.clone(),
            field,
            expected: "an array of single-entry objects",
        }),
        None => {}
    }
}

/// Pass (c) from `SPEC_FULL.md` §2: every `goto`/`goto_map` target that is a
/// *literal* label name must resolve within the same task list. `goto_map`
/// targets come from `target_maps` values, which are themselves literal
/// strings naming labels, not interpolation templates.
fn check_label_resolution(tasks: &[Task], errors: &mut Vec<AnalyzeError>) {
    let labels: Vec<&str> = tasks
        .iter()
        .filter(|t| t.cmd == "label")
        .filter_map(|t| t.field("name").and_then(Value::as_str))
        .collect();

    for task in tasks {
        match task.cmd.as_str() {
            "goto" => {
                if let Some(name) = task.field("name").and_then(Value::as_str) {
                    if !labels.contains(&name) {
                        errors.push(AnalyzeError::UnresolvableLabel {
                            line: task.line,
                            label: name.to_string(),
                        });
                    }
                }
            }
            "goto_map" => {
                if let Some(Value::List(maps)) = task.field("target_maps") {
                    for entry in maps {
                        if let Value::Map(m) = entry {
                            for (_, target) in m.iter() {
                                if let Value::String(name) = target {
                                    if !labels.contains(&name.as_str()) {
                                        errors.push(AnalyzeError::UnresolvableLabel {
                                            line: task.line,
                                            label: name.clone(),
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build_program;
    use crate::parser::Parser;

    fn program_from(src: &str) -> Program {
        let doc = Parser::parse_document(src).unwrap();
        build_program(&doc).unwrap()
    }

    #[test]
    fn unknown_command_is_flagged() {
        let program = program_from("{order: [{cmd: 'frobnicate'}]}");
        let errs = analyze(&program);
        assert!(matches!(errs[0], AnalyzeError::UnknownCommand { .. }));
    }

    #[test]
    fn missing_required_field_is_flagged() {
        let program = program_from("{order: [{cmd: 'print'}]}");
        let errs = analyze(&program);
        assert!(errs
            .iter()
            .any(|e| matches!(e, AnalyzeError::MissingField { field: &"text", .. })));
    }

    #[test]
    fn valid_program_has_no_errors() {
        let program = program_from(
            "{order: [{cmd: 'set', item: 'x', output_name: 'n'}, {cmd: 'print', text: '{n}'}]}",
        );
        assert!(analyze(&program).is_empty());
    }

    #[test]
    fn unresolvable_literal_label_is_flagged() {
        let program = program_from("{order: [{cmd: 'goto', name: '@nowhere'}]}");
        let errs = analyze(&program);
        assert!(matches!(errs[0], AnalyzeError::UnresolvableLabel { .. }));
    }

    #[test]
    fn label_forward_reference_resolves() {
        let program =
            program_from("{order: [{cmd: 'goto', name: '@end'}, {cmd: 'label', name: '@end'}]}");
        assert!(analyze(&program).is_empty());
    }

    #[test]
    fn nested_serial_task_is_checked_too() {
        let program =
            program_from("{order: [{cmd: 'serial', tasks: [{cmd: 'bogus'}]}]}");
        let errs = analyze(&program);
        assert!(matches!(errs[0], AnalyzeError::UnknownCommand { .. }));
    }
}
