//! End-to-end task interpreter scenarios, matching each of the six
//! "Input -> Expected stdout" cases plus the termination properties named
//! alongside them.

use dialogos_frontend::load_program;
use dialogos_rt::prompt::{PromptChannel, PromptOutcome};
use dialogos_rt::{ChatConfig, InsertStore, Interpreter, Trace};
use std::time::{Duration, Instant};

struct NoPrompt;

impl PromptChannel for NoPrompt {
    fn user_input(&mut self, _prompt: &str) -> PromptOutcome<String> {
        panic!("scenario does not expect a user_input prompt");
    }

    fn user_choice(&mut self, _description: &str, _options: &[String]) -> PromptOutcome<String> {
        panic!("scenario does not expect a user_choice prompt");
    }
}

fn run(src: &str) -> String {
    let program = load_program(src).unwrap_or_else(|diags| {
        panic!("program failed to load: {:?}", diags.iter().map(|d| d.to_string()).collect::<Vec<_>>())
    });
    let store = InsertStore::new().seed(program.default_state.clone());
    let interpreter = Interpreter::new(&program, store, Box::new(NoPrompt), ChatConfig::default(), Trace::disabled());
    interpreter.run().expect("scenario should run to completion")
}

#[test]
fn scenario_1_set_then_interpolated_print() {
    let src = r#"{
        order: [
            { cmd: 'set', item: 'tom', output_name: 'name' },
            { cmd: 'print', text: 'hi {name}' },
        ]
    }"#;
    assert_eq!(run(src), "hi tom");
}

#[test]
fn scenario_2_nested_key_interpolation() {
    let src = r#"{
        default_state: { i: 3, 'q-3': 'color?' },
        order: [
            { cmd: 'print', text: '{q-{i}}' },
        ]
    }"#;
    assert_eq!(run(src), "color?");
}

#[test]
fn scenario_3_replace_map_with_wildcard_capture() {
    let src = r#"{
        order: [
            { cmd: 'set', item: 'Age 41', output_name: 'x' },
            { cmd: 'replace_map', item: '{x}', output_name: 'age', wildcard_maps: [{ 'Age *': '{1}' }] },
            { cmd: 'print', text: '{age}' },
        ]
    }"#;
    assert_eq!(run(src), "41");
}

#[test]
fn scenario_4_goto_map_jumps_to_label() {
    let src = r#"{
        order: [
            { cmd: 'label', name: '@l' },
            { cmd: 'set', item: 1, output_name: 'n' },
            { cmd: 'goto_map', text: '{n}', target_maps: [{ '1': '@end' }] },
            { cmd: 'label', name: '@end' },
            { cmd: 'print', text: 'done' },
        ]
    }"#;
    assert_eq!(run(src), "done");
}

#[test]
fn scenario_5_math_with_length_of_a_stored_list() {
    let src = r#"{
        default_state: { xs: [10, 20] },
        order: [
            { cmd: 'math', input: 'max(1,2,3)+length(xs)', output_name: 'r' },
            { cmd: 'print', text: '{r}' },
        ]
    }"#;
    assert_eq!(run(src), "5");
}

#[test]
fn scenario_6_parallel_race_completes_on_the_fast_sibling_and_continues() {
    let src = r#"{
        order: [
            { cmd: 'parallel_race', tasks: [
                { cmd: 'serial', tasks: [
                    { cmd: 'sleep', seconds: 0.01 },
                    { cmd: 'set', item: 'fast', output_name: 'winner' },
                ]},
                { cmd: 'sleep', seconds: 10 },
            ]},
            { cmd: 'print', text: '{winner}' },
        ]
    }"#;
    let start = Instant::now();
    assert_eq!(run(src), "fast");
    assert!(start.elapsed() < Duration::from_secs(2), "parallel_race should not wait on the slow sibling");
}

#[test]
fn unescape_then_escape_round_trips_arbitrary_text() {
    let src = r#"{
        default_state: { raw: 'braces {like this} survive' },
        order: [
            { cmd: 'set', item: '{raw}', output_name: 'copy' },
            { cmd: 'print', text: '{copy}' },
        ]
    }"#;
    assert_eq!(run(src), "braces {like this} survive");
}

#[test]
fn for_loop_binds_parallel_lists_by_index_each_iteration() {
    let src = r#"{
        default_state: { total: 0 },
        order: [
            { cmd: 'for', name_list_map: { n: [1, 2, 3] }, tasks: [
                { cmd: 'math', input: '{total}+{n}', output_name: 'total' },
            ]},
            { cmd: 'print', text: '{total}' },
        ]
    }"#;
    assert_eq!(run(src), "6");
}

#[test]
fn run_task_shallow_merges_invocation_fields_over_the_named_task() {
    let src = r#"{
        named_tasks: { greet: { cmd: 'print', text: 'hello {who}' } },
        default_state: { who: 'default' },
        order: [
            { cmd: 'set', item: 'override', output_name: 'who' },
            { cmd: 'run_task', task_name: 'greet' },
        ]
    }"#;
    assert_eq!(run(src), "hello override");
}

#[test]
fn delete_except_keeps_only_matching_inserts_while_a_goto_map_inspects_them() {
    let src = r#"{
        default_state: { 'keep-a': 1, 'keep-b': 2, drop_me: 3 },
        order: [
            { cmd: 'delete_except', wildcards: ['keep-*'] },
            { cmd: 'goto_map', text: '{drop_me}', target_maps: [{ '*': '@missing' }, { 'NULL': '@gone' }] },
            { cmd: 'label', name: '@gone' },
            { cmd: 'print', text: 'gone' },
            { cmd: 'label', name: '@missing' },
            { cmd: 'print', text: 'present' },
        ]
    }"#;
    assert_eq!(run(src), "gone");
}
