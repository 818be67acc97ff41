//! End-to-end invocation of the built `dialogos` binary against a small
//! program file, exercising argument parsing, ARGn seeding, and exit codes.

use std::io::Write;
use std::process::Command;

fn dialogos_bin() -> &'static str {
    env!("CARGO_BIN_EXE_dialogos")
}

#[test]
fn runs_a_program_and_prints_its_output() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "{{ order: [{{cmd: 'set', item: 'world', output_name: 'who'}}, {{cmd: 'print', text: 'hello {{who}}'}}] }}"
    )
    .unwrap();

    let output = Command::new(dialogos_bin()).arg(file.path()).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello world");
}

#[test]
fn seeds_positional_arguments_as_arg1_arg2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{ order: [{{cmd: 'print', text: '{{ARG1}}-{{ARG2}}'}}] }}").unwrap();

    let output = Command::new(dialogos_bin())
        .arg(file.path())
        .arg("alice")
        .arg("42")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "alice-42");
}

#[test]
fn exits_non_zero_with_a_line_diagnostic_on_a_missing_insert() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{ order: [{{cmd: 'print', text: '{{missing}}'}}] }}").unwrap();

    let output = Command::new(dialogos_bin()).arg(file.path()).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Error at line"), "unexpected stderr: {stderr}");
}
