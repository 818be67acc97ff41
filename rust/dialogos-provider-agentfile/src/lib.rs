//! File-based agent-mode prompt channel (spec §6): a [`PromptChannel`]
//! implementation that talks to an external agent over two well-known
//! files instead of a terminal. The writer emits a JSON object describing
//! the current screen and the question being asked; the reader blocks on
//! the response file using a short poll loop, grounded on the teacher's
//! `lumen-rt/src/services/fs_async.rs` poll-based file watching idiom
//! (spec.md explicitly scopes real file-watching machinery, e.g. inotify,
//! out of the core, so polling is the deliberate choice here, not a
//! shortcut).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dialogos_rt::prompt::{PromptChannel, PromptOutcome};
use dialogos_rt::CancelToken;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentFileError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
enum OutgoingMessage<'a> {
    UserInput {
        output: &'a str,
        prompt: &'a str,
    },
    UserChoice {
        output: &'a str,
        prompt: &'a str,
        choices: BTreeMap<String, String>,
    },
}

/// Default poll interval between checks of the response file, matching the
/// interpreter's own `CancelToken::sleep` polling granularity.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A [`PromptChannel`] that writes prompts to `output_path` and blocks,
/// polling, on a line appearing in `input_path`.
pub struct AgentFileChannel {
    output_path: PathBuf,
    input_path: PathBuf,
    poll_interval: Duration,
    cancel: Option<CancelToken>,
}

impl AgentFileChannel {
    /// The conventional paths spec.md names as defaults.
    pub fn default_paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("/tmp/agent_output"), PathBuf::from("/tmp/agent_input"))
    }

    pub fn new(output_path: impl Into<PathBuf>, input_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            input_path: input_path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Let the channel observe cancellation while blocked waiting for a
    /// reply, so a run that is cancelled mid-prompt doesn't hang forever
    /// waiting on an agent that will never answer.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn write_message(&self, message: &OutgoingMessage<'_>) -> Result<(), AgentFileError> {
        let body = serde_json::to_string(message).expect("agent-mode message is always serializable");
        fs::write(&self.output_path, body).map_err(|source| AgentFileError::Io {
            path: self.output_path.clone(),
            source,
        })
    }

    /// Block until a line appears in the input file, returning it with the
    /// trailing newline stripped, and clearing the file so the next prompt
    /// doesn't immediately re-read a stale answer.
    fn read_reply(&self) -> PromptOutcome<String> {
        loop {
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    return PromptOutcome::Cancelled;
                }
            }
            if let Some(line) = read_first_line(&self.input_path) {
                let _ = fs::write(&self.input_path, "");
                return PromptOutcome::Value(line);
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

/// Read the first non-empty line of `path`, if the file exists and has one.
fn read_first_line(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let line = content.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

impl PromptChannel for AgentFileChannel {
    // `output` is always empty here: `PromptChannel` is deliberately a thin
    // boundary (spec §6) that only carries the question being asked, not
    // the interpreter's accumulated screen buffer, so there is nothing to
    // put in that field at this layer.
    fn user_input(&mut self, prompt: &str) -> PromptOutcome<String> {
        let message = OutgoingMessage::UserInput { output: "", prompt };
        if let Err(err) = self.write_message(&message) {
            eprintln!("agent-mode write failed: {err}");
        }
        self.read_reply()
    }

    fn user_choice(&mut self, description: &str, options: &[String]) -> PromptOutcome<String> {
        let mut choices = BTreeMap::new();
        for (i, option) in options.iter().enumerate() {
            choices.insert(dialogos_rt::prompt::choice_key(i + 1), option.clone());
        }
        let message = OutgoingMessage::UserChoice { output: "", prompt: description, choices };
        if let Err(err) = self.write_message(&message) {
            eprintln!("agent-mode write failed: {err}");
        }
        self.read_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn writes_a_user_input_prompt_and_reads_the_reply() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("agent_output");
        let input_path = dir.path().join("agent_input");
        fs::write(&input_path, "").unwrap();

        let mut channel = AgentFileChannel::new(output_path.clone(), input_path.clone())
            .with_poll_interval(StdDuration::from_millis(5));

        let writer_input_path = input_path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            fs::write(&writer_input_path, "hello\n").unwrap();
        });

        let outcome = channel.user_input("name?");
        writer.join().unwrap();

        assert_eq!(outcome, PromptOutcome::Value("hello".to_string()));
        let written = fs::read_to_string(&output_path).unwrap();
        assert!(written.contains("user_input"));
        assert!(written.contains("name?"));
    }

    #[test]
    fn user_choice_emits_positional_keys_for_each_option() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("agent_output");
        let input_path = dir.path().join("agent_input");
        fs::write(&input_path, "").unwrap();

        let mut channel = AgentFileChannel::new(output_path.clone(), input_path.clone())
            .with_poll_interval(StdDuration::from_millis(5));

        let writer_input_path = input_path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            fs::write(&writer_input_path, "2\n").unwrap();
        });

        let options = vec!["red".to_string(), "green".to_string()];
        let outcome = channel.user_choice("pick one", &options);
        writer.join().unwrap();

        assert_eq!(outcome, PromptOutcome::Value("2".to_string()));
        let written = fs::read_to_string(&output_path).unwrap();
        assert!(written.contains("\"1\":\"red\""));
        assert!(written.contains("\"2\":\"green\""));
    }

    #[test]
    fn cancellation_unblocks_a_pending_read() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("agent_output");
        let input_path = dir.path().join("agent_input");
        fs::write(&input_path, "").unwrap();

        let cancel = CancelToken::new();
        let mut channel = AgentFileChannel::new(output_path, input_path)
            .with_poll_interval(StdDuration::from_millis(5))
            .with_cancel_token(cancel.clone());

        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            canceller.cancel();
        });

        let outcome = channel.user_input("name?");
        assert_eq!(outcome, PromptOutcome::Cancelled);
    }
}
