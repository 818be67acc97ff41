//! Default terminal prompt channel: plain stdin/stdout, one line at a time.
//! Grounded on the teacher's `repl.rs` read-a-line loop, stripped of the
//! line-editing machinery this interpreter's prompts don't need (a single
//! blocking question/answer exchange, not a command history).

use std::io::{self, Write};

use dialogos_rt::prompt::{choice_key, PromptChannel, PromptOutcome};

pub struct TermPromptChannel;

impl TermPromptChannel {
    pub fn new() -> Self {
        Self
    }

    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
            Err(_) => None,
        }
    }
}

impl Default for TermPromptChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptChannel for TermPromptChannel {
    fn user_input(&mut self, prompt: &str) -> PromptOutcome<String> {
        if !prompt.is_empty() {
            print!("{prompt}");
            let _ = io::stdout().flush();
        }
        match self.read_line() {
            Some(line) => PromptOutcome::Value(line),
            None => PromptOutcome::Cancelled,
        }
    }

    fn user_choice(&mut self, description: &str, options: &[String]) -> PromptOutcome<String> {
        if !description.is_empty() {
            println!("{description}");
        }
        for (i, option) in options.iter().enumerate() {
            println!("  {}) {}", choice_key(i + 1), option);
        }
        print!("> ");
        let _ = io::stdout().flush();
        match self.read_line() {
            Some(line) => PromptOutcome::Value(line),
            None => PromptOutcome::Cancelled,
        }
    }
}
