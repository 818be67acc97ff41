//! Structured execution trace (ambient logging substitute): every task
//! dispatch, control-flow jump, and error is recorded as a JSONL event,
//! one line per event, so a run can be replayed for diagnostics without
//! reaching into an external logging framework.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    RunStart,
    RunEnd,
    TaskStart,
    TaskEnd,
    Goto,
    ParallelSpawn,
    ParallelJoin,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub kind: TraceEventKind,
    pub timestamp: chrono::DateTime<Utc>,
    pub cmd: Option<String>,
    pub line: Option<usize>,
    pub message: Option<String>,
}

/// An append-only execution trace. With no sink configured, every call is a
/// no-op beyond incrementing the sequence counter — tracing is always safe
/// to call from the interpreter's hot path.
pub struct Trace {
    sink: Option<File>,
    seq: u64,
}

impl Trace {
    pub fn disabled() -> Self {
        Self { sink: None, seq: 0 }
    }

    pub fn to_file(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { sink: Some(file), seq: 0 })
    }

    pub fn run_start(&mut self) {
        self.emit(TraceEventKind::RunStart, None, None, None);
    }

    pub fn run_end(&mut self) {
        self.emit(TraceEventKind::RunEnd, None, None, None);
    }

    pub fn task_start(&mut self, cmd: &str, line: usize) {
        self.emit(TraceEventKind::TaskStart, Some(cmd.to_string()), Some(line), None);
    }

    pub fn task_end(&mut self, cmd: &str, line: usize) {
        self.emit(TraceEventKind::TaskEnd, Some(cmd.to_string()), Some(line), None);
    }

    pub fn goto(&mut self, label: &str, line: usize) {
        self.emit(TraceEventKind::Goto, None, Some(line), Some(label.to_string()));
    }

    pub fn parallel_spawn(&mut self, count: usize, line: usize) {
        self.emit(
            TraceEventKind::ParallelSpawn,
            None,
            Some(line),
            Some(format!("{count} children")),
        );
    }

    pub fn parallel_join(&mut self, line: usize) {
        self.emit(TraceEventKind::ParallelJoin, None, Some(line), None);
    }

    pub fn cancelled(&mut self, cmd: &str, line: usize) {
        self.emit(TraceEventKind::Cancelled, Some(cmd.to_string()), Some(line), None);
    }

    pub fn error(&mut self, line: usize, message: &str) {
        self.emit(TraceEventKind::Error, None, Some(line), Some(message.to_string()));
    }

    fn emit(&mut self, kind: TraceEventKind, cmd: Option<String>, line: Option<usize>, message: Option<String>) {
        self.seq += 1;
        let Some(file) = self.sink.as_mut() else { return };
        let event = TraceEvent { seq: self.seq, kind, timestamp: Utc::now(), cmd, line, message };
        if let Ok(line) = serde_json::to_string(&json!(event)) {
            let _ = writeln!(file, "{line}");
        }
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::disabled()
    }
}
