//! Execution frames (spec §4.6): a frame owns a task list, a precomputed
//! label map, and a cursor. `goto`/`goto_map` reposition the cursor of the
//! nearest enclosing non-parallel frame by walking the frame stack.

use dialogos_frontend::ast::Task;
use std::collections::HashMap;

/// Whether a frame was entered through a `parallel_wait`/`parallel_race`
/// task list. `goto` may never target a parallel frame, and may never be
/// evaluated at all while any enclosing frame on the current stack is one
/// (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Sequential,
    Parallel,
}

pub struct Frame {
    pub kind: FrameKind,
    tasks: Vec<Task>,
    labels: HashMap<String, usize>,
    pub cursor: usize,
}

impl Frame {
    pub fn new(tasks: Vec<Task>, kind: FrameKind) -> Self {
        let mut labels = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            if task.cmd == "label" {
                if let Some(name) = task.field("name").and_then(|v| v.as_str()) {
                    labels.insert(name.to_string(), i);
                }
            }
        }
        Self { kind, tasks, labels, cursor: 0 }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn current(&self) -> Option<&Task> {
        self.tasks.get(self.cursor)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.tasks.len()
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }
}

/// Stack of active frames, innermost last. `find_goto_target` implements the
/// "nearest enclosing non-parallel frame" scoping rule: it walks from the
/// top of the stack outward, skipping any frame whose kind is `Parallel`,
/// and returns the depth (index into the stack) and label position of the
/// first frame that defines the label.
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new(root: Frame) -> Self {
        Self { frames: vec![root] }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    pub fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// True if any frame currently on the stack was entered via a
    /// `parallel_wait`/`parallel_race` task list. `goto`/`goto_map` are
    /// fatal errors anywhere this holds, regardless of whether the target
    /// label happens to live in the same frame (spec §4.6).
    pub fn any_parallel(&self) -> bool {
        self.frames.iter().any(|f| f.kind == FrameKind::Parallel)
    }

    /// Find the label `name` in the nearest enclosing non-parallel frame,
    /// returning the stack depth (count of frames to pop back to, counted
    /// from the top) and the label's index within that frame. `None` if no
    /// such frame defines the label.
    pub fn find_goto_target(&self, name: &str) -> Option<(usize, usize)> {
        for (depth_from_top, frame) in self.frames.iter().rev().enumerate() {
            if frame.kind == FrameKind::Parallel {
                continue;
            }
            if let Some(idx) = frame.label_index(name) {
                return Some((depth_from_top, idx));
            }
        }
        None
    }

    /// Unwind the stack by `levels` (popping all frames above the target)
    /// and reposition the now-top frame's cursor just after the label.
    pub fn goto(&mut self, levels: usize, label_index: usize) {
        for _ in 0..levels {
            self.frames.pop();
        }
        self.top_mut().cursor = label_index + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogos_core::value::OrderedMap;

    fn label_task(name: &str) -> Task {
        let mut fields = OrderedMap::new();
        fields.insert("name", dialogos_core::value::Value::String(name.to_string()));
        Task { line: 1, cmd: "label".to_string(), fields, tasks: None }
    }

    fn plain_task(cmd: &str) -> Task {
        Task { line: 1, cmd: cmd.to_string(), fields: OrderedMap::new(), tasks: None }
    }

    #[test]
    fn label_map_is_precomputed_on_construction() {
        let tasks = vec![plain_task("print"), label_task("@l"), plain_task("print")];
        let frame = Frame::new(tasks, FrameKind::Sequential);
        assert_eq!(frame.label_index("@l"), Some(1));
        assert_eq!(frame.label_index("@nope"), None);
    }

    #[test]
    fn goto_finds_label_in_nearest_non_parallel_frame() {
        let outer_tasks = vec![plain_task("print"), label_task("@outer")];
        let inner_tasks = vec![plain_task("print")];
        let mut stack = FrameStack::new(Frame::new(outer_tasks, FrameKind::Sequential));
        stack.push(Frame::new(inner_tasks, FrameKind::Sequential));

        let (levels, idx) = stack.find_goto_target("@outer").unwrap();
        assert_eq!(levels, 1);
        assert_eq!(idx, 1);
        stack.goto(levels, idx);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().cursor, 2);
    }

    #[test]
    fn goto_skips_parallel_frames_when_searching() {
        let outer_tasks = vec![label_task("@outer")];
        let parallel_tasks = vec![plain_task("sleep")];
        let mut stack = FrameStack::new(Frame::new(outer_tasks, FrameKind::Sequential));
        stack.push(Frame::new(parallel_tasks, FrameKind::Parallel));

        let (levels, idx) = stack.find_goto_target("@outer").unwrap();
        assert_eq!(levels, 1);
        assert_eq!(idx, 0);
        assert!(stack.any_parallel());
    }

    #[test]
    fn goto_target_missing_everywhere_returns_none() {
        let outer_tasks = vec![plain_task("print")];
        let stack = FrameStack::new(Frame::new(outer_tasks, FrameKind::Sequential));
        assert_eq!(stack.find_goto_target("@nope"), None);
        assert!(!stack.any_parallel());
    }
}
