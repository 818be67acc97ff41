//! Task interpreter (spec §4.6): dispatches each of the ~28 commands,
//! drives control flow (labels, `goto`, `goto_map`), iteration (`for`),
//! concurrency (`parallel_wait`, `parallel_race`), and `run_task` invocation.
//! Grounded on `lumen-vm/src/vm/mod.rs`'s one-arm-per-opcode dispatch table,
//! generalized to one arm per `cmd` string, and `lumen-rt/src/services/
//! nursery.rs` for the thread-per-child concurrency shape.

use std::sync::Mutex;
use std::time::Duration;

use dialogos_core::math::{eval as eval_math, NameResolver};
use dialogos_core::pattern::{substitute_captures, Pattern, Subject};
use dialogos_core::value::{OrderedMap, Value};
use dialogos_frontend::ast::{Program, Task, COMPOSITE_COMMANDS};
use rand::Rng;

use crate::cancel::CancelToken;
use crate::chat::{self, ChatConfig};
use crate::error::{RtResult, RuntimeError};
use crate::frame::{Frame, FrameKind, FrameStack};
use crate::interpolate::{interpolate, strip_escapes, Interpolated};
use crate::prompt::{resolve_choice, PromptChannel, PromptOutcome};
use crate::store::InsertStore;
use crate::trace::Trace;

/// Upper bound on `replace_map`'s `repeat_until_done` iteration, per spec
/// §4.6 and the design ledger's open-question resolution.
const REPEAT_UNTIL_DONE_CAP: u32 = 1000;

/// Poll slice for `await_insert`, matching `CancelToken::sleep`'s own
/// interruptible polling granularity.
const AWAIT_POLL: Duration = Duration::from_millis(5);

/// Whether the parent frame's cursor should advance after a dispatched
/// command. `No` covers `goto`/`goto_map` (which reposition the cursor
/// themselves) and entering a `serial` sub-frame (whose caller only
/// advances once the sub-frame finishes).
enum Advance {
    Yes,
    No,
}

pub struct Interpreter<'p> {
    program: &'p Program,
    store: Mutex<InsertStore>,
    trace: Mutex<Trace>,
    output: Mutex<String>,
    prompt: Mutex<Box<dyn PromptChannel>>,
    chat_config: ChatConfig,
    root_cancel: CancelToken,
    last_error_line: Mutex<Option<usize>>,
}

impl<'p> Interpreter<'p> {
    pub fn new(
        program: &'p Program,
        store: InsertStore,
        prompt: Box<dyn PromptChannel>,
        chat_config: ChatConfig,
        trace: Trace,
    ) -> Self {
        Self {
            program,
            store: Mutex::new(store),
            trace: Mutex::new(trace),
            output: Mutex::new(String::new()),
            prompt: Mutex::new(prompt),
            chat_config,
            root_cancel: CancelToken::new(),
            last_error_line: Mutex::new(None),
        }
    }

    /// A clone of the run's root cancellation token, so a caller (e.g. the
    /// CLI's signal handler) can abort the whole run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.root_cancel.clone()
    }

    /// The source line of the task that raised the error `run` last
    /// returned, if any (spec §6: "a human-readable diagnostic including
    /// the source line of the offending task").
    pub fn error_line(&self) -> Option<usize> {
        *self.last_error_line.lock().unwrap()
    }

    pub fn store_snapshot(&self) -> OrderedMap {
        self.store.lock().unwrap().snapshot()
    }

    /// Drive `program.order` to completion, returning the accumulated
    /// output buffer (spec §4.6 "Termination").
    pub fn run(&self) -> RtResult<String> {
        self.trace.lock().unwrap().run_start();
        let mut stack = FrameStack::new(Frame::new(self.program.order.clone(), FrameKind::Sequential));
        let result = self.run_stack(&mut stack, &self.root_cancel);
        self.trace.lock().unwrap().run_end();
        result?;
        Ok(self.output.lock().unwrap().clone())
    }

    /// Drive a single frame stack to completion: a root-level program run,
    /// one `for` iteration, or one `parallel_*` child each get their own
    /// independent call to this loop.
    fn run_stack(&self, stack: &mut FrameStack, cancel: &CancelToken) -> RtResult<()> {
        loop {
            cancel.check()?;
            if stack.top().is_finished() {
                if stack.depth() == 1 {
                    return Ok(());
                }
                stack.pop();
                stack.top_mut().advance();
                continue;
            }
            let task = stack.top().current().expect("checked not finished").clone();
            self.trace.lock().unwrap().task_start(&task.cmd, task.line);
            match self.dispatch(&task, stack, cancel) {
                Ok(Advance::Yes) => stack.top_mut().advance(),
                Ok(Advance::No) => {}
                Err(RuntimeError::Cancelled) => {
                    self.trace.lock().unwrap().cancelled(&task.cmd, task.line);
                    return Err(RuntimeError::Cancelled);
                }
                Err(e) => {
                    self.trace.lock().unwrap().error(task.line, &e.to_string());
                    *self.last_error_line.lock().unwrap() = Some(task.line);
                    return Err(e);
                }
            }
            self.trace.lock().unwrap().task_end(&task.cmd, task.line);
        }
    }

    fn dispatch(&self, task: &Task, stack: &mut FrameStack, cancel: &CancelToken) -> RtResult<Advance> {
        match task.cmd.as_str() {
            "print" => {
                let text = self.interp_field(task, "text")?;
                self.output.lock().unwrap().push_str(&text);
                Ok(Advance::Yes)
            }
            "clear" => {
                self.output.lock().unwrap().clear();
                Ok(Advance::Yes)
            }
            "sleep" => {
                let seconds = self.resolve_seconds(task)?;
                cancel.sleep(Duration::from_secs_f64(seconds.max(0.0)))?;
                Ok(Advance::Yes)
            }
            "set" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let value = self.resolve_item(task, "item")?;
                self.store.lock().unwrap().set(output_name, value);
                Ok(Advance::Yes)
            }
            "unescape" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let item = self.require_str(task, "item")?;
                let step1 = self.interp(item)?;
                let step2 = strip_escapes(&step1);
                let step3 = self.interp(&step2)?;
                self.store.lock().unwrap().set(output_name, Value::String(step3));
                Ok(Advance::Yes)
            }
            "show_inserts" => {
                let snapshot = self.store.lock().unwrap().snapshot();
                let rendered = Value::Map(snapshot).to_display();
                self.output.lock().unwrap().push_str(&rendered);
                Ok(Advance::Yes)
            }
            "random_choice" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let list = self.resolve_list(task, "list")?;
                if list.is_empty() {
                    return Err(RuntimeError::Type("random_choice on an empty list".into()));
                }
                let idx = rand::thread_rng().gen_range(0..list.len());
                self.store.lock().unwrap().set(output_name, list[idx].clone());
                Ok(Advance::Yes)
            }
            "join_list" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let list = self.resolve_list(task, "list")?;
                let before = self.opt_interp_field(task, "before")?.unwrap_or_default();
                let between = self.opt_interp_field(task, "between")?.unwrap_or_default();
                let after = self.opt_interp_field(task, "after")?.unwrap_or_default();
                let joined = list.iter().map(Value::to_display).collect::<Vec<_>>().join(&between);
                self.store.lock().unwrap().set(output_name, Value::String(format!("{before}{joined}{after}")));
                Ok(Advance::Yes)
            }
            "list_concat" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let sublists = match task.field("lists") {
                    Some(Value::List(items)) => items,
                    _ => return Err(RuntimeError::Type("'lists' must be an array of arrays".into())),
                };
                let mut combined = Vec::new();
                for sub in sublists {
                    match sub {
                        Value::List(items) => combined.extend(items.iter().cloned()),
                        _ => return Err(RuntimeError::Type("'lists' must be an array of arrays".into())),
                    }
                }
                self.store.lock().unwrap().set(output_name, Value::List(combined));
                Ok(Advance::Yes)
            }
            "list_append" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let mut list = self.resolve_list(task, "list")?;
                let item = self.resolve_item(task, "item")?;
                list.push(item);
                self.store.lock().unwrap().set(output_name, Value::List(list));
                Ok(Advance::Yes)
            }
            "list_remove" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let mut list = self.resolve_list(task, "list")?;
                let item = self.resolve_item(task, "item")?;
                if let Some(pos) = list.iter().position(|v| *v == item) {
                    list.remove(pos);
                }
                self.store.lock().unwrap().set(output_name, Value::List(list));
                Ok(Advance::Yes)
            }
            "list_index" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let list = self.resolve_list(task, "list")?;
                let index = self.resolve_int(task, "index")?;
                let n = list.len() as i64;
                let zero_based = if index < 0 { n + index } else if index >= 1 { index - 1 } else {
                    return Err(RuntimeError::Index(format!("index {index} is out of range")));
                };
                if zero_based < 0 || zero_based >= n {
                    return Err(RuntimeError::Index(format!("index {index} is out of range for a list of length {n}")));
                }
                self.store.lock().unwrap().set(output_name, list[zero_based as usize].clone());
                Ok(Advance::Yes)
            }
            "list_slice" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let list = self.resolve_list(task, "list")?;
                let from_index = self.resolve_int(task, "from_index")?;
                let to_index = self.resolve_int(task, "to_index")?;
                let sliced = slice_1based_inclusive(&list, from_index, to_index);
                self.store.lock().unwrap().set(output_name, Value::List(sliced));
                Ok(Advance::Yes)
            }
            "user_input" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let prompt_text = self.opt_interp_field(task, "prompt")?.unwrap_or_default();
                let outcome = self.prompt.lock().unwrap().user_input(&prompt_text);
                match outcome {
                    PromptOutcome::Value(raw) => {
                        let escaped = crate::interpolate::escape(&raw);
                        self.store.lock().unwrap().set(output_name, Value::String(escaped));
                        Ok(Advance::Yes)
                    }
                    PromptOutcome::Cancelled => Err(RuntimeError::Cancelled),
                }
            }
            "user_choice" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let list = self.resolve_list(task, "list")?;
                let description = self.opt_interp_field(task, "description")?.unwrap_or_default();
                let options: Vec<String> = list.iter().map(Value::to_display).collect();
                let outcome = self.prompt.lock().unwrap().user_choice(&description, &options);
                match outcome {
                    PromptOutcome::Value(reply) => {
                        let idx = resolve_choice(&reply, &options)
                            .ok_or_else(|| RuntimeError::Type(format!("unresolvable choice reply '{reply}'")))?;
                        self.store.lock().unwrap().set(output_name, list[idx].clone());
                        Ok(Advance::Yes)
                    }
                    PromptOutcome::Cancelled => Err(RuntimeError::Cancelled),
                }
            }
            "await_insert" => {
                let name = self.require_str(task, "name")?.to_string();
                loop {
                    cancel.check()?;
                    if self.store.lock().unwrap().get(&name).is_some() {
                        return Ok(Advance::Yes);
                    }
                    std::thread::sleep(AWAIT_POLL);
                }
            }
            "label" => Ok(Advance::Yes),
            "goto" => {
                if stack.any_parallel() {
                    return Err(RuntimeError::Type("'goto' is not allowed inside parallel_wait/parallel_race".into()));
                }
                let name = self.interp_field(task, "name")?;
                self.perform_goto(stack, &name, task.line)?;
                Ok(Advance::No)
            }
            "goto_map" => {
                if stack.any_parallel() {
                    return Err(RuntimeError::Type("'goto_map' is not allowed inside parallel_wait/parallel_race".into()));
                }
                let text = self.require_str(task, "text")?;
                let subject = match self.interp(text) {
                    Ok(s) => Subject::Text(s),
                    Err(_) => Subject::Null,
                };
                let maps = self.single_entry_maps(task, "target_maps")?;
                for (pattern, target) in &maps {
                    if Pattern::new(pattern.clone()).matches(&subject) {
                        let label = target
                            .as_str()
                            .ok_or_else(|| RuntimeError::Type("goto_map target must be a label name".into()))?;
                        self.perform_goto(stack, label, task.line)?;
                        return Ok(Advance::No);
                    }
                }
                Err(RuntimeError::Name("no goto_map pattern matched".into()))
            }
            "replace_map" => {
                self.cmd_replace_map(task)?;
                Ok(Advance::Yes)
            }
            "for" => {
                self.cmd_for(task, cancel)?;
                Ok(Advance::Yes)
            }
            "serial" => {
                let tasks = task.tasks.clone().unwrap_or_default();
                stack.push(Frame::new(tasks, FrameKind::Sequential));
                Ok(Advance::No)
            }
            "parallel_wait" => {
                let tasks = task.tasks.clone().unwrap_or_default();
                self.run_parallel(&tasks, false)?;
                Ok(Advance::Yes)
            }
            "parallel_race" => {
                let tasks = task.tasks.clone().unwrap_or_default();
                self.run_parallel(&tasks, true)?;
                Ok(Advance::Yes)
            }
            "run_task" => self.cmd_run_task(task, stack, cancel),
            "delete" => {
                let patterns = self.resolve_patterns(task, "wildcards")?;
                self.store.lock().unwrap().delete_matching(&patterns);
                Ok(Advance::Yes)
            }
            "delete_except" => {
                let patterns = self.resolve_patterns(task, "wildcards")?;
                self.store.lock().unwrap().delete_not_matching(&patterns);
                Ok(Advance::Yes)
            }
            "math" => {
                let output_name = self.require_str(task, "output_name")?.to_string();
                let input = self.interp_field(task, "input")?;
                let result = self.eval_math_expr(&input)?;
                self.store.lock().unwrap().set(output_name, Value::Int(result));
                Ok(Advance::Yes)
            }
            "chat" => {
                self.cmd_chat(task, cancel)?;
                Ok(Advance::Yes)
            }
            other => Err(RuntimeError::Name(format!("unknown command '{other}'"))),
        }
    }

    // ---- field helpers -------------------------------------------------

    fn require_str<'t>(&self, task: &'t Task, field: &'static str) -> RtResult<&'t str> {
        task.field(field)
            .and_then(Value::as_str)
            .ok_or_else(|| RuntimeError::Type(format!("'{field}' must be a string")))
    }

    fn interp(&self, s: &str) -> RtResult<String> {
        let guard = self.store.lock().unwrap();
        match interpolate(s, &guard) {
            Interpolated::Ok(s) => Ok(s),
            Interpolated::Missing(key) => Err(RuntimeError::InterpolationMissingKey(key)),
        }
    }

    /// Interpolate without failing hard: `Ok(None)` stands in for a missing
    /// key, used only by callers that consume it as the `NULL` sentinel.
    fn try_interp(&self, s: &str) -> Interpolated {
        let guard = self.store.lock().unwrap();
        interpolate(s, &guard)
    }

    fn interp_field(&self, task: &Task, field: &'static str) -> RtResult<String> {
        let raw = self.require_str(task, field)?;
        self.interp(raw)
    }

    fn opt_interp_field(&self, task: &Task, field: &'static str) -> RtResult<Option<String>> {
        match task.field(field) {
            Some(Value::String(s)) => Ok(Some(self.interp(s)?)),
            Some(_) => Err(RuntimeError::Type(format!("'{field}' must be a string"))),
            None => Ok(None),
        }
    }

    /// `item`-style fields (spec §4.6 `set`): interpolated if given as a
    /// JSON5 string, used structurally otherwise.
    fn resolve_item(&self, task: &Task, field: &'static str) -> RtResult<Value> {
        match task.field(field) {
            Some(Value::String(s)) => Ok(Value::String(self.interp(s)?)),
            Some(other) => Ok(other.clone()),
            None => Err(RuntimeError::Type(format!("missing required field '{field}'"))),
        }
    }

    /// `index`/`from_index`/`to_index`/`seconds`-style fields: a literal
    /// integer, or a string holding a math expression (spec §4.3, §4.6).
    fn resolve_int(&self, task: &Task, field: &'static str) -> RtResult<i64> {
        match task.field(field) {
            Some(Value::Int(i)) => Ok(*i),
            Some(Value::String(s)) => {
                let interped = self.interp(s)?;
                self.eval_math_expr(&interped)
            }
            Some(_) => Err(RuntimeError::Type(format!("'{field}' must be an integer or math expression"))),
            None => Err(RuntimeError::Type(format!("missing required field '{field}'"))),
        }
    }

    fn resolve_seconds(&self, task: &Task) -> RtResult<f64> {
        match task.field("seconds") {
            Some(Value::Int(i)) => Ok(*i as f64),
            Some(Value::Float(f)) => Ok(*f),
            Some(Value::String(s)) => {
                let interped = self.interp(s)?;
                Ok(self.eval_math_expr(&interped)? as f64)
            }
            _ => Err(RuntimeError::Type("'seconds' must be a number or math expression".into())),
        }
    }

    fn eval_math_expr(&self, expr: &str) -> RtResult<i64> {
        struct Resolver<'a>(&'a InsertStore);
        impl NameResolver for Resolver<'_> {
            fn resolve(&self, name: &str) -> Option<Value> {
                self.0.get(name)
            }
        }
        let guard = self.store.lock().unwrap();
        Ok(eval_math(expr, &Resolver(&guard))?)
    }

    /// `list`-shaped fields: a literal JSON5 array (each string element
    /// individually interpolated), per the design ledger's resolution of
    /// spec.md's open question — a bare `{name}` spanning the whole field
    /// is also accepted as a direct (non-stringifying) reference to a
    /// list-valued insert, matching how `length(name)`/`min(name)` in the
    /// math grammar name inserts directly rather than through `{}`.
    fn resolve_list(&self, task: &Task, field: &'static str) -> RtResult<Vec<Value>> {
        match task.field(field) {
            Some(Value::List(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => self.interp(s).map(Value::String),
                    other => Ok(other.clone()),
                })
                .collect(),
            Some(Value::String(s)) => {
                let name = bare_reference(s)
                    .ok_or_else(|| RuntimeError::Type(format!("'{field}' must be an array")))?;
                let guard = self.store.lock().unwrap();
                match guard.get(name) {
                    Some(Value::List(items)) => Ok(items),
                    Some(_) => Err(RuntimeError::Type(format!("'{name}' is not a list"))),
                    None => Err(RuntimeError::Name(format!("unknown insert '{name}'"))),
                }
            }
            Some(_) => Err(RuntimeError::Type(format!("'{field}' must be an array"))),
            None => Err(RuntimeError::Type(format!("missing required field '{field}'"))),
        }
    }

    fn resolve_patterns(&self, task: &Task, field: &'static str) -> RtResult<Vec<Pattern>> {
        let items = self.resolve_list(task, field)?;
        items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(Pattern::new(s)),
                _ => Err(RuntimeError::Type(format!("'{field}' entries must be strings"))),
            })
            .collect()
    }

    /// Extract `[{pattern: value}, ...]` into ordered `(pattern, value)`
    /// pairs, for `target_maps`/`wildcard_maps`.
    fn single_entry_maps(&self, task: &Task, field: &'static str) -> RtResult<Vec<(String, Value)>> {
        let Some(Value::List(items)) = task.field(field) else {
            return Err(RuntimeError::Type(format!("'{field}' must be an array of single-entry objects")));
        };
        items
            .iter()
            .map(|item| match item {
                Value::Map(m) if m.len() == 1 => {
                    let (k, v) = m.iter().next().expect("len == 1");
                    Ok((k.to_string(), v.clone()))
                }
                _ => Err(RuntimeError::Type(format!("'{field}' must be an array of single-entry objects"))),
            })
            .collect()
    }

    fn perform_goto(&self, stack: &mut FrameStack, label: &str, line: usize) -> RtResult<()> {
        let (levels, idx) = stack
            .find_goto_target(label)
            .ok_or_else(|| RuntimeError::Name(format!("unknown label '{label}'")))?;
        stack.goto(levels, idx);
        self.trace.lock().unwrap().goto(label, line);
        Ok(())
    }

    // ---- composite commands ---------------------------------------------

    fn cmd_replace_map(&self, task: &Task) -> RtResult<()> {
        let output_name = self.require_str(task, "output_name")?.to_string();
        let item = self.require_str(task, "item")?;
        let repeat = task.field("repeat_until_done").map(Value::is_truthy).unwrap_or(false);
        let maps = self.single_entry_maps(task, "wildcard_maps")?;

        let mut subject = match self.try_interp(item) {
            Interpolated::Ok(s) => Subject::Text(s),
            Interpolated::Missing(_) => Subject::Null,
        };

        let mut iterations = 0u32;
        loop {
            let mut matched = None;
            for (pattern, template) in &maps {
                if let Some(captures) = Pattern::new(pattern.clone()).match_captures(&subject) {
                    matched = Some((captures, template.clone()));
                    break;
                }
            }
            let Some((captures, template)) = matched else { break };
            let template_str = template
                .as_str()
                .ok_or_else(|| RuntimeError::Type("wildcard_maps replacement must be a string".into()))?;
            let substituted = substitute_captures(template_str, &captures);
            let next = self.interp(&substituted)?;
            let next_subject = Subject::Text(next);
            let reached_fixed_point = subject == next_subject;
            subject = next_subject;
            if !repeat || reached_fixed_point {
                break;
            }
            iterations += 1;
            if iterations >= REPEAT_UNTIL_DONE_CAP {
                return Err(RuntimeError::FixedPointNotReached);
            }
        }

        let value = match subject {
            Subject::Null => Value::Null,
            Subject::Text(s) => Value::String(s),
        };
        self.store.lock().unwrap().set(output_name, value);
        Ok(())
    }

    fn cmd_for(&self, task: &Task, cancel: &CancelToken) -> RtResult<()> {
        let Some(Value::Map(name_list_map)) = task.field("name_list_map") else {
            return Err(RuntimeError::Type("'for' requires a 'name_list_map' object".into()));
        };
        let tasks = task.tasks.clone().unwrap_or_default();

        let mut lists: Vec<(String, Vec<Value>)> = Vec::new();
        for (name, _) in name_list_map.iter() {
            let list = match name_list_map.get(name) {
                Some(Value::List(items)) => items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => self.interp(s).map(Value::String),
                        other => Ok(other.clone()),
                    })
                    .collect::<RtResult<Vec<_>>>()?,
                _ => {
                    return Err(RuntimeError::Type(format!(
                        "'for' entry '{name}' must be an array"
                    )))
                }
            };
            lists.push((name.to_string(), list));
        }

        let n = match lists.first() {
            Some((_, l)) => l.len(),
            None => return Ok(()),
        };
        if lists.iter().any(|(_, l)| l.len() != n) {
            return Err(RuntimeError::Type("'for' lists must all have equal length".into()));
        }

        for i in 0..n {
            cancel.check()?;
            {
                let mut store = self.store.lock().unwrap();
                for (name, list) in &lists {
                    store.set(name.clone(), list[i].clone());
                }
            }
            let mut stack = FrameStack::new(Frame::new(tasks.clone(), FrameKind::Sequential));
            self.run_stack(&mut stack, cancel)?;
        }
        Ok(())
    }

    fn cmd_run_task(&self, task: &Task, stack: &mut FrameStack, cancel: &CancelToken) -> RtResult<Advance> {
        let task_name = self.interp_field(task, "task_name")?;
        let target = self
            .program
            .named_tasks
            .get(&task_name)
            .ok_or_else(|| RuntimeError::Name(format!("unknown named_task '{task_name}'")))?;

        // Shallow-merge: invocation fields win, except `cmd` always comes
        // from the invoked task (SPEC_FULL.md §2).
        let mut merged_fields = target.fields.clone();
        for (k, v) in task.fields.iter() {
            if k == "task_name" {
                continue;
            }
            merged_fields.insert(k, v.clone());
        }
        let merged = Task {
            line: task.line,
            cmd: target.cmd.clone(),
            fields: merged_fields,
            tasks: target.tasks.clone(),
        };

        if COMPOSITE_COMMANDS.contains(&merged.cmd.as_str()) {
            match merged.cmd.as_str() {
                "serial" => {
                    let tasks = merged.tasks.unwrap_or_default();
                    stack.push(Frame::new(tasks, FrameKind::Sequential));
                    Ok(Advance::No)
                }
                "for" => {
                    self.cmd_for(&merged, cancel)?;
                    Ok(Advance::Yes)
                }
                "parallel_wait" => {
                    self.run_parallel(&merged.tasks.unwrap_or_default(), false)?;
                    Ok(Advance::Yes)
                }
                "parallel_race" => {
                    self.run_parallel(&merged.tasks.unwrap_or_default(), true)?;
                    Ok(Advance::Yes)
                }
                _ => unreachable!("COMPOSITE_COMMANDS exhausted"),
            }
        } else {
            self.dispatch(&merged, stack, cancel)
        }
    }

    /// `parallel_wait`/`parallel_race` (spec §4.6, §5): each sibling gets
    /// its own frame stack and cancel token, scheduled on scoped OS
    /// threads so they can borrow `self` without `Arc`. `parallel_wait`
    /// collects the first failure and cancels the rest; `parallel_race`
    /// cancels everyone else the moment any sibling finishes.
    fn run_parallel(&self, tasks: &[Task], race: bool) -> RtResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let n = tasks.len();
        let children: Vec<CancelToken> = (0..n).map(|_| CancelToken::new()).collect();
        let (tx, rx) = crossbeam_channel::bounded::<RtResult<()>>(n);

        self.trace.lock().unwrap().parallel_spawn(n, tasks[0].line);

        let outcome = std::thread::scope(|scope| {
            for (i, task) in tasks.iter().enumerate() {
                let tx = tx.clone();
                let cancel = children[i].clone();
                scope.spawn(move || {
                    let mut stack = FrameStack::new(Frame::new(vec![task.clone()], FrameKind::Parallel));
                    let result = self.run_stack(&mut stack, &cancel);
                    let _ = tx.send(result);
                });
            }
            drop(tx);

            if race {
                let first = rx.recv().unwrap_or(Ok(()));
                for c in &children {
                    c.cancel();
                }
                for _ in rx.iter() {}
                first
            } else {
                let mut first_err = None;
                for _ in 0..n {
                    if let Ok(result) = rx.recv() {
                        if let Err(e) = result {
                            if first_err.is_none() {
                                first_err = Some(e);
                                for c in &children {
                                    c.cancel();
                                }
                            }
                        }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        });

        self.trace.lock().unwrap().parallel_join(tasks[0].line);
        outcome
    }

    fn cmd_chat(&self, task: &Task, cancel: &CancelToken) -> RtResult<()> {
        let output_name = self.require_str(task, "output_name")?.to_string();
        let messages_raw = task
            .field("messages")
            .ok_or_else(|| RuntimeError::Type("'chat' requires 'messages'".into()))?;
        let messages = self.interpolate_value(messages_raw)?;

        let mut interpolated_fields = OrderedMap::new();
        for (k, v) in task.fields.iter() {
            if k == "messages" {
                continue;
            }
            interpolated_fields.insert(k, self.interpolate_value(v)?);
        }

        let body = chat::build_request_body(&self.program.completion_args, &messages, &interpolated_fields);
        let choices = chat::complete(&self.chat_config, body, cancel)?;

        let value = if choices.len() == 1 {
            Value::String(choices.into_iter().next().unwrap())
        } else {
            Value::List(choices.into_iter().map(Value::String).collect())
        };
        self.store.lock().unwrap().set(output_name, value);
        Ok(())
    }

    /// Recursively interpolate every string leaf of a structural value,
    /// used to expand templates inside `chat`'s `messages`/`extra_body`.
    fn interpolate_value(&self, v: &Value) -> RtResult<Value> {
        match v {
            Value::String(s) => Ok(Value::String(self.interp(s)?)),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.interpolate_value(item)?);
                }
                Ok(Value::List(out))
            }
            Value::Map(m) => {
                let mut out = OrderedMap::new();
                for (k, val) in m.iter() {
                    out.insert(k, self.interpolate_value(val)?);
                }
                Ok(Value::Map(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// `to_index == 0` or `to_index < from_index` (after negatives are
/// resolved) always yields `[]` (spec §4.6, invariant 4 of §8).
fn slice_1based_inclusive(list: &[Value], from_index: i64, to_index: i64) -> Vec<Value> {
    if to_index == 0 {
        return Vec::new();
    }
    let n = list.len() as i64;
    let norm = |i: i64| if i < 0 { n + i + 1 } else { i };
    let from_n = norm(from_index);
    let to_n = norm(to_index);
    if to_n < from_n {
        return Vec::new();
    }
    let from_c = from_n.max(1);
    let to_c = to_n.min(n);
    if from_c > to_c || from_c > n || to_c < 1 {
        return Vec::new();
    }
    list[(from_c - 1) as usize..=(to_c - 1) as usize].to_vec()
}

/// A field whose entire string is a single `{name}` placeholder with no
/// surrounding literal text — accepted as a direct (non-stringifying)
/// insert reference for `list`-shaped fields. Returns `None` for anything
/// else, including `{a}{b}` or `prefix{a}`.
fn bare_reference(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_reference_requires_whole_field_to_be_one_placeholder() {
        assert_eq!(bare_reference("{xs}"), Some("xs"));
        assert_eq!(bare_reference("prefix{xs}"), None);
        assert_eq!(bare_reference("{xs}{ys}"), None);
        assert_eq!(bare_reference("xs"), None);
    }

    #[test]
    fn slice_to_index_zero_is_always_empty() {
        let list = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        assert_eq!(slice_1based_inclusive(&list, 1, 0), Vec::<Value>::new());
    }

    #[test]
    fn slice_to_before_from_is_empty() {
        let list = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        assert_eq!(slice_1based_inclusive(&list, 3, 1), Vec::<Value>::new());
    }

    #[test]
    fn slice_is_right_inclusive_and_one_based() {
        let list = vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)];
        assert_eq!(
            slice_1based_inclusive(&list, 2, 3),
            vec![Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn slice_negative_indices_count_from_the_end() {
        let list = vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)];
        assert_eq!(
            slice_1based_inclusive(&list, -2, -1),
            vec![Value::Int(3), Value::Int(4)]
        );
    }
}
