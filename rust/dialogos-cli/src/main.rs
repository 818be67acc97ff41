//! Dialogos CLI — runs a JSON5 task program to completion (spec §6).

mod config;
mod term_prompt;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;

use config::{AgentModeConfig, RunConfig};
use dialogos_frontend::load_program;
use dialogos_provider_agentfile::AgentFileChannel;
use dialogos_rt::prompt::PromptChannel;
use dialogos_rt::{ChatConfig, Interpreter, InsertStore, RuntimeError, Trace};
use term_prompt::TermPromptChannel;

#[derive(ClapParser)]
#[command(
    name = "dialogos",
    version,
    about = "Run a Dialogos JSON5 task program",
    long_about = "Dialogos interprets a declarative JSON5 task program: sequential and \
                  parallel task lists, a pattern-matched insert store, and optional chat \
                  completion, driven either by a terminal or a file-based agent-mode driver.\n\n\
                  Examples:\n  \
                  dialogos run program.json5\n  \
                  dialogos run program.json5 -- alice 42\n  \
                  dialogos run program.json5 --agent-mode /tmp/out.json /tmp/in.json\n  \
                  dialogos run program.json5 --fallback-dir ./inserts"
)]
struct Cli {
    /// Path to the JSON5 program to run
    program: PathBuf,

    /// Positional arguments made available as ARG1, ARG2, ... in the insert store
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Run with the file-based agent-mode prompt channel instead of the terminal:
    /// <output-path> <input-path>
    #[arg(long, num_args = 2, value_names = ["OUTPUT_PATH", "INPUT_PATH"])]
    agent_mode: Option<Vec<PathBuf>>,

    /// Directory consulted for an insert key on a local-store miss
    #[arg(long)]
    fallback_dir: Option<PathBuf>,

    /// Chat completion endpoint (overrides the program's own configuration)
    #[arg(long)]
    chat_endpoint: Option<String>,

    /// Chat completion API key (overrides the program's own configuration)
    #[arg(long)]
    chat_api_key: Option<String>,

    /// Append a JSONL execution trace to this file
    #[arg(long)]
    trace_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let agent_mode = cli.agent_mode.map(|paths| AgentModeConfig {
        output_path: paths[0].clone(),
        input_path: paths[1].clone(),
    });

    let mut chat = ChatConfig::default();
    if let Some(endpoint) = cli.chat_endpoint {
        chat.endpoint = endpoint;
    }
    if let Some(api_key) = cli.chat_api_key {
        chat.api_key = api_key;
    }

    let config = RunConfig {
        program_path: cli.program,
        args: cli.args,
        fallback_dir: cli.fallback_dir,
        agent_mode,
        chat,
        trace_path: cli.trace_file,
    };

    run(config)
}

fn run(config: RunConfig) -> ExitCode {
    let source = match fs::read_to_string(&config.program_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: could not read {}: {e}", config.program_path.display());
            return ExitCode::FAILURE;
        }
    };

    let program = match load_program(&source) {
        Ok(program) => program,
        Err(diagnostics) => {
            for diag in &diagnostics {
                eprintln!("{diag}");
            }
            return ExitCode::FAILURE;
        }
    };

    let mut store = InsertStore::new().with_args(config.args).seed(program.default_state.clone());
    if let Some(dir) = config.fallback_dir {
        store = store.with_fallback_dir(dir);
    }

    let trace = match config.trace_path {
        Some(path) => match Trace::to_file(&path) {
            Ok(trace) => trace,
            Err(e) => {
                eprintln!("error: could not open trace file {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Trace::disabled(),
    };

    let prompt: Box<dyn PromptChannel> = match config.agent_mode {
        Some(agent) => Box::new(AgentFileChannel::new(agent.output_path, agent.input_path)),
        None => Box::new(TermPromptChannel::new()),
    };

    let interpreter = Interpreter::new(&program, store, prompt, config.chat, trace);

    match interpreter.run() {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(RuntimeError::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::FAILURE
        }
        Err(e) => {
            let line = interpreter.error_line().unwrap_or(0);
            eprintln!("Error at line {line}: {e}");
            ExitCode::FAILURE
        }
    }
}

