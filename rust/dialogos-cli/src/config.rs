//! Flat runtime configuration assembled from CLI flags (spec §6).

use std::path::PathBuf;

use dialogos_rt::ChatConfig;

pub struct RunConfig {
    pub program_path: PathBuf,
    pub args: Vec<String>,
    pub fallback_dir: Option<PathBuf>,
    pub agent_mode: Option<AgentModeConfig>,
    pub chat: ChatConfig,
    pub trace_path: Option<PathBuf>,
}

pub struct AgentModeConfig {
    pub output_path: PathBuf,
    pub input_path: PathBuf,
}
