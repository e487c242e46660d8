//! Declarative task specifications.
//!
//! Tasks are loaded from a JSON file and validated up front; a bad spec
//! stops the program before any execution starts. Turn templates carry a
//! `${workspace}` token that is substituted at run time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::errors::ConfigError;

/// Substitution token available in turn templates.
pub const WORKSPACE_TOKEN: &str = "${workspace}";

fn default_max_steps() -> u32 {
    50
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Evaluation stage a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Cheap first-pass subset run against every variant.
    Screen,
    /// Thorough subset run only against promoted variants.
    Deep,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Screen => write!(f, "screen"),
            Stage::Deep => write!(f, "deep"),
        }
    }
}

/// One scripted scenario with its pass/fail criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub stage: Stage,
    #[serde(default)]
    pub category: String,
    /// Turn templates; turns of one task share a conversation thread.
    #[serde(default)]
    pub turns: Vec<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub require_evidence: bool,
    /// Each entry is an OR-group "a|b|c"; the groups AND together.
    #[serde(default)]
    pub must_contain: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
    /// Telemetry signals this task treats as automatic failures.
    #[serde(default)]
    pub hard_fail_events: Vec<String>,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            stage: Stage::Screen,
            category: String::new(),
            turns: Vec::new(),
            max_steps: default_max_steps(),
            timeout_seconds: default_timeout_seconds(),
            require_evidence: false,
            must_contain: Vec::new(),
            forbidden: Vec::new(),
            hard_fail_events: Vec::new(),
        }
    }
}

impl TaskSpec {
    /// Substitute the workspace token into one turn template.
    pub fn render_turn(&self, template: &str, workspace: &str) -> String {
        template.replace(WORKSPACE_TOKEN, workspace)
    }
}

/// The on-disk task spec file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpecFile {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl TaskSpecFile {
    /// Load and validate a spec file; any problem is fatal.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if path.trim().is_empty() {
            return Err(ConfigError::EmptySpecPath);
        }
        let content = std::fs::read_to_string(Path::new(path)).map_err(|source| {
            ConfigError::Read {
                path: path.to_string(),
                source,
            }
        })?;
        let file: TaskSpecFile =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?;
        file.validate()?;
        info!(path, tasks = file.tasks.len(), "loaded task spec");
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(ConfigError::EmptyTaskId);
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ConfigError::DuplicateTask(task.id.clone()));
            }
            if task.turns.is_empty() {
                return Err(ConfigError::NoTurns(task.id.clone()));
            }
        }
        Ok(())
    }

    /// Tasks belonging to one evaluation stage.
    pub fn tasks_for_stage(&self, stage: Stage) -> Vec<&TaskSpec> {
        self.tasks.iter().filter(|task| task.stage == stage).collect()
    }
}
