//! Configuration error taxonomy.
//!
//! Only load-time problems are typed errors: they stop the program before
//! any execution starts. Everything that goes wrong during a run is
//! captured as data on the relevant turn or result so a single failure
//! never aborts the batch.

use thiserror::Error;

/// Fail-fast configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("task spec path is empty")]
    EmptySpecPath,

    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("task spec contains no tasks")]
    NoTasks,

    #[error("task has an empty id")]
    EmptyTaskId,

    #[error("task '{0}' declared more than once")]
    DuplicateTask(String),

    #[error("task '{0}' has no turns")]
    NoTurns(String),

    #[error("baseline file contains no sources")]
    NoBaselineSources,

    #[error("variant population {population} is below the minimum {minimum} and no cap was requested")]
    VariantPopulationTooSmall { population: usize, minimum: usize },
}
