use serde::{Deserialize, Serialize};

use crate::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

/// Assembler pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Number of concurrent merge workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Tasks that may wait for a merge worker before `post` applies back-pressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Resolved tasks that may wait for the notifier.
    #[serde(default = "default_queue_capacity")]
    pub result_capacity: usize,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            result_capacity: default_queue_capacity(),
        }
    }
}
