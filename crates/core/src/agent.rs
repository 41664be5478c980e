//! Run configuration and outcome types.

use serde::{Deserialize, Serialize};

/// Per-run loop configuration supplied by the surrounding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Offer tools to the model at all
    #[serde(default = "default_true")]
    pub enable_tools: bool,

    /// Maximum model requests per run (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_auto_iterations: u32,

    /// Include the local (built-in) backend's tools
    #[serde(default = "default_true")]
    pub include_builtin_tools: bool,
}

fn default_true() -> bool {
    true
}
fn default_max_iterations() -> u32 {
    10
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enable_tools: true,
            max_auto_iterations: default_max_iterations(),
            include_builtin_tools: true,
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model stopped requesting tools (or calls await approval)
    Completed,
    /// The iteration cap was reached while the model still wanted tools
    MaxIterations,
    /// Cancelled, or a tool round ended aborted/rejected
    Aborted,
    /// The run ended without any tool being offered
    NoTools,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxIterations => "max_iterations",
            Self::Aborted => "aborted",
            Self::NoTools => "no_tools",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
