//! Trigger context for a run

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inputs that select and parameterize one workflow run
///
/// The branch drives filter evaluation and cache-key resolution. `jobs`
/// optionally narrows the plan to the named references plus their transitive
/// dependencies. Secrets are injected only into jobs that declare them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerContext {
    pub branch: String,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

impl TriggerContext {
    pub fn for_branch(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            jobs: Vec::new(),
            secrets: HashMap::new(),
        }
    }
}
