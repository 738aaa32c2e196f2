use serde::{Deserialize, Serialize};

/// A peer agent this one is aware of, for prompt-assembly context about who
/// else shares the chat fabric (not a delegation or sub-agent relationship).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAgent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstructionsContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerAgent>,
}

/// A declarative trigger/action pair evaluated by the turn engine before
/// falling back to general LLM reasoning, e.g. "on mention of 'portfolio',
/// run the allocation pipeline".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub trigger: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstructionsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub workflow: Vec<WorkflowStep>,
    #[serde(default)]
    pub context: InstructionsContext,
}
