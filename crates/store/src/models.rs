use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnTrigger {
    Matrix,
    Gateway,
}

impl TurnTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnTrigger::Matrix => "matrix",
            TurnTrigger::Gateway => "gateway",
        }
    }
}

impl std::str::FromStr for TurnTrigger {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matrix" => Ok(TurnTrigger::Matrix),
            "gateway" => Ok(TurnTrigger::Gateway),
            other => Err(format!("unknown turn trigger \"{other}\"")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnResult {
    Success,
    Error,
    ApprovalRequired,
}

impl TurnResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnResult::Success => "success",
            TurnResult::Error => "error",
            TurnResult::ApprovalRequired => "approval_required",
        }
    }
}

/// A row in `turn_log`, inserted before the turn engine runs and finalized
/// with status/duration after it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: i64,
    pub trace_id: String,
    pub room_id: String,
    pub sender_mxid: String,
    pub message: String,
    pub tool_calls: i64,
    pub result: Option<String>,
    pub error_msg: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub trigger: String,
    pub gateway_name: Option<String>,
    pub event_type: Option<String>,
}

/// A new turn row to insert, before `id`/`finished_at`/`duration_ms` exist.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub trace_id: String,
    pub room_id: String,
    pub sender_mxid: String,
    pub message: String,
    pub trigger: TurnTrigger,
    pub gateway_name: Option<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "denied" => Ok(ApprovalStatus::Denied),
            "expired" => Ok(ApprovalStatus::Expired),
            other => Err(format!("unknown approval status \"{other}\"")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub trace_id: String,
    pub room_id: String,
    pub action: String,
    pub target: String,
    pub params_json: String,
    pub status: String,
    pub requestor: String,
    pub expires_at: String,
    pub created_at: String,
    pub decided_at: Option<String>,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewApproval {
    pub approval_id: String,
    pub trace_id: String,
    pub room_id: String,
    pub action: String,
    pub target: String,
    pub params_json: String,
    pub requestor: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedConfigRow {
    pub hash: String,
    pub yaml_blob: String,
    pub applied_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioPosition {
    pub ticker: String,
    pub allocation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Portfolio {
    pub positions: Vec<PortfolioPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: i64,
    pub trace_id: String,
    pub trigger_source: String,
    pub room_id: Option<String>,
    pub status: String,
    pub summary: Option<String>,
    pub commentary: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAnalysisRun {
    pub trace_id: String,
    pub trigger_source: String,
    pub room_id: Option<String>,
    pub status: String,
    pub summary: Option<String>,
    pub commentary: Option<String>,
    pub tickers: Vec<NewTickerMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerMetric {
    pub run_id: i64,
    pub ticker: String,
    pub allocation: f64,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub metrics_json: Option<String>,
    pub commentary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTickerMetric {
    pub ticker: String,
    pub allocation: f64,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub metrics_json: Option<String>,
    pub commentary: Option<String>,
}
