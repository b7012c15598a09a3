use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    ProcessCrash,
    InvalidOutput,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ProcessCrash => "PROCESS_CRASH",
            ErrorKind::InvalidOutput => "INVALID_OUTPUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl AgentInvocation {
    pub fn ok(output: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            error_kind: None,
            duration_ms,
        }
    }

    pub fn failed(kind: ErrorKind, error: String, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            error_kind: Some(kind),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDiag {
    pub command: String,
    pub available: bool,
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
