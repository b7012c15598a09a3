pub mod process;
pub mod types;

use anyhow::Result;

pub use types::{AgentDiag, AgentInvocation, ErrorKind};

/// Boundary to the external AI agent. The core never sees how a call is
/// transported; it only interprets success/failure and the error kind.
pub trait AgentInvoker {
    fn doctor(&self) -> Result<AgentDiag>;
    fn invoke(&self, prompt: &str) -> Result<AgentInvocation>;
}
