//! 核心编排层：会话数据、状态投影、错误、恢复引擎、预检、暂停监管、编排器

pub mod error;
pub mod orchestrator;
pub mod preflight;
pub mod recovery;
pub mod session;
pub mod session_supervisor;
pub mod state;

pub use error::AgentError;
pub use orchestrator::Orchestrator;
pub use preflight::{DiscoveryAgent, Preflight};
pub use recovery::{Diagnosis, FailureCause, RecoveryEngine, StrategyName};
pub use session::{ActionInvocation, ActionResult, Plan, Session, Turn, UserMessage};
pub use session_supervisor::SessionSupervisor;
pub use state::{AwaitReason, SessionOutcome, SessionStatus};
