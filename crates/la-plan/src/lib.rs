//! la-plan: Planning workflow and Q&A state machine for llama-agent
//!
//! `/plan` drives an explorer subagent, a persistent planning agent, and an
//! interactive Q&A refinement loop over a persisted, resumable session.

pub mod questions;
pub mod session;
pub mod workflow;

pub use questions::{parse_questions, QaOutcome, QaSession, Question};
pub use session::{PlanState, PlanningSession};
pub use workflow::{PlanInteract, PlanRunStatus, PlanWorkflow};
