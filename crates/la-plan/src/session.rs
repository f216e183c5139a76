//! The persistent planning session and its state machine.
//!
//! Sessions live at `contexts/<ctx-id>/plan_state.json` and mutate only
//! through validated transitions; every transition is persisted atomically
//! so a crash leaves either the prior state or the new one on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use la_core::{Error, Result};
use la_store::{now_iso, write_atomic};

use crate::questions::Question;

const SESSION_FILE: &str = "plan_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Idle,
    Exploring,
    Synthesizing,
    Questioning,
    AwaitingAnswers,
    Refining,
    AwaitingApproval,
    Approved,
    Aborted,
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlanState::Idle => "idle",
            PlanState::Exploring => "exploring",
            PlanState::Synthesizing => "synthesizing",
            PlanState::Questioning => "questioning",
            PlanState::AwaitingAnswers => "awaiting_answers",
            PlanState::Refining => "refining",
            PlanState::AwaitingApproval => "awaiting_approval",
            PlanState::Approved => "approved",
            PlanState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

impl PlanState {
    /// The transition table. Anything not listed here is illegal.
    pub fn can_transition(self, to: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, to),
            (Idle, Exploring)
                | (Exploring, Synthesizing)
                | (Exploring, Aborted)
                | (Synthesizing, Questioning)
                | (Synthesizing, AwaitingApproval)
                | (Synthesizing, Aborted)
                | (Questioning, AwaitingAnswers)
                | (Questioning, Aborted)
                | (AwaitingAnswers, Refining)
                | (AwaitingAnswers, Aborted)
                | (Refining, Questioning)
                | (Refining, AwaitingApproval)
                | (Refining, Aborted)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Refining)
                | (AwaitingApproval, Aborted)
                | (Approved, Idle)
                | (Aborted, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlanState::Approved | PlanState::Aborted)
    }

    /// Everything except idle and the terminal states.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            PlanState::Idle | PlanState::Approved | PlanState::Aborted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningSession {
    pub state: PlanState,
    pub context_id: String,
    pub task: String,
    #[serde(default)]
    pub exploration_findings: String,
    #[serde(default)]
    pub plan_content: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<Option<String>>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub plan_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PlanningSession {
    /// A fresh session starts out exploring.
    pub fn new(task: impl Into<String>, context_id: impl Into<String>) -> Self {
        let now = now_iso();
        Self {
            state: PlanState::Exploring,
            context_id: context_id.into(),
            task: task.into(),
            exploration_findings: String::new(),
            plan_content: String::new(),
            questions: Vec::new(),
            answers: Vec::new(),
            iteration: 0,
            plan_path: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Apply a validated transition. Illegal moves fail without mutating.
    pub fn transition(&mut self, to: PlanState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::state_transition(
                self.state.to_string(),
                to.to_string(),
            ));
        }
        self.state = to;
        self.updated_at = now_iso();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn session_path(context_dir: &Path) -> PathBuf {
        context_dir.join(SESSION_FILE)
    }

    /// Load from `contexts/<id>/plan_state.json`. Missing file is `None`;
    /// parse errors surface.
    pub fn load(context_dir: &Path) -> Result<Option<Self>> {
        let path = Self::session_path(context_dir);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session = serde_json::from_str(&contents)
            .map_err(|e| Error::parse(format!("{}: {}", path.display(), e)))?;
        Ok(Some(session))
    }

    /// Persist atomically (temp + rename).
    pub fn save(&self, context_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&Self::session_path(context_dir), &json)?;
        Ok(())
    }
}
