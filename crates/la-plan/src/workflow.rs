//! The `/plan` workflow: explorer, planner, Q&A refinement, approval.
//!
//! The explorer runs as a one-shot subagent spawn. The planner is a
//! persistent agent loop constructed directly (not via spawn) so its
//! transcript and KV-cache survive across refinement turns. Interactive
//! steps go through the [`PlanInteract`] seam so the workflow itself stays
//! terminal-free.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, warn};

use la_agents::{AgentRegistry, SubagentManager};
use la_core::{
    AgentConfig, AgentLoop, Error, LlmBackend, Message, PermissionManager, Result, SpawnRequest,
    StopReason, SubagentSpawner, ToolRegistry,
};
use la_store::ContextStore;

use crate::questions::{parse_questions, QaOutcome, QaSession};
use crate::session::{PlanState, PlanningSession};

/// Terminal interactions the workflow needs.
pub trait PlanInteract: Send + Sync {
    /// Offer to resume a saved, still-active session.
    fn confirm_resume(&self, session: &PlanningSession) -> bool;

    /// Run the interactive Q&A UI over the session.
    fn run_qa(&self, session: &mut QaSession, interrupt: &Arc<AtomicBool>) -> Result<QaOutcome>;

    /// Show the plan summary and ask for approval.
    fn approve_plan(&self, summary: &str) -> bool;
}

/// How a `/plan` invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanRunStatus {
    Approved,
    /// User declined the plan; the session stays awaiting approval.
    Declined,
    Aborted,
    /// Interrupted mid-phase; the session remains active and resumable.
    Interrupted,
}

pub struct PlanWorkflow {
    backend: Arc<dyn LlmBackend>,
    tools: Arc<ToolRegistry>,
    permissions: Arc<PermissionManager>,
    spawner: Arc<SubagentManager>,
    registry: Arc<AgentRegistry>,
    store: Arc<ContextStore>,
    working_dir: PathBuf,
    interrupt: Arc<AtomicBool>,
}

impl PlanWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ToolRegistry>,
        permissions: Arc<PermissionManager>,
        spawner: Arc<SubagentManager>,
        registry: Arc<AgentRegistry>,
        store: Arc<ContextStore>,
        working_dir: impl Into<PathBuf>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            tools,
            permissions,
            spawner,
            registry,
            store,
            working_dir: working_dir.into(),
            interrupt,
        }
    }

    /// Drive the workflow for `context_id` until it finishes, pauses for
    /// the user, or aborts. `task` is required unless an active session is
    /// being resumed.
    pub async fn run(
        &self,
        task: Option<&str>,
        context_id: &str,
        ui: &dyn PlanInteract,
    ) -> Result<PlanRunStatus> {
        let context_dir = self.store.context_dir(context_id);

        let mut session = match PlanningSession::load(&context_dir)? {
            Some(saved) if saved.is_active() && ui.confirm_resume(&saved) => {
                debug!(state = %saved.state, "resuming planning session");
                saved
            }
            _ => {
                let task = task
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| Error::config("/plan requires a task"))?;
                let session = PlanningSession::new(task, context_id);
                session.save(&context_dir)?;
                session
            }
        };

        // The planner survives across phases within this invocation so
        // refinement turns continue one conversation.
        let mut planner: Option<AgentLoop> = None;

        loop {
            match session.state {
                PlanState::Exploring => {
                    let request = SpawnRequest {
                        agent_name: "explorer-agent".to_string(),
                        task: exploration_prompt(&session.task),
                        context: None,
                        max_iterations: None,
                        persist: false,
                        spawn_depth: 0,
                        working_dir: None,
                    };
                    let outcome = Arc::clone(&self.spawner)
                        .spawn(request, Arc::clone(&self.interrupt))
                        .await?;

                    if !outcome.success {
                        let error = outcome.error.unwrap_or_default();
                        if error.contains("cancelled") {
                            session.save(&context_dir)?;
                            return Ok(PlanRunStatus::Interrupted);
                        }
                        warn!(error = %error, "exploration failed; aborting plan");
                        session.transition(PlanState::Aborted)?;
                        session.save(&context_dir)?;
                        return Ok(PlanRunStatus::Aborted);
                    }

                    session.exploration_findings = outcome.output;
                    session.transition(PlanState::Synthesizing)?;
                    session.save(&context_dir)?;
                }

                PlanState::Synthesizing => {
                    let agent = self.fresh_planner()?;
                    let planner = planner.insert(agent);

                    let opening = format!(
                        "# Task\n{}\n\n# Exploration Findings\n{}",
                        session.task, session.exploration_findings
                    );
                    let run = planner.run(&opening).await?;
                    if run.stop != StopReason::Completed {
                        session.save(&context_dir)?;
                        return Ok(self.stalled(&mut session, &context_dir, run.stop)?);
                    }

                    session.plan_content = run.final_response.clone();
                    session.iteration += 1;
                    self.route_reply(&mut session, &run.final_response)?;
                    session.save(&context_dir)?;
                }

                PlanState::Questioning => {
                    session.transition(PlanState::AwaitingAnswers)?;
                    session.save(&context_dir)?;
                }

                PlanState::AwaitingAnswers => {
                    let mut qa = QaSession::with_answers(
                        session.questions.clone(),
                        session.answers.clone(),
                    );
                    let outcome = ui.run_qa(&mut qa, &self.interrupt)?;
                    session.answers = qa.answers;

                    match outcome {
                        QaOutcome::Interrupted => {
                            session.save(&context_dir)?;
                            return Ok(PlanRunStatus::Interrupted);
                        }
                        QaOutcome::Aborted => {
                            session.transition(PlanState::Aborted)?;
                            session.save(&context_dir)?;
                            return Ok(PlanRunStatus::Aborted);
                        }
                        QaOutcome::Completed => {
                            session.transition(PlanState::Refining)?;
                            session.save(&context_dir)?;
                        }
                    }
                }

                PlanState::Refining => {
                    if planner.is_none() {
                        planner = Some(self.planner_with_history(&session)?);
                    }
                    let planner = planner.as_mut().expect("planner just ensured");

                    let run = planner.run(&refinement_prompt(&session)).await?;
                    if run.stop != StopReason::Completed {
                        session.save(&context_dir)?;
                        return Ok(self.stalled(&mut session, &context_dir, run.stop)?);
                    }

                    session.plan_content = run.final_response.clone();
                    session.iteration += 1;
                    self.route_reply(&mut session, &run.final_response)?;
                    session.save(&context_dir)?;
                }

                PlanState::AwaitingApproval => {
                    if ui.approve_plan(&plan_summary(&session)) {
                        let markdown = final_plan_markdown(&session);
                        self.store.save_plan(context_id, &markdown)?;
                        self.store
                            .update_metadata(context_id, "plan_ref", "plan.md".into())?;
                        session.plan_path = Some(
                            self.store
                                .context_dir(context_id)
                                .join("plan.md")
                                .display()
                                .to_string(),
                        );
                        session.transition(PlanState::Approved)?;
                        session.save(&context_dir)?;
                        return Ok(PlanRunStatus::Approved);
                    }

                    session.save(&context_dir)?;
                    return Ok(PlanRunStatus::Declined);
                }

                PlanState::Idle | PlanState::Approved | PlanState::Aborted => {
                    // A terminal session reached the loop; nothing to drive.
                    return Ok(if session.state == PlanState::Approved {
                        PlanRunStatus::Approved
                    } else {
                        PlanRunStatus::Aborted
                    });
                }
            }
        }
    }

    /// A planner loop with the planning-agent system prompt.
    fn fresh_planner(&self) -> Result<AgentLoop> {
        let def = self
            .registry
            .get("planning-agent")
            .ok_or_else(|| Error::UnknownAgent("planning-agent".to_string()))?;

        let config = AgentConfig::new(&self.working_dir)
            .with_custom_system_prompt(def.system_prompt())
            .with_allowed_tools(def.allowed_tools.clone())
            .with_max_iterations(def.max_iterations);

        let mut agent = AgentLoop::new(
            config,
            Arc::clone(&self.backend),
            Arc::clone(&self.tools),
            Arc::clone(&self.permissions),
        )?;
        agent.set_interrupt(Arc::clone(&self.interrupt));
        Ok(agent)
    }

    /// Rebuild the planner conversation when resuming a persisted session
    /// in a fresh process.
    fn planner_with_history(&self, session: &PlanningSession) -> Result<AgentLoop> {
        let mut agent = self.fresh_planner()?;
        let opening = format!(
            "# Task\n{}\n\n# Exploration Findings\n{}",
            session.task, session.exploration_findings
        );
        let mut history = vec![Message::user(opening)];
        if !session.plan_content.is_empty() {
            history.push(Message::assistant(session.plan_content.clone()));
        }
        agent.set_messages(history);
        Ok(agent)
    }

    /// After a planner reply: more questions means another Q&A round,
    /// otherwise the plan goes up for approval.
    fn route_reply(&self, session: &mut PlanningSession, reply: &str) -> Result<()> {
        let questions = parse_questions(reply);
        if questions.is_empty() {
            session.transition(PlanState::AwaitingApproval)?;
        } else {
            session.answers = vec![None; questions.len()];
            session.questions = questions;
            session.transition(PlanState::Questioning)?;
        }
        Ok(())
    }

    fn stalled(
        &self,
        session: &mut PlanningSession,
        context_dir: &std::path::Path,
        stop: StopReason,
    ) -> Result<PlanRunStatus> {
        match stop {
            StopReason::UserCancelled => Ok(PlanRunStatus::Interrupted),
            _ => {
                session.transition(PlanState::Aborted)?;
                session.save(context_dir)?;
                Ok(PlanRunStatus::Aborted)
            }
        }
    }
}

fn exploration_prompt(task: &str) -> String {
    format!(
        "Explore the project with this upcoming task in mind and report the findings a \
planner will need: relevant files and modules, current behavior, conventions to follow, \
and anything risky.\n\nTask: {}",
        task
    )
}

fn refinement_prompt(session: &PlanningSession) -> String {
    let mut prompt = String::from("The user answered your questions:\n\n");
    for (question, answer) in session
        .questions
        .iter()
        .zip(session.answers.iter())
    {
        if let Some(answer) = answer {
            prompt.push_str(&format!("- {}: {}\n", question.text, answer));
        }
    }
    prompt.push_str(
        "\nRefine the plan accordingly. If the answers raise new design decisions, emit a \
questions JSON block; otherwise emit the final plan with no questions.",
    );
    prompt
}

fn plan_summary(session: &PlanningSession) -> String {
    format!(
        "Task: {}\nIterations: {}\nDecisions recorded: {}\n\n{}",
        session.task,
        session.iteration,
        session
            .answers
            .iter()
            .filter(|a| a.is_some())
            .count(),
        session.plan_content
    )
}

/// The approved plan file: header, metadata, decisions from Q&A, plan body.
fn final_plan_markdown(session: &PlanningSession) -> String {
    let mut out = format!("# Plan: {}\n\n", session.task);
    out.push_str(&format!(
        "_Context: {} · created: {} · iterations: {}_\n",
        session.context_id, session.created_at, session.iteration
    ));

    let decisions: Vec<(String, String)> = session
        .questions
        .iter()
        .zip(session.answers.iter())
        .filter_map(|(q, a)| a.clone().map(|a| (q.text.clone(), a)))
        .collect();
    if !decisions.is_empty() {
        out.push_str("\n## Design Decisions\n");
        for (question, answer) in decisions {
            out.push_str(&format!("- **{}** — {}\n", question, answer));
        }
    }

    out.push_str("\n## Plan\n\n");
    out.push_str(&session.plan_content);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use la_core::testing::MockBackend;
    use la_core::ToolRegistry;
    use tempfile::tempdir;

    /// Scripted stand-in for the terminal.
    struct ScriptedUi {
        resume: bool,
        qa_script: Mutex<Vec<QaScript>>,
        approve: bool,
        qa_runs: Mutex<u32>,
        resume_offers: Mutex<u32>,
        seen_answers: Mutex<Vec<Vec<Option<String>>>>,
    }

    enum QaScript {
        AnswerAll(Vec<&'static str>),
        Interrupt,
        Abort,
    }

    impl ScriptedUi {
        fn new(resume: bool, approve: bool, qa_script: Vec<QaScript>) -> Self {
            Self {
                resume,
                qa_script: Mutex::new(qa_script),
                approve,
                qa_runs: Mutex::new(0),
                resume_offers: Mutex::new(0),
                seen_answers: Mutex::new(Vec::new()),
            }
        }
    }

    impl PlanInteract for ScriptedUi {
        fn confirm_resume(&self, _session: &PlanningSession) -> bool {
            *self.resume_offers.lock().unwrap() += 1;
            self.resume
        }

        fn run_qa(
            &self,
            session: &mut QaSession,
            _interrupt: &Arc<AtomicBool>,
        ) -> Result<QaOutcome> {
            *self.qa_runs.lock().unwrap() += 1;
            self.seen_answers
                .lock()
                .unwrap()
                .push(session.answers.clone());
            let step = self.qa_script.lock().unwrap().remove(0);
            match step {
                QaScript::AnswerAll(answers) => {
                    for (i, answer) in answers.iter().enumerate() {
                        session.set_answer(i, *answer);
                    }
                    Ok(QaOutcome::Completed)
                }
                QaScript::Interrupt => {
                    // One answer in, then the user bails.
                    session.set_answer(0, "sqlite");
                    Ok(QaOutcome::Interrupted)
                }
                QaScript::Abort => Ok(QaOutcome::Aborted),
            }
        }

        fn approve_plan(&self, _summary: &str) -> bool {
            self.approve
        }
    }

    const QUESTIONS_REPLY: &str = "Draft plan.\n```json\n{\"questions\": [{\"id\": 1, \"text\": \"Which db?\", \"options\": [\"sqlite\", \"postgres\"]}, {\"id\": 2, \"text\": \"Sync?\", \"options\": [\"yes\", \"no\"]}, {\"id\": 3, \"text\": \"Tests?\", \"options\": [\"unit\", \"e2e\"]}]}\n```";

    struct Fixture {
        _dir: tempfile::TempDir,
        backend: Arc<MockBackend>,
        workflow: PlanWorkflow,
        store: Arc<ContextStore>,
        context_id: String,
        interrupt: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        let tools = Arc::new(ToolRegistry::new());
        let permissions = Arc::new(PermissionManager::new(true, None));
        let registry = Arc::new(AgentRegistry::with_embedded());
        let store = Arc::new(ContextStore::new(dir.path()));
        let context = store.create().unwrap();
        let interrupt = Arc::new(AtomicBool::new(false));

        let spawner = Arc::new(SubagentManager::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            Arc::clone(&tools),
            Arc::clone(&permissions),
            Arc::clone(&registry),
            std::env::temp_dir(),
            Some(dir.path().to_path_buf()),
        ));

        let workflow = PlanWorkflow::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            tools,
            permissions,
            spawner,
            registry,
            Arc::clone(&store),
            std::env::temp_dir(),
            Arc::clone(&interrupt),
        );

        Fixture {
            _dir: dir,
            backend,
            workflow,
            store,
            context_id: context.id,
            interrupt,
        }
    }

    #[tokio::test]
    async fn test_happy_path_without_questions() {
        let f = fixture();
        f.backend.queue_text("explorer findings");
        f.backend.queue_text("## Plan\n1. do the thing");

        let ui = ScriptedUi::new(false, true, vec![]);
        let status = f
            .workflow
            .run(Some("refactor foo"), &f.context_id, &ui)
            .await
            .unwrap();

        assert_eq!(status, PlanRunStatus::Approved);
        assert!(f.store.has_plan(&f.context_id));
        let plan = f.store.load_plan(&f.context_id).unwrap().unwrap();
        assert!(plan.starts_with("# Plan: refactor foo"));
        assert!(plan.contains("1. do the thing"));

        let saved = PlanningSession::load(&f.store.context_dir(&f.context_id))
            .unwrap()
            .unwrap();
        assert_eq!(saved.state, PlanState::Approved);
        assert_eq!(saved.exploration_findings, "explorer findings");

        // plan_ref recorded on the context.
        let context = f.store.load(&f.context_id).unwrap().unwrap();
        assert_eq!(context.metadata["plan_ref"], "plan.md");
    }

    #[tokio::test]
    async fn test_questions_then_refinement_reuses_planner() {
        let f = fixture();
        f.backend.queue_text("explorer findings");
        f.backend.queue_text(QUESTIONS_REPLY);
        f.backend.queue_text("## Final Plan\n1. use sqlite");

        let ui = ScriptedUi::new(
            false,
            true,
            vec![QaScript::AnswerAll(vec!["sqlite", "yes", "unit"])],
        );
        let status = f
            .workflow
            .run(Some("add storage"), &f.context_id, &ui)
            .await
            .unwrap();

        assert_eq!(status, PlanRunStatus::Approved);
        assert_eq!(*ui.qa_runs.lock().unwrap(), 1);

        // The refinement request went to the same planner conversation:
        // its transcript contains the first planner reply.
        let (messages, _) = f.backend.last_request().unwrap();
        assert!(messages
            .iter()
            .any(|m| m.content.contains("Which db?") && m.role == la_core::Role::Assistant));
        assert!(messages
            .iter()
            .any(|m| m.content.contains("The user answered your questions")));

        let plan = f.store.load_plan(&f.context_id).unwrap().unwrap();
        assert!(plan.contains("## Design Decisions"));
        assert!(plan.contains("**Which db?** — sqlite"));
    }

    #[tokio::test]
    async fn test_interrupt_in_qa_then_resume_with_prior_answers() {
        let f = fixture();
        f.backend.queue_text("explorer findings");
        f.backend.queue_text(QUESTIONS_REPLY);

        // First run: interrupted mid-questionnaire.
        let ui = ScriptedUi::new(false, true, vec![QaScript::Interrupt]);
        let status = f
            .workflow
            .run(Some("refactor foo"), &f.context_id, &ui)
            .await
            .unwrap();
        assert_eq!(status, PlanRunStatus::Interrupted);

        let saved = PlanningSession::load(&f.store.context_dir(&f.context_id))
            .unwrap()
            .unwrap();
        assert_eq!(saved.state, PlanState::AwaitingAnswers);
        assert_eq!(saved.questions.len(), 3);
        assert_eq!(saved.answers[0].as_deref(), Some("sqlite"));

        // Second run: resume is offered and accepted; the UI opens with the
        // prior selection intact, the workflow proceeds to refinement.
        f.backend.queue_text("## Final Plan\nno more questions");
        let ui = ScriptedUi::new(
            true,
            true,
            vec![QaScript::AnswerAll(vec!["sqlite", "yes", "unit"])],
        );
        let status = f.workflow.run(None, &f.context_id, &ui).await.unwrap();

        assert_eq!(status, PlanRunStatus::Approved);
        assert_eq!(*ui.resume_offers.lock().unwrap(), 1);
        let seen = ui.seen_answers.lock().unwrap();
        assert_eq!(seen[0][0].as_deref(), Some("sqlite"));
        assert_eq!(seen[0][1], None);
    }

    #[tokio::test]
    async fn test_abort_in_qa() {
        let f = fixture();
        f.backend.queue_text("explorer findings");
        f.backend.queue_text(QUESTIONS_REPLY);

        let ui = ScriptedUi::new(false, true, vec![QaScript::Abort]);
        let status = f
            .workflow
            .run(Some("task"), &f.context_id, &ui)
            .await
            .unwrap();

        assert_eq!(status, PlanRunStatus::Aborted);
        let saved = PlanningSession::load(&f.store.context_dir(&f.context_id))
            .unwrap()
            .unwrap();
        assert_eq!(saved.state, PlanState::Aborted);
        assert!(!saved.is_active());
    }

    #[tokio::test]
    async fn test_decline_keeps_session_awaiting_approval() {
        let f = fixture();
        f.backend.queue_text("explorer findings");
        f.backend.queue_text("## Plan\nstraightforward");

        let ui = ScriptedUi::new(false, false, vec![]);
        let status = f
            .workflow
            .run(Some("task"), &f.context_id, &ui)
            .await
            .unwrap();

        assert_eq!(status, PlanRunStatus::Declined);
        assert!(!f.store.has_plan(&f.context_id));
        let saved = PlanningSession::load(&f.store.context_dir(&f.context_id))
            .unwrap()
            .unwrap();
        assert_eq!(saved.state, PlanState::AwaitingApproval);
        assert!(saved.is_active());
    }

    #[tokio::test]
    async fn test_task_required_without_resumable_session() {
        let f = fixture();
        let ui = ScriptedUi::new(false, true, vec![]);
        let err = f.workflow.run(None, &f.context_id, &ui).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = f
            .workflow
            .run(Some("   "), &f.context_id, &ui)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_exploration_is_resumable() {
        let f = fixture();
        f.interrupt.store(true, Ordering::SeqCst);
        f.backend.queue_text("never reached");

        let ui = ScriptedUi::new(false, true, vec![]);
        let status = f
            .workflow
            .run(Some("refactor foo"), &f.context_id, &ui)
            .await
            .unwrap();

        assert_eq!(status, PlanRunStatus::Interrupted);
        let saved = PlanningSession::load(&f.store.context_dir(&f.context_id))
            .unwrap()
            .unwrap();
        // Still exploring; a later /plan can resume.
        assert_eq!(saved.state, PlanState::Exploring);
        assert!(saved.is_active());
    }
}
