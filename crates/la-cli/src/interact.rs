//! Terminal prompts: permission consent and planning interactions.

use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use crossterm::ExecutableCommand;

use la_core::{PermissionPrompter, PromptAnswer, Result};
use la_plan::{PlanInteract, PlanningSession, QaOutcome, QaSession};

use crate::qa;

/// Print a colored prompt and read one line (blocking).
fn ask_line(prompt: &str) -> String {
    let mut out = std::io::stdout();
    let _ = out.execute(SetForegroundColor(Color::Yellow));
    print!("{}", prompt);
    let _ = out.execute(ResetColor);
    let _ = out.flush();

    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line.trim().to_lowercase()
}

fn confirm(prompt: &str) -> bool {
    matches!(ask_line(prompt).as_str(), "y" | "yes")
}

/// Asks the user for tool consent at the terminal.
pub struct TerminalPrompter;

#[async_trait]
impl PermissionPrompter for TerminalPrompter {
    async fn ask(&self, tool: &str, resource: &str) -> PromptAnswer {
        let prompt = format!(
            "\n  {} wants to run:\n    {}\n  Allow? [y]es / [n]o / [a]lways: ",
            tool, resource
        );
        // Terminal input is blocking; keep it off the async executor.
        let answer = tokio::task::spawn_blocking(move || ask_line(&prompt))
            .await
            .unwrap_or_default();

        match answer.as_str() {
            "y" | "yes" => PromptAnswer::Yes,
            "a" | "always" => PromptAnswer::Always,
            _ => PromptAnswer::No,
        }
    }
}

/// Terminal half of the planning workflow.
pub struct TerminalInteract;

impl PlanInteract for TerminalInteract {
    fn confirm_resume(&self, session: &PlanningSession) -> bool {
        println!(
            "\nFound a planning session for this context (state: {}, task: {}).",
            session.state, session.task
        );
        confirm("Resume it? [y/N]: ")
    }

    fn run_qa(&self, session: &mut QaSession, interrupt: &Arc<AtomicBool>) -> Result<QaOutcome> {
        qa::run_qa_ui(session, interrupt)
    }

    fn approve_plan(&self, summary: &str) -> bool {
        println!("\n──── Plan ────\n{}\n──────────────", summary);
        confirm("Approve this plan? [y/N]: ")
    }
}
