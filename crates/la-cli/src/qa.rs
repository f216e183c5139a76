//! Interactive Q&A UI for the planning workflow.
//!
//! Raw-mode terminal questionnaire: arrows or h/j/k/l to move, Enter to
//! select and advance, Tab for a free-text custom answer, Ctrl-D to submit
//! once everything is answered, ESC to abort (with confirmation). The
//! terminal is restored on every exit path by a drop guard.

use std::io::{stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};

use la_core::Result;
use la_plan::{QaOutcome, QaSession};

const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Restores the terminal no matter how the UI exits.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> std::io::Result<Self> {
        enable_raw_mode()?;
        execute!(stdout(), EnterAlternateScreen, Hide)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(stdout(), Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

enum Mode {
    Select,
    Custom(String),
    ConfirmAbort,
}

struct QaUi<'a> {
    session: &'a mut QaSession,
    /// Option cursor per question.
    selected: Vec<usize>,
    current: usize,
    mode: Mode,
    hint: Option<&'static str>,
}

pub fn run_qa_ui(session: &mut QaSession, interrupt: &Arc<AtomicBool>) -> Result<QaOutcome> {
    if session.is_empty() {
        return Ok(QaOutcome::Completed);
    }

    let _guard = TerminalGuard::new()?;

    let selected = initial_selections(session);
    let current = session.next_unanswered(0).unwrap_or(0);
    let mut ui = QaUi {
        session,
        selected,
        current,
        mode: Mode::Select,
        hint: None,
    };

    loop {
        ui.render()?;

        if !event::poll(POLL_INTERVAL)? {
            if interrupt.load(Ordering::SeqCst) {
                return Ok(QaOutcome::Interrupted);
            }
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };

        if let Some(outcome) = ui.handle_key(key) {
            return Ok(outcome);
        }
    }
}

/// Start each cursor on the previously chosen option when resuming.
fn initial_selections(session: &QaSession) -> Vec<usize> {
    session
        .questions
        .iter()
        .zip(session.answers.iter())
        .map(|(question, answer)| {
            answer
                .as_deref()
                .and_then(|a| question.options.iter().position(|o| o == a))
                .unwrap_or(0)
        })
        .collect()
}

impl QaUi<'_> {
    fn handle_key(&mut self, key: KeyEvent) -> Option<QaOutcome> {
        self.hint = None;

        if let Mode::ConfirmAbort = self.mode {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => return Some(QaOutcome::Aborted),
                _ => {
                    self.mode = Mode::Select;
                    return None;
                }
            }
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('d') => {
                    if self.session.all_answered() {
                        return Some(QaOutcome::Completed);
                    }
                    self.hint = Some("answer every question before submitting (Ctrl-D)");
                    return None;
                }
                KeyCode::Char('c') => return Some(QaOutcome::Interrupted),
                _ => {}
            }
        }

        if let Mode::Custom(ref mut buffer) = self.mode {
            match key.code {
                KeyCode::Enter => {
                    let answer = buffer.trim().to_string();
                    if !answer.is_empty() {
                        self.session.set_answer(self.current, answer);
                        self.mode = Mode::Select;
                        self.advance();
                    }
                }
                KeyCode::Tab | KeyCode::Esc => self.mode = Mode::Select,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(c) => buffer.push(c),
                _ => {}
            }
            return None;
        }

        let options = self.session.questions[self.current].options.len();
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                if options > 0 {
                    self.selected[self.current] =
                        (self.selected[self.current] + options - 1) % options;
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if options > 0 {
                    self.selected[self.current] = (self.selected[self.current] + 1) % options;
                }
            }
            KeyCode::Left | KeyCode::Char('h') => {
                let n = self.session.len();
                self.current = (self.current + n - 1) % n;
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.current = (self.current + 1) % self.session.len();
            }
            KeyCode::Enter => {
                let question = &self.session.questions[self.current];
                if question.options.is_empty() {
                    self.mode = Mode::Custom(String::new());
                } else {
                    let choice = question.options[self.selected[self.current]].clone();
                    self.session.set_answer(self.current, choice);
                    self.advance();
                }
            }
            KeyCode::Tab => self.mode = Mode::Custom(String::new()),
            KeyCode::Esc => self.mode = Mode::ConfirmAbort,
            _ => {}
        }
        None
    }

    /// Jump to the next unanswered question, wrapping.
    fn advance(&mut self) {
        if let Some(next) = self.session.next_unanswered(self.current + 1) {
            self.current = next;
        }
    }

    fn render(&self) -> std::io::Result<()> {
        let mut out = stdout();
        queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;

        let answered = self
            .session
            .answers
            .iter()
            .filter(|a| a.is_some())
            .count();
        queue!(
            out,
            SetForegroundColor(Color::Cyan),
            Print(format!(
                "Planning questions — {}/{} answered\r\n\r\n",
                answered,
                self.session.len()
            )),
            ResetColor
        )?;

        let question = &self.session.questions[self.current];
        queue!(
            out,
            Print(format!(
                "[{}/{}] {}\r\n\r\n",
                self.current + 1,
                self.session.len(),
                question.text
            ))
        )?;

        for (i, option) in question.options.iter().enumerate() {
            let marker = if i == self.selected[self.current] {
                "➤"
            } else {
                " "
            };
            let chosen = self.session.answers[self.current].as_deref() == Some(option.as_str());
            if chosen {
                queue!(out, SetForegroundColor(Color::Green))?;
            }
            queue!(
                out,
                Print(format!(
                    "  {} {}{}\r\n",
                    marker,
                    option,
                    if chosen { "  ✓" } else { "" }
                )),
                ResetColor
            )?;
        }

        match &self.mode {
            Mode::Custom(buffer) => {
                queue!(
                    out,
                    SetForegroundColor(Color::Yellow),
                    Print(format!("\r\n  Custom: {}_\r\n", buffer)),
                    ResetColor
                )?;
            }
            Mode::ConfirmAbort => {
                queue!(
                    out,
                    SetForegroundColor(Color::Red),
                    Print("\r\n  Abort planning? [y/N]\r\n"),
                    ResetColor
                )?;
            }
            Mode::Select => {
                if let Some(answer) = &self.session.answers[self.current] {
                    queue!(
                        out,
                        SetForegroundColor(Color::Green),
                        Print(format!("\r\n  answered: {}\r\n", answer)),
                        ResetColor
                    )?;
                }
            }
        }

        if let Some(hint) = self.hint {
            queue!(
                out,
                SetForegroundColor(Color::Yellow),
                Print(format!("\r\n  {}\r\n", hint)),
                ResetColor
            )?;
        }

        queue!(
            out,
            SetForegroundColor(Color::DarkGrey),
            Print("\r\n↑/↓ option · ←/→ question · Enter select · Tab custom · Ctrl-D submit · ESC abort\r\n"),
            ResetColor
        )?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use la_plan::Question;

    fn session() -> QaSession {
        QaSession::with_answers(
            vec![
                Question {
                    id: 1,
                    text: "Which db?".into(),
                    options: vec!["sqlite".into(), "postgres".into()],
                },
                Question {
                    id: 2,
                    text: "Sync?".into(),
                    options: vec!["yes".into(), "no".into()],
                },
            ],
            vec![Some("postgres".into()), None],
        )
    }

    #[test]
    fn test_initial_selections_restore_prior_choices() {
        let session = session();
        let selections = initial_selections(&session);
        assert_eq!(selections, vec![1, 0]);
    }

    #[test]
    fn test_key_navigation_and_selection() {
        let mut session = session();
        session.answers = vec![None, None];
        let mut ui = QaUi {
            selected: initial_selections(&session),
            current: 0,
            mode: Mode::Select,
            hint: None,
            session: &mut session,
        };

        // Down then Enter picks the second option and advances.
        assert!(ui
            .handle_key(KeyEvent::new(KeyCode::Down, KeyModifiers::NONE))
            .is_none());
        assert!(ui
            .handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE))
            .is_none());
        assert_eq!(ui.current, 1);
        assert_eq!(ui.session.answers[0].as_deref(), Some("postgres"));

        // Ctrl-D refuses while unanswered, completes when done.
        assert!(ui
            .handle_key(KeyEvent::new(KeyCode::Char('d'), KeyModifiers::CONTROL))
            .is_none());
        assert!(ui.hint.is_some());
        assert!(ui
            .handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE))
            .is_none());
        assert_eq!(
            ui.handle_key(KeyEvent::new(KeyCode::Char('d'), KeyModifiers::CONTROL)),
            Some(QaOutcome::Completed)
        );
    }

    #[test]
    fn test_custom_answer_entry() {
        let mut session = session();
        session.answers = vec![None, None];
        let mut ui = QaUi {
            selected: initial_selections(&session),
            current: 0,
            mode: Mode::Select,
            hint: None,
            session: &mut session,
        };

        ui.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        for c in "duckdb".chars() {
            ui.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        ui.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));

        assert_eq!(ui.session.answers[0].as_deref(), Some("duckdb"));
        assert!(matches!(ui.mode, Mode::Select));
    }

    #[test]
    fn test_abort_requires_confirmation() {
        let mut session = session();
        let mut ui = QaUi {
            selected: initial_selections(&session),
            current: 0,
            mode: Mode::Select,
            hint: None,
            session: &mut session,
        };

        ui.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        assert!(matches!(ui.mode, Mode::ConfirmAbort));

        // Anything but 'y' backs out.
        assert!(ui
            .handle_key(KeyEvent::new(KeyCode::Char('n'), KeyModifiers::NONE))
            .is_none());
        assert!(matches!(ui.mode, Mode::Select));

        ui.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        assert_eq!(
            ui.handle_key(KeyEvent::new(KeyCode::Char('y'), KeyModifiers::NONE)),
            Some(QaOutcome::Aborted)
        );
    }
}
