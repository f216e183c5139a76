//! Design-decision questions emitted by the planning agent.
//!
//! Questions arrive as a JSON object with a `questions` key, either in a
//! fenced ```json block or inline. Key aliases are accepted on input:
//! `question` for `text`, `answers` for `options`. Malformed JSON is never
//! fatal; it just yields no questions.

use serde::{Deserialize, Serialize};

use la_core::scan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    #[serde(alias = "question")]
    pub text: String,
    #[serde(default, alias = "answers")]
    pub options: Vec<String>,
}

#[derive(Deserialize)]
struct QuestionsPayload {
    questions: Vec<Question>,
}

/// Extract questions from a planner reply.
///
/// Tries the first fenced ```json block, then an inline balanced-brace scan
/// from the literal `{"questions"`.
pub fn parse_questions(reply: &str) -> Vec<Question> {
    let candidate = scan::first_fenced_json(reply)
        .or_else(|| scan::find_questions_object(reply));

    let Some(text) = candidate else {
        return Vec::new();
    };

    match serde_json::from_str::<QuestionsPayload>(text) {
        Ok(payload) => payload.questions,
        Err(_) => Vec::new(),
    }
}

/// Outcome of the interactive Q&A UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaOutcome {
    Completed,
    Aborted,
    Interrupted,
}

/// An in-progress Q&A pass: ordered questions with the user's selections.
#[derive(Debug, Clone)]
pub struct QaSession {
    pub questions: Vec<Question>,
    /// One slot per question; `None` until answered.
    pub answers: Vec<Option<String>>,
    /// Index of the question the UI has focused.
    pub current: usize,
}

impl QaSession {
    pub fn new(questions: Vec<Question>) -> Self {
        let answers = vec![None; questions.len()];
        Self {
            questions,
            answers,
            current: 0,
        }
    }

    /// Resume with prior selections intact.
    pub fn with_answers(questions: Vec<Question>, mut answers: Vec<Option<String>>) -> Self {
        answers.resize(questions.len(), None);
        Self {
            questions,
            answers,
            current: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn all_answered(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    pub fn set_answer(&mut self, index: usize, answer: impl Into<String>) {
        if index < self.answers.len() {
            self.answers[index] = Some(answer.into());
        }
    }

    /// Next unanswered question at or after `from`, wrapping around.
    pub fn next_unanswered(&self, from: usize) -> Option<usize> {
        let n = self.questions.len();
        (0..n)
            .map(|offset| (from + offset) % n)
            .find(|&i| self.answers[i].is_none())
    }

    /// Answered (question, answer) pairs in question order.
    pub fn answered_pairs(&self) -> Vec<(&Question, &str)> {
        self.questions
            .iter()
            .zip(self.answers.iter())
            .filter_map(|(q, a)| a.as_deref().map(|a| (q, a)))
            .collect()
    }
}
