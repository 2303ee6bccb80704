use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{AnswerSpec, Problem, ProblemKind};
use crate::error::{EngineError, Result};

/// Raw answer payload submitted by the client, one variant per problem kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnswerPayload {
    MultipleChoiceRadio { answer_id: String },
    MultipleChoiceCheckbox { answer_ids: Vec<String> },
    FillInSingleBlank { value: String },
    Code { code: String },
}

/// Normalized echo of what the student chose, returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerEcho {
    ChoiceId(String),
    ChoiceIds(Vec<String>),
    Text(String),
}

/// Outcome of validating a payload against a problem's answer spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedAnswer {
    pub coefficient: f64,
    pub echo: AnswerEcho,
}

/// Validate the offline answer kinds (everything except CODE, which goes
/// through the sandbox client). Returns a coefficient in [0, 1].
pub fn validate_answer(problem: &Problem, payload: &AnswerPayload) -> Result<ValidatedAnswer> {
    match (&problem.answer, payload) {
        (AnswerSpec::MultipleChoiceRadio { options }, AnswerPayload::MultipleChoiceRadio { answer_id }) => {
            let chosen = options
                .iter()
                .find(|o| o.id == *answer_id)
                .ok_or_else(|| EngineError::bad_payload("no answer option selected"))?;
            Ok(ValidatedAnswer {
                coefficient: if chosen.is_correct { 1.0 } else { 0.0 },
                echo: AnswerEcho::ChoiceId(chosen.id.clone()),
            })
        }
        (AnswerSpec::MultipleChoiceCheckbox { options }, AnswerPayload::MultipleChoiceCheckbox { answer_ids }) => {
            if answer_ids.is_empty() {
                return Err(EngineError::bad_payload("no answer options selected"));
            }
            let correct_total = options.iter().filter(|o| o.is_correct).count();
            if correct_total == 0 {
                return Err(EngineError::inconsistency(format!(
                    "problem {} has no correct checkbox options",
                    problem.id
                )));
            }
            let mut correct_chosen = 0usize;
            let mut wrong_chosen = 0usize;
            let mut seen = std::collections::HashSet::new();
            for answer_id in answer_ids {
                if !seen.insert(answer_id.as_str()) {
                    return Err(EngineError::bad_payload("duplicate answer option"));
                }
                let chosen = options
                    .iter()
                    .find(|o| o.id == *answer_id)
                    .ok_or_else(|| EngineError::bad_payload("unknown answer option"))?;
                if chosen.is_correct {
                    correct_chosen += 1;
                } else {
                    wrong_chosen += 1;
                }
            }
            let coefficient =
                (correct_chosen as f64 - wrong_chosen as f64) / correct_total as f64;
            Ok(ValidatedAnswer {
                coefficient: coefficient.max(0.0),
                echo: AnswerEcho::ChoiceIds(answer_ids.clone()),
            })
        }
        (AnswerSpec::FillInSingleBlank { accepted }, AnswerPayload::FillInSingleBlank { value }) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(EngineError::bad_payload("empty answer"));
            }
            let matched = accepted
                .iter()
                .any(|option| option.to_lowercase() == trimmed.to_lowercase());
            Ok(ValidatedAnswer {
                coefficient: if matched { 1.0 } else { 0.0 },
                echo: AnswerEcho::Text(trimmed.to_string()),
            })
        }
        (AnswerSpec::Code { .. }, AnswerPayload::Code { .. }) => Err(EngineError::bad_payload(
            "code answers are validated through the sandbox",
        )),
        _ => Err(EngineError::bad_payload(
            "payload kind does not match the problem",
        )),
    }
}

/// One append-only log entry. `is_solved == None` marks a skipped problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnswer {
    pub problem: String,
    pub kind: ProblemKind,
    pub main_topic: String,
    pub is_solved: Option<bool>,
    pub coefficient: f64,
    pub elapsed_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// Monotonic per-session sequence, tie-break for equal timestamps.
    pub seq: u64,
}

/// Append-only answer log of one (user, semester) scope. Entries are never
/// mutated or removed; `seq` gives them a total order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerLog {
    entries: Vec<UserAnswer>,
    next_seq: u64,
}

impl AnswerLog {
    pub fn append(
        &mut self,
        problem: &Problem,
        is_solved: Option<bool>,
        coefficient: f64,
        elapsed_seconds: Option<f64>,
    ) -> &UserAnswer {
        let answer = UserAnswer {
            problem: problem.id.clone(),
            kind: problem.kind,
            main_topic: problem.main_topic.clone(),
            is_solved,
            coefficient,
            elapsed_seconds,
            created_at: Utc::now(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.push(answer);
        self.entries.last().expect("entry just pushed")
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &UserAnswer> {
        self.entries.iter()
    }

    /// Most recent first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &UserAnswer> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of submissions recorded for a problem, skips included.
    pub fn attempts(&self, problem_id: &str) -> usize {
        self.entries.iter().filter(|a| a.problem == problem_id).count()
    }

    pub fn has_answered(&self, problem_id: &str) -> bool {
        self.attempts(problem_id) > 0
    }

    pub fn is_solved(&self, problem_id: &str) -> bool {
        self.entries
            .iter()
            .any(|a| a.problem == problem_id && a.is_solved == Some(true))
    }

    /// Non-skipped theory answers on a topic, oldest first.
    pub fn theory_answers_on_topic<'a>(
        &'a self,
        topic_id: &'a str,
    ) -> impl Iterator<Item = &'a UserAnswer> {
        self.entries.iter().filter(move |a| {
            a.kind == ProblemKind::Theory && a.main_topic == topic_id && a.is_solved.is_some()
        })
    }

    /// Practice answers, most recent first.
    pub fn practice_answers_recent(&self) -> impl Iterator<Item = &UserAnswer> {
        self.iter_recent().filter(|a| a.kind == ProblemKind::Practice)
    }
}
