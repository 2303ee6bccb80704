use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as SessionMutex;

use crate::answers::{self, AnswerEcho, AnswerPayload, ValidatedAnswer};
use crate::catalog::{AnswerSpec, Catalog, Problem, ProblemKind};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::progress::TargetPoints;
use crate::sandbox::SandboxClient;
use crate::scoring;
use crate::selector::{practice, theory};
use crate::session::{SessionKey, StudentSession};
use crate::store;
use crate::weakest_link::{self, WeakestLinkState};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_RETRY_BASE_MS: u64 = 100;

/// Result of a submission, echoed back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub coefficient: f64,
    pub is_solved: bool,
    pub echo: AnswerEcho,
}

/// Selection facade and answer intake. Owns the immutable content catalog
/// and the per-(user, semester) session registry; every entry point locks
/// exactly one session for its whole duration, so all mutations within a
/// scope are serialized while different students proceed in parallel.
pub struct Engine {
    catalog: Arc<Catalog>,
    config: Arc<EngineConfig>,
    sandbox: SandboxClient,
    sessions: parking_lot::Mutex<HashMap<SessionKey, Arc<SessionMutex<StudentSession>>>>,
    storage_dir: Option<PathBuf>,
}

impl Engine {
    pub fn new(catalog: Catalog, config: EngineConfig) -> Self {
        let sandbox = SandboxClient::new(&config);
        Engine {
            catalog: Arc::new(catalog),
            config: Arc::new(config),
            sandbox,
            sessions: parking_lot::Mutex::new(HashMap::new()),
            storage_dir: None,
        }
    }

    /// Enable JSON snapshot persistence under `dir`.
    pub fn with_storage<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load previously persisted sessions into the registry.
    pub async fn restore_sessions(&self) -> Result<usize> {
        let Some(dir) = &self.storage_dir else {
            return Ok(0);
        };
        let restored = store::load_all_sessions(dir).await?;
        let count = restored.len();
        let mut sessions = self.sessions.lock();
        for session in restored {
            sessions.insert(session.key(), Arc::new(SessionMutex::new(session)));
        }
        tracing::info!(count, "Sessions restored from storage");
        Ok(count)
    }

    /// Enroll a student: validate the join code and create one progress row
    /// per course topic plus the weakest-link state. Enrolling twice is a
    /// no-op.
    pub async fn enroll(&self, user: &str, semester_id: &str, join_code: &str) -> Result<()> {
        if user.is_empty() {
            return Err(EngineError::Unauthenticated);
        }
        let semester = self.catalog.semester(semester_id)?;
        if semester.teachers.iter().any(|t| t == user) {
            return Err(EngineError::IsTeacher);
        }
        let key = SessionKey::new(user, semester_id);
        if self.sessions.lock().contains_key(&key) {
            return Ok(());
        }
        if join_code.to_uppercase() != semester.join_code {
            return Err(EngineError::BadJoinCode);
        }
        if semester.code_expires_at < Utc::now() {
            return Err(EngineError::JoinCodeExpired);
        }

        let session = StudentSession::new(user, semester_id, &self.catalog, &self.config)?;
        let snapshot = session.clone();
        self.sessions
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(SessionMutex::new(session)));
        tracing::info!(user, semester = semester_id, "Student enrolled");
        self.persist(snapshot).await
    }

    fn session_handle(&self, user: &str, semester: &str) -> Result<Arc<SessionMutex<StudentSession>>> {
        self.sessions
            .lock()
            .get(&SessionKey::new(user, semester))
            .cloned()
            .ok_or_else(|| EngineError::NotEnrolled {
                user: user.to_string(),
                semester: semester.to_string(),
            })
    }

    /// Next theory problem for a topic. Read-only.
    pub async fn next_theory(&self, user: &str, semester: &str, topic_id: &str) -> Result<Problem> {
        let handle = self.session_handle(user, semester)?;
        let session = handle.lock().await;
        let problem = theory::next_theory_problem(&session, &self.catalog, &self.config, topic_id)?;
        tracing::info!(user, topic = topic_id, problem = %problem.id, "Theory problem selected");
        Ok(problem.clone())
    }

    /// Next practice problem. Serves the weakest-link probe queue first; an
    /// exhausted queue finalizes (penalties applied) before the regular
    /// selector runs.
    pub async fn next_practice(&self, user: &str, semester: &str) -> Result<Problem> {
        let handle = self.session_handle(user, semester)?;
        let mut session = handle.lock().await;

        if session.weakest_link.state == WeakestLinkState::InProgress {
            match weakest_link::next_probe(&mut session, &self.catalog, &self.config)? {
                Some(problem_id) => {
                    let problem = self.catalog.problem(&problem_id)?.clone();
                    tracing::info!(user, problem = %problem.id, "Weakest-link probe selected");
                    let snapshot = session.clone();
                    drop(session);
                    self.persist(snapshot).await?;
                    return Ok(problem);
                }
                None => {
                    session.weakest_link.state = WeakestLinkState::Done;
                    weakest_link::finalize(&mut session, &self.config)?;
                }
            }
        }

        let problem =
            practice::next_practice_problem(&session, &self.catalog, &self.config)?.clone();
        tracing::info!(user, problem = %problem.id, "Practice problem selected");
        let snapshot = session.clone();
        drop(session);
        self.persist(snapshot).await?;
        Ok(problem)
    }

    /// Validate and ingest an answer. CODE payloads are judged by the
    /// external sandbox; everything else is validated locally. All state
    /// changes commit atomically under the session lock.
    pub async fn submit_answer(
        &self,
        user: &str,
        semester: &str,
        problem_id: &str,
        payload: &AnswerPayload,
        elapsed_seconds: Option<f64>,
    ) -> Result<SubmissionReceipt> {
        let problem = self.catalog.problem(problem_id)?.clone();
        let validated = match (&problem.answer, payload) {
            (AnswerSpec::Code { .. }, AnswerPayload::Code { code }) => {
                self.sandbox.evaluate(&problem, code).await?
            }
            _ => answers::validate_answer(&problem, payload)?,
        };

        let handle = self.session_handle(user, semester)?;
        let (receipt, snapshot) = {
            let mut session = handle.lock().await;
            let receipt =
                self.apply_submission(&mut session, &problem, validated, elapsed_seconds)?;
            (receipt, session.clone())
        };
        self.persist(snapshot).await?;
        Ok(receipt)
    }

    /// The submission pipeline under the lock: access checks, weakest-link
    /// verdict, log append, scoring, weakest-link trigger.
    fn apply_submission(
        &self,
        session: &mut StudentSession,
        problem: &Problem,
        validated: ValidatedAnswer,
        elapsed_seconds: Option<f64>,
    ) -> Result<SubmissionReceipt> {
        let config = &self.config;
        let topic = self.catalog.topic(&problem.main_topic)?;
        if let Some(parent_topic) = &topic.parent_topic {
            if !session.progress(parent_topic)?.is_theory_low_reached(config) {
                return Err(EngineError::PrerequisiteNotMet {
                    parent_topic: parent_topic.clone(),
                });
            }
        }
        let progress = session.progress(&problem.main_topic)?;
        match problem.kind {
            ProblemKind::Theory => {
                if progress.is_theory_completed(config) {
                    return Err(EngineError::TopicTheoryDone {
                        topic: problem.main_topic.clone(),
                    });
                }
            }
            ProblemKind::Practice => {
                if progress.is_practice_completed(config) {
                    return Err(EngineError::TopicPracticeDone {
                        topic: problem.main_topic.clone(),
                    });
                }
                if session.answers.is_solved(&problem.id) {
                    return Err(EngineError::AlreadySolved {
                        problem: problem.id.clone(),
                    });
                }
                if session.answers.attempts(&problem.id) >= config.max_attempts_per_practice_problem
                {
                    return Err(EngineError::AttemptsExhausted {
                        problem: problem.id.clone(),
                    });
                }
            }
        }

        let is_solved = validated.coefficient >= config.min_correct_answer_coefficient;

        // Probe verdicts are recorded before the answer is appended so the
        // trigger scan below never sees the probe as fresh evidence.
        let mut just_finalized = false;
        if problem.kind == ProblemKind::Practice
            && session.weakest_link.state == WeakestLinkState::InProgress
            && session.weakest_link.contains_problem(&problem.id)
        {
            weakest_link::record_verdict(session, config, &problem.id, is_solved);
            if session.weakest_link.state == WeakestLinkState::Done {
                weakest_link::finalize(session, config)?;
                just_finalized = true;
            }
        }

        session
            .answers
            .append(problem, Some(is_solved), validated.coefficient, elapsed_seconds);
        scoring::apply_answer(session, problem, validated.coefficient, config)?;

        if problem.kind == ProblemKind::Practice {
            if session.weakest_link.state == WeakestLinkState::None && !just_finalized {
                weakest_link::maybe_start(session, &self.catalog, config, problem)?;
            }
            weakest_link::abort_if_practice_completed(session, config)?;
        }

        tracing::info!(
            user = %session.user,
            problem = %problem.id,
            coefficient = validated.coefficient,
            is_solved,
            "Answer recorded"
        );
        Ok(SubmissionReceipt {
            coefficient: validated.coefficient,
            is_solved,
            echo: validated.echo,
        })
    }

    /// Record a skip: an answer row with no verdict and a zero coefficient.
    /// Skipping while probing calls the weakest-link search off.
    pub async fn skip_problem(&self, user: &str, semester: &str, problem_id: &str) -> Result<()> {
        let problem = self.catalog.problem(problem_id)?.clone();
        let handle = self.session_handle(user, semester)?;
        let snapshot = {
            let mut session = handle.lock().await;
            session.answers.append(&problem, None, 0.0, None);
            if problem.kind == ProblemKind::Practice
                && session.weakest_link.state == WeakestLinkState::InProgress
            {
                weakest_link::abort(&mut session);
            }
            tracing::info!(user, problem = problem_id, "Problem skipped");
            session.clone()
        };
        self.persist(snapshot).await
    }

    /// Change the student's target-points ceiling (61 / 76 / 91).
    pub async fn change_target_points(&self, user: &str, semester: &str, points: u32) -> Result<()> {
        let target = TargetPoints::from_points(points)
            .ok_or_else(|| EngineError::bad_payload(format!("invalid target points {points}")))?;
        let handle = self.session_handle(user, semester)?;
        let snapshot = {
            let mut session = handle.lock().await;
            session.target_points = target;
            session.clone()
        };
        self.persist(snapshot).await
    }

    /// Current progress of one topic.
    pub async fn topic_progress(
        &self,
        user: &str,
        semester: &str,
        topic_id: &str,
    ) -> Result<crate::progress::Progress> {
        let handle = self.session_handle(user, semester)?;
        let session = handle.lock().await;
        session.progress(topic_id).cloned()
    }

    /// Snapshot of every progress row of the session.
    pub async fn progress_snapshot(
        &self,
        user: &str,
        semester: &str,
    ) -> Result<Vec<crate::progress::Progress>> {
        let handle = self.session_handle(user, semester)?;
        let session = handle.lock().await;
        Ok(session.progress.values().cloned().collect())
    }

    /// Current weakest-link automaton state.
    pub async fn weakest_link_state(&self, user: &str, semester: &str) -> Result<WeakestLinkState> {
        let handle = self.session_handle(user, semester)?;
        let session = handle.lock().await;
        Ok(session.weakest_link.state)
    }

    /// Snapshot of the weakest-link queue.
    pub async fn weakest_link_queue(
        &self,
        user: &str,
        semester: &str,
    ) -> Result<crate::weakest_link::WeakestLinkQueue> {
        let handle = self.session_handle(user, semester)?;
        let session = handle.lock().await;
        Ok(session.weakest_link.clone())
    }

    /// Write a snapshot if storage is configured, retrying transient errors
    /// with a doubling delay between attempts.
    async fn persist(&self, snapshot: StudentSession) -> Result<()> {
        let Some(dir) = &self.storage_dir else {
            return Ok(());
        };
        let mut last_error = None;
        for attempt in 0..PERSIST_ATTEMPTS {
            match store::save_session(dir, &snapshot).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt, error = %e, "Persist failed, retrying");
                    let delay_ms = PERSIST_RETRY_BASE_MS << attempt;
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::Storage {
            reason: "persist failed".into(),
        }))
    }
}
