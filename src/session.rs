use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::answers::AnswerLog;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::progress::{Progress, TargetPoints};
use crate::weakest_link::WeakestLinkQueue;

/// Identifies one student in one semester. All mutable engine state is
/// scoped to this key and serialized behind a per-key lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user: String,
    pub semester: String,
}

impl SessionKey {
    pub fn new(user: &str, semester: &str) -> Self {
        SessionKey {
            user: user.to_string(),
            semester: semester.to_string(),
        }
    }
}

/// Aggregate of everything the engine mutates for one (user, semester):
/// per-topic progress, the append-only answer log, the weakest-link queue
/// and the student's target-points ceiling. Locked as a whole per request;
/// persisted as a whole on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSession {
    pub user: String,
    pub semester: String,
    pub course: String,
    pub progress: HashMap<String, Progress>,
    pub answers: AnswerLog,
    pub target_points: TargetPoints,
    pub weakest_link: WeakestLinkQueue,
}

impl StudentSession {
    /// Create the session with one Progress row per topic of the course.
    pub fn new(user: &str, semester: &str, catalog: &Catalog, config: &EngineConfig) -> Result<Self> {
        let semester_row = catalog.semester(semester)?;
        let topics = catalog.course_topics(&semester_row.course)?;
        let progress = topics
            .iter()
            .map(|t| (t.id.clone(), Progress::new(&t.id, config)))
            .collect();
        Ok(StudentSession {
            user: user.to_string(),
            semester: semester.to_string(),
            course: semester_row.course.clone(),
            progress,
            answers: AnswerLog::default(),
            target_points: TargetPoints::High,
            weakest_link: WeakestLinkQueue::default(),
        })
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.user, &self.semester)
    }

    /// Progress row of a topic. A missing row for a topic the caller must
    /// update is a content inconsistency, not a user error.
    pub fn progress(&self, topic_id: &str) -> Result<&Progress> {
        self.progress.get(topic_id).ok_or_else(|| {
            EngineError::inconsistency(format!(
                "missing progress row for topic {topic_id} of user {}",
                self.user
            ))
        })
    }

    pub fn progress_mut(&mut self, topic_id: &str) -> Result<&mut Progress> {
        let user = self.user.clone();
        self.progress.get_mut(topic_id).ok_or_else(|| {
            EngineError::inconsistency(format!(
                "missing progress row for topic {topic_id} of user {user}"
            ))
        })
    }

    /// Ceiling on total topic points implied by the student's target choice.
    pub fn target_ceiling(&self, config: &EngineConfig) -> f64 {
        self.target_points.ceiling(config)
    }
}
