use serde::{Deserialize, Serialize};

use crate::catalog::{Difficulty, ProblemKind};
use crate::config::EngineConfig;

/// Student-selected ceiling at which further points for a topic are worth
/// zero. The numeric values mirror the course thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPoints {
    Low,
    Medium,
    High,
}

impl TargetPoints {
    pub fn ceiling(self, config: &EngineConfig) -> f64 {
        match self {
            TargetPoints::Low => config.topic_threshold_low,
            TargetPoints::Medium => config.topic_threshold_medium,
            TargetPoints::High => config.topic_threshold_high,
        }
    }

    pub fn from_points(points: u32) -> Option<TargetPoints> {
        match points {
            61 => Some(TargetPoints::Low),
            76 => Some(TargetPoints::Medium),
            91 => Some(TargetPoints::High),
            _ => None,
        }
    }
}

/// Per-topic mastery of one student in one semester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub topic: String,
    pub theory_points: f64,
    pub practice_points: f64,
    pub skill_level: f64,
}

impl Progress {
    pub fn new(topic: &str, config: &EngineConfig) -> Self {
        Progress {
            topic: topic.to_string(),
            theory_points: 0.0,
            practice_points: 0.0,
            skill_level: config.average_skill_level,
        }
    }

    pub fn total_points(&self) -> f64 {
        self.theory_points + self.practice_points
    }

    pub fn part_points(&self, kind: ProblemKind) -> f64 {
        match kind {
            ProblemKind::Theory => self.theory_points,
            ProblemKind::Practice => self.practice_points,
        }
    }

    pub fn part_max(kind: ProblemKind, config: &EngineConfig) -> f64 {
        match kind {
            ProblemKind::Theory => config.topic_theory_max_points,
            ProblemKind::Practice => config.topic_practice_max_points,
        }
    }

    /// Add points to one part, clamping at the part maximum.
    pub fn add_part_points(&mut self, kind: ProblemKind, points: f64, config: &EngineConfig) {
        let max = Self::part_max(kind, config);
        let current = match kind {
            ProblemKind::Theory => &mut self.theory_points,
            ProblemKind::Practice => &mut self.practice_points,
        };
        *current = (*current + points).min(max);
    }

    pub fn is_theory_low_reached(&self, config: &EngineConfig) -> bool {
        self.theory_points >= config.theory_threshold_low()
    }

    pub fn is_theory_completed(&self, config: &EngineConfig) -> bool {
        self.theory_points >= config.topic_theory_max_points
    }

    pub fn is_practice_completed(&self, config: &EngineConfig) -> bool {
        self.practice_points >= config.topic_practice_max_points
    }
}

/// Largest difficulty the student is expected to solve with probability at
/// least `suitable_difficulty_probability`, per the logistic model
/// `P(solved) = 1 / (1 + exp(-(skill - coefficient)))`. Falls back to Easy.
pub fn suitable_difficulty(skill_level: f64, config: &EngineConfig) -> Difficulty {
    let mut suitable = Difficulty::Easy;
    for difficulty in Difficulty::ALL {
        let probability = 1.0 / (1.0 + (-(skill_level - difficulty.coefficient(config))).exp());
        if probability >= config.suitable_difficulty_probability {
            suitable = difficulty;
        }
    }
    suitable
}
