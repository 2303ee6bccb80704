use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Engine tuning constants. Fixed at launch; loaded once from `engine.toml`
/// when present, otherwise the defaults below apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub topic_theory_max_points: f64,
    pub topic_practice_max_points: f64,
    pub topic_threshold_low: f64,
    pub topic_threshold_medium: f64,
    pub topic_threshold_high: f64,

    pub points_easy: f64,
    pub points_normal: f64,
    pub points_hard: f64,
    pub sub_topic_points_coefficient: f64,

    pub average_skill_level: f64,
    pub difficulty_coefficient_easy: f64,
    pub difficulty_coefficient_normal: f64,
    pub difficulty_coefficient_hard: f64,
    pub suitable_difficulty_probability: f64,

    pub placement_answers: usize,
    pub placement_bonus: f64,
    pub placement_bias: f64,
    pub placement_points_coefficient: f64,

    pub correct_answer_bonus_easy: f64,
    pub correct_answer_bonus_normal: f64,
    pub correct_answer_bonus_hard: f64,

    pub max_sub_topics: usize,
    pub weakest_link_max_problems_per_group: usize,
    pub weakest_link_problems_to_solve: usize,
    pub weakest_link_penalty: f64,

    pub problem_similarity_percent: f64,
    pub min_correct_answer_coefficient: f64,
    pub max_attempts_per_practice_problem: usize,

    /// Code-execution sandbox endpoint. Empty string disables CODE validation.
    pub sandbox_url: String,
    pub sandbox_auth_header: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            topic_theory_max_points: 40.0,
            topic_practice_max_points: 60.0,
            topic_threshold_low: 61.0,
            topic_threshold_medium: 76.0,
            topic_threshold_high: 91.0,

            points_easy: 5.0,
            points_normal: 9.0,
            points_hard: 18.0,
            sub_topic_points_coefficient: 1.0 / 3.0,

            average_skill_level: 1.7,
            difficulty_coefficient_easy: 0.3,
            difficulty_coefficient_normal: 0.6,
            difficulty_coefficient_hard: 0.9,
            suitable_difficulty_probability: 0.75,

            placement_answers: 5,
            placement_bonus: 0.15,
            placement_bias: 0.2,
            placement_points_coefficient: 0.5,

            correct_answer_bonus_easy: 0.05,
            correct_answer_bonus_normal: 0.075,
            correct_answer_bonus_hard: 0.1,

            max_sub_topics: 5,
            weakest_link_max_problems_per_group: 3,
            weakest_link_problems_to_solve: 2,
            weakest_link_penalty: 0.1,

            problem_similarity_percent: 0.66,
            min_correct_answer_coefficient: 0.66,
            max_attempts_per_practice_problem: 2,

            sandbox_url: String::new(),
            sandbox_auth_header: String::new(),
        }
    }
}

impl EngineConfig {
    /// Maximum total points reachable in a single topic (theory + practice).
    pub fn topic_max_points(&self) -> f64 {
        self.topic_theory_max_points + self.topic_practice_max_points
    }

    /// Minimum theory points at which the theory part of a topic counts
    /// as reached ("theory low").
    pub fn theory_threshold_low(&self) -> f64 {
        self.topic_theory_max_points * (self.topic_threshold_low / self.topic_max_points())
    }

    /// Load configuration from a TOML file, falling back to defaults when the
    /// file is absent or unreadable.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<EngineConfig>(&content) {
                Ok(config) => {
                    tracing::info!(path = ?path, "Loaded engine config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to parse engine config, using defaults");
                    EngineConfig::default()
                }
            },
            Err(_) => EngineConfig::default(),
        }
    }
}
