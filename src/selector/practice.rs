use std::collections::HashSet;

use crate::catalog::{Catalog, Difficulty, Problem, ProblemKind};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::progress::suitable_difficulty;
use crate::selector::theory::sub_topics_reached;
use crate::session::StudentSession;
use crate::value::rank_by_value;

/// Pick the next practice problem across all eligible topics. Weakest-link
/// delegation happens in the facade before this runs.
///
/// The first pass keeps only problems matching the suitable difficulty of
/// their topic; when that leaves nothing, the filter falls back to a Normal
/// cap, then a Hard cap.
pub fn next_practice_problem<'a>(
    session: &StudentSession,
    catalog: &'a Catalog,
    config: &EngineConfig,
) -> Result<&'a Problem> {
    if eligible_topics(session, config).is_empty() {
        return Err(EngineError::TheoryNotStarted);
    }

    let candidates = eligible_practice_problems(session, catalog, config, None);

    let exact: Vec<&Problem> = candidates
        .iter()
        .copied()
        .filter(|p| {
            session
                .progress(&p.main_topic)
                .map(|progress| p.difficulty == suitable_difficulty(progress.skill_level, config))
                .unwrap_or(false)
        })
        .collect();

    let pool = if !exact.is_empty() {
        exact
    } else {
        let capped: Vec<&Problem> = candidates
            .iter()
            .copied()
            .filter(|p| p.difficulty <= Difficulty::Normal)
            .collect();
        if !capped.is_empty() {
            capped
        } else {
            candidates
        }
    };

    rank_by_value(session, pool, config)?
        .first()
        .copied()
        .ok_or(EngineError::NoProblemAvailable)
}

/// Topics whose theory is reached but practice is not finished.
fn eligible_topics<'a>(session: &'a StudentSession, config: &EngineConfig) -> HashSet<&'a str> {
    session
        .progress
        .values()
        .filter(|p| p.is_theory_low_reached(config) && !p.is_practice_completed(config))
        .map(|p| p.topic.as_str())
        .collect()
}

/// The shared practice candidate pool: unanswered problems (or ones still
/// within their attempt budget and unsolved) on eligible topics, with every
/// sub-topic's theory reached and the main topic still under the student's
/// target ceiling. An optional difficulty cap serves the weakest-link fill.
pub fn eligible_practice_problems<'a>(
    session: &StudentSession,
    catalog: &'a Catalog,
    config: &EngineConfig,
    max_difficulty: Option<Difficulty>,
) -> Vec<&'a Problem> {
    let topics = eligible_topics(session, config);
    catalog
        .problems
        .iter()
        .filter(|p| p.kind == ProblemKind::Practice)
        .filter(|p| topics.contains(p.main_topic.as_str()))
        .filter(|p| max_difficulty.map_or(true, |cap| p.difficulty <= cap))
        .filter(|p| attempt_allows(session, p, config))
        .filter(|p| sub_topics_reached(session, p, config))
        .filter(|p| {
            session
                .progress(&p.main_topic)
                .map(|progress| progress.total_points() < session.target_ceiling(config))
                .unwrap_or(false)
        })
        .collect()
}

fn attempt_allows(session: &StudentSession, problem: &Problem, config: &EngineConfig) -> bool {
    let attempts = session.answers.attempts(&problem.id);
    if attempts == 0 {
        return true;
    }
    attempts < config.max_attempts_per_practice_problem && !session.answers.is_solved(&problem.id)
}
