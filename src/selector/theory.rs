use crate::catalog::{Catalog, Difficulty, Problem, ProblemKind};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::progress::suitable_difficulty;
use crate::session::StudentSession;
use crate::value::rank_by_value;

/// Pick the next theory problem for a topic.
///
/// While the student is still calibrating on the topic the pool is capped at
/// the difficulty suggested by the skill estimate, preferring the hardest
/// problem under the cap; afterwards the best-valued problem wins outright.
pub fn next_theory_problem<'a>(
    session: &StudentSession,
    catalog: &'a Catalog,
    config: &EngineConfig,
    topic_id: &str,
) -> Result<&'a Problem> {
    let progress = session.progress(topic_id)?;
    if progress.is_theory_completed(config) {
        return Err(EngineError::TopicTheoryDone {
            topic: topic_id.to_string(),
        });
    }
    let topic = catalog.topic(topic_id)?;
    if let Some(parent_topic) = &topic.parent_topic {
        if !session.progress(parent_topic)?.is_theory_low_reached(config) {
            return Err(EngineError::PrerequisiteNotMet {
                parent_topic: parent_topic.clone(),
            });
        }
    }

    let pool: Vec<&Problem> = catalog
        .problems_with_main_topic(topic_id)
        .filter(|p| p.kind == ProblemKind::Theory)
        .filter(|p| !session.answers.has_answered(&p.id))
        .filter(|p| sub_topics_reached(session, p, config))
        .collect();
    let ranked = rank_by_value(session, pool, config)?;

    let answered = session.answers.theory_answers_on_topic(topic_id).count();
    if answered >= config.placement_answers {
        return ranked
            .first()
            .copied()
            .ok_or(EngineError::NoProblemAvailable);
    }

    // Calibration: cap difficulty, widening one step if the cap empties the
    // pool.
    let cap = suitable_difficulty(progress.skill_level, config);
    if let Some(problem) = pick_under_cap(&ranked, cap) {
        tracing::debug!(
            user = %session.user,
            topic = topic_id,
            answered,
            total = config.placement_answers,
            "Calibration pick"
        );
        return Ok(problem);
    }
    pick_under_cap(&ranked, cap.increased()).ok_or(EngineError::NoProblemAvailable)
}

/// Highest difficulty not exceeding the cap; value order breaks ties inside
/// one difficulty.
fn pick_under_cap<'a>(ranked: &[&'a Problem], cap: Difficulty) -> Option<&'a Problem> {
    let best_difficulty = ranked
        .iter()
        .filter(|p| p.difficulty <= cap)
        .map(|p| p.difficulty)
        .max()?;
    ranked
        .iter()
        .find(|p| p.difficulty == best_difficulty)
        .copied()
}

/// Every sub-topic of the problem must have its theory part reached.
pub(crate) fn sub_topics_reached(
    session: &StudentSession,
    problem: &Problem,
    config: &EngineConfig,
) -> bool {
    problem.sub_topics.iter().all(|sub_topic| {
        session
            .progress(sub_topic)
            .map(|p| p.is_theory_low_reached(config))
            .unwrap_or(false)
    })
}
