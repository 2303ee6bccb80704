use crate::catalog::Problem;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::scoring::{main_topic_delta, sub_topic_delta};
use crate::session::StudentSession;

/// Total points the student would gain by solving the problem with a full
/// coefficient, after every cap of the scoring engine.
pub fn potential_points(
    session: &StudentSession,
    problem: &Problem,
    config: &EngineConfig,
) -> Result<f64> {
    let base = problem.difficulty.points(config);
    let target_ceiling = session.target_ceiling(config);
    let mut total = main_topic_delta(
        session.progress(&problem.main_topic)?,
        problem,
        base,
        target_ceiling,
        config,
    );
    let sub_raw = base * config.sub_topic_points_coefficient;
    for sub_topic in &problem.sub_topics {
        total += sub_topic_delta(session.progress(sub_topic)?, problem.kind, sub_raw, config);
    }
    Ok(total)
}

/// Cost per unit of progress: the skill-weighted solving time divided by the
/// points a correct solution would earn. Lower is better; a problem worth
/// nothing costs infinity.
pub fn problem_value(
    session: &StudentSession,
    problem: &Problem,
    config: &EngineConfig,
) -> Result<f64> {
    let progress = session.progress(&problem.main_topic)?;
    let skill_coefficient = config.average_skill_level / progress.skill_level;
    let weighted_time = problem.time_to_solve_seconds * skill_coefficient;
    let gained = potential_points(session, problem, config)?;
    if gained == 0.0 {
        Ok(f64::INFINITY)
    } else {
        Ok(weighted_time / gained)
    }
}

/// Sort candidates by ascending value; ties are broken by title so the
/// ordering is stable across runs.
pub fn rank_by_value<'a>(
    session: &StudentSession,
    problems: Vec<&'a Problem>,
    config: &EngineConfig,
) -> Result<Vec<&'a Problem>> {
    let mut ranked: Vec<(&Problem, f64)> = Vec::with_capacity(problems.len());
    for problem in problems {
        ranked.push((problem, problem_value(session, problem, config)?));
    }
    ranked.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.title.cmp(&b.0.title))
    });
    Ok(ranked.into_iter().map(|(problem, _)| problem).collect())
}
