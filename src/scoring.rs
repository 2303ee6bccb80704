use crate::answers::UserAnswer;
use crate::catalog::{Problem, ProblemKind};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::progress::Progress;
use crate::session::StudentSession;

/// Apply a validated answer to the student's progress and skill level.
/// The answer has already been appended to the session log; this runs inside
/// the per-(user, semester) critical section.
///
/// Theory answers go through a calibration regime first: the initial
/// `placement_answers` submissions on a topic award reduced points and leave
/// the skill level untouched; the submission closing the calibration converts
/// the observed streak into a one-time skill adjustment. Everything after
/// that (and every practice answer) is steady state.
pub fn apply_answer(
    session: &mut StudentSession,
    problem: &Problem,
    coefficient: f64,
    config: &EngineConfig,
) -> Result<()> {
    let is_solved = coefficient >= config.min_correct_answer_coefficient;

    if problem.kind == ProblemKind::Theory {
        // The freshly appended answer is part of the log; calibration counts
        // the non-skipped theory answers that came before it.
        let prior = session
            .answers
            .theory_answers_on_topic(&problem.main_topic)
            .count()
            .saturating_sub(1);
        if prior < config.placement_answers {
            if is_solved {
                add_points_for_problem(session, problem, coefficient, config, true)?;
            }
            tracing::debug!(
                user = %session.user,
                topic = %problem.main_topic,
                answered = prior + 1,
                total = config.placement_answers,
                "Calibration answer"
            );
            return Ok(());
        }
        if prior == config.placement_answers {
            if is_solved {
                add_points_for_problem(session, problem, coefficient, config, true)?;
            }
            close_placement(session, &problem.main_topic, config)?;
            return Ok(());
        }
    }

    let bonus = problem.difficulty.answer_bonus(config);
    let progress = session.progress_mut(&problem.main_topic)?;
    if is_solved {
        progress.skill_level += bonus;
    } else {
        progress.skill_level -= bonus;
    }
    if is_solved {
        add_points_for_problem(session, problem, coefficient, config, false)?;
    }
    Ok(())
}

/// Convert the calibration window into a skill adjustment: the longest sum of
/// coefficients over consecutively solved answers, scaled and biased.
fn close_placement(session: &mut StudentSession, topic_id: &str, config: &EngineConfig) -> Result<()> {
    let window: Vec<&UserAnswer> = session.answers.theory_answers_on_topic(topic_id).collect();
    let start = window.len().saturating_sub(config.placement_answers + 1);
    let streak = longest_solved_streak(&window[start..]);
    let adjustment = streak * config.placement_bonus - config.placement_bias;
    let progress = session.progress_mut(topic_id)?;
    progress.skill_level += adjustment;
    let skill_level = progress.skill_level;
    tracing::info!(
        user = %session.user,
        topic = topic_id,
        streak,
        adjustment,
        skill_level,
        "Calibration closed"
    );
    Ok(())
}

/// Largest sum of coefficients over a run of consecutively solved answers.
fn longest_solved_streak(answers: &[&UserAnswer]) -> f64 {
    let mut longest = 0.0f64;
    let mut current = 0.0f64;
    for answer in answers {
        if answer.is_solved == Some(true) {
            current += answer.coefficient;
        } else {
            longest = longest.max(current);
            current = 0.0;
        }
    }
    longest.max(current)
}

/// Award points to the problem's main topic and sub-topics. Calibration
/// answers award the same deltas scaled by `placement_points_coefficient`.
fn add_points_for_problem(
    session: &mut StudentSession,
    problem: &Problem,
    coefficient: f64,
    config: &EngineConfig,
    placement: bool,
) -> Result<()> {
    let scale = if placement {
        config.placement_points_coefficient
    } else {
        1.0
    };
    let base = problem.difficulty.points(config);
    let main_raw = coefficient * base * scale;
    // The sub-topic award compounds the per-problem confidence factor, hence
    // the squared coefficient.
    let sub_raw = coefficient * coefficient * base * config.sub_topic_points_coefficient * scale;
    let target_ceiling = session.target_ceiling(config);

    let main_delta = main_topic_delta(
        session.progress(&problem.main_topic)?,
        problem,
        main_raw,
        target_ceiling,
        config,
    );
    session
        .progress_mut(&problem.main_topic)?
        .add_part_points(problem.kind, main_delta, config);

    for sub_topic in &problem.sub_topics {
        let delta = sub_topic_delta(session.progress(sub_topic)?, problem.kind, sub_raw, config);
        session
            .progress_mut(sub_topic)?
            .add_part_points(problem.kind, delta, config);
    }
    Ok(())
}

/// Main-topic delta after all caps: the per-difficulty threshold on total
/// topic points, the student's target ceiling, then the part maximum.
pub(crate) fn main_topic_delta(
    progress: &Progress,
    problem: &Problem,
    raw_points: f64,
    target_ceiling: f64,
    config: &EngineConfig,
) -> f64 {
    let threshold = problem.difficulty.target_threshold(config).min(target_ceiling);
    let total = progress.total_points();
    if total >= threshold {
        return 0.0;
    }
    let points = raw_points.min(threshold - total);
    part_capped(progress, problem.kind, points, config)
}

/// Sub-topic delta: capped at the medium threshold on total topic points,
/// then at the part maximum of the receiving part.
pub(crate) fn sub_topic_delta(
    progress: &Progress,
    kind: ProblemKind,
    raw_points: f64,
    config: &EngineConfig,
) -> f64 {
    let total = progress.total_points();
    if total >= config.topic_threshold_medium {
        return 0.0;
    }
    let points = raw_points.min(config.topic_threshold_medium - total);
    part_capped(progress, kind, points, config)
}

fn part_capped(progress: &Progress, kind: ProblemKind, points: f64, config: &EngineConfig) -> f64 {
    let current = progress.part_points(kind);
    let max = Progress::part_max(kind, config);
    if current >= max {
        0.0
    } else {
        points.min(max - current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AnswerSpec, Difficulty};
    use crate::progress::TargetPoints;
    use std::collections::HashMap;

    fn problem(id: &str, kind: ProblemKind, difficulty: Difficulty, main: &str, subs: &[&str]) -> Problem {
        Problem {
            id: id.into(),
            title: id.into(),
            kind,
            difficulty,
            time_to_solve_seconds: 60.0,
            main_topic: main.into(),
            sub_topics: subs.iter().map(|s| s.to_string()).collect(),
            answer: AnswerSpec::FillInSingleBlank { accepted: vec!["x".into()] },
        }
    }

    fn session(topics: &[&str], config: &EngineConfig) -> StudentSession {
        StudentSession {
            user: "student".into(),
            semester: "sem".into(),
            course: "course".into(),
            progress: topics
                .iter()
                .map(|t| (t.to_string(), Progress::new(t, config)))
                .collect::<HashMap<_, _>>(),
            answers: Default::default(),
            target_points: TargetPoints::High,
            weakest_link: Default::default(),
        }
    }

    fn submit(session: &mut StudentSession, problem: &Problem, coefficient: f64, config: &EngineConfig) {
        let is_solved = coefficient >= config.min_correct_answer_coefficient;
        session.answers.append(problem, Some(is_solved), coefficient, None);
        apply_answer(session, problem, coefficient, config).unwrap();
    }

    #[test]
    fn calibration_answer_awards_half_points_without_skill_change() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        let p = problem("p1", ProblemKind::Theory, Difficulty::Easy, "t1", &[]);
        submit(&mut s, &p, 1.0, &config);
        let progress = s.progress("t1").unwrap();
        assert!((progress.theory_points - 2.5).abs() < 1e-9);
        assert!((progress.skill_level - 1.7).abs() < 1e-9);
    }

    #[test]
    fn calibration_closure_converts_streak_into_skill() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        for i in 0..6 {
            let p = problem(&format!("p{i}"), ProblemKind::Theory, Difficulty::Easy, "t1", &[]);
            submit(&mut s, &p, 1.0, &config);
        }
        // Six solved answers with coefficient 1: streak 6.0,
        // skill 1.7 + 6.0 * 0.15 - 0.2 = 2.4.
        let progress = s.progress("t1").unwrap();
        assert!((progress.skill_level - 2.4).abs() < 1e-9);
    }

    #[test]
    fn failed_calibration_answer_awards_nothing() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        let p = problem("p1", ProblemKind::Theory, Difficulty::Normal, "t1", &[]);
        submit(&mut s, &p, 0.0, &config);
        let progress = s.progress("t1").unwrap();
        assert_eq!(progress.theory_points, 0.0);
        assert!((progress.skill_level - 1.7).abs() < 1e-9);
    }

    #[test]
    fn steady_state_adjusts_skill_by_difficulty_bonus() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        let p = problem("p1", ProblemKind::Practice, Difficulty::Hard, "t1", &[]);
        submit(&mut s, &p, 0.0, &config);
        let progress = s.progress("t1").unwrap();
        assert!((progress.skill_level - 1.6).abs() < 1e-9);
        assert_eq!(progress.practice_points, 0.0);

        let p2 = problem("p2", ProblemKind::Practice, Difficulty::Hard, "t1", &[]);
        submit(&mut s, &p2, 1.0, &config);
        let progress = s.progress("t1").unwrap();
        assert!((progress.skill_level - 1.7).abs() < 1e-9);
        assert!((progress.practice_points - 18.0).abs() < 1e-9);
    }

    #[test]
    fn sub_topic_award_uses_squared_coefficient() {
        let config = EngineConfig::default();
        let mut s = session(&["t1", "t2"], &config);
        let p = problem("p1", ProblemKind::Practice, Difficulty::Hard, "t1", &["t2"]);
        submit(&mut s, &p, 0.8, &config);
        let main = s.progress("t1").unwrap();
        let sub = s.progress("t2").unwrap();
        assert!((main.practice_points - 0.8 * 18.0).abs() < 1e-9);
        assert!((sub.practice_points - 0.8 * 0.8 * 18.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn easy_problems_cannot_push_total_past_low_threshold() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        {
            let progress = s.progress.get_mut("t1").unwrap();
            progress.theory_points = 20.0;
            progress.practice_points = 40.0;
        }
        // Total 60.0, easy threshold 61: only one point may land.
        let p = problem("p1", ProblemKind::Practice, Difficulty::Easy, "t1", &[]);
        submit(&mut s, &p, 1.0, &config);
        let progress = s.progress("t1").unwrap();
        assert!((progress.total_points() - 61.0).abs() < 1e-9);
    }

    #[test]
    fn part_maximum_is_never_exceeded() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        s.progress.get_mut("t1").unwrap().theory_points = 39.9;
        // Past calibration: pretend six prior theory answers exist.
        for i in 0..6 {
            let warmup = problem(&format!("w{i}"), ProblemKind::Theory, Difficulty::Easy, "t1", &[]);
            s.answers.append(&warmup, Some(false), 0.0, None);
        }
        let p = problem("p1", ProblemKind::Theory, Difficulty::Easy, "t1", &[]);
        submit(&mut s, &p, 1.0, &config);
        let progress = s.progress("t1").unwrap();
        assert_eq!(progress.theory_points, 40.0);
    }

    #[test]
    fn target_ceiling_caps_main_topic_award() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        s.target_points = TargetPoints::Low;
        {
            let progress = s.progress.get_mut("t1").unwrap();
            progress.theory_points = 30.0;
            progress.practice_points = 30.0;
        }
        // Total 60.0, target ceiling 61: a hard problem may add only 1.
        let p = problem("p1", ProblemKind::Practice, Difficulty::Hard, "t1", &[]);
        submit(&mut s, &p, 1.0, &config);
        let progress = s.progress("t1").unwrap();
        assert!((progress.total_points() - 61.0).abs() < 1e-9);
    }

    #[test]
    fn longest_streak_resets_on_failures() {
        let config = EngineConfig::default();
        let mut s = session(&["t1"], &config);
        let p = problem("p", ProblemKind::Theory, Difficulty::Easy, "t1", &[]);
        for coefficient in [1.0, 1.0, 0.0, 0.8, 0.9] {
            let solved = coefficient >= config.min_correct_answer_coefficient;
            s.answers.append(&p, Some(solved), coefficient, None);
        }
        let window: Vec<&UserAnswer> = s.answers.theory_answers_on_topic("t1").collect();
        assert!((longest_solved_streak(&window) - 2.0).abs() < 1e-9);
    }
}
