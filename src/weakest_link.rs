use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Problem};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::load_topic_graph;
use crate::selector::practice::eligible_practice_problems;
use crate::session::StudentSession;
use crate::value::rank_by_value;

/// State of the weakest-link search for one (user, semester).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeakestLinkState {
    #[default]
    None,
    InProgress,
    Done,
}

/// A topic suspected of causing repeated practice failures, kept until its
/// group is cleared or the search finalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakestLinkTopicRow {
    pub topic: String,
    pub group_number: u8,
}

/// A probe problem queued for one group. `is_solved == None` means the probe
/// has not been answered yet. Vec order is insertion order within the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakestLinkProblemRow {
    pub problem: String,
    pub group_number: u8,
    pub is_solved: Option<bool>,
}

/// Probe queue plus automaton state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeakestLinkQueue {
    pub state: WeakestLinkState,
    pub topics: Vec<WeakestLinkTopicRow>,
    pub problems: Vec<WeakestLinkProblemRow>,
}

impl WeakestLinkQueue {
    pub fn contains_problem(&self, problem_id: &str) -> bool {
        self.problems.iter().any(|row| row.problem == problem_id)
    }

    fn group_numbers(&self) -> Vec<u8> {
        let mut groups: Vec<u8> = self.problems.iter().map(|row| row.group_number).collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    fn delete_group(&mut self, group_number: u8) {
        self.problems.retain(|row| row.group_number != group_number);
        self.topics.retain(|row| row.group_number != group_number);
    }

    fn delete_group_problems(&mut self, group_number: u8) {
        self.problems.retain(|row| row.group_number != group_number);
    }

    fn clear(&mut self) {
        self.topics.clear();
        self.problems.clear();
        self.state = WeakestLinkState::None;
    }
}

/// Topic-set overlap check: the intersection must cover strictly more than
/// the similarity share of the larger set.
pub fn topics_similar(a: &HashSet<&str>, b: &HashSet<&str>, config: &EngineConfig) -> bool {
    let largest = a.len().max(b.len());
    if largest == 0 {
        return false;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / largest as f64 > config.problem_similarity_percent
}

/// Two problems are similar when they share the main topic and their topic
/// sets overlap beyond the similarity threshold.
pub fn problems_similar(p: &Problem, q: &Problem, config: &EngineConfig) -> bool {
    p.main_topic == q.main_topic && topics_similar(&p.topics(), &q.topics(), config)
}

/// Evaluate the trigger from the freshly submitted practice answer: a wrong
/// answer on a problem whose attempt budget is exhausted, paired with an
/// earlier similar failure that was never corrected. Fills the probe queue
/// and moves the automaton to InProgress when the condition holds.
pub fn maybe_start(
    session: &mut StudentSession,
    catalog: &Catalog,
    config: &EngineConfig,
    problem: &Problem,
) -> Result<()> {
    let last = match session.answers.practice_answers_recent().next() {
        Some(answer) => answer,
        None => return Ok(()),
    };
    if last.problem != problem.id || last.is_solved != Some(false) {
        return Ok(());
    }
    if session.answers.attempts(&problem.id) < config.max_attempts_per_practice_problem
        || session.answers.is_solved(&problem.id)
    {
        return Ok(());
    }

    let pair = match find_candidate_pair(session, catalog, config, problem)? {
        Some(pair) => pair,
        None => return Ok(()),
    };

    let mut topics: BTreeSet<String> = BTreeSet::new();
    for topic_id in problem.topics().into_iter().chain(pair.topics()) {
        if !session.progress(topic_id)?.is_practice_completed(config) {
            topics.insert(topic_id.to_string());
        }
    }
    if topics.is_empty() {
        tracing::info!(user = %session.user, "Weakest-link search skipped, all candidate topics completed");
        return Ok(());
    }

    let max_difficulty = problem.difficulty.min(pair.difficulty);
    fill_queue(session, catalog, config, topics, max_difficulty)
}

/// Scan earlier practice answers on the problem's main topic for a similar
/// problem the student also failed. A skipped similar problem or two solved
/// similar problems call the search off.
fn find_candidate_pair<'a>(
    session: &StudentSession,
    catalog: &'a Catalog,
    config: &EngineConfig,
    problem: &Problem,
) -> Result<Option<&'a Problem>> {
    // Problems still within their attempt budget may yet be solved; their
    // answers do not count as evidence either way.
    let mut wrong_counts: HashMap<&str, usize> = HashMap::new();
    for answer in session
        .answers
        .practice_answers_recent()
        .filter(|a| a.main_topic == problem.main_topic && a.problem != problem.id)
    {
        if answer.is_solved == Some(false) {
            *wrong_counts.entry(answer.problem.as_str()).or_default() += 1;
        }
    }
    let undecided: HashSet<&str> = wrong_counts
        .iter()
        .filter(|(_, &count)| count < config.max_attempts_per_practice_problem)
        .map(|(&id, _)| id)
        .collect();

    let mut checked: HashSet<&str> = HashSet::new();
    let mut solved_similar = 0usize;
    for answer in session
        .answers
        .practice_answers_recent()
        .filter(|a| a.main_topic == problem.main_topic && a.problem != problem.id)
    {
        if undecided.contains(answer.problem.as_str()) {
            continue;
        }
        if !checked.insert(answer.problem.as_str()) {
            continue;
        }
        let other = catalog.problem(&answer.problem)?;
        if !problems_similar(problem, other, config) {
            continue;
        }
        match answer.is_solved {
            None => return Ok(None),
            Some(false) => return Ok(Some(other)),
            Some(true) => {
                solved_similar += 1;
                if solved_similar == 2 {
                    return Ok(None);
                }
            }
        }
    }
    Ok(None)
}

/// Bisect the suspect topics along the affinity graph and queue up to
/// `weakest_link_max_problems_per_group` probes per group. Groups that
/// cannot be filled completely are dropped.
fn fill_queue(
    session: &mut StudentSession,
    catalog: &Catalog,
    config: &EngineConfig,
    topics: BTreeSet<String>,
    max_difficulty: crate::catalog::Difficulty,
) -> Result<()> {
    let graph = load_topic_graph(catalog, &session.course)?;
    let (group1, group2) = graph.bisect(&topics);

    let candidates = eligible_practice_problems(session, catalog, config, Some(max_difficulty));
    let mut kept: Vec<(u8, &BTreeSet<String>, Vec<String>)> = Vec::new();
    for (group_number, group) in [(1u8, &group1), (2u8, &group2)] {
        if group.is_empty() {
            continue;
        }
        let group_set: HashSet<&str> = group.iter().map(String::as_str).collect();
        let matching: Vec<&Problem> = candidates
            .iter()
            .copied()
            .filter(|p| topics_similar(&p.topics(), &group_set, config))
            .collect();
        let ranked = rank_by_value(session, matching, config)?;
        let probes: Vec<String> = ranked
            .iter()
            .take(config.weakest_link_max_problems_per_group)
            .map(|p| p.id.clone())
            .collect();
        if probes.len() < config.weakest_link_max_problems_per_group {
            continue;
        }
        kept.push((group_number, group, probes));
    }

    if kept.is_empty() {
        tracing::warn!(user = %session.user, "No probe problems found for weakest-link groups");
        return Ok(());
    }

    for (group_number, group, probes) in &kept {
        for topic in group.iter() {
            session.weakest_link.topics.push(WeakestLinkTopicRow {
                topic: topic.clone(),
                group_number: *group_number,
            });
        }
        for problem in probes {
            session.weakest_link.problems.push(WeakestLinkProblemRow {
                problem: problem.clone(),
                group_number: *group_number,
                is_solved: None,
            });
        }
    }
    session.weakest_link.state = WeakestLinkState::InProgress;
    tracing::info!(
        user = %session.user,
        groups = kept.len(),
        "Weakest-link search started"
    );
    Ok(())
}

/// Next unanswered probe, walking groups in ascending order. A group whose
/// probe topic already crossed the high threshold is dropped wholesale.
/// `None` means the queue is exhausted and the caller must finalize.
pub fn next_probe(
    session: &mut StudentSession,
    catalog: &Catalog,
    config: &EngineConfig,
) -> Result<Option<String>> {
    loop {
        let unsolved: Option<(u8, String)> = session
            .weakest_link
            .problems
            .iter()
            .filter(|row| row.is_solved.is_none())
            .min_by_key(|row| row.group_number)
            .map(|row| (row.group_number, row.problem.clone()));
        let (group_number, problem_id) = match unsolved {
            Some(found) => found,
            None => return Ok(None),
        };
        let main_topic = catalog.problem(&problem_id)?.main_topic.clone();
        if session.progress(&main_topic)?.total_points() < config.topic_threshold_high {
            return Ok(Some(problem_id));
        }
        session.weakest_link.delete_group(group_number);
    }
}

/// Record a probe verdict and resolve any group that reached its quota of
/// solved or unsolved probes. Moves to Done when no open probes remain.
pub fn record_verdict(
    session: &mut StudentSession,
    config: &EngineConfig,
    problem_id: &str,
    is_solved: bool,
) {
    if let Some(row) = session
        .weakest_link
        .problems
        .iter_mut()
        .find(|row| row.problem == problem_id)
    {
        row.is_solved = Some(is_solved);
    }

    for group_number in session.weakest_link.group_numbers() {
        let solved = session
            .weakest_link
            .problems
            .iter()
            .filter(|row| row.group_number == group_number && row.is_solved == Some(true))
            .count();
        let unsolved = session
            .weakest_link
            .problems
            .iter()
            .filter(|row| row.group_number == group_number && row.is_solved == Some(false))
            .count();
        if solved >= config.weakest_link_problems_to_solve {
            // Cleared: not a weak link, drop the whole group.
            session.weakest_link.delete_group(group_number);
        } else if unsolved >= config.weakest_link_problems_to_solve {
            // Confirmed weak: keep the topics for finalization.
            session.weakest_link.delete_group_problems(group_number);
        }
    }

    if !session
        .weakest_link
        .problems
        .iter()
        .any(|row| row.is_solved.is_none())
    {
        session.weakest_link.state = WeakestLinkState::Done;
    }
}

/// Penalize every confirmed weak topic and reset the automaton.
pub fn finalize(session: &mut StudentSession, config: &EngineConfig) -> Result<()> {
    let topics: Vec<String> = session
        .weakest_link
        .topics
        .iter()
        .map(|row| row.topic.clone())
        .collect();
    for topic in &topics {
        let progress = session.progress_mut(topic)?;
        progress.skill_level -= config.weakest_link_penalty;
        let skill_level = progress.skill_level;
        tracing::info!(
            user = %session.user,
            topic = %topic,
            skill_level,
            "Weakest-link penalty applied"
        );
    }
    session.weakest_link.clear();
    Ok(())
}

/// Drop the whole search without penalties.
pub fn abort(session: &mut StudentSession) {
    tracing::info!(user = %session.user, "Weakest-link search aborted");
    session.weakest_link.clear();
}

/// A suspect topic whose practice the student completed mid-search proves
/// the suspicion wrong; the search stops.
pub fn abort_if_practice_completed(session: &mut StudentSession, config: &EngineConfig) -> Result<()> {
    if session.weakest_link.state != WeakestLinkState::InProgress {
        return Ok(());
    }
    let completed = session
        .weakest_link
        .topics
        .iter()
        .any(|row| {
            session
                .progress(&row.topic)
                .map(|p| p.is_practice_completed(config))
                .unwrap_or(false)
        });
    if completed {
        abort(session);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Progress, TargetPoints};

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn session_with_queue() -> StudentSession {
        let cfg = config();
        let mut session = StudentSession {
            user: "student".into(),
            semester: "sem".into(),
            course: "course".into(),
            progress: ["t1", "t2", "t3", "t4"]
                .iter()
                .map(|t| (t.to_string(), Progress::new(t, &cfg)))
                .collect(),
            answers: Default::default(),
            target_points: TargetPoints::High,
            weakest_link: Default::default(),
        };
        session.weakest_link.state = WeakestLinkState::InProgress;
        for (topic, group) in [("t1", 1u8), ("t3", 1), ("t2", 2), ("t4", 2)] {
            session.weakest_link.topics.push(WeakestLinkTopicRow {
                topic: topic.into(),
                group_number: group,
            });
        }
        for (problem, group) in [("p1", 1u8), ("p2", 1), ("p3", 1), ("p4", 2), ("p5", 2), ("p6", 2)] {
            session.weakest_link.problems.push(WeakestLinkProblemRow {
                problem: problem.into(),
                group_number: group,
                is_solved: None,
            });
        }
        session
    }

    #[test]
    fn similarity_threshold_is_strict() {
        let cfg = config();
        let a: HashSet<&str> = ["t1", "t2", "t3"].into_iter().collect();
        let b: HashSet<&str> = ["t1", "t2", "t4"].into_iter().collect();
        // Overlap 2/3 > 0.66 holds.
        assert!(topics_similar(&a, &b, &cfg));

        let c: HashSet<&str> = ["t1", "t2"].into_iter().collect();
        let d: HashSet<&str> = ["t1", "t3", "t4"].into_iter().collect();
        // Overlap 1/3 fails.
        assert!(!topics_similar(&c, &d, &cfg));
    }

    #[test]
    fn exact_two_thirds_overlap_is_not_similar_at_strict_threshold() {
        let mut cfg = config();
        cfg.problem_similarity_percent = 2.0 / 3.0;
        let a: HashSet<&str> = ["t1", "t2", "t3"].into_iter().collect();
        let b: HashSet<&str> = ["t1", "t2", "t4"].into_iter().collect();
        assert!(!topics_similar(&a, &b, &cfg));
    }

    #[test]
    fn cleared_group_is_deleted_entirely() {
        let cfg = config();
        let mut session = session_with_queue();
        record_verdict(&mut session, &cfg, "p1", true);
        record_verdict(&mut session, &cfg, "p2", true);
        assert!(!session.weakest_link.problems.iter().any(|r| r.group_number == 1));
        assert!(!session.weakest_link.topics.iter().any(|r| r.group_number == 1));
        assert_eq!(session.weakest_link.state, WeakestLinkState::InProgress);
    }

    #[test]
    fn confirmed_group_keeps_topics_for_finalization() {
        let cfg = config();
        let mut session = session_with_queue();
        record_verdict(&mut session, &cfg, "p1", false);
        record_verdict(&mut session, &cfg, "p2", false);
        assert!(!session.weakest_link.problems.iter().any(|r| r.group_number == 1));
        assert!(session.weakest_link.topics.iter().any(|r| r.group_number == 1));
    }

    #[test]
    fn automaton_reaches_done_when_no_open_probes_remain() {
        let cfg = config();
        let mut session = session_with_queue();
        record_verdict(&mut session, &cfg, "p1", false);
        record_verdict(&mut session, &cfg, "p2", false);
        record_verdict(&mut session, &cfg, "p4", true);
        record_verdict(&mut session, &cfg, "p5", true);
        assert_eq!(session.weakest_link.state, WeakestLinkState::Done);
    }

    #[test]
    fn finalize_penalizes_only_retained_topics() {
        let cfg = config();
        let mut session = session_with_queue();
        record_verdict(&mut session, &cfg, "p1", false);
        record_verdict(&mut session, &cfg, "p2", false);
        record_verdict(&mut session, &cfg, "p4", true);
        record_verdict(&mut session, &cfg, "p5", true);
        finalize(&mut session, &cfg).unwrap();

        assert_eq!(session.weakest_link.state, WeakestLinkState::None);
        assert!(session.weakest_link.topics.is_empty());
        assert!(session.weakest_link.problems.is_empty());
        assert!((session.progress("t1").unwrap().skill_level - 1.6).abs() < 1e-9);
        assert!((session.progress("t3").unwrap().skill_level - 1.6).abs() < 1e-9);
        assert!((session.progress("t2").unwrap().skill_level - 1.7).abs() < 1e-9);
        assert!((session.progress("t4").unwrap().skill_level - 1.7).abs() < 1e-9);
    }

    #[test]
    fn completed_practice_on_suspect_topic_aborts() {
        let cfg = config();
        let mut session = session_with_queue();
        session.progress.get_mut("t3").unwrap().practice_points = 60.0;
        abort_if_practice_completed(&mut session, &cfg).unwrap();
        assert_eq!(session.weakest_link.state, WeakestLinkState::None);
        assert!(session.weakest_link.topics.is_empty());
    }
}
