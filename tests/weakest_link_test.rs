use chrono::{Duration, Utc};

use lyceum::answers::AnswerPayload;
use lyceum::catalog::{
    AnswerSpec, Catalog, Choice, Course, CourseModule, Difficulty, Problem, ProblemKind,
    Semester, Topic, TopicGraphEdge,
};
use lyceum::{Engine, EngineConfig, WeakestLinkState};

fn theory_radio(id: &str, topic: &str) -> Problem {
    Problem {
        id: id.into(),
        title: id.into(),
        kind: ProblemKind::Theory,
        difficulty: Difficulty::Normal,
        time_to_solve_seconds: 120.0,
        main_topic: topic.into(),
        sub_topics: vec![],
        answer: AnswerSpec::MultipleChoiceRadio {
            options: (1..=4)
                .map(|i| Choice {
                    id: format!("option-{i}"),
                    text: if i == 1 { "True".into() } else { "False".into() },
                    is_correct: i == 1,
                })
                .collect(),
        },
    }
}

fn practice_blank(id: &str, topic: &str, subs: &[&str]) -> Problem {
    Problem {
        id: id.into(),
        title: id.into(),
        kind: ProblemKind::Practice,
        difficulty: Difficulty::Normal,
        time_to_solve_seconds: 300.0,
        main_topic: topic.into(),
        sub_topics: subs.iter().map(|s| s.to_string()).collect(),
        answer: AnswerSpec::FillInSingleBlank {
            accepted: vec!["answer".into()],
        },
    }
}

/// Four flat topics, an affinity graph favouring the ({t1,t3}, {t2,t4})
/// split, two similar failing problems and three probe candidates per group.
fn weakest_link_catalog() -> Catalog {
    let course_id = "course-wl".to_string();
    let module_id = "module-wl".to_string();
    let topics: Vec<Topic> = ["t1", "t2", "t3", "t4"]
        .iter()
        .map(|id| Topic {
            id: id.to_string(),
            title: id.to_string(),
            module: module_id.clone(),
            parent_topic: None,
        })
        .collect();

    let mut problems = Vec::new();
    for topic in ["t1", "t2", "t3", "t4"] {
        for i in 0..8 {
            problems.push(theory_radio(&format!("wl-{topic}-theory-{i}"), topic));
        }
    }
    problems.push(practice_blank("wl-p1", "t1", &["t2", "t3"]));
    problems.push(practice_blank("wl-p2", "t1", &["t2", "t4"]));
    for i in 1..=3 {
        problems.push(practice_blank(&format!("wl-a{i}"), "t1", &["t3"]));
        problems.push(practice_blank(&format!("wl-b{i}"), "t2", &["t4"]));
    }

    let weights = [
        ("t1", "t2", 0.1),
        ("t1", "t3", 0.9),
        ("t1", "t4", 0.9),
        ("t2", "t3", 0.1),
        ("t2", "t4", 0.1),
        ("t3", "t4", 0.1),
    ];
    let edges = weights
        .iter()
        .map(|(a, b, weight)| TopicGraphEdge {
            course: course_id.clone(),
            topic1: a.to_string(),
            topic2: b.to_string(),
            weight: *weight,
        })
        .collect();

    let course = Course {
        id: course_id.clone(),
        title: "Weakest Link Course".into(),
        modules: vec![CourseModule {
            id: module_id,
            title: "Module 1".into(),
            topics,
        }],
    };
    let semester = Semester {
        id: "semester-wl".into(),
        course: course_id,
        join_code: "ABCDE".into(),
        code_expires_at: Utc::now() + Duration::days(30),
        teachers: vec!["teacher".into()],
    };
    Catalog::new(vec![course], vec![semester], problems, edges, &EngineConfig::default()).unwrap()
}

fn correct(problem: &Problem) -> AnswerPayload {
    match &problem.answer {
        AnswerSpec::MultipleChoiceRadio { options } => AnswerPayload::MultipleChoiceRadio {
            answer_id: options.iter().find(|o| o.is_correct).unwrap().id.clone(),
        },
        AnswerSpec::FillInSingleBlank { accepted } => AnswerPayload::FillInSingleBlank {
            value: accepted[0].clone(),
        },
        _ => panic!("unsupported problem kind in test"),
    }
}

fn wrong() -> AnswerPayload {
    AnswerPayload::FillInSingleBlank {
        value: "wrong".into(),
    }
}

async fn prepare_student(engine: &Engine, user: &str) {
    engine.enroll(user, "semester-wl", "ABCDE").await.unwrap();
    for topic in ["t1", "t2", "t3", "t4"] {
        loop {
            let progress = engine.topic_progress(user, "semester-wl", topic).await.unwrap();
            if progress.is_theory_low_reached(engine.config()) {
                break;
            }
            let problem = engine.next_theory(user, "semester-wl", topic).await.unwrap();
            engine
                .submit_answer(user, "semester-wl", &problem.id, &correct(&problem), None)
                .await
                .unwrap();
        }
    }
}

/// Fail both similar problems twice, exhausting their attempt budgets.
async fn trigger_weakest_link(engine: &Engine, user: &str) {
    for problem_id in ["wl-p1", "wl-p1", "wl-p2", "wl-p2"] {
        engine
            .submit_answer(user, "semester-wl", problem_id, &wrong(), None)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn repeated_similar_failures_trigger_probing() {
    let engine = Engine::new(weakest_link_catalog(), EngineConfig::default());
    prepare_student(&engine, "trigger-user").await;

    assert_eq!(
        engine.weakest_link_state("trigger-user", "semester-wl").await.unwrap(),
        WeakestLinkState::None
    );
    trigger_weakest_link(&engine, "trigger-user").await;
    assert_eq!(
        engine.weakest_link_state("trigger-user", "semester-wl").await.unwrap(),
        WeakestLinkState::InProgress
    );

    let queue = engine.weakest_link_queue("trigger-user", "semester-wl").await.unwrap();
    // The affinity-maximizing bisection puts {t1,t3} in group 1, {t2,t4}
    // in group 2.
    let group1: Vec<&str> = queue
        .topics
        .iter()
        .filter(|row| row.group_number == 1)
        .map(|row| row.topic.as_str())
        .collect();
    let group2: Vec<&str> = queue
        .topics
        .iter()
        .filter(|row| row.group_number == 2)
        .map(|row| row.topic.as_str())
        .collect();
    assert_eq!(group1, vec!["t1", "t3"]);
    assert_eq!(group2, vec!["t2", "t4"]);

    for group in [1u8, 2] {
        let probes = queue
            .problems
            .iter()
            .filter(|row| row.group_number == group)
            .count();
        assert_eq!(probes, 3);
    }
    assert!(queue.problems.iter().all(|row| row.is_solved.is_none()));
}

#[tokio::test]
async fn probe_verdicts_resolve_groups_and_finalize_with_penalty() {
    let engine = Engine::new(weakest_link_catalog(), EngineConfig::default());
    prepare_student(&engine, "verdict-user").await;
    trigger_weakest_link(&engine, "verdict-user").await;

    // Group 1 probes fail twice: confirmed weak, probes removed, topics kept.
    for _ in 0..2 {
        let probe = engine.next_practice("verdict-user", "semester-wl").await.unwrap();
        assert!(probe.id.starts_with("wl-a"));
        engine
            .submit_answer("verdict-user", "semester-wl", &probe.id, &wrong(), None)
            .await
            .unwrap();
    }
    let queue = engine.weakest_link_queue("verdict-user", "semester-wl").await.unwrap();
    assert!(queue.problems.iter().all(|row| row.group_number == 2));
    assert!(queue.topics.iter().any(|row| row.group_number == 1));
    assert_eq!(queue.state, WeakestLinkState::InProgress);

    let t1_before = engine
        .topic_progress("verdict-user", "semester-wl", "t1")
        .await
        .unwrap()
        .skill_level;
    let t3_before = engine
        .topic_progress("verdict-user", "semester-wl", "t3")
        .await
        .unwrap()
        .skill_level;
    let t4_before = engine
        .topic_progress("verdict-user", "semester-wl", "t4")
        .await
        .unwrap()
        .skill_level;

    // Group 2 probes succeed twice: cleared, the whole search finalizes.
    for _ in 0..2 {
        let probe = engine.next_practice("verdict-user", "semester-wl").await.unwrap();
        assert!(probe.id.starts_with("wl-b"));
        engine
            .submit_answer("verdict-user", "semester-wl", &probe.id, &correct(&probe), None)
            .await
            .unwrap();
    }

    assert_eq!(
        engine.weakest_link_state("verdict-user", "semester-wl").await.unwrap(),
        WeakestLinkState::None
    );
    let queue = engine.weakest_link_queue("verdict-user", "semester-wl").await.unwrap();
    assert!(queue.topics.is_empty());
    assert!(queue.problems.is_empty());

    // Confirmed weak topics carry the penalty; cleared topics do not.
    let t1_after = engine
        .topic_progress("verdict-user", "semester-wl", "t1")
        .await
        .unwrap()
        .skill_level;
    let t3_after = engine
        .topic_progress("verdict-user", "semester-wl", "t3")
        .await
        .unwrap()
        .skill_level;
    let t4_after = engine
        .topic_progress("verdict-user", "semester-wl", "t4")
        .await
        .unwrap()
        .skill_level;
    assert!((t1_before - t1_after - 0.1).abs() < 1e-9);
    assert!((t3_before - t3_after - 0.1).abs() < 1e-9);
    assert!((t4_before - t4_after).abs() < 1e-9);
}

#[tokio::test]
async fn skipping_a_practice_problem_aborts_probing() {
    let engine = Engine::new(weakest_link_catalog(), EngineConfig::default());
    prepare_student(&engine, "skip-user").await;
    trigger_weakest_link(&engine, "skip-user").await;
    assert_eq!(
        engine.weakest_link_state("skip-user", "semester-wl").await.unwrap(),
        WeakestLinkState::InProgress
    );

    let t1_before = engine
        .topic_progress("skip-user", "semester-wl", "t1")
        .await
        .unwrap()
        .skill_level;

    let probe = engine.next_practice("skip-user", "semester-wl").await.unwrap();
    engine
        .skip_problem("skip-user", "semester-wl", &probe.id)
        .await
        .unwrap();

    assert_eq!(
        engine.weakest_link_state("skip-user", "semester-wl").await.unwrap(),
        WeakestLinkState::None
    );
    let queue = engine.weakest_link_queue("skip-user", "semester-wl").await.unwrap();
    assert!(queue.topics.is_empty());
    assert!(queue.problems.is_empty());

    // No penalty on abort.
    let t1_after = engine
        .topic_progress("skip-user", "semester-wl", "t1")
        .await
        .unwrap()
        .skill_level;
    assert!((t1_before - t1_after).abs() < 1e-9);

    // Selection continues as if no probing had happened.
    assert!(engine.next_practice("skip-user", "semester-wl").await.is_ok());
}

#[tokio::test]
async fn probing_state_always_has_queue_rows() {
    let engine = Engine::new(weakest_link_catalog(), EngineConfig::default());
    prepare_student(&engine, "invariant-user").await;
    trigger_weakest_link(&engine, "invariant-user").await;

    // Walk the whole queue to completion, checking the state/rows invariant
    // after every step.
    for _ in 0..12 {
        let state = engine
            .weakest_link_state("invariant-user", "semester-wl")
            .await
            .unwrap();
        let queue = engine
            .weakest_link_queue("invariant-user", "semester-wl")
            .await
            .unwrap();
        match state {
            WeakestLinkState::InProgress => {
                assert!(!queue.topics.is_empty());
                assert!(!queue.problems.is_empty());
                assert!(queue.problems.iter().all(|row| (1..=2).contains(&row.group_number)));
            }
            WeakestLinkState::None => {
                assert!(queue.topics.is_empty());
                assert!(queue.problems.is_empty());
                return;
            }
            WeakestLinkState::Done => panic!("Done must finalize within the same submission"),
        }
        let probe = engine.next_practice("invariant-user", "semester-wl").await.unwrap();
        engine
            .submit_answer("invariant-user", "semester-wl", &probe.id, &wrong(), None)
            .await
            .unwrap();
    }
    panic!("probing never finished");
}
