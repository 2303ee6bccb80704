use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::catalog::{
    AnswerSpec, Catalog, Choice, Course, CourseModule, Difficulty, Problem, ProblemKind,
    Semester, Topic, TopicGraphEdge,
};
use crate::config::EngineConfig;
use crate::error::Result;

const JOIN_CODE_CHARACTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ123456789";
const JOIN_CODE_LENGTH: usize = 5;

/// Shape of the generated sample course.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Distinguishes ids of generated content; generated course ids must be
    /// unique per process because the topic graph is cached by course id.
    pub suffix: String,
    /// Topics per module.
    pub topics_in_modules: Vec<usize>,
    pub theory_problems_per_topic: usize,
    pub practice_problems_per_topic: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            suffix: "sample".into(),
            topics_in_modules: vec![1, 4, 3, 3, 4, 4],
            theory_problems_per_topic: 50,
            practice_problems_per_topic: 50,
        }
    }
}

/// Generate a complete sample catalog: chained topics across modules, random
/// problems with sub-topics drawn from earlier topics, a fully connected
/// random topic graph and one semester with a join code.
pub fn generate_catalog(
    options: &GeneratorOptions,
    config: &EngineConfig,
    rng: &mut StdRng,
) -> Result<Catalog> {
    let course_id = format!("course-{}", options.suffix);
    let mut modules = Vec::new();
    let mut all_topics: Vec<Topic> = Vec::new();
    let mut parent: Option<String> = None;
    let mut topic_index = 1;
    for (module_index, &topic_count) in options.topics_in_modules.iter().enumerate() {
        let module_id = format!("module-{}-{}", options.suffix, module_index + 1);
        let mut topics = Vec::new();
        for _ in 0..topic_count {
            let topic = Topic {
                id: format!("topic-{}-{topic_index}", options.suffix),
                title: format!("Topic {topic_index}"),
                module: module_id.clone(),
                parent_topic: parent.clone(),
            };
            parent = Some(topic.id.clone());
            topics.push(topic.clone());
            all_topics.push(topic);
            topic_index += 1;
        }
        modules.push(CourseModule {
            id: module_id,
            title: format!("Module {}", module_index + 1),
            topics,
        });
    }

    let mut problems = Vec::new();
    let mut available_sub_topics: Vec<String> = Vec::new();
    let mut theory_counter = 1;
    let mut practice_counter = 1;
    for topic in &all_topics {
        for _ in 0..options.theory_problems_per_topic {
            problems.push(generate_problem(
                &format!("Theory Problem {theory_counter}"),
                ProblemKind::Theory,
                topic,
                &available_sub_topics,
                &options.suffix,
                config,
                rng,
            ));
            theory_counter += 1;
        }
        for _ in 0..options.practice_problems_per_topic {
            problems.push(generate_problem(
                &format!("Practice Problem {practice_counter}"),
                ProblemKind::Practice,
                topic,
                &available_sub_topics,
                &options.suffix,
                config,
                rng,
            ));
            practice_counter += 1;
        }
        available_sub_topics.push(topic.id.clone());
    }

    let mut edges = Vec::new();
    for (i, topic1) in all_topics.iter().enumerate() {
        for topic2 in all_topics.iter().skip(i + 1) {
            edges.push(TopicGraphEdge {
                course: course_id.clone(),
                topic1: topic1.id.clone(),
                topic2: topic2.id.clone(),
                weight: rng.gen::<f64>(),
            });
        }
    }

    let course = Course {
        id: course_id.clone(),
        title: "Test Course".into(),
        modules,
    };
    let semester = Semester {
        id: format!("semester-{}", options.suffix),
        course: course_id,
        join_code: generate_join_code(rng),
        code_expires_at: Utc::now() + Duration::days(30),
        teachers: vec!["teacher".into()],
    };

    Catalog::new(vec![course], vec![semester], problems, edges, config)
}

fn generate_problem(
    title: &str,
    kind: ProblemKind,
    topic: &Topic,
    available_sub_topics: &[String],
    suffix: &str,
    config: &EngineConfig,
    rng: &mut StdRng,
) -> Problem {
    let difficulty = *[Difficulty::Easy, Difficulty::Normal, Difficulty::Hard]
        .choose(rng)
        .expect("non-empty difficulty list");
    let max_subs = available_sub_topics.len().min(config.max_sub_topics);
    let sub_count = rng.gen_range(0..=max_subs);
    let sub_topics: Vec<String> = available_sub_topics
        .choose_multiple(rng, sub_count)
        .cloned()
        .collect();
    let id = format!("{}-{}", suffix, title.to_lowercase().replace(' ', "-"));
    Problem {
        id,
        title: title.to_string(),
        kind,
        difficulty,
        time_to_solve_seconds: generate_time_to_solve(kind, difficulty, sub_topics.len(), rng),
        main_topic: topic.id.clone(),
        sub_topics,
        answer: generate_answer(kind, rng),
    }
}

fn generate_time_to_solve(
    kind: ProblemKind,
    difficulty: Difficulty,
    sub_topics: usize,
    rng: &mut StdRng,
) -> f64 {
    let level = difficulty as i64;
    match kind {
        ProblemKind::Theory => {
            (rng.gen_range(10..=50) + (60 * level - 60) + 8 * (1 + sub_topics as i64)) as f64
        }
        ProblemKind::Practice => {
            (rng.gen_range(3 * level..=5 * level) * 20
                + (180 * level - 80)
                + 30 * (1 + sub_topics as i64)) as f64
        }
    }
}

/// Theory problems get a single-choice answer, practice problems a blank to
/// fill; both give the simulator a known correct and a known wrong answer.
fn generate_answer(kind: ProblemKind, rng: &mut StdRng) -> AnswerSpec {
    match kind {
        ProblemKind::Theory => {
            let correct = rng.gen_range(0..4);
            let options = (0..4)
                .map(|i| Choice {
                    id: format!("option-{}", i + 1),
                    text: if i == correct { "True".into() } else { "False".into() },
                    is_correct: i == correct,
                })
                .collect();
            AnswerSpec::MultipleChoiceRadio { options }
        }
        ProblemKind::Practice => AnswerSpec::FillInSingleBlank {
            accepted: vec!["answer".into()],
        },
    }
}

fn generate_join_code(rng: &mut StdRng) -> String {
    (0..JOIN_CODE_LENGTH)
        .map(|_| *JOIN_CODE_CHARACTERS.choose(rng).expect("non-empty charset") as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn generated_catalog_passes_validation() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let options = GeneratorOptions {
            suffix: "gen-test".into(),
            topics_in_modules: vec![1, 2],
            theory_problems_per_topic: 5,
            practice_problems_per_topic: 5,
        };
        let catalog = generate_catalog(&options, &config, &mut rng).unwrap();
        assert_eq!(catalog.problems.len(), 30);
        assert_eq!(catalog.course_topics("course-gen-test").unwrap().len(), 3);
        // Full graph over three topics.
        assert_eq!(catalog.edges.len(), 3);
    }

    #[test]
    fn sub_topics_only_come_from_earlier_topics() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let options = GeneratorOptions {
            suffix: "gen-order".into(),
            topics_in_modules: vec![3, 3],
            theory_problems_per_topic: 10,
            practice_problems_per_topic: 10,
        };
        let catalog = generate_catalog(&options, &config, &mut rng).unwrap();
        let order: Vec<&str> = catalog
            .course_topics("course-gen-order")
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        for problem in &catalog.problems {
            let main_pos = order.iter().position(|&t| t == problem.main_topic).unwrap();
            for sub in &problem.sub_topics {
                let sub_pos = order.iter().position(|&t| t == *sub).unwrap();
                assert!(sub_pos < main_pos);
            }
        }
    }
}
