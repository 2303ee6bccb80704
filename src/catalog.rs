use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Problem difficulty. Ordering matters: widening a difficulty cap walks
/// Easy -> Normal -> Hard and saturates at the ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy = 1,
    Normal = 2,
    Hard = 3,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Normal, Difficulty::Hard];

    pub fn increased(self) -> Difficulty {
        match self {
            Difficulty::Easy => Difficulty::Normal,
            Difficulty::Normal | Difficulty::Hard => Difficulty::Hard,
        }
    }

    pub fn decreased(self) -> Difficulty {
        match self {
            Difficulty::Hard => Difficulty::Normal,
            Difficulty::Normal | Difficulty::Easy => Difficulty::Easy,
        }
    }

    /// Points awarded for a correctly solved problem of this difficulty.
    pub fn points(self, config: &EngineConfig) -> f64 {
        match self {
            Difficulty::Easy => config.points_easy,
            Difficulty::Normal => config.points_normal,
            Difficulty::Hard => config.points_hard,
        }
    }

    /// Skill-level bonus (or malus) applied per answered problem.
    pub fn answer_bonus(self, config: &EngineConfig) -> f64 {
        match self {
            Difficulty::Easy => config.correct_answer_bonus_easy,
            Difficulty::Normal => config.correct_answer_bonus_normal,
            Difficulty::Hard => config.correct_answer_bonus_hard,
        }
    }

    /// Offset used by the suitable-difficulty sigmoid.
    pub fn coefficient(self, config: &EngineConfig) -> f64 {
        match self {
            Difficulty::Easy => config.difficulty_coefficient_easy,
            Difficulty::Normal => config.difficulty_coefficient_normal,
            Difficulty::Hard => config.difficulty_coefficient_hard,
        }
    }

    /// Upper bound on total topic points a problem of this difficulty may
    /// contribute toward.
    pub fn target_threshold(self, config: &EngineConfig) -> f64 {
        match self {
            Difficulty::Easy => config.topic_threshold_low,
            Difficulty::Normal => config.topic_threshold_medium,
            Difficulty::Hard => config.topic_max_points(),
        }
    }
}

/// Whether a problem belongs to the theory or the practice part of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    Theory,
    Practice,
}

/// A selectable answer option of a multiple-choice problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

/// Answer format of a problem together with its correct-answer data.
/// Validators pattern-match on the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnswerSpec {
    MultipleChoiceRadio { options: Vec<Choice> },
    MultipleChoiceCheckbox { options: Vec<Choice> },
    FillInSingleBlank { accepted: Vec<String> },
    Code { tests: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub kind: ProblemKind,
    pub difficulty: Difficulty,
    pub time_to_solve_seconds: f64,
    pub main_topic: String,
    pub sub_topics: Vec<String>,
    pub answer: AnswerSpec,
}

impl Problem {
    /// Main topic plus sub-topics, deduplicated.
    pub fn topics(&self) -> HashSet<&str> {
        let mut topics: HashSet<&str> = self.sub_topics.iter().map(String::as_str).collect();
        topics.insert(self.main_topic.as_str());
        topics
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub module: String,
    /// Topic whose theory must be reached before this one unlocks.
    pub parent_topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: String,
    pub title: String,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub modules: Vec<CourseModule>,
}

/// A concrete offering of a course that students enroll into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Semester {
    pub id: String,
    pub course: String,
    pub join_code: String,
    pub code_expires_at: DateTime<Utc>,
    pub teachers: Vec<String>,
}

/// Undirected affinity edge between two topics of one course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicGraphEdge {
    pub course: String,
    pub topic1: String,
    pub topic2: String,
    pub weight: f64,
}

/// Read-only content index. Authored externally, validated and loaded once,
/// then shared behind an `Arc` for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub courses: Vec<Course>,
    pub semesters: Vec<Semester>,
    pub problems: Vec<Problem>,
    pub edges: Vec<TopicGraphEdge>,

    #[serde(skip)]
    topic_index: HashMap<String, Topic>,
    #[serde(skip)]
    problem_index: HashMap<String, usize>,
    #[serde(skip)]
    problems_by_main_topic: HashMap<String, Vec<usize>>,
}

impl Catalog {
    pub fn new(
        courses: Vec<Course>,
        semesters: Vec<Semester>,
        problems: Vec<Problem>,
        edges: Vec<TopicGraphEdge>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let mut catalog = Catalog {
            courses,
            semesters,
            problems,
            edges,
            topic_index: HashMap::new(),
            problem_index: HashMap::new(),
            problems_by_main_topic: HashMap::new(),
        };
        catalog.build_indexes();
        catalog.validate(config)?;
        Ok(catalog)
    }

    /// Rebuild the lookup tables. Needed after deserialization since the
    /// indexes are not persisted.
    pub fn build_indexes(&mut self) {
        self.topic_index = self
            .courses
            .iter()
            .flat_map(|c| c.modules.iter())
            .flat_map(|m| m.topics.iter())
            .map(|t| (t.id.clone(), t.clone()))
            .collect();
        self.problem_index = self
            .problems
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        self.problems_by_main_topic.clear();
        for (i, problem) in self.problems.iter().enumerate() {
            self.problems_by_main_topic
                .entry(problem.main_topic.clone())
                .or_default()
                .push(i);
        }
    }

    fn validate(&self, config: &EngineConfig) -> Result<()> {
        for problem in &self.problems {
            if problem.time_to_solve_seconds <= 0.0 {
                return Err(EngineError::inconsistency(format!(
                    "problem {} has non-positive time to solve",
                    problem.id
                )));
            }
            if !self.topic_index.contains_key(&problem.main_topic) {
                return Err(EngineError::inconsistency(format!(
                    "problem {} references unknown main topic {}",
                    problem.id, problem.main_topic
                )));
            }
            if problem.sub_topics.contains(&problem.main_topic) {
                return Err(EngineError::inconsistency(format!(
                    "problem {} lists its main topic among sub-topics",
                    problem.id
                )));
            }
            if problem.sub_topics.len() > config.max_sub_topics {
                return Err(EngineError::inconsistency(format!(
                    "problem {} exceeds the sub-topic limit",
                    problem.id
                )));
            }
            for sub in &problem.sub_topics {
                if !self.topic_index.contains_key(sub) {
                    return Err(EngineError::inconsistency(format!(
                        "problem {} references unknown sub-topic {sub}",
                        problem.id
                    )));
                }
            }
        }
        for semester in &self.semesters {
            if !self.courses.iter().any(|c| c.id == semester.course) {
                return Err(EngineError::inconsistency(format!(
                    "semester {} references unknown course {}",
                    semester.id, semester.course
                )));
            }
        }
        self.check_parent_cycles()
    }

    /// Parent references must form a DAG.
    fn check_parent_cycles(&self) -> Result<()> {
        for topic in self.topic_index.values() {
            let mut seen = HashSet::new();
            seen.insert(topic.id.as_str());
            let mut current = topic.parent_topic.as_deref();
            while let Some(parent_id) = current {
                if !seen.insert(parent_id) {
                    return Err(EngineError::inconsistency(format!(
                        "cycle in parent topics involving {}",
                        topic.id
                    )));
                }
                current = self
                    .topic_index
                    .get(parent_id)
                    .and_then(|t| t.parent_topic.as_deref());
            }
        }
        Ok(())
    }

    pub fn topic(&self, topic_id: &str) -> Result<&Topic> {
        self.topic_index
            .get(topic_id)
            .ok_or_else(|| EngineError::inconsistency(format!("unknown topic {topic_id}")))
    }

    pub fn problem(&self, problem_id: &str) -> Result<&Problem> {
        self.problem_index
            .get(problem_id)
            .map(|&i| &self.problems[i])
            .ok_or_else(|| EngineError::inconsistency(format!("unknown problem {problem_id}")))
    }

    pub fn semester(&self, semester_id: &str) -> Result<&Semester> {
        self.semesters
            .iter()
            .find(|s| s.id == semester_id)
            .ok_or_else(|| EngineError::inconsistency(format!("unknown semester {semester_id}")))
    }

    pub fn course(&self, course_id: &str) -> Result<&Course> {
        self.courses
            .iter()
            .find(|c| c.id == course_id)
            .ok_or_else(|| EngineError::inconsistency(format!("unknown course {course_id}")))
    }

    /// Topics of a course in authored module order.
    pub fn course_topics(&self, course_id: &str) -> Result<Vec<&Topic>> {
        let course = self.course(course_id)?;
        Ok(course
            .modules
            .iter()
            .flat_map(|m| m.topics.iter())
            .collect())
    }

    pub fn problems_with_main_topic(&self, topic_id: &str) -> impl Iterator<Item = &Problem> {
        self.problems_by_main_topic
            .get(topic_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.problems[i])
    }

    pub fn edges_for_course<'a>(&'a self, course_id: &'a str) -> impl Iterator<Item = &'a TopicGraphEdge> {
        self.edges.iter().filter(move |e| e.course == course_id)
    }
}
