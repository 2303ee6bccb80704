use crate::answers::AnswerPayload;
use crate::catalog::{AnswerSpec, Problem};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::progress::TargetPoints;
use crate::sim::patterns::OutcomeStream;

/// Hard cap on selector calls per phase, a guard against a pattern that can
/// neither finish nor run out of problems.
const MAX_STEPS_PER_PHASE: usize = 5_000;

#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub submitted: usize,
    pub solved: usize,
}

/// Plays one student through a course theory-first: reach theory low on
/// every topic in order, push theory to the target ceiling, then grind
/// practice until the selectors run dry.
pub struct Simulator {
    user: String,
    semester: String,
    target: TargetPoints,
    pattern: Box<dyn OutcomeStream>,
    stats: SimulationStats,
}

impl Simulator {
    pub fn new(
        user: &str,
        semester: &str,
        target: TargetPoints,
        pattern: Box<dyn OutcomeStream>,
    ) -> Self {
        Simulator {
            user: user.to_string(),
            semester: semester.to_string(),
            target,
            pattern,
            stats: SimulationStats::default(),
        }
    }

    /// The caller must have enrolled the user already.
    pub async fn run(&mut self, engine: &Engine) -> Result<SimulationStats> {
        let config = engine.config().clone();
        let course = engine.catalog().semester(&self.semester)?.course.clone();
        let topics: Vec<String> = engine
            .catalog()
            .course_topics(&course)?
            .iter()
            .map(|t| t.id.clone())
            .collect();

        let target_value = self.target.ceiling(&config) as u32;
        engine
            .change_target_points(&self.user, &self.semester, target_value)
            .await?;

        for topic in &topics {
            let reached = |p: &crate::progress::Progress| p.is_theory_low_reached(&config);
            self.theory_phase(engine, topic, &reached).await?;
        }
        let theory_target =
            config.topic_theory_max_points * (self.target.ceiling(&config) / config.topic_max_points());
        for topic in &topics {
            let reached = |p: &crate::progress::Progress| p.theory_points >= theory_target;
            self.theory_phase(engine, topic, &reached).await?;
        }
        self.practice_phase(engine).await?;

        tracing::info!(
            user = %self.user,
            submitted = self.stats.submitted,
            solved = self.stats.solved,
            "Simulation finished"
        );
        Ok(self.stats.clone())
    }

    async fn theory_phase(
        &mut self,
        engine: &Engine,
        topic: &str,
        reached: &dyn Fn(&crate::progress::Progress) -> bool,
    ) -> Result<()> {
        for _ in 0..MAX_STEPS_PER_PHASE {
            let progress = engine.topic_progress(&self.user, &self.semester, topic).await?;
            if reached(&progress) {
                return Ok(());
            }
            match engine.next_theory(&self.user, &self.semester, topic).await {
                Ok(problem) => self.answer(engine, &problem).await?,
                Err(
                    EngineError::NoProblemAvailable
                    | EngineError::TopicTheoryDone { .. }
                    | EngineError::PrerequisiteNotMet { .. },
                ) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn practice_phase(&mut self, engine: &Engine) -> Result<()> {
        for _ in 0..MAX_STEPS_PER_PHASE {
            match engine.next_practice(&self.user, &self.semester).await {
                Ok(problem) => self.answer(engine, &problem).await?,
                Err(EngineError::TheoryNotStarted | EngineError::NoProblemAvailable) => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn answer(&mut self, engine: &Engine, problem: &Problem) -> Result<()> {
        let solve = self.pattern.next_outcome();
        let payload = match payload_for(problem, solve) {
            Some(payload) => payload,
            // Nothing to submit offline (CODE without a sandbox): skip.
            None => {
                return engine
                    .skip_problem(&self.user, &self.semester, &problem.id)
                    .await
            }
        };
        match engine
            .submit_answer(&self.user, &self.semester, &problem.id, &payload, None)
            .await
        {
            Ok(receipt) => {
                self.stats.submitted += 1;
                if receipt.is_solved {
                    self.stats.solved += 1;
                }
                Ok(())
            }
            // Races between selection and submission resolve as refusals;
            // the simulation just moves on.
            Err(
                EngineError::AttemptsExhausted { .. }
                | EngineError::AlreadySolved { .. }
                | EngineError::TopicTheoryDone { .. }
                | EngineError::TopicPracticeDone { .. },
            ) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Build a payload that is right or wrong on purpose. `None` when the
/// problem kind cannot be answered offline.
fn payload_for(problem: &Problem, solve: bool) -> Option<AnswerPayload> {
    match &problem.answer {
        AnswerSpec::MultipleChoiceRadio { options } => {
            let choice = options.iter().find(|o| o.is_correct == solve)?;
            Some(AnswerPayload::MultipleChoiceRadio {
                answer_id: choice.id.clone(),
            })
        }
        AnswerSpec::MultipleChoiceCheckbox { options } => {
            let answer_ids: Vec<String> = if solve {
                options.iter().filter(|o| o.is_correct).map(|o| o.id.clone()).collect()
            } else {
                options
                    .iter()
                    .filter(|o| !o.is_correct)
                    .take(1)
                    .map(|o| o.id.clone())
                    .collect()
            };
            if answer_ids.is_empty() {
                return None;
            }
            Some(AnswerPayload::MultipleChoiceCheckbox { answer_ids })
        }
        AnswerSpec::FillInSingleBlank { accepted } => {
            let value = if solve {
                accepted.first()?.clone()
            } else {
                "wrong answer".to_string()
            };
            Some(AnswerPayload::FillInSingleBlank { value })
        }
        AnswerSpec::Code { .. } => None,
    }
}
