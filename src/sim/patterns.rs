use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A restartable stream of answer outcomes modelling one student behaviour.
/// Each pattern owns its counter and RNG, so a run can be replayed from the
/// start with `restart`.
pub trait OutcomeStream: Send {
    /// Whether the student solves the next problem.
    fn next_outcome(&mut self) -> bool;

    /// Reset counter and RNG to the initial state.
    fn restart(&mut self);
}

/// Students start with high enthusiasm and lose interest as the course
/// material accumulates.
pub struct MotivationDecay {
    seed: u64,
    answered: u64,
    rng: StdRng,
}

impl MotivationDecay {
    pub fn new(seed: u64) -> Self {
        MotivationDecay {
            seed,
            answered: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl OutcomeStream for MotivationDecay {
    fn next_outcome(&mut self) -> bool {
        let chance = match self.answered {
            0..=44 => 0.99,
            45..=89 => 0.89,
            90..=134 => 0.79,
            _ => 0.69,
        };
        self.answered += 1;
        self.rng.gen::<f64>() < chance
    }

    fn restart(&mut self) {
        self.answered = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Periodic bursts of activity and focus.
pub struct MotivationSpikes {
    seed: u64,
    answered: u64,
    rng: StdRng,
}

impl MotivationSpikes {
    pub fn new(seed: u64) -> Self {
        MotivationSpikes {
            seed,
            answered: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl OutcomeStream for MotivationSpikes {
    fn next_outcome(&mut self) -> bool {
        let phase = (self.answered as f64 / 20.0).sin().abs();
        self.answered += 1;
        self.rng.gen::<f64>() < 0.63 + phase / 2.5 - 0.05
    }

    fn restart(&mut self) {
        self.answered = 0;
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Students falling behind the course schedule; stress compounds over time.
pub struct FallingBehind {
    seed: u64,
    step: i64,
    rng: StdRng,
}

impl FallingBehind {
    pub fn new(seed: u64) -> Self {
        FallingBehind {
            seed,
            step: -100,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl OutcomeStream for FallingBehind {
    fn next_outcome(&mut self) -> bool {
        let drift = (0.6 + (self.step as f64 / 30.0).powi(2)).abs() / 25.0;
        self.step += 1;
        self.rng.gen::<f64>() < 0.54 + drift
    }

    fn restart(&mut self) {
        self.step = -100;
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Students spending far more time than needed on every detail; almost
/// everything is solved.
pub struct ExcessivePerfectionism {
    seed: u64,
    rng: StdRng,
}

impl ExcessivePerfectionism {
    pub fn new(seed: u64) -> Self {
        ExcessivePerfectionism {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl OutcomeStream for ExcessivePerfectionism {
    fn next_outcome(&mut self) -> bool {
        self.rng.gen::<f64>() < 0.95
    }

    fn restart(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}
