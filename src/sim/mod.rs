//! Student-behaviour simulation against a live engine: generated sample
//! courses, answer-outcome patterns, and a driver that plays a student
//! through theory and practice end to end.

pub mod generator;
pub mod patterns;
pub mod runner;

pub use generator::{generate_catalog, GeneratorOptions};
pub use patterns::{
    ExcessivePerfectionism, FallingBehind, MotivationDecay, MotivationSpikes, OutcomeStream,
};
pub use runner::{SimulationStats, Simulator};
