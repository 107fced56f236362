//! Built-in task functions.

pub mod pi;

pub use pi::PiEstimator;
