//! Core types for turnmeter.

pub mod run;
pub mod usage;

pub use run::*;
pub use usage::*;
