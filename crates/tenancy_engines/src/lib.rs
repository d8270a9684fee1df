#![forbid(unsafe_code)]

pub mod clock;
pub mod simulation;
pub mod submission;
