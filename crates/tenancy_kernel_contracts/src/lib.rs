#![forbid(unsafe_code)]

pub mod common;
pub mod identity;
pub mod simulation;
pub mod submission;
pub mod verification;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, UnixTimeMs, Validate};
