#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod reconcile;
pub mod reconciler;
