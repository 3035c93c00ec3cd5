//! Core services and infrastructure

pub mod config;
pub mod error_handling;
pub mod eventually;
pub mod logging;
pub mod matchers;
pub mod retry;
pub mod sync;
