//! Queue indexing and eventual assertions for test automation
//!
//! Publish messages to a broker queue, index what comes back by a derived
//! key, and poll the index until an expectation holds.

pub mod broker;
pub mod core;
pub mod queue;
