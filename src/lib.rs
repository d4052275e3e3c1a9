//! qagen: a background batch engine that turns content items into published
//! question/answer artifacts through an external generation service.
//!
//! Operators admit batches of item ids; a single-flight [`driver::Driver`]
//! tick advances one item at a time, retrying the service call with backoff
//! and keeping per-item state so failures can be retried on demand.

pub mod artifacts;
pub mod audit;
pub mod cache;
pub mod config;
pub mod content;
pub mod driver;
pub mod error;
pub mod library;
pub mod llm;
pub mod lock;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod reaper;
pub mod runner;
pub mod state_machine;
pub mod store;
pub mod trigger;

#[cfg(test)]
mod testing;
