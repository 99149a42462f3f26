//! Agent Relay — queue-backed task engine for an external coding assistant.
//!
//! A messaging front end submits free-text tasks and chat turns; the engine
//! tracks them in memory, runs them one at a time through the assistant CLI,
//! and answers status queries with plain data structures.

pub mod config;
pub mod engine;
pub mod error;
pub mod runner;
pub mod task;
