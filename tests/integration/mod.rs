//! Integration test suite for opsflow.
//!
//! These tests exercise the full lifecycle from task submission to
//! terminal state, including approval gating, escalation, pause/resume,
//! cancellation, and step failure policies. They verify that the manager,
//! state machine, planner validation, and scheduler work together
//! correctly.
//!
//! # Test Categories
//!
//! - `lifecycle`: End-to-end lifecycle paths and audit history
//! - `approval`: Approval gates, escalation timers, rejection
//! - `execution`: Step dispatch order, failure policies, pause, cancel
//!
//! # CI Compatibility
//!
//! These tests use scripted planner and executor fixtures and do not run
//! real commands, making them safe to run in CI environments.


mod approval;
mod execution;
