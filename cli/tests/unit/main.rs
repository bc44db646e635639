//! Unit tests for infrasync CLI
//!
//! These tests use in-memory ports or temp directories and run fast without
//! network access.

mod mocks;
mod plan_apply;
