//! Integration tests for infrasync CLI
//!
//! These tests spawn the actual binary and test end-to-end behavior.
//! They are slower and should be run separately from unit tests.

mod plan_apply_flow;
