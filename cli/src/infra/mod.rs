//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, the
//! filesystem state backend, plan artifact storage, git, and configuration.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` or `crate::output` are forbidden.

pub mod artifacts;
pub mod command_runner;
pub mod config;
pub mod fs;
pub mod git;
pub mod manifest;
pub mod paths;
pub mod state_backend;
