//! Command implementations

pub mod apply;
pub mod artifacts;
pub mod config;
pub mod mirror;
pub mod plan;
pub mod run;
pub mod show;
pub mod state;
pub mod version;
