//! Argument parsing and process setup shared by the `overwatcher` and
//! `fake-overwatcher` binaries.

pub mod cli;
pub mod setup;
