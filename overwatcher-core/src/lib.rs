//! Engine core for overwatcher: loads a declarative test description,
//! drives a device over a byte stream, and decides pass/fail/timeout.
//!
//! The binary crate (`overwatcher`) owns argv parsing, `tracing` setup,
//! and signal handling; this crate owns everything that happens once a
//! [`description::TestDescription`] and a connection target are in hand.

pub mod context;
pub mod description;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod link;
pub mod logging;
pub mod modifiers;
pub mod outcome;
pub mod reader;
pub mod result;
pub mod timer;
pub mod watcher;
pub mod writer;

pub use description::{load, TestDescription};
pub use engine::{run_engine, RunOutcome};
pub use errors::EngineError;
pub use link::LinkMode;
pub use outcome::Outcome;
