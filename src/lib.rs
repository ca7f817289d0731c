//! nbtest drives long-lived interpreter sessions ("kernels") to execute
//! notebook cells and grade the resulting state. Remote objects are
//! manipulated through lazily-resolved [`Reference`] expression trees
//! that compile to injected source text; [`FunctionTracker`] and
//! [`FunctionReplacement`] instrument remote callables reversibly.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod kernel;
pub mod notebook;
pub mod reference;
pub mod runner;
pub mod session;
pub mod track;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
pub use notebook::{Cell, CellOutput, CellSelector, Document};
pub use reference::{Arg, Reference};
pub use runner::{Check, RunOptions, SetupStep, SuiteReport, TestCase, TestRegistry};
pub use session::{Session, SessionOptions};
pub use track::replace::FunctionReplacement;
pub use track::{FunctionTracker, RecordedCall, TrackOptions};
