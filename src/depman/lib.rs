//! `depman` — a language-agnostic, source-controlled-first dependency
//! manager and version solver (see `SPEC_FULL.md` for the full design).
//!
//! The crate is organized the way the problem decomposes rather than by
//! layer: each module below corresponds to one of the components this
//! repository is built around, from path deduction through the solver to
//! the final vendor-tree materialization and digest verification.

pub mod analyzer;
pub mod cache;
pub mod digest;
pub mod errors;
pub mod gateway;
pub mod path_deduce;
pub mod pkgtree;
pub mod solver;
pub mod source_manager;
pub mod supervisor;
pub mod vcs;
pub mod vendor;
pub mod version;

pub use errors::{DepmanError, Result};
