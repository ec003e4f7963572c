//! The T language runtime: a dynamically-typed data-analysis language with
//! piped data verbs, NA-aware semantics, first-class errors and reproducible
//! `pipeline { ... }` builds.

mod common;
pub mod interp;

pub use common::{Appliable, Logged};
pub use interp::{Environment, ErrorCode, Interpreter, NaKind, TError, Value, ValueKind};
