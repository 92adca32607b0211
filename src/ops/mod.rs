//! Operator layer entry.
//!
//! Extension path (minimal touch points):
//! 1) implement kernel in `elem.rs` / `ts.rs` / `cs.rs`,
//! 2) add opcode in `spec.rs` and register meta in `catalog.rs` (`OP_METAS`),
//! 3) add parse and lifecycle tests.

pub mod arg_spec;
pub mod catalog;
pub mod spec;

pub(crate) mod cs;
pub(crate) mod elem;
mod stats;
pub(crate) mod ts;

pub use arg_spec::{CallArg, CompileArgSpec, ParsedCompileArgs};
pub use catalog::{KernelParamSpec, OpMeta, OperatorRegistry, StateSpec};
pub use spec::{DayFold, Domain, OpCode};
