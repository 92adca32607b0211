pub mod checkpoint;
pub mod compile;
mod compile_expr;
pub mod error;
pub mod ops;
pub mod plan;
pub mod runtime;
pub mod state;
pub mod types;

pub use compile_expr::{parse_expression, ExprAst};
pub use error::{CheckpointError, CompileError, ConfigError, EngineError, SetupError};
pub use plan::{BuildManifest, TreePlan};
pub use runtime::FactorTree;
pub use types::{DayPhase, FieldSource, InitArgs, InputFieldCatalog, DEFAULT_BATCH_PER_DAY};

#[cfg(test)]
mod tests;
