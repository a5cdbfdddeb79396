//! CLI command implementations

pub mod clone;
pub mod probe;

pub use clone::CloneArgs;
pub use probe::{ResolveArgs, ValidateArgs};
