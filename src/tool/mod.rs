//! External orchestration tool.
//!
//! The coordinator only depends on [`ToolRunner`]; [`TerraformRunner`] is
//! the subprocess implementation used by the CLI.

mod invocation;
mod terraform;

pub use invocation::{ToolCommand, ToolInvocation, ToolOutcome, ToolRunner};
pub use terraform::TerraformRunner;

#[cfg(test)]
pub use invocation::MockToolRunner;
