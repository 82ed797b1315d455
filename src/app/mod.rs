//! Application layer
//!
//! Command line configuration, the composition of one invocation and
//! terminal reporting for the binary.

pub mod config;
pub mod report;
pub mod session;

pub use config::{AttachConfig, Backend, Cli, Mode};
pub use report::ConsoleReport;
pub use session::{run, Outcome};
