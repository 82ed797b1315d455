//! Core module - Data model and error types shared by every stage
//! of the attach pipeline.
//!
//! Nothing in here touches the operating system; platform specifics live
//! in the `process` and `runtime` modules.

pub mod error;
pub mod types;

// Re-export common types
pub use error::{AttachError, Stage};
pub use types::{
    AttachRequest, AttachTimeout, HResult, ProcessSelector, ProcessTarget, ProfilerDescriptor,
    RuntimeDescriptor,
};
