//! clr-attach - attach a profiler to an already running managed runtime.
//!
//! The pipeline resolves the target process, lists the runtimes it hosts,
//! validates the requested runtime version and finally asks that runtime to
//! load the profiler. See [`attach::Orchestrator`].

pub mod app;
pub mod attach;
pub mod core;
pub mod process;
pub mod runtime;

#[cfg(test)]
mod testing;
