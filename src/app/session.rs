//! One invocation of the tool: validate the command line, then either list
//! installed runtimes or run a single attach attempt.

use crate::attach::{AttachObserver, Attached, Orchestrator};
use crate::core::{AttachError, RuntimeDescriptor};
use crate::process::ProcessDirectory;
use crate::runtime::{enumerate_installed_runtimes, RuntimeHost};

use super::config::{AttachConfig, Cli, Mode};

#[derive(Debug)]
pub enum Outcome {
    /// No target was given
    Runtimes(Vec<RuntimeDescriptor>),
    Attached(Attached),
}

/// Run one invocation.
///
/// The configuration is validated before `directory` or `connect` is used.
/// When attaching, `connect` only builds the hosting facility after the
/// target process has been resolved.
pub fn run<D, H, F, O>(
    cli: &Cli,
    directory: &D,
    connect: F,
    observer: &mut O,
) -> Result<Outcome, AttachError>
where
    D: ProcessDirectory,
    H: RuntimeHost,
    F: FnOnce(&AttachConfig) -> Result<H, AttachError>,
    O: AttachObserver,
{
    let config = AttachConfig::from_cli(cli)?;

    match &config.mode {
        Mode::ListRuntimes => {
            let host = connect(&config)?;
            let installed: Vec<_> = enumerate_installed_runtimes(&host)?.collect();
            Ok(Outcome::Runtimes(installed))
        }
        Mode::Attach(plan) => {
            let config = &config;
            Orchestrator::deferred(directory, move || connect(config))
                .with_discovery(config.discover)
                .run_with(plan, observer)
                .map(Outcome::Attached)
        }
    }
}
