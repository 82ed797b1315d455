//! clr-attach - entry point
//!
//! Parses the command line, picks the hosting facility backend and runs a
//! single invocation.

use std::process::ExitCode;

use clap::Parser;

use clr_attach::app::{self, report, Backend, Cli, ConsoleReport, Outcome};
use clr_attach::core::AttachError;
use clr_attach::process::PlatformDirectory;
use clr_attach::runtime::diagnostics::DiagnosticsHost;

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
compile_error!("clr-attach supports Windows and Linux hosts");

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    log::debug!("Arguments: {:?}", cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<AttachError>() {
                Some(attach_err) => report::print_failure(attach_err),
                None => eprintln!("[-] {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Some(target) = &cli.target {
        println!(
            "[*] clr-attach v{} - attaching to {}",
            env!("CARGO_PKG_VERSION"),
            target
        );
    }

    let directory = PlatformDirectory::default();
    let mut observer = ConsoleReport;

    let outcome = match cli.backend {
        Backend::Diagnostics => app::run(cli, &directory, connect_diagnostics, &mut observer)?,
        Backend::Metahost => {
            #[cfg(target_os = "windows")]
            {
                app::run(
                    cli,
                    &directory,
                    |_: &app::AttachConfig| clr_attach::runtime::metahost::MetaHost::new(),
                    &mut observer,
                )?
            }

            #[cfg(not(target_os = "windows"))]
            anyhow::bail!("the metahost backend is only available on Windows; use --backend diagnostics");
        }
    };

    match outcome {
        Outcome::Runtimes(installed) => report::print_runtimes("Installed runtimes", &installed),
        Outcome::Attached(attached) => report::print_attached(&attached),
    }

    Ok(())
}

fn connect_diagnostics(config: &app::AttachConfig) -> Result<DiagnosticsHost, AttachError> {
    DiagnosticsHost::new(&config.ipc_dir, config.dotnet_root.clone())
}
