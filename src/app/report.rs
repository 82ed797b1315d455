//! Terminal output

use colored::Colorize;

use crate::attach::{AttachObserver, AttachState, Attached};
use crate::core::{AttachError, RuntimeDescriptor};
use crate::runtime::RuntimeInventory;

/// Prints discovery results as the orchestrator produces them
#[derive(Debug, Default)]
pub struct ConsoleReport;

impl AttachObserver for ConsoleReport {
    fn transition(&mut self, _from: AttachState, to: AttachState) {
        if to == AttachState::ProcessResolved {
            println!("{} Target process resolved", "[*]".cyan());
        }
    }

    fn runtimes_discovered(&mut self, inventory: &RuntimeInventory) {
        print_runtimes("Loaded runtimes", &inventory.loaded);
        print_runtimes("Installed runtimes", &inventory.installed);
    }
}

pub fn print_runtimes(title: &str, runtimes: &[RuntimeDescriptor]) {
    println!("{} {}:", "[*]".cyan(), title);
    if runtimes.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for runtime in runtimes {
        if runtime.loadable {
            println!("    - {}", runtime.version);
        } else {
            println!("    - {} {}", runtime.version, "(not loadable)".yellow());
        }
    }
}

pub fn print_attached(attached: &Attached) {
    println!(
        "{} Attach requested for {} (PID {}) through runtime {}; the profiler initializes asynchronously",
        "[+]".green(),
        attached.executable_name.bold(),
        attached.process_id,
        attached.runtime_version
    );
}

pub fn print_failure(err: &AttachError) {
    eprintln!("{} {} failed: {}", "[-]".red(), err.stage(), err);
}
