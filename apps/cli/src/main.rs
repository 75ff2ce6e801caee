//! volctl - Command line interface for volume discovery and mounting.
//!
//! Logs go to stderr so stdout stays parseable.

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use volctl_core::{ActionOutcome, DriveManager, EngineConfig};

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 2;

/// volctl: list, mount and unmount storage volumes.
#[derive(Parser)]
#[command(name = "volctl")]
#[command(about = "Discover storage volumes and mount or unmount them", long_about = None)]
struct Cli {
    /// Path to a JSON config file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the device catalog, one record per line.
    List {
        /// Print the catalog as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Mount one device or a group of devices.
    Mount(Target),
    /// Unmount one device or a group of devices.
    Unmount(Target),
    /// Eject the disk holding a device (every volume on it goes offline).
    Eject {
        /// Device identifier, e.g. disk4s2.
        identifier: String,
    },
}

/// Which devices an action applies to.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Device identifier, e.g. disk2s1.
    identifier: Option<String>,

    /// Every external device.
    #[arg(long)]
    all_external: bool,

    /// Every device (protected system volumes are never unmounted).
    #[arg(long)]
    all: bool,

    /// Comma-separated identifiers to act on as a batch.
    #[arg(long, value_delimiter = ',')]
    selected: Vec<String>,
}

#[derive(Clone, Copy)]
enum Action {
    Mount,
    Unmount,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    // One-shot process: nothing reads the catalog after an action.
    let manager = DriveManager::with_config(config.with_refresh_after_action(false));

    match cli.command {
        Commands::List { json } => run_list(&manager, json),
        Commands::Mount(target) => run_action(&manager, Action::Mount, target),
        Commands::Unmount(target) => run_action(&manager, Action::Unmount, target),
        Commands::Eject { identifier } => report(&manager.eject(&identifier)),
    }
}

fn load_config(path: Option<&Path>) -> volctl_core::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::load_default(),
    }
}

fn run_list(manager: &DriveManager, json: bool) -> ExitCode {
    manager.refresh_blocking();
    let catalog = manager.snapshot();

    if json {
        match output::catalog_json(&catalog) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Failed to serialize catalog: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for line in output::catalog_lines(&catalog) {
            println!("{}", line);
        }
    }
    ExitCode::SUCCESS
}

fn run_action(manager: &DriveManager, action: Action, target: Target) -> ExitCode {
    let outcome = match &target.identifier {
        // Single devices not yet in the catalog are inspected individually.
        Some(id) => match action {
            Action::Mount => manager.mount(id),
            Action::Unmount => manager.unmount(id),
        },
        None => {
            manager.refresh_blocking();
            run_batch(manager, action, &target)
        }
    };
    report(&outcome)
}

fn run_batch(manager: &DriveManager, action: Action, target: &Target) -> ActionOutcome {
    if target.all_external {
        return match action {
            Action::Mount => manager.mount_all_external(),
            Action::Unmount => manager.unmount_all_external(),
        };
    }
    if target.all {
        return match action {
            Action::Mount => manager.mount_all(),
            Action::Unmount => manager.unmount_all(),
        };
    }
    let selected: Vec<&str> = target.selected.iter().map(|s| s.trim()).collect();
    if let Some(outcome) = reject_unknown(manager, action, &selected) {
        return outcome;
    }
    manager.set_selection(selected);
    match action {
        Action::Mount => manager.mount_selected(),
        Action::Unmount => manager.unmount_selected(),
    }
}

/// Fails the whole batch when any selected identifier is not in the catalog.
fn reject_unknown(manager: &DriveManager, action: Action, selected: &[&str]) -> Option<ActionOutcome> {
    let unknown: Vec<&str> = selected
        .iter()
        .copied()
        .filter(|id| manager.get_by_id(id).is_none())
        .collect();
    if unknown.is_empty() {
        return None;
    }

    let verb = match action {
        Action::Mount => "mount",
        Action::Unmount => "unmount",
    };
    let mut lines = vec![format!(
        "Unknown device(s), nothing to {verb}: {} of {} not found",
        unknown.len(),
        selected.len()
    )];
    lines.extend(
        unknown
            .iter()
            .map(|id| format!("[FAILED] {id}: device {id} not found")),
    );
    Some(ActionOutcome {
        success: false,
        message: lines.join("\n"),
    })
}

fn report(outcome: &ActionOutcome) -> ExitCode {
    if outcome.success {
        println!("{}", outcome.message);
        ExitCode::SUCCESS
    } else {
        eprintln!("{}", outcome.message);
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::Arc;
    use volctl_core::executor::{CommandOutput, ScriptedExecutor};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_target_parsing() {
        let cli = Cli::parse_from(["volctl", "unmount", "--selected", "disk4s2,disk5s1"]);
        let Commands::Unmount(target) = cli.command else {
            panic!("expected unmount");
        };
        assert_eq!(target.selected, ["disk4s2", "disk5s1"]);
        assert!(target.identifier.is_none());

        let cli = Cli::parse_from(["volctl", "-v", "mount", "disk2s1"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Mount(Target { identifier: Some(_), .. })));
    }

    #[test]
    fn test_eject_parsing() {
        let cli = Cli::parse_from(["volctl", "eject", "disk4s2"]);
        assert!(matches!(cli.command, Commands::Eject { ref identifier } if identifier == "disk4s2"));
        assert!(Cli::try_parse_from(["volctl", "eject"]).is_err());
    }

    #[test]
    fn test_unknown_selection_is_rejected() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "df -h",
            CommandOutput::ok(
                "Filesystem Size Used Avail Capacity iused ifree %iused Mounted on\n\
                 /dev/disk4s2 60Gi 20Gi 40Gi 34% 1 0 100% /Volumes/BACKUP\n",
            ),
        ));
        let manager = DriveManager::new(executor.clone(), EngineConfig::new());
        manager.refresh_blocking();
        executor.reset_calls();

        let outcome = reject_unknown(&manager, Action::Unmount, &["disk4s2", "disk9s9"]).unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("[FAILED] disk9s9: device disk9s9 not found"));
        assert!(!outcome.message.contains("[FAILED] disk4s2"));
        assert_eq!(executor.call_count(), 0);

        assert!(reject_unknown(&manager, Action::Unmount, &["disk4s2"]).is_none());
    }

    #[test]
    fn test_target_is_exclusive() {
        assert!(Cli::try_parse_from(["volctl", "mount"]).is_err());
        assert!(Cli::try_parse_from(["volctl", "mount", "disk2s1", "--all"]).is_err());
        assert!(Cli::try_parse_from(["volctl", "unmount", "--all-external", "--all"]).is_err());
    }
}
