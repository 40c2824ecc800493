//! Entry point for the userboot init process.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use userboot_init::{boot, reap_orphans, run_shell_forever, BootOutcome, LinuxPlatform, Settings};
use userboot_shared::constants::{cmdline, paths};

/// Userboot init - runs as PID 1 and hands each user their own root
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(author, version, about = "Userboot init - per-user overlay boot")]
struct InitArgs {
    /// Boot parameter file
    #[arg(long, default_value = cmdline::PATH)]
    cmdline: PathBuf,

    /// Shell started in single-user mode and for recovery
    #[arg(long, default_value = paths::SHELL)]
    shell: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Default for InitArgs {
    fn default() -> Self {
        Self {
            cmdline: cmdline::PATH.into(),
            shell: paths::SHELL.into(),
            log_level: "info".to_string(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // PID 1 exiting panics the kernel; park the panicking thread instead
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("[PANIC] userboot-init panicked: {}", panic_info);
        loop {
            std::thread::park();
        }
    }));

    // The kernel hands init any boot parameter it does not understand
    let args = InitArgs::try_parse().unwrap_or_else(|e| {
        eprintln!("[WARN] Ignoring init arguments: {}", e);
        InitArgs::default()
    });

    // Initialize tracing subscriber - respects RUST_LOG env var
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    info!("userboot init starting");

    let settings = Settings {
        cmdline: args.cmdline,
        shell: args.shell,
        ..Settings::default()
    };
    let platform = LinuxPlatform::new(&settings.shell);

    match boot(&platform, &settings).await {
        BootOutcome::Provisioned(reports) => {
            info!("{} users handed off to their init", reports.len());
            reap_orphans(settings.reap_interval).await;
        }
        BootOutcome::Shell(reason) => run_shell_forever(&platform, &reason).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = InitArgs::try_parse_from(["userboot-init"]).unwrap();
        assert_eq!(args, InitArgs::default());
    }

    #[test]
    fn test_args_overrides() {
        let args = InitArgs::try_parse_from([
            "userboot-init",
            "--cmdline",
            "/run/cmdline",
            "--shell",
            "/bin/ash",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.cmdline, PathBuf::from("/run/cmdline"));
        assert_eq!(args.shell, PathBuf::from("/bin/ash"));
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_kernel_leftovers_are_rejected() {
        // Falls back to defaults in main
        assert!(InitArgs::try_parse_from(["userboot-init", "single"]).is_err());
    }
}
