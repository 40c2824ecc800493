//! Userboot init.
//!
//! First user-space process: mounts the root device holding the users'
//! homes, builds one copy-on-write overlay per user and starts each user's
//! own init, falling back to an interactive shell whenever it cannot.

#[cfg(not(target_os = "linux"))]
compile_error!("userboot-init is Linux-only; build with a Linux target");

pub mod boot;
pub mod cmdline;
pub mod mount;
pub mod overlayfs;
pub mod platform;
pub mod recovery;
pub mod rootfs;
pub mod session;
pub mod settings;
pub mod state;
pub mod wait;

pub use boot::{boot, BootOutcome};
pub use cmdline::{BootConfig, ParamValue};
pub use platform::{reap_orphans, LinuxPlatform, Platform};
pub use recovery::{run_shell_forever, ShellReason};
pub use settings::Settings;
