//! Dispatch and recovery.
//!
//! The boot ends in exactly one of two terminal stages: users provisioned
//! and running their own inits, or an interactive shell. Nothing moves a
//! boot from the shell back to provisioning.

use std::path::Path;

use userboot_shared::errors::{BootError, BootResult};

use crate::overlayfs::{OverlayBuilder, UserReport};
use crate::platform::Platform;
use crate::settings::Settings;
use crate::state::BootState;

/// Stage of the boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootStage {
    Provisioning,
    Recovering,
    InteractiveShell,
    Provisioned,
}

/// Enforces the allowed stage transitions.
#[derive(Debug)]
pub struct StageMachine {
    stage: BootStage,
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            stage: BootStage::Provisioning,
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    pub fn advance(&mut self, next: BootStage) -> BootResult<()> {
        use BootStage::*;

        let allowed = matches!(
            (self.stage, next),
            (Provisioning, Provisioned)
                | (Provisioning, Recovering)
                | (Provisioning, InteractiveShell)
                | (Recovering, InteractiveShell)
        );
        if !allowed {
            return Err(BootError::Internal(format!(
                "invalid boot stage transition {:?} -> {:?}",
                self.stage, next
            )));
        }

        tracing::debug!(from = ?self.stage, to = ?next, "Boot stage");
        self.stage = next;
        Ok(())
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the boot ends in a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellReason {
    /// `single` on the boot parameter line.
    SingleUser,
    /// No root device.
    Diskless,
    /// An unrecoverable error.
    Failure(String),
}

impl ShellReason {
    /// Shell prompt label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleUser => "single-user",
            Self::Diskless => "volatile",
            Self::Failure(_) => "recovery",
        }
    }
}

/// Where provisioning hands control.
#[derive(Debug)]
pub enum Handoff {
    Users(Vec<UserReport>),
    Shell(ShellReason),
}

/// Provision regular users, or go straight to the shell in single-user mode.
pub async fn dispatch(
    platform: &dyn Platform,
    state: &BootState,
    settings: &Settings,
    users_root: &Path,
) -> BootResult<Handoff> {
    if state.single_user() {
        tracing::info!("Single-user mode, skipping user provisioning");
        return Ok(Handoff::Shell(ShellReason::SingleUser));
    }

    let reports = OverlayBuilder::new(platform, settings)
        .provision_users(users_root)
        .await?;
    Ok(Handoff::Users(reports))
}

/// Keep an interactive shell running on the console.
pub async fn run_shell_forever(platform: &dyn Platform, reason: &ShellReason) {
    if let ShellReason::Failure(error) = reason {
        tracing::error!("Boot failed: {}", error);
    }

    loop {
        tracing::info!("Starting {} shell", reason.label());
        if let Err(e) = platform.start_shell(reason.label()).await {
            tracing::error!("Shell failed: {}", e);
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}
