//! The boot sequence.
//!
//! cmdline → root device → session (administrator stage) → dispatch →
//! finalization.
//! Every error that escapes a stage is logged here and turned into the
//! recovery shell; nothing reaches process exit.

use userboot_shared::errors::BootResult;

use crate::cmdline::BootConfig;
use crate::overlayfs::{OverlayBuilder, UserReport};
use crate::platform::Platform;
use crate::recovery::{dispatch, BootStage, Handoff, ShellReason, StageMachine};
use crate::rootfs::{acquire, RootOutcome, RootOverride};
use crate::session::prepare_session;
use crate::settings::Settings;
use crate::state::BootState;

/// Terminal result of a boot.
#[derive(Debug)]
pub enum BootOutcome {
    /// Users provisioned; their inits are running.
    Provisioned(Vec<UserReport>),
    /// An interactive shell must take over.
    Shell(ShellReason),
}

/// Run the boot sequence up to its handoff.
pub async fn boot(platform: &dyn Platform, settings: &Settings) -> BootOutcome {
    let mut machine = StageMachine::new();

    let outcome = match provision(platform, settings).await {
        Ok(Handoff::Users(reports)) => {
            transition(&mut machine, BootStage::Provisioned);
            BootOutcome::Provisioned(reports)
        }
        Ok(Handoff::Shell(reason)) => {
            transition(&mut machine, BootStage::InteractiveShell);
            BootOutcome::Shell(reason)
        }
        Err(e) => {
            tracing::error!(error = %e, "Boot failed, recovering");
            transition(&mut machine, BootStage::Recovering);
            transition(&mut machine, BootStage::InteractiveShell);
            BootOutcome::Shell(ShellReason::Failure(e.to_string()))
        }
    };

    tracing::info!(stage = ?machine.stage(), "Boot finished");
    outcome
}

fn transition(machine: &mut StageMachine, next: BootStage) {
    if let Err(e) = machine.advance(next) {
        tracing::error!("{}", e);
    }
}

async fn provision(platform: &dyn Platform, settings: &Settings) -> BootResult<Handoff> {
    let config = BootConfig::load(&settings.cmdline).await?;
    tracing::debug!(
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "Boot parameters"
    );

    let overrides = RootOverride::take(platform);
    let mut state = BootState::new(config, &settings.temp_root);

    if acquire(platform, &mut state, settings, overrides).await? == RootOutcome::Diskless {
        return Ok(Handoff::Shell(ShellReason::Diskless));
    }

    let handoff = match prepare_session(platform, &mut state, settings).await {
        Ok(users_root) => dispatch(platform, &state, settings, &users_root).await,
        Err(e) => Err(e),
    };

    // Cleanup covers a failed administrator stage as well
    OverlayBuilder::new(platform, settings).finalize().await;
    handoff
}
