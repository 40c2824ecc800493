//! Session preparation.
//!
//! Cleans the environment user inits inherit and runs the administrator
//! stage when the users-root has an administrator account.

use std::path::PathBuf;

use userboot_shared::constants::{accounts, env};
use userboot_shared::errors::BootResult;

use crate::overlayfs::OverlayBuilder;
use crate::platform::Platform;
use crate::settings::Settings;
use crate::state::BootState;

/// Prepare the session and return the users-root regular users live under.
///
/// Only a missing administrator home skips the administrator stage; any
/// other failure to check for it is fatal.
pub async fn prepare_session(
    platform: &dyn Platform,
    state: &mut BootState,
    settings: &Settings,
) -> BootResult<PathBuf> {
    for key in env::BOOT_ONLY {
        platform.remove_env(key);
    }
    let (key, value) = &settings.module_path;
    platform.set_env(key, value);

    let admin_home = state.users().home(accounts::ADMIN);
    if !platform.exists(&admin_home).await? {
        tracing::info!("No administrator account at {}", admin_home.display());
        return Ok(state.users_root().to_path_buf());
    }

    OverlayBuilder::new(platform, settings)
        .provision_admin(state)
        .await
}
