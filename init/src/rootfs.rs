//! Root device acquisition.
//!
//! Resolves where the users' data lives and mounts it at the temporary root:
//! - `root=container`: the environment already provides it, nothing to mount
//! - `root=<device>`: wait for the device node, then mount it
//! - no `root`: diskless boot, everything is volatile

use std::path::Path;

use userboot_shared::constants::{cmdline, env, mount};
use userboot_shared::errors::{BootError, BootResult};

use crate::cmdline::BootConfig;
use crate::mount::MountRequest;
use crate::platform::Platform;
use crate::settings::Settings;
use crate::state::BootState;
use crate::wait::wait_for_path;

/// Root device values forwarded by the kernel through the environment.
///
/// They take priority over the boot parameter line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RootOverride {
    pub device: Option<String>,
    pub fstype: Option<String>,
}

impl RootOverride {
    /// Read the override variables, removing them from the environment.
    pub fn take(platform: &dyn Platform) -> Self {
        Self {
            device: platform.take_env(env::ROOT),
            fstype: platform.take_env(env::ROOT_FS_TYPE),
        }
    }
}

/// Where the root comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootSource {
    Container,
    Device { path: String, fstype: String },
    Missing,
}

/// Pick the root source. An empty device counts as no device.
pub fn resolve(config: &BootConfig, overrides: &RootOverride) -> RootSource {
    let device = non_empty(overrides.device.clone())
        .or_else(|| config.root())
        .filter(|device| !device.is_empty());

    match device {
        Some(device) if device == cmdline::CONTAINER => RootSource::Container,
        Some(path) => RootSource::Device {
            path,
            fstype: non_empty(overrides.fstype.clone())
                .or_else(|| config.root_fs_type())
                .filter(|fstype| !fstype.is_empty())
                .unwrap_or_else(|| mount::AUTO_FS_TYPE.to_string()),
        },
        None => RootSource::Missing,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Result of root acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootOutcome {
    /// The temporary root holds the users; continue with the session.
    Ready,
    /// No persistent storage; hand off to the shell.
    Diskless,
}

/// Mount the root device at the temporary root.
///
/// A device that never shows up is corrected on the console and the whole
/// acquisition retried, as often as it takes. A device that shows up but
/// fails to mount is fatal.
pub async fn acquire(
    platform: &dyn Platform,
    state: &mut BootState,
    settings: &Settings,
    mut overrides: RootOverride,
) -> BootResult<RootOutcome> {
    loop {
        match resolve(state.config(), &overrides) {
            RootSource::Container => {
                tracing::info!("Running in a container, root already provided");
                return Ok(RootOutcome::Ready);
            }
            RootSource::Missing => {
                tracing::warn!("No root device given, booting without persistent storage");
                tracing::warn!("ALL CHANGES WILL BE LOST ON REBOOT");
                return Ok(RootOutcome::Diskless);
            }
            RootSource::Device { path, fstype } => {
                tracing::info!(device = %path, fstype = %fstype, "Waiting for root device");

                match wait_for_path(platform, Path::new(&path), settings.wait).await {
                    Ok(()) => {
                        mount_root(platform, state, &path, &fstype).await?;
                        return Ok(RootOutcome::Ready);
                    }
                    Err(BootError::DeviceNotReady { .. }) => {
                        tracing::warn!(device = %path, "Root device not found");
                        let answer = platform
                            .prompt(&format!(
                                "Root device {} not found. Enter the root device path: ",
                                path
                            ))
                            .await?;
                        state.config_mut().set_root(answer);
                        overrides.device = None;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

async fn mount_root(
    platform: &dyn Platform,
    state: &BootState,
    device: &str,
    fstype: &str,
) -> BootResult<()> {
    let req = MountRequest::device(device, state.temp_root(), fstype).remount_ro_on_errors();
    platform.mount(&req).await?;

    tracing::info!(
        "Mounted root device: {} → {}",
        device,
        state.temp_root().display()
    );

    // Log the users found only when trace logging is enabled
    if tracing::enabled!(tracing::Level::TRACE) {
        match platform.read_dir(state.temp_root()).await {
            Ok(entries) => tracing::trace!(?entries, "Root device contents"),
            Err(e) => tracing::warn!(
                "Could not read root device contents at {}: {}",
                state.temp_root().display(),
                e
            ),
        }
    }

    Ok(())
}
