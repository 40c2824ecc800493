//! Per-user overlay construction.
//!
//! Every user account gets a copy-on-write view of the system root with
//! their home directory as the writable layer:
//!
//! ```text
//! lowerdir = /                          (read-only system)
//! upperdir = {users}/{user}             (user's home)
//! workdir  = {users}/.workdirs/{user}
//! merged   = {users}/{user}             (mounted over the home itself)
//! ```
//!
//! The administrator account is special: its overlay is mounted at `/root`
//! and then replaces the temporary root, so it must be finished before any
//! regular user is provisioned.

use std::path::{Path, PathBuf};

use futures::stream::{FuturesUnordered, StreamExt};
use userboot_shared::constants::accounts;
use userboot_shared::errors::{BootError, BootResult};
use userboot_shared::layout::{RootLayout, UsersLayout};

use crate::mount::{MountRequest, MoveRequest, OverlaySpec};
use crate::platform::Platform;
use crate::settings::Settings;
use crate::state::BootState;
use crate::wait::wait_for_populated;

/// Whether a users-root entry is a regular user account.
pub fn is_user_account(name: &str) -> bool {
    !name.starts_with(accounts::RESERVED_PREFIX)
        && name != accounts::ADMIN
        && name != accounts::LOST_FOUND
}

/// Regular user accounts among the entries of a users-root.
pub fn user_accounts<I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    entries
        .into_iter()
        .filter(|name| is_user_account(name))
        .collect()
}

/// Outcome of provisioning one regular user.
#[derive(Debug)]
pub struct UserReport {
    pub user: String,
    pub result: BootResult<()>,
}

impl UserReport {
    /// Failed in a way that aborts the boot path.
    pub fn is_fatal(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_fatal())
    }
}

/// Builds user overlays.
pub struct OverlayBuilder<'a> {
    platform: &'a dyn Platform,
    settings: &'a Settings,
}

impl<'a> OverlayBuilder<'a> {
    pub fn new(platform: &'a dyn Platform, settings: &'a Settings) -> Self {
        Self { platform, settings }
    }

    /// Mount `user`'s overlay at `target`.
    async fn mount_overlay(
        &self,
        users: &UsersLayout,
        user: &str,
        target: PathBuf,
    ) -> BootResult<()> {
        let workdir = users.workdir(user);
        self.platform
            .create_dir(&workdir, accounts::WORKDIR_MODE)
            .await?;

        let spec = OverlaySpec {
            lower: self.settings.lower_dir.clone(),
            upper: users.home(user),
            work: workdir,
            target,
        };

        tracing::info!(user, "Mounting overlayfs:");
        tracing::info!("  lowerdir: {}", spec.lower.display());
        tracing::info!("  upperdir: {}", spec.upper.display());
        tracing::info!("  workdir:  {}", spec.work.display());
        tracing::info!("  merged:   {}", spec.target.display());

        self.platform.mount(&spec.into_request()).await
    }

    /// Bind /proc and mount a fresh /tmp inside `root`.
    async fn mount_kernel_dirs(&self, root: &RootLayout) -> BootResult<()> {
        self.platform
            .mount(&MountRequest::bind(&self.settings.proc_dir, root.proc_dir()))
            .await?;
        self.platform
            .mount(&MountRequest::tmpfs(root.tmp_dir()))
            .await
    }

    /// Provision one regular user and start their init.
    ///
    /// A failing init is reported as [`BootError::InitExec`].
    pub async fn provision_user(&self, users: &UsersLayout, user: &str) -> BootResult<()> {
        let home = users.home(user);
        self.mount_overlay(users, user, home.clone()).await?;
        self.mount_kernel_dirs(&RootLayout::new(&home)).await?;

        self.platform
            .exec_init(&home, &[])
            .await
            .map_err(|e| BootError::InitExec {
                user: user.to_string(),
                reason: e.to_string(),
            })
    }

    /// Give the administrator root its /dev.
    ///
    /// Privileged boots with the isolation helper available get a
    /// per-account filtered view; otherwise the boot image's /dev is bound.
    /// Failing to look the helper up is fatal, never a silent fallback.
    async fn expose_devices(&self, root: &RootLayout) -> BootResult<()> {
        let dev = root.dev_dir();
        let helper = &self.settings.dev_helper;
        let has_helper = self.platform.exists(helper).await?;

        if !(self.platform.is_privileged() && has_helper) {
            tracing::info!("Binding {} into {}", self.settings.dev_dir.display(), dev.display());
            return self
                .platform
                .mount(&MountRequest::bind(&self.settings.dev_dir, dev))
                .await;
        }

        self.platform.create_dir(&dev, accounts::DEV_MODE).await?;

        let args = vec![
            self.settings.dev_dir.display().to_string(),
            dev.display().to_string(),
            "-o".to_string(),
            "ownerPerm=true".to_string(),
        ];
        if let Err(e) = self.platform.spawn_detached(helper, &args).await {
            tracing::error!("Failed to start device helper {}: {}", helper.display(), e);
        }

        wait_for_populated(self.platform, &dev, self.settings.wait).await?;
        tracing::info!("Isolated devices ready at {}", dev.display());

        // The helper stays resident; its files on the boot image are not needed anymore
        for file in &self.settings.dev_helper_files {
            if let Err(e) = self.platform.remove_path(file).await {
                tracing::warn!("Failed to remove {}: {}", file.display(), e);
            }
        }
        Ok(())
    }

    /// Build the administrator overlay and make it the new temporary root.
    ///
    /// Afterwards the original users-root lives at `{temp_root}/home` and
    /// `state` is rebound to it. Returns the new users-root.
    pub async fn provision_admin(&self, state: &mut BootState) -> BootResult<PathBuf> {
        let users = state.users();
        let admin = RootLayout::new(&self.settings.admin_root);

        self.mount_overlay(&users, accounts::ADMIN, admin.root().to_path_buf())
            .await?;
        self.expose_devices(&admin).await?;
        self.mount_kernel_dirs(&admin).await?;

        self.platform
            .move_mount(&MoveRequest::new(state.temp_root(), admin.home_dir()))
            .await?;
        self.platform
            .move_mount(&MoveRequest::new(admin.root(), state.temp_root()))
            .await?;

        let users_root = RootLayout::new(state.temp_root()).home_dir();
        state.rebind(users_root.clone())?;

        tracing::info!("Administrator root ready, users now at {}", users_root.display());
        Ok(users_root)
    }

    /// Provision every regular user under `users_root` concurrently.
    ///
    /// Users are independent: a failure is captured in that user's report
    /// and never cancels the others. Fails if listing the users fails or
    /// any user hit a fatal error, once every user has finished.
    pub async fn provision_users(&self, users_root: &Path) -> BootResult<Vec<UserReport>> {
        let mut reports = self.fan_out(users_root).await?;
        match reports.iter().position(|report| report.is_fatal()) {
            Some(index) => match reports.swap_remove(index).result {
                Err(e) => Err(e),
                Ok(()) => Err(BootError::Internal("fatal report without error".into())),
            },
            None => Ok(reports),
        }
    }

    async fn fan_out(&self, users_root: &Path) -> BootResult<Vec<UserReport>> {
        let users = UsersLayout::new(users_root);
        let accounts = user_accounts(self.platform.read_dir(users_root).await?);
        tracing::info!(
            "Provisioning {} users under {}",
            accounts.len(),
            users_root.display()
        );

        let mut pending: FuturesUnordered<_> = accounts
            .into_iter()
            .map(|user| {
                let users = &users;
                async move {
                    let result = self.provision_user(users, &user).await;
                    UserReport { user, result }
                }
            })
            .collect();

        let mut reports = Vec::new();
        while let Some(report) = pending.next().await {
            match &report.result {
                Ok(()) => tracing::info!(user = %report.user, "User ready"),
                Err(e) => {
                    tracing::error!(user = %report.user, error = %e, "User provisioning failed")
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Drop boot-only files and seal /usr.
    ///
    /// Runs once the session stage is over, whatever its result. Failures
    /// are only logged.
    pub async fn finalize(&self) {
        for file in &self.settings.mount_utils_files {
            if let Err(e) = self.platform.remove_path(file).await {
                tracing::warn!("Failed to remove {}: {}", file.display(), e);
            }
        }

        if let Err(e) = self.platform.mark_opaque(&self.settings.opaque_dir).await {
            tracing::warn!(
                "Failed to mark {} opaque: {}",
                self.settings.opaque_dir.display(),
                e
            );
        }
    }
}
