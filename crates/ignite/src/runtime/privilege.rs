//! Privilege de-escalation applied in the child right before exec

use crate::config::GroupNames;
use nix::unistd::{self, Gid, Group, Pid, Uid, User};
use tokio::process::Command;

/// Numeric identities a child process drops to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demotion {
    /// Target user, if any
    pub uid: Option<Uid>,
    /// Target primary group, if any
    pub gid: Option<Gid>,
    /// Supplementary groups (empty = leave untouched)
    pub groups: Vec<Gid>,
}

impl Demotion {
    /// Resolve user and group names once.
    ///
    /// Unknown names are logged and skipped; they never prevent startup.
    pub fn resolve(user: Option<&str>, group: Option<&GroupNames>) -> Self {
        let uid = user.and_then(resolve_user);

        let mut gids = group
            .map(|names| {
                names
                    .names()
                    .into_iter()
                    .filter_map(resolve_group)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let gid = if gids.is_empty() {
            None
        } else {
            Some(gids.remove(0))
        };

        Self {
            uid,
            gid,
            groups: gids,
        }
    }

    /// True when nothing but the new process group will be applied
    pub fn is_noop(&self) -> bool {
        self.uid.is_none() && self.gid.is_none() && self.groups.is_empty()
    }

    /// Apply to the calling process: new process group, supplementary groups,
    /// primary group, then user. Only valid between fork and exec.
    pub fn apply(&self) -> nix::Result<()> {
        unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))?;

        if !self.groups.is_empty() {
            unistd::setgroups(&self.groups)?;
        }
        if let Some(gid) = self.gid {
            unistd::setgid(gid)?;
        }
        // Last: after setuid we may no longer be allowed to change groups
        if let Some(uid) = self.uid {
            unistd::setuid(uid)?;
        }

        Ok(())
    }

    /// Install as the pre-exec step of a command
    pub fn install(&self, cmd: &mut Command) {
        let demotion = self.clone();
        // SAFETY: `apply` only issues setpgid/setgroups/setgid/setuid syscalls on
        // data cloned before fork; it does not allocate or take locks.
        unsafe {
            cmd.pre_exec(move || demotion.apply().map_err(std::io::Error::from));
        }
    }
}

fn resolve_user(name: &str) -> Option<Uid> {
    match User::from_name(name) {
        Ok(Some(user)) => Some(user.uid),
        Ok(None) => {
            log::warn!("User '{}' does not exist, not changing user", name);
            None
        }
        Err(e) => {
            log::warn!("Failed to look up user '{}': {}", name, e);
            None
        }
    }
}

fn resolve_group(name: &str) -> Option<Gid> {
    match Group::from_name(name) {
        Ok(Some(group)) => Some(group.gid),
        Ok(None) => {
            log::warn!("Group '{}' does not exist, not changing group", name);
            None
        }
        Err(e) => {
            log::warn!("Failed to look up group '{}': {}", name, e);
            None
        }
    }
}
