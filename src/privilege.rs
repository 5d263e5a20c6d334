//! C7: privilege transition. Two deterministic modes: rise to full root, or
//! drop to a target user with a post-check that root cannot be regained.
//! Any deviation is security-critical and must terminate the process
//! before the first byte of post-transition logic runs.

use nix::unistd::{
    getegid, geteuid, getgid, getuid, initgroups, setgid, setgroups, setresgid, setresuid,
    setuid, Gid, Uid,
};
use std::ffi::CString;

#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error("privilege drop did not take effect: root regain succeeded")]
    RegainPossible,
    #[error("privilege drop did not take effect: post-check identity mismatch")]
    IdentityMismatch,
}

pub struct TargetUser {
    pub uid: Uid,
    pub gid: Gid,
    pub name: String,
    pub home: std::path::PathBuf,
}

/// `setgroups(empty)`, `setresgid(0,0,0)`, `setresuid(0,0,0)`. Any failure
/// here is fatal to the child; the caller is expected to `exit` immediately
/// on `Err`.
pub fn rise_to_root() -> Result<(), PrivilegeError> {
    setgroups(&[])?;
    setresgid(Gid::from_raw(0), Gid::from_raw(0), Gid::from_raw(0))?;
    setresuid(Uid::from_raw(0), Uid::from_raw(0), Uid::from_raw(0))?;
    Ok(())
}

/// `setgroups(empty)`, `initgroups`, `setgid`, `setuid`, then verifies the
/// drop cannot be undone and the resulting identity is exactly the target.
pub fn drop_to_user(user: &TargetUser) -> Result<(), PrivilegeError> {
    setgroups(&[])?;

    let c_name = CString::new(user.name.as_str())
        .map_err(|_| PrivilegeError::IdentityMismatch)?;
    initgroups(&c_name, user.gid)?;

    setgid(user.gid)?;
    setuid(user.uid)?;

    // Post-check: regaining root must now be impossible.
    if setuid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::RegainPossible);
    }

    if getuid() != user.uid || geteuid() != user.uid {
        return Err(PrivilegeError::IdentityMismatch);
    }
    if getgid() != user.gid || getegid() != user.gid {
        return Err(PrivilegeError::IdentityMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_user_holds_resolved_fields() {
        let t = TargetUser {
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(1000),
            name: "alice".to_string(),
            home: std::path::PathBuf::from("/home/alice"),
        };
        assert_eq!(t.uid.as_raw(), 1000);
        assert_eq!(t.name, "alice");
    }
}
