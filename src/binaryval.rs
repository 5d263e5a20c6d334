//! C3: binary validator. Opens the target executable under anti-symlink,
//! path-reference-only flags and validates it purely through the resulting
//! file descriptor — never by re-reading the path string. This is what
//! makes the broker TOCTOU-free between validation and exec.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{open, readlink, OFlag};
use nix::sys::stat::{fstat, FileStat, Mode};
use nix::unistd::Uid;

const S_IWGRP: u32 = 0o020;
const S_IWOTH: u32 = 0o002;
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_IXUSR_GRP_OTH: u32 = 0o111;
const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

#[derive(Debug, thiserror::Error)]
pub enum BinaryValidationError {
    #[error("target is not a regular file")]
    NotRegularFile,
    #[error("target is group- or world-writable")]
    Writable,
    #[error("target owner is not an accepted identity")]
    WrongOwner,
    #[error("target has no executable bit set")]
    NotExecutable,
    #[error("target has setuid or setgid bit set")]
    SetidBit,
    #[error("parent directory is not a directory")]
    ParentNotDirectory,
    #[error("parent directory ownership policy violated")]
    ParentPolicyViolated,
    #[error("parent directory is group- or world-writable")]
    ParentWritable,
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

/// An opened-and-validated reference to the bridge executable. The handle
/// is the only way the launcher touches the binary from here on; no
/// path-based access to it occurs after construction.
pub struct BridgeHandle(OwnedFd);

impl BridgeHandle {
    pub fn into_inner(self) -> OwnedFd {
        self.0
    }
}

impl AsFd for BridgeHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for BridgeHandle {
    fn as_raw_fd(&self) -> i32 {
        self.0.as_raw_fd()
    }
}

/// Required owner for a prospective bridge target, in order of preference.
pub enum RequiredOwner {
    /// Privileged launch: must be owned by root.
    Root,
    /// Unprivileged launch: owned by root, or by the invoking user.
    RootOrUser(Uid),
}

pub fn validate_binary(
    path: &Path,
    required_owner: RequiredOwner,
) -> Result<BridgeHandle, BinaryValidationError> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| BinaryValidationError::NotRegularFile)?;

    let fd = open(
        c_path.as_c_str(),
        OFlag::O_PATH | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;

    let st = fstat(&fd)?;
    check_file_stat(&st, required_owner)?;

    check_parent_directory(&fd, st.st_uid)?;

    Ok(BridgeHandle(fd))
}

fn check_file_stat(
    st: &FileStat,
    required_owner: RequiredOwner,
) -> Result<(), BinaryValidationError> {
    if st.st_mode & S_IFMT != S_IFREG {
        return Err(BinaryValidationError::NotRegularFile);
    }
    if st.st_mode as u32 & (S_IWGRP | S_IWOTH) != 0 {
        return Err(BinaryValidationError::Writable);
    }
    match required_owner {
        RequiredOwner::Root if st.st_uid != 0 => {
            return Err(BinaryValidationError::WrongOwner);
        }
        RequiredOwner::RootOrUser(uid) if st.st_uid != 0 && st.st_uid != uid.as_raw() => {
            return Err(BinaryValidationError::WrongOwner);
        }
        _ => {}
    }
    if st.st_mode as u32 & S_IXUSR_GRP_OTH == 0 {
        return Err(BinaryValidationError::NotExecutable);
    }
    if st.st_mode as u32 & (S_ISUID | S_ISGID) != 0 {
        return Err(BinaryValidationError::SetidBit);
    }
    Ok(())
}

/// Resolves the parent directory of `fd` via the procfs fd-to-path mapping
/// only to *name* a fresh entry; the handle returned for verification is
/// obtained by a brand-new no-follow open, never by trusting the resolved
/// string itself.
fn check_parent_directory(fd: &OwnedFd, file_owner: u32) -> Result<(), BinaryValidationError> {
    let proc_link = PathBuf::from(format!("/proc/self/fd/{}", fd.as_raw_fd()));
    let resolved = readlink(&proc_link)?;
    let resolved_path = PathBuf::from(resolved);

    let parent = resolved_path
        .parent()
        .ok_or(BinaryValidationError::ParentNotDirectory)?;

    let c_parent = CString::new(parent.as_os_str().as_encoded_bytes())
        .map_err(|_| BinaryValidationError::ParentNotDirectory)?;

    let parent_fd = open(
        c_parent.as_c_str(),
        OFlag::O_PATH | OFlag::O_DIRECTORY | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;
    let parent_st = fstat(&parent_fd)?;

    if parent_st.st_mode & S_IFMT != S_IFDIR {
        return Err(BinaryValidationError::ParentNotDirectory);
    }
    if parent_st.st_mode as u32 & (S_IWGRP | S_IWOTH) != 0 {
        return Err(BinaryValidationError::ParentWritable);
    }

    let policy_ok = if file_owner == 0 {
        parent_st.st_uid == 0
    } else {
        parent_st.st_uid == file_owner
    };
    if !policy_ok {
        return Err(BinaryValidationError::ParentPolicyViolated);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_with(mode: u32, uid: u32) -> FileStat {
        // `nix::sys::stat::FileStat` is a type alias for `libc::stat`.
        let mut raw: libc::stat = unsafe { std::mem::zeroed() };
        raw.st_mode = mode as libc::mode_t;
        raw.st_uid = uid;
        raw
    }

    #[test]
    fn root_owned_regular_mode_0755_accepted() {
        let st = stat_with(S_IFREG | 0o755, 0);
        assert!(check_file_stat(&st, RequiredOwner::Root).is_ok());
    }

    #[test]
    fn group_writable_rejected() {
        let st = stat_with(S_IFREG | 0o775, 0);
        assert!(matches!(
            check_file_stat(&st, RequiredOwner::Root),
            Err(BinaryValidationError::Writable)
        ));
    }

    #[test]
    fn setuid_bit_rejected() {
        let st = stat_with(S_IFREG | S_ISUID | 0o755, 0);
        assert!(matches!(
            check_file_stat(&st, RequiredOwner::Root),
            Err(BinaryValidationError::SetidBit)
        ));
    }

    #[test]
    fn non_root_owner_rejected_for_privileged_requirement() {
        let st = stat_with(S_IFREG | 0o755, 1000);
        assert!(matches!(
            check_file_stat(&st, RequiredOwner::Root),
            Err(BinaryValidationError::WrongOwner)
        ));
    }

    #[test]
    fn user_owned_accepted_for_root_or_user_requirement() {
        let st = stat_with(S_IFREG | 0o755, 1000);
        assert!(check_file_stat(&st, RequiredOwner::RootOrUser(Uid::from_raw(1000))).is_ok());
    }

    #[test]
    fn non_regular_file_rejected() {
        let st = stat_with(S_IFDIR | 0o755, 0);
        assert!(matches!(
            check_file_stat(&st, RequiredOwner::Root),
            Err(BinaryValidationError::NotRegularFile)
        ));
    }

    #[test]
    fn no_executable_bit_rejected() {
        let st = stat_with(S_IFREG | 0o644, 0);
        assert!(matches!(
            check_file_stat(&st, RequiredOwner::Root),
            Err(BinaryValidationError::NotExecutable)
        ));
    }
}
