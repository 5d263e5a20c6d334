//! C6: runtime-directory manager. Builds and repairs
//! `/run/linuxio/<uid>` idempotently, entirely through directory handles —
//! never by re-opening a string path after the fact — to defeat symlink
//! races on shared, world-readable `/run`.

use std::os::fd::{AsFd, OwnedFd};

use nix::fcntl::{openat, OFlag};
use nix::sys::stat::{fchmodat, fstat, mkdirat, umask, FchmodatFlags, Mode, SFlag};
use nix::unistd::{fchownat, FchownatFlags, Gid, Uid};

const BASE_MODE: u32 = 0o755;
const USER_MODE: u32 = 0o2710;

#[derive(Debug, thiserror::Error)]
pub enum RunDirError {
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error("{0} exists but is not a directory")]
    NotADirectory(&'static str),
}

/// Opened handle to `/run/linuxio/<uid>`, the directory handed to other
/// components that need to create sockets or state beneath it.
pub struct RuntimeDir(#[allow(dead_code)] OwnedFd);

/// Ensures `/run/linuxio` then `/run/linuxio/<uid>` exist with the
/// required owner/group/mode, repairing either property if wrong. Restores
/// the process umask unconditionally, even on error.
pub fn ensure_runtime_dir(uid: Uid, socket_gid: Gid) -> Result<RuntimeDir, RunDirError> {
    let saved_umask = umask(Mode::empty());
    let result = ensure_runtime_dir_inner(uid, socket_gid);
    umask(saved_umask);
    result
}

fn ensure_runtime_dir_inner(uid: Uid, socket_gid: Gid) -> Result<RuntimeDir, RunDirError> {
    let run = open_dir_noflags(nix::fcntl::AT_FDCWD, c"/run")?;


    ensure_entry(
        &run,
        c"linuxio",
        Mode::from_bits_truncate(BASE_MODE),
        Uid::from_raw(0),
        socket_gid,
        "linuxio",
    )?;
    let base = open_dir(&run, c"linuxio")?;

    let uid_cstr = std::ffi::CString::new(uid.as_raw().to_string())
        .expect("uid string has no interior NUL");
    ensure_entry(
        &base,
        uid_cstr.as_c_str(),
        Mode::from_bits_truncate(USER_MODE),
        uid,
        socket_gid,
        "uid directory",
    )?;
    let user_dir = open_dir(&base, uid_cstr.as_c_str())?;

    Ok(RuntimeDir(user_dir))
}

fn ensure_entry(
    parent: &OwnedFd,
    name: &std::ffi::CStr,
    mode: Mode,
    owner: Uid,
    group: Gid,
    what: &'static str,
) -> Result<(), RunDirError> {
    match mkdirat(parent, name, mode) {
        Ok(()) => {}
        Err(nix::Error::EEXIST) => {}
        Err(e) => return Err(e.into()),
    }

    let entry = open_dir(parent, name)?;
    let st = fstat(&entry)?;

    if SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT != SFlag::S_IFDIR {
        return Err(RunDirError::NotADirectory(what));
    }

    if st.st_uid != owner.as_raw() || st.st_gid != group.as_raw() {
        fchownat(
            parent,
            name,
            Some(owner),
            Some(group),
            FchownatFlags::NoFollowSymlink,
        )?;
    }

    if st.st_mode & 0o7777 != mode.bits() {
        // `entry` is an O_PATH handle; fchmod(2) rejects those with EBADF, so
        // the mode repair goes through the parent directory by name instead,
        // same as the ownership repair above.
        fchmodat(
            parent,
            name,
            mode,
            FchmodatFlags::NoFollowSymlink,
        )?;
    }

    Ok(())
}

fn open_dir(parent: &OwnedFd, name: &std::ffi::CStr) -> Result<OwnedFd, RunDirError> {
    Ok(openat(
        parent,
        name,
        OFlag::O_DIRECTORY | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC | OFlag::O_PATH,
        Mode::empty(),
    )?)
}

fn open_dir_noflags(dirfd: impl AsFd, name: &std::ffi::CStr) -> Result<OwnedFd, RunDirError> {
    Ok(openat(
        dirfd,
        name,
        OFlag::O_DIRECTORY | OFlag::O_CLOEXEC | OFlag::O_PATH,
        Mode::empty(),
    )?)
}
