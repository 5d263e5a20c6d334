//! C9: peer gatekeeper. Verifies the activator's kernel-reported peer
//! credentials for the accepted connection, independent of whatever
//! filesystem permissions the activator's socket happens to have.

use std::ffi::CString;
use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use nix::unistd::{Gid, Uid};

#[derive(Debug, thiserror::Error)]
pub enum PeerCheckError {
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

pub struct PeerIdentity {
    pub uid: Uid,
    pub gid: Gid,
    pub pid: i32,
}

pub fn peer_credentials(conn_fd: RawFd) -> Result<PeerIdentity, PeerCheckError> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(conn_fd) };
    let creds = getsockopt(&borrowed, PeerCredentials)?;
    Ok(PeerIdentity {
        uid: Uid::from_raw(creds.uid()),
        gid: Gid::from_raw(creds.gid()),
        pid: creds.pid(),
    })
}

/// Accept iff the peer is root, its primary gid is the socket group, or its
/// supplementary-group list contains the socket group.
pub fn is_authorized(peer: &PeerIdentity, socket_group: Gid) -> bool {
    if peer.uid.is_root() {
        return true;
    }
    if peer.gid == socket_group {
        return true;
    }
    user_in_group(peer.uid, socket_group)
}

/// Resolves the peer's full supplementary-group list via `getgrouplist`,
/// since the kernel-reported `gid` is only the *primary* group.
fn user_in_group(uid: Uid, group: Gid) -> bool {
    let Some(user) = nix::unistd::User::from_uid(uid).ok().flatten() else {
        return false;
    };
    let Ok(c_name) = CString::new(user.name) else {
        return false;
    };

    let mut ngroups: libc::c_int = 32;
    loop {
        let mut groups: Vec<libc::gid_t> = vec![0; ngroups as usize];
        let mut count = ngroups;
        let rc = unsafe {
            libc::getgrouplist(
                c_name.as_ptr(),
                user.gid.as_raw(),
                groups.as_mut_ptr(),
                &mut count,
            )
        };
        if rc >= 0 {
            groups.truncate(count as usize);
            return groups.iter().any(|&g| g == group.as_raw());
        }
        if count <= ngroups {
            return false;
        }
        ngroups = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_authorized() {
        let peer = PeerIdentity {
            uid: Uid::from_raw(0),
            gid: Gid::from_raw(1),
            pid: 123,
        };
        assert!(is_authorized(&peer, Gid::from_raw(999)));
    }

    #[test]
    fn matching_primary_group_is_authorized() {
        let peer = PeerIdentity {
            uid: Uid::from_raw(1000),
            gid: Gid::from_raw(999),
            pid: 123,
        };
        assert!(is_authorized(&peer, Gid::from_raw(999)));
    }
}
