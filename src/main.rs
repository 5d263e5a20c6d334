//! linuxio-auth: privileged single-shot authentication broker.
//!
//! Invoked by an activator that has already accepted one connection and
//! handed it in as stdin/stdout. Verifies the caller's OS credentials,
//! probes whether they may elevate to root, validates and launches the
//! per-session bridge worker with a fixed FD layout, and replies on the
//! wire only after the worker has actually exec'd. Handles exactly one
//! request, then exits.

mod binaryval;
mod config;
mod consts;
mod elevate;
mod error;
mod launch;
mod logging;
mod motd;
mod pam;
mod peer;
mod privilege;
mod rundir;
mod secret;
mod supervise;
mod sysutil;
mod validate;
mod wire;

use std::io::IsTerminal;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use clap::Parser;
use nix::unistd::{Gid, Group, Uid, User};
use tracing::{error, info, info_span, warn};

use crate::binaryval::{validate_binary, RequiredOwner};
use crate::consts::*;
use crate::error::BrokerError;
use crate::launch::{Identity, LaunchRequest};
use crate::privilege::TargetUser;
use crate::wire::{read_request, write_response, ResponseBody};

#[derive(Parser, Debug)]
#[command(name = "linuxio-auth", version)]
struct Cli {
    /// Path to the bridge worker binary.
    #[arg(long, default_value = DEFAULT_BRIDGE_PATH)]
    bridge_path: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    if std::io::stdin().is_terminal() {
        eprintln!("linuxio-auth: refusing to run from a terminal");
        std::process::exit(EXIT_TTY_STDIN);
    }

    if !Uid::effective().is_root() {
        eprintln!("linuxio-auth: must run with effective uid 0");
        std::process::exit(EXIT_NOT_ROOT);
    }

    disable_dumpable();
    let log_handle = logging::init();

    let config = config::Config::from_env();
    let exit_code = run(&cli, &config, &log_handle);
    std::process::exit(exit_code);
}

fn disable_dumpable() {
    unsafe {
        let _ = sysutil::err(libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0));
    }
}

fn run(cli: &Cli, config: &config::Config, log_handle: &logging::ReloadHandle) -> i32 {
    let conn_fd = std::io::stdin().as_raw_fd();

    let socket_group = match Group::from_name(SOCKET_GROUP) {
        Ok(Some(g)) => g.gid,
        _ => {
            error!(group = SOCKET_GROUP, "socket group does not exist");
            return EXIT_REQUEST_FAILURE;
        }
    };

    // C9: peer gatekeeper. No bytes of the request are read before this
    // check passes; on rejection the process exits without writing
    // anything to the peer (the pinned resolution of the open question in
    // SPEC_FULL.md §9) — the error is constructed and logged for its exit
    // code, but never handed to write_response.
    let peer = match peer::peer_credentials(conn_fd) {
        Ok(p) => p,
        Err(e) => {
            error!(%e, "failed to read peer credentials");
            return EXIT_REQUEST_FAILURE;
        }
    };
    if !peer::is_authorized(&peer, socket_group) {
        let err = BrokerError::PeerUnauthorized;
        warn!(uid = peer.uid.as_raw(), gid = peer.gid.as_raw(), error = %err, "peer not authorized");
        return err.exit_code();
    }

    match handle_request(cli, config, conn_fd, log_handle) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "request failed");
            let mut stdout = std::io::stdout();
            let _ = write_response(
                &mut stdout,
                &ResponseBody::Error {
                    message: e.peer_message().to_string(),
                },
            );
            e.exit_code()
        }
    }
}

fn handle_request(
    cli: &Cli,
    config: &config::Config,
    conn_fd: i32,
    log_handle: &logging::ReloadHandle,
) -> Result<i32, BrokerError> {
    let mut stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    // C1 (request).
    let request = {
        let _span = info_span!("wire_codec").entered();
        read_request(&mut stdin)?
    };

    if request.verbose {
        logging::set_verbose(log_handle);
    }

    // C2.
    if !validate::valid_session_id(&request.session_id) {
        return Err(BrokerError::Input("bad session id"));
    }

    let cred_span = info_span!("credential_verify", session_id = %request.session_id).entered();

    let user = User::from_name(&request.username)
        .ok()
        .flatten()
        .ok_or_else(|| BrokerError::Authentication("authentication failed".to_string()))?;

    // C4: host credential verification.
    let outcome = pam::verify(&request.username, &request.secret).map_err(|e| {
        use pam::PamVerifyError::*;
        match e {
            PasswordExpired => BrokerError::Authentication(
                "Password has expired. Please change it via SSH or console.".to_string(),
            ),
            AuthFailed | AccountDenied | Other(_) => {
                BrokerError::Authentication("authentication failed".to_string())
            }
        }
    })?;
    let mut session = outcome.session;

    let target_user = TargetUser {
        uid: user.uid,
        gid: user.gid,
        name: request.username.clone(),
        home: user.dir.clone(),
    };

    // C5: elevation probe. Runs while the session has credentials
    // established but before open_session, so a failed probe never leaves
    // a PAM session open.
    let privileged = elevate::probe(&target_user, &request.secret, config.sudo_timeout)
        .map_err(|e| BrokerError::Resource(e.into()))?;

    drop(request.secret); // explicit: zeroised by Drop regardless.

    if let Err(e) = session.open_session() {
        return Err(BrokerError::Authentication(format!("{e}")));
    }

    drop(cred_span);

    // C3: binary validator.
    let required_owner = if privileged {
        RequiredOwner::Root
    } else {
        RequiredOwner::RootOrUser(user.uid)
    };
    let bridge_handle = {
        let _span = info_span!("binary_validate").entered();
        validate_binary(&cli.bridge_path, required_owner)
            .map_err(|e| BrokerError::Integrity(e.to_string()))?
    };

    // C6: runtime-dir manager.
    {
        let _span = info_span!("runtime_dir").entered();
        rundir::ensure_runtime_dir(user.uid, socket_group)
            .map_err(|e| BrokerError::Resource(e.into()))?;
    }

    let bootstrap = build_bootstrap(&request.session_id, &request.username, &outcome.motd, request.verbose, privileged, user.uid, user.gid);

    let identity = if privileged {
        Identity::Root
    } else {
        Identity::User(target_user)
    };

    let launch_req = LaunchRequest {
        identity,
        bridge: bridge_handle,
        client_conn: conn_fd,
        bootstrap,
        rlimit_nproc: config.rlimit_nproc,
        exec_timeout: config.bridge_start_timeout,
    };

    let launched = {
        let _span = info_span!("launch_bridge").entered();
        launch::launch(launch_req).map_err(|e| match e {
            launch::LaunchError::Timeout => BrokerError::LaunchTimeout,
            launch::LaunchError::ExecFailed => BrokerError::LaunchExecFailed,
            other => BrokerError::Resource(other.into()),
        })?
    };

    // Exec is confirmed; only now may the broker tell the peer "ok".
    write_response(
        &mut stdout,
        &ResponseBody::Ok {
            motd: outcome.motd.clone(),
            privileged,
        },
    )?;

    info!(pid = launched.pid.as_raw(), privileged, "bridge launched");

    // C10: supervisor.
    let exit_code = {
        let _span = info_span!("supervise").entered();
        supervise::wait_and_translate_exit_code(launched.pid)
    };

    drop(session);

    Ok(exit_code)
}

fn build_bootstrap(
    session_id: &str,
    username: &str,
    motd: &str,
    verbose: bool,
    privileged: bool,
    uid: Uid,
    gid: Gid,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BOOTSTRAP_HEADER_LEN + session_id.len() + username.len() + motd.len() + 6);
    buf.extend_from_slice(&MAGIC);
    buf.push(PROTO_VERSION);
    buf.extend_from_slice(&uid.as_raw().to_be_bytes());
    buf.extend_from_slice(&gid.as_raw().to_be_bytes());

    let mut flags = 0u8;
    if verbose {
        flags |= BOOTSTRAP_FLAG_VERBOSE;
    }
    if privileged {
        flags |= BOOTSTRAP_FLAG_PRIVILEGED;
    }
    buf.push(flags);

    for field in [session_id.as_bytes(), username.as_bytes(), motd.as_bytes()] {
        buf.extend_from_slice(&(field.len() as u16).to_be_bytes());
        buf.extend_from_slice(field);
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_header_matches_layout() {
        let bytes = build_bootstrap("s-01", "alice", "hi", true, false, Uid::from_raw(1000), Gid::from_raw(1000));
        assert_eq!(&bytes[0..3], &MAGIC);
        assert_eq!(bytes[3], PROTO_VERSION);
        assert_eq!(&bytes[4..8], &1000u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1000u32.to_be_bytes());
        assert_eq!(bytes[12], BOOTSTRAP_FLAG_VERBOSE);
    }
}
