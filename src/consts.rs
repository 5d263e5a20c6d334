//! Wire-format constants, size limits, and filesystem policy shared by every
//! component. Single source of truth for the numbers named in the protocol
//! and policy sections.

/// Protocol magic bytes, shared by the request, response, and bootstrap
/// headers.
pub const MAGIC: [u8; 3] = [b'L', b'I', b'O'];
pub const PROTO_VERSION: u8 = 1;

pub const REQUEST_HEADER_LEN: usize = 8;
pub const RESPONSE_HEADER_LEN: usize = 8;
pub const BOOTSTRAP_HEADER_LEN: usize = 13;

pub const REQ_FLAG_VERBOSE: u8 = 1 << 0;

pub const RESP_STATUS_OK: u8 = 0;
pub const RESP_STATUS_ERROR: u8 = 1;

pub const RESP_MODE_UNPRIVILEGED: u8 = 0;
pub const RESP_MODE_PRIVILEGED: u8 = 1;

pub const BOOTSTRAP_FLAG_VERBOSE: u8 = 1 << 0;
pub const BOOTSTRAP_FLAG_PRIVILEGED: u8 = 1 << 1;

pub const MAX_USERNAME_LEN: usize = 256;
pub const MAX_PASSWORD_LEN: usize = 2048;
pub const MAX_SESSION_ID_LEN: usize = 64;
pub const MAX_MOTD_LEN: usize = 4096;
pub const MAX_ERROR_LEN: usize = 512;

/// Base directory for all per-user runtime state.
pub const RUNTIME_BASE: &str = "/run/linuxio";

/// Name of the dedicated OS group that gates both activator-socket access
/// (checked by the activator, out of scope here) and the peer-credential
/// check in C9.
pub const SOCKET_GROUP: &str = "linuxio-bridge-socket";

/// Minimal PATH handed to both the elevation-probe child and the bridge
/// child. Adopted verbatim from the original implementation.
pub const MINIMAL_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub const DEFAULT_LANG: &str = "C.UTF-8";
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Default location of the `sudo`-like elevation prober.
pub const SUDO_PATH: &str = "/usr/bin/sudo";

/// PAM service name used for `pam_start`.
pub const PAM_SERVICE: &str = "linuxio";

/// Argv0 the bridge sees; all real configuration travels over the
/// bootstrap channel, never argv.
pub const BRIDGE_ARGV0: &str = "linuxio-bridge";

/// Default path of the bridge binary, overridable via `--bridge-path`.
pub const DEFAULT_BRIDGE_PATH: &str = "/usr/lib/linuxio/linuxio-bridge";

pub const DEFAULT_SUDO_TIMEOUT_SECS: u64 = 4;
pub const MIN_SUDO_TIMEOUT_SECS: u64 = 1;
pub const MAX_SUDO_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_BRIDGE_START_TIMEOUT_MS: u64 = 5000;
pub const MIN_BRIDGE_START_TIMEOUT_MS: u64 = 1000;
pub const MAX_BRIDGE_START_TIMEOUT_MS: u64 = 30000;

pub const DEFAULT_RLIMIT_NPROC: u64 = 1024;
pub const MIN_RLIMIT_NPROC: u64 = 10;
pub const MAX_RLIMIT_NPROC: u64 = 4096;

pub const BRIDGE_RLIMIT_CPU_SECS: u64 = 600;
pub const BRIDGE_RLIMIT_NOFILE: u64 = 2048;
pub const BRIDGE_RLIMIT_AS_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// Exit code used when privilege-drop verification fails inside the bridge
/// child, before any code runs as the target identity.
pub const EXIT_PRIVILEGE_DROP_FAILED: i32 = 125;
pub const EXIT_NOT_ROOT: i32 = 126;
pub const EXIT_TTY_STDIN: i32 = 2;
pub const EXIT_REQUEST_FAILURE: i32 = 1;
