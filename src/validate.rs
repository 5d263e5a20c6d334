//! C2: input validators. Each predicate rejects malformed identifiers
//! before they reach any privileged operation. Rejection is reported to the
//! peer with a generic message; the specific predicate is logged, never
//! transmitted.

use crate::consts::MAX_SESSION_ID_LEN;

pub fn valid_session_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_SESSION_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn valid_locale(s: &str) -> bool {
    s.len() <= 64
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'@' | b'-'))
}

pub fn valid_term(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    Production,
    Development,
}

pub fn valid_env_mode(s: &str) -> Option<EnvMode> {
    match s {
        "" | "production" => Some(EnvMode::Production),
        "development" => Some(EnvMode::Development),
        _ => None,
    }
}

/// Used only when an external socket path is consumed rather than
/// generated by the runtime-dir manager.
pub fn valid_socket_path_for_uid(path: &str, uid: u32) -> bool {
    let expected_prefix = format!("/run/linuxio/{uid}/");
    path.starts_with('/')
        && path.ends_with(".sock")
        && path.starts_with(&expected_prefix)
        && !path.contains("..")
        && !path.contains("//")
        && !path[expected_prefix.len()..path.len() - ".sock".len()].contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_boundary_64_dashes_accepted() {
        let s = "-".repeat(64);
        assert!(valid_session_id(&s));
    }

    #[test]
    fn session_id_length_65_rejected() {
        let s = "-".repeat(65);
        assert!(!valid_session_id(&s));
    }

    #[test]
    fn session_id_empty_rejected() {
        assert!(!valid_session_id(""));
    }

    #[test]
    fn session_id_with_slash_rejected() {
        assert!(!valid_session_id("abc/def"));
    }

    #[test]
    fn locale_accepts_common_forms() {
        assert!(valid_locale("en_US.UTF-8"));
        assert!(valid_locale("C"));
    }

    #[test]
    fn term_rejects_control_chars() {
        assert!(valid_term("xterm-256color"));
        assert!(!valid_term("xterm\n256color"));
    }

    #[test]
    fn env_mode_defaults_and_rejects_garbage() {
        assert_eq!(valid_env_mode(""), Some(EnvMode::Production));
        assert_eq!(valid_env_mode("production"), Some(EnvMode::Production));
        assert_eq!(valid_env_mode("development"), Some(EnvMode::Development));
        assert_eq!(valid_env_mode("staging"), None);
    }

    #[test]
    fn socket_path_must_be_under_uid_dir() {
        assert!(valid_socket_path_for_uid("/run/linuxio/1000/s.sock", 1000));
        assert!(!valid_socket_path_for_uid("/run/linuxio/999/s.sock", 1000));
        assert!(!valid_socket_path_for_uid("/run/linuxio/1000/../1000/s.sock", 1000));
        assert!(!valid_socket_path_for_uid("/run/linuxio/1000/a/s.sock", 1000));
        assert!(!valid_socket_path_for_uid("relative/s.sock", 1000));
        assert!(!valid_socket_path_for_uid("/run/linuxio/1000/s.txt", 1000));
    }
}
