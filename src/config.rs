//! A.4: configuration. The broker takes no config file — per its
//! Non-goals it is not a long-running daemon with mutable state — so the
//! only inputs are the three environment variables named in the external
//! interfaces, each clamped to its documented range rather than treated as
//! fatal when out of bounds.

use std::time::Duration;

use crate::consts::*;

#[derive(Debug, Clone)]
pub struct Config {
    pub rlimit_nproc: u64,
    pub sudo_timeout: Duration,
    pub bridge_start_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            rlimit_nproc: clamped_u64(
                "LINUXIO_RLIMIT_NPROC",
                DEFAULT_RLIMIT_NPROC,
                MIN_RLIMIT_NPROC,
                MAX_RLIMIT_NPROC,
            ),
            sudo_timeout: Duration::from_secs(clamped_u64(
                "LINUXIO_SUDO_TIMEOUT_PASSWORD",
                DEFAULT_SUDO_TIMEOUT_SECS,
                MIN_SUDO_TIMEOUT_SECS,
                MAX_SUDO_TIMEOUT_SECS,
            )),
            bridge_start_timeout: Duration::from_millis(clamped_u64(
                "LINUXIO_BRIDGE_START_TIMEOUT_MS",
                DEFAULT_BRIDGE_START_TIMEOUT_MS,
                MIN_BRIDGE_START_TIMEOUT_MS,
                MAX_BRIDGE_START_TIMEOUT_MS,
            )),
        }
    }
}

fn clamped_u64(var: &str, default: u64, min: u64, max: u64) -> u64 {
    let Ok(raw) = std::env::var(var) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(v) if v < min => {
            tracing::warn!(var, value = v, min, "below range, clamping");
            min
        }
        Ok(v) if v > max => {
            tracing::warn!(var, value = v, max, "above range, clamping");
            max
        }
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(var, raw, "unparseable, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_below_range() {
        std::env::set_var("LINUXIO_RLIMIT_NPROC_TEST_LOW", "1");
        assert_eq!(clamped_u64("LINUXIO_RLIMIT_NPROC_TEST_LOW", 1024, 10, 4096), 10);
        std::env::remove_var("LINUXIO_RLIMIT_NPROC_TEST_LOW");
    }

    #[test]
    fn clamps_above_range() {
        std::env::set_var("LINUXIO_RLIMIT_NPROC_TEST_HIGH", "99999");
        assert_eq!(clamped_u64("LINUXIO_RLIMIT_NPROC_TEST_HIGH", 1024, 10, 4096), 4096);
        std::env::remove_var("LINUXIO_RLIMIT_NPROC_TEST_HIGH");
    }

    #[test]
    fn missing_uses_default() {
        assert_eq!(clamped_u64("LINUXIO_DEFINITELY_UNSET_VAR", 1024, 10, 4096), 1024);
    }
}
