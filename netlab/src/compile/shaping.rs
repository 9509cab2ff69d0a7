//! Token bucket parameters of the traffic control rules

use crate::error::CompileError;
use std::path::{Path, PathBuf};

/// The kernel timer frequency assumed when the host configuration cannot be read
pub const DEFAULT_HZ: u32 = 250;

/// The MTU assumed for bindings that do not configure one
pub const DEFAULT_MTU: u16 = 1500;

const OS_RELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// The burst, in kbit, a token bucket needs to shape traffic at `rate_mbit`
///
/// The bucket must hold one tick's worth of tokens at the configured rate, and at least one
/// packet of `mtu` bytes.
pub fn burst_kbit(rate_mbit: f64, hz: u32, mtu: u16) -> u64 {
    let per_tick = rate_mbit * 1000.0 / f64::from(hz.max(1));
    let one_packet = f64::from(mtu) * 8.0 / 1000.0;
    per_tick.max(one_packet).ceil() as u64
}

/// Same as [`burst_kbit`], for a rate already expressed in kbit/s
pub fn burst_kbit_for_kbit_rate(rate_kbit: u32, hz: u32, mtu: u16) -> u64 {
    let per_tick = u64::from(rate_kbit).div_ceil(u64::from(hz.max(1)));
    let one_packet = (u64::from(mtu) * 8).div_ceil(1000);
    per_tick.max(one_packet)
}

/// The kernel build configuration of the running kernel
pub fn kernel_config_path() -> Result<PathBuf, CompileError> {
    let release =
        std::fs::read_to_string(OS_RELEASE_PATH).map_err(|e| CompileError::HostConfigUnreadable {
            path: OS_RELEASE_PATH.to_string(),
            reason: e.to_string(),
        })?;
    Ok(PathBuf::from(format!("/boot/config-{}", release.trim())))
}

/// Reads `CONFIG_HZ` from a kernel build configuration file
pub fn read_kernel_hz(path: &Path) -> Result<u32, CompileError> {
    let unreadable = |reason: String| CompileError::HostConfigUnreadable {
        path: path.display().to_string(),
        reason,
    };

    let config = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    parse_kernel_hz(&config).map_err(unreadable)
}

fn parse_kernel_hz(config: &str) -> Result<u32, String> {
    let value = config
        .lines()
        .find_map(|line| line.trim().strip_prefix("CONFIG_HZ="))
        .ok_or_else(|| "no `CONFIG_HZ` entry".to_string())?;

    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("invalid `CONFIG_HZ` value `{value}`")),
        Ok(hz) => Ok(hz),
    }
}

/// Determines the kernel timer frequency, falling back to [`DEFAULT_HZ`]
///
/// The configuration of the running kernel is used unless `config` points elsewhere.
pub fn detect_kernel_hz(config: Option<&Path>) -> u32 {
    let hz = match config {
        Some(path) => read_kernel_hz(path),
        None => kernel_config_path().and_then(|path| read_kernel_hz(&path)),
    };

    match hz {
        Ok(hz) => {
            tracing::debug!("detected kernel HZ {hz}");
            hz
        }
        Err(e) => {
            tracing::warn!("{e}, assuming HZ {DEFAULT_HZ}");
            DEFAULT_HZ
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_burst_from_rate() {
        assert_eq!(burst_kbit(12.0, 250, 1500), 48);
        assert_eq!(burst_kbit(3.0, 250, 1500), 12);
        assert_eq!(burst_kbit(100.0, 1000, 1500), 100);
        assert_eq!(burst_kbit(100.0, 250, 9000), 400);
    }

    #[test]
    fn test_burst_mtu_floor() {
        assert_eq!(burst_kbit(0.1, 250, 1500), 12);
        assert_eq!(burst_kbit(0.0, 250, 1500), 12);
        assert_eq!(burst_kbit(0.0, 250, 1400), 12);
        assert_eq!(burst_kbit(0.0, 250, 9000), 72);
    }

    #[test]
    fn test_burst_is_monotonic() {
        let mut last = 0;
        for rate in 0..2000 {
            let burst = burst_kbit(f64::from(rate) / 10.0, 250, 1500);
            assert!(burst >= last);
            last = burst;
        }
    }

    #[test]
    fn test_burst_for_kbit_rate() {
        assert_eq!(burst_kbit_for_kbit_rate(12_000, 250, 1500), 48);
        assert_eq!(burst_kbit_for_kbit_rate(12_001, 250, 1500), 49);
        assert_eq!(burst_kbit_for_kbit_rate(100, 250, 1500), 12);
        assert_eq!(burst_kbit_for_kbit_rate(0, 250, 1500), 12);

        for rate_kbit in [1, 999, 3000, 12_000, 45_678, 1_000_000] {
            assert_eq!(
                burst_kbit_for_kbit_rate(rate_kbit, 250, 1500),
                burst_kbit(f64::from(rate_kbit) / 1000.0, 250, 1500),
                "{rate_kbit}"
            );
        }
    }

    #[test]
    fn test_parse_kernel_hz() {
        let config = "# CONFIG_HZ_100 is not set\nCONFIG_HZ_250=y\nCONFIG_HZ=250\nCONFIG_SCHED_HRTICK=y\n";
        assert_eq!(parse_kernel_hz(config), Ok(250));
        assert_eq!(parse_kernel_hz("CONFIG_HZ=1000"), Ok(1000));
        assert!(parse_kernel_hz("CONFIG_HZ_1000=y").is_err());
        assert!(parse_kernel_hz("CONFIG_HZ=fast").is_err());
        assert!(parse_kernel_hz("CONFIG_HZ=0").is_err());
    }

    #[test]
    fn test_unreadable_config_falls_back() {
        let missing = Path::new("/nonexistent/kernel/config");
        assert!(matches!(
            read_kernel_hz(missing),
            Err(CompileError::HostConfigUnreadable { .. })
        ));
        assert_eq!(detect_kernel_hz(Some(missing)), DEFAULT_HZ);
    }
}
