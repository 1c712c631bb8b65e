//! Platform resource limits
//!
//! Memory and timeout values are never rejected. Out-of-range values are
//! clamped to the nearest value the platform accepts and a warning is logged.

use tracing::warn;

/// Largest memory size a function may request
pub const MAX_MEMORY_MB: u32 = 3008;

/// Smallest memory size a function may request
pub const MIN_MEMORY_MB: u32 = 128;

/// Memory sizes must be a multiple of this increment
pub const MEMORY_INCREMENT_MB: u32 = 64;

/// Hard ceiling on function execution time
pub const MAX_TIMEOUT_SECS: u32 = 900;

pub const DEFAULT_MEMORY_MB: u32 = 256;
pub const DEFAULT_TIMEOUT_SECS: u32 = 900;

/// Memory used by the transient metadata probe
pub const PROBE_MEMORY_MB: u32 = 192;

/// Maximum number of layers attached to one function
pub const MAX_LAYERS: usize = 5;

/// Effective memory for a requested size: capped at [`MAX_MEMORY_MB`],
/// raised to [`MIN_MEMORY_MB`], then rounded up to the next increment.
pub fn clamp_memory(requested_mb: u32) -> u32 {
    let bounded = requested_mb.clamp(MIN_MEMORY_MB, MAX_MEMORY_MB);
    let effective = bounded.div_ceil(MEMORY_INCREMENT_MB) * MEMORY_INCREMENT_MB;

    if effective != requested_mb {
        warn!(
            requested_mb,
            effective_mb = effective,
            "Memory size adjusted to platform limits"
        );
    }
    effective
}

pub fn clamp_timeout(requested_secs: u32) -> u32 {
    if requested_secs > MAX_TIMEOUT_SECS {
        warn!(
            requested_secs,
            effective_secs = MAX_TIMEOUT_SECS,
            "Timeout capped at platform ceiling"
        );
        return MAX_TIMEOUT_SECS;
    }
    if requested_secs == 0 {
        warn!("Timeout of 0s raised to 1s");
        return 1;
    }
    requested_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_rounds_up_to_increment() {
        assert_eq!(clamp_memory(100), 128);
        assert_eq!(clamp_memory(129), 192);
        assert_eq!(clamp_memory(512), 512);
        assert_eq!(clamp_memory(1000), 1024);
    }

    #[test]
    fn test_memory_capped_at_maximum() {
        assert_eq!(clamp_memory(4000), 3008);
        assert_eq!(clamp_memory(3008), 3008);
        assert_eq!(clamp_memory(3000), 3008);
        assert_eq!(clamp_memory(u32::MAX), 3008);
    }

    #[test]
    fn test_memory_raised_to_minimum() {
        assert_eq!(clamp_memory(0), 128);
        assert_eq!(clamp_memory(64), 128);
    }

    #[test]
    fn test_memory_always_valid() {
        for requested in (0..5000).step_by(7) {
            let effective = clamp_memory(requested);
            assert_eq!(effective % MEMORY_INCREMENT_MB, 0);
            assert!((MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&effective));
        }
    }

    #[test]
    fn test_timeout_capped() {
        assert_eq!(clamp_timeout(1200), 900);
        assert_eq!(clamp_timeout(900), 900);
        assert_eq!(clamp_timeout(60), 60);
        assert_eq!(clamp_timeout(0), 1);
    }

    #[test]
    fn test_probe_memory_is_valid() {
        assert_eq!(clamp_memory(PROBE_MEMORY_MB), PROBE_MEMORY_MB);
    }
}
