//! # Utility Functions
//!
//! Small helpers shared by the `pmq` tool and the integration tests:
//! unique queue names, payload display, byte formatting and a check for
//! whether the host exposes the message queue filesystem at all.

use rand::Rng;
use std::path::Path;
use uuid::Uuid;

/// Where Linux mounts the message queue filesystem.
pub const MQUEUE_MOUNT: &str = "/dev/mqueue";

/// A queue name that will not collide with other runs, e.g.
/// `/pmq_test_1b4e28ba2fa1`.
pub fn unique_queue_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("/{}_{}", prefix, &id[..12])
}

/// Random printable ASCII byte (`!` through `~`).
pub fn random_printable_byte<R: Rng>(rng: &mut R) -> u8 {
    rng.gen_range(33u8..=126)
}

/// Render a payload for terminal output, replacing invalid UTF-8.
pub fn display_payload(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Format a byte count with binary units.
///
/// ```rust
/// # use pmq_notify::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(8192), "8.00 KB");
/// ```
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// True when the message queue filesystem is mounted and the current user
/// can create entries in it.
pub fn mqueue_available() -> bool {
    use std::os::unix::fs::PermissionsExt;

    let dir = Path::new(MQUEUE_MOUNT);
    match std::fs::metadata(dir) {
        Ok(md) if md.is_dir() => {
            let mode = md.permissions().mode();
            // Need write and search on the directory to create and unlink.
            (mode & 0o200) != 0 && (mode & 0o100) != 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_queue_name() {
        let a = unique_queue_name("pmq_test");
        let b = unique_queue_name("pmq_test");
        assert_ne!(a, b);
        assert!(a.starts_with("/pmq_test_"));
        assert!(crate::config::validate_queue_name(&a).is_ok());
    }

    #[test]
    fn test_random_printable_byte() {
        let mut rng = rand::thread_rng();
        for _ in 0..256 {
            let b = random_printable_byte(&mut rng);
            assert!(b.is_ascii_graphic());
        }
    }

    #[test]
    fn test_display_payload() {
        assert_eq!(display_payload(b"hi"), "hi");
        assert_eq!(display_payload(&[0x68, 0xff]), "h\u{fffd}");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1572864), "1.50 MB");
    }
}
