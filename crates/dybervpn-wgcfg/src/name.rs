//! Tunnel name validation

/// Longest accepted tunnel name
pub const MAX_TUNNEL_NAME_LEN: usize = 32;

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(name) || r.eq_ignore_ascii_case(stem))
}

/// True if `name` may be used as a tunnel (interface) name.
///
/// Names are 1 to 32 characters from `[A-Za-z0-9_=+.-]` and must not be a
/// reserved device name.
pub fn tunnel_name_is_valid(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_TUNNEL_NAME_LEN || is_reserved(name) {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'=' | b'+' | b'.' | b'-'))
}
