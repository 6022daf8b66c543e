//! Formats binary-safe keys and values for log output.

use itertools::Itertools as _;

/// Formats raw bytes as an escaped ASCII string, for tracing fields where a
/// key or member may contain arbitrary binary.
pub fn bytes(bytes: &[u8]) -> String {
    let escaped = bytes
        .iter()
        .copied()
        .flat_map(std::ascii::escape_default)
        .collect_vec();
    format!("\"{}\"", String::from_utf8_lossy(&escaped))
}
