//! Release version comparison.
//!
//! Release tags arrive in several shapes: `v2.6.3`, `2.6.3`,
//! `v2.6.3-2-g1052452-dirty`, `2.6.3+build5`. Normalization reduces all of
//! them to the plain `major.minor.patch` core before the numeric comparison.

use core::cmp::Ordering;

use heapless::String;

/// Longest version string the engine keeps.
pub const VERSION_MAX_LEN: usize = 32;

/// Strip a leading `v`/`V` and cut the tag at the first `-` or `+`.
///
/// Output is bounded to [`VERSION_MAX_LEN`] bytes; anything longer is cut.
pub fn normalize_version(raw: &str) -> String<VERSION_MAX_LEN> {
    let trimmed = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    let core = match trimmed.find(['-', '+']) {
        Some(pos) => &trimmed[..pos],
        None => trimmed,
    };

    let mut out = String::new();
    for ch in core.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Compare two raw version strings numerically.
///
/// Both sides are normalized first, then read as up to three dot-separated
/// numeric components. Missing components count as zero, so `2.6` and
/// `2.6.0` are equal.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = parse_components(&normalize_version(a));
    let right = parse_components(&normalize_version(b));
    left.cmp(&right)
}

fn parse_components(version: &str) -> [u32; 3] {
    let mut components = [0u32; 3];
    for (slot, part) in components.iter_mut().zip(version.split('.')) {
        *slot = parse_leading_number(part);
    }
    components
}

/// Read the leading decimal digits of a component, tolerating trailing
/// garbage the way the release tooling always has (`"3rc1"` reads as 3).
fn parse_leading_number(part: &str) -> u32 {
    let digits: usize = part
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    part[..digits].parse().unwrap_or(0)
}
