//! Annotation vocabulary understood by the resource parser
//!
//! kcm reads a small set of `kcm/*` annotations from resource metadata:
//!
//! | Annotation | Effect |
//! |---|---|
//! | `kcm/hooks` | Comma-separated hook lifecycle types |
//! | `kcm/hook-policy` | Opaque policy string preserved on the hook |
//! | `kcm/wait-for` | Condition passed to `kubectl wait --for` |
//! | `kcm/wait-timeout` | Go-style duration (`90s`, `2m30s`) |
//! | `kcm/delete-after-completion` | `"true"` to delete the hook Job once it completed |
//! | `kcm/deletion-policy` | `delete-pvcs` on a StatefulSet |

use std::collections::BTreeMap;
use std::time::Duration;

/// Hook lifecycle types
pub const HOOKS: &str = "kcm/hooks";
/// Opaque hook policy
pub const HOOK_POLICY: &str = "kcm/hook-policy";
/// Condition to wait for after applying a hook
pub const WAIT_FOR: &str = "kcm/wait-for";
/// Timeout for the wait-for condition
pub const WAIT_TIMEOUT: &str = "kcm/wait-timeout";
/// Delete the hook after it completed
pub const DELETE_AFTER_COMPLETION: &str = "kcm/delete-after-completion";
/// Deletion policy for resources
pub const DELETION_POLICY: &str = "kcm/deletion-policy";
/// Deletion policy value deriving PVC deletions from a StatefulSet
pub const DELETE_PVCS: &str = "delete-pvcs";

/// Get a non-empty annotation value
pub fn get<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Split a comma-separated annotation value
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a Go-style duration string
///
/// Accepts a sequence of decimal numbers with units (`ns`, `us`, `µs`, `ms`,
/// `s`, `m`, `h`), e.g. `300ms`, `1.5h`, `2h45m`. A bare `0` is zero.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value == "0" {
        return Some(Duration::ZERO);
    }

    let mut rest = value;
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += number * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).ok()
}

/// Format a duration as whole seconds for kubectl's `--timeout` flag
///
/// Fractions round up so a short timeout never becomes `0s`.
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}s", secs)
}

/// Parse a boolean the way Go's `strconv.ParseBool` does
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
