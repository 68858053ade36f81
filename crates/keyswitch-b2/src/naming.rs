//! Object key and profile naming

/// Object name used when the caller supplies a blank key
const FALLBACK_OBJECT_KEY: &str = "snapshot.json";

const DEFAULT_PROFILE: &str = "default";

/// Restrict an object key to ASCII letters, digits, `_`, `.` and `-`.
/// Every other character becomes `_`.
pub fn sanitize_object_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return FALLBACK_OBJECT_KEY.to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Normalize a free-text profile label, using `fallback` when `input` is blank.
///
/// Lowercases, keeps letters, digits, `-` and `_`, maps everything else to `-`,
/// and trims `-` from both ends. An empty result becomes `"default"`.
pub fn normalize_profile(input: &str, fallback: &str) -> String {
    let mut candidate = input.trim();
    if candidate.is_empty() {
        candidate = fallback.trim();
    }
    if candidate.is_empty() {
        candidate = DEFAULT_PROFILE;
    }

    let mapped: String = candidate
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        DEFAULT_PROFILE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Remote object holding a profile's snapshot
pub fn object_name(profile: &str) -> String {
    format!("{}.json", profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_object_key() {
        assert_eq!(sanitize_object_key("laptop.json"), "laptop.json");
        assert_eq!(sanitize_object_key(" my profile/1.json "), "my_profile_1.json");
        assert_eq!(sanitize_object_key("ключ.json"), "____.json");
        assert_eq!(sanitize_object_key("   "), FALLBACK_OBJECT_KEY);
    }

    #[test]
    fn test_normalize_profile() {
        assert_eq!(normalize_profile("Work Laptop", "x"), "work-laptop");
        assert_eq!(normalize_profile("  ", "Office_PC"), "office_pc");
        assert_eq!(normalize_profile("--ci/runner--", ""), "ci-runner");
        assert_eq!(normalize_profile("", ""), "default");
        assert_eq!(normalize_profile("!!!", ""), "default");
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name("laptop"), "laptop.json");
    }
}
