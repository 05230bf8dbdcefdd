//! Fully qualified symbol list helpers.

/// Longest shared package prefix (ending in `.`) of `symbols`.
///
/// Only package segments count: the last segment of each symbol is its own
/// name and is never part of the prefix.
pub fn common_package_prefix(symbols: &[String]) -> String {
    let split: Vec<Vec<&str>> = symbols.iter().map(|s| s.split('.').collect()).collect();
    let Some(first) = split.first() else {
        return String::new();
    };

    let mut shared = 0;
    for (i, segment) in first.iter().enumerate().take(first.len().saturating_sub(1)) {
        let all_match = split
            .iter()
            .all(|parts| i + 1 < parts.len() && parts[i] == *segment);
        if !all_match {
            break;
        }
        shared = i + 1;
    }

    if shared == 0 {
        String::new()
    } else {
        format!("{}.", first[..shared].join("."))
    }
}

/// Render `symbols` under `label`, factoring out their shared package prefix.
pub fn compress_symbols(label: &str, symbols: &[String]) -> String {
    if symbols.is_empty() {
        return format!("{label}: None found");
    }
    let prefix = common_package_prefix(symbols);
    if prefix.is_empty() {
        return format!("{label}: {}", symbols.join(", "));
    }
    let short: Vec<&str> = symbols
        .iter()
        .map(|s| s.strip_prefix(prefix.as_str()).unwrap_or(s))
        .collect();
    format!(
        "{label}: [Common package prefix: '{prefix}'. IMPORTANT: you MUST use full symbol names including this prefix for subsequent tool calls] {}",
        short.join(", ")
    )
}

/// Drop `Outer$Inner` names whose `Outer` is also listed.
pub fn coalesce_inner_classes(names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| {
            !names
                .iter()
                .any(|outer| name.starts_with(&format!("{outer}$")))
        })
        .cloned()
        .collect()
}
