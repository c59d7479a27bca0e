const SENSITIVE_PARAMS: [&str; 4] = ["signature", "session", "data", "token"];

/// Replaces the values of credential-bearing query/fragment params with `***`
/// so deep links can be logged.
pub fn mask_uri_params(uri: &str) -> String {
    let mut masked = uri.to_string();

    for param in SENSITIVE_PARAMS {
        let needle = format!("{param}=");
        let mut search_from = 0;

        while let Some(found) = masked[search_from..].find(&needle) {
            let start = search_from + found;
            let at_boundary =
                start == 0 || matches!(masked.as_bytes()[start - 1], b'?' | b'&' | b'#');
            let value_start = start + needle.len();

            if !at_boundary {
                search_from = value_start;
                continue;
            }

            let value_end = masked[value_start..]
                .find(['&', '#'])
                .map_or(masked.len(), |end| value_start + end);
            masked.replace_range(value_start..value_end, "***");
            search_from = value_start + 3;
        }
    }

    masked
}
