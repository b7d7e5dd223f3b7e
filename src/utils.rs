//! Small shared helpers.

use chrono::Utc;

/// Current time as whole seconds since the Unix epoch.
///
/// All scheduling state in the database (last_check, time_added, ...) is
/// stored in this format.
pub fn unix_time() -> i64 {
    Utc::now().timestamp()
}

/// Normalize a URL so it can serve as a stable lookup key in the queue
/// and known-URL tables.
///
/// Parses and re-serializes the URL (lowercased scheme/host, resolved
/// default ports) and drops the fragment. Unparseable input is returned
/// trimmed but otherwise untouched, since the downloader may still accept
/// schemes the `url` crate rejects.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}
