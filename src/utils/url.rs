//! Endpoint URL helpers for the conversation backend.

/// Strips trailing slashes from a backend base URL.
///
/// # Examples
///
/// ```
/// use forkchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://chat.example.com"), "https://chat.example.com");
/// assert_eq!(normalize_base_url("https://chat.example.com///"), "https://chat.example.com");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path with exactly one slash.
///
/// # Examples
///
/// ```
/// use forkchat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://chat.example.com/", "/api/updateMessage"),
///     "https://chat.example.com/api/updateMessage"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{normalized_base}/{endpoint}")
}
