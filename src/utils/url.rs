//! Joining the configured backend origin with the chat endpoint path.

/// Strip trailing slashes from a base URL.
///
/// # Examples
///
/// ```
/// use palaver::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://chat.example.org"), "https://chat.example.org");
/// assert_eq!(normalize_base_url("https://chat.example.org//"), "https://chat.example.org");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join `base_url` and `endpoint` with exactly one slash between them.
///
/// # Examples
///
/// ```
/// use palaver::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://chat.example.org/", "/api/chat/stream"),
///     "https://chat.example.org/api/chat/stream"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}
