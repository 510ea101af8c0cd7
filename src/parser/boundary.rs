/// Extract the multipart boundary token from a Content-Type header value.
///
/// `multipart/x-mixed-replace; boundary="--frame"` yields `--frame`. The token is
/// returned exactly as announced; the parser prepends the `--` delimiter prefix.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Whether a Content-Type header describes a multipart replace stream
pub fn is_multipart_replace(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("multipart/x-mixed-replace"))
        .unwrap_or(false)
}
