const METHODS: &[&str] = &["GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS", "PATCH"];

/// Absolute URL of the HTTP request starting in `payload`, if any.
///
/// Only the first segment of a request is inspected; the request line and
/// the `Host` header must both be in it unless the target is absolute-form.
pub fn request_url(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok().or_else(|| {
        // A body may be cut mid-character; the head is what matters.
        let head_end = find_head_end(payload)?;
        std::str::from_utf8(&payload[..head_end]).ok()
    })?;

    let mut lines = text.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?;
    let target = request_line.next()?;
    let version = request_line.next()?;

    if !METHODS.contains(&method) || !version.starts_with("HTTP/1.") {
        return None;
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        return Some(target.to_string());
    }
    if !target.starts_with('/') {
        return None;
    }

    let host = lines
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
        })?;

    Some(format!("http://{}{}", host, target))
}

fn find_head_end(payload: &[u8]) -> Option<usize> {
    payload.windows(4).position(|w| w == b"\r\n\r\n")
}
