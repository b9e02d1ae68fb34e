//! Small byte-scanning helpers shared by the decoders and the multipart
//! reader, plus the payload based content-type sniffer used when a handler
//! does not set `Content-Type` itself.

/// Returns the offset of the first CRLF in `buf`, if any.
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

/// Returns the offset of the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

const HTML_SIGNATURES: [&[u8]; 6] = [b"<!doctype html", b"<html", b"<head", b"<body", b"<script", b"<!--"];

/// Guesses a Content-Type from the first payload bytes a handler writes.
///
/// This is a deliberately small subset of full MIME sniffing: a few magic
/// numbers, an HTML tag scan, and a UTF-8 validity check as the text
/// fallback.
pub(crate) fn detect_content_type(data: &[u8]) -> &'static str {
    let trimmed = trim_leading_whitespace(data);

    if trimmed.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if trimmed.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if trimmed.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg";
    }
    if trimmed.starts_with(b"GIF87a") || trimmed.starts_with(b"GIF89a") {
        return "image/gif";
    }

    if HTML_SIGNATURES.iter().any(|signature| starts_with_ignore_ascii_case(trimmed, signature)) {
        return "text/html; charset=utf-8";
    }

    if std::str::from_utf8(data).is_ok() {
        return "text/plain; charset=utf-8";
    }

    "application/octet-stream"
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
    &data[start..]
}

fn starts_with_ignore_ascii_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_scan() {
        assert_eq!(find_crlf(b"abc\r\ndef"), Some(3));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"abc\rdef\n"), None);
        assert_eq!(find_crlf(b""), None);
    }

    #[test]
    fn subslice_scan() {
        assert_eq!(find_subslice(b"aaa\r\n--b", b"\r\n--b"), Some(3));
        assert_eq!(find_subslice(b"aaa", b"\r\n--b"), None);
        assert_eq!(find_subslice(b"ab", b"abc"), None);
    }

    #[test]
    fn sniffs_common_payloads() {
        assert_eq!(detect_content_type(b"  <!DOCTYPE HTML><html>"), "text/html; charset=utf-8");
        assert_eq!(detect_content_type(b"<html><body>hi</body></html>"), "text/html; charset=utf-8");
        assert_eq!(detect_content_type(b"plain words"), "text/plain; charset=utf-8");
        assert_eq!(detect_content_type(b"%PDF-1.7 stuff"), "application/pdf");
        assert_eq!(detect_content_type(&[0xff, 0xd8, 0xff, 0x00]), "image/jpeg");
        assert_eq!(detect_content_type(&[0x00, 0xff, 0xfe]), "application/octet-stream");
    }
}
