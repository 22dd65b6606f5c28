//! Decoder for `multipart/form-data` request bodies.

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;

/// Boundary assumed when the request does not declare one.
pub const DEFAULT_BOUNDARY: &str = "---------------------------14737809831466499882746641449";

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

lazy_static! {
    static ref FIELD_NAME: Regex = Regex::new(r#"(?i)\bname="([^"]*)""#).unwrap();
    static ref FILE_NAME: Regex = Regex::new(r#"(?i)\bfilename="([^"]*)""#).unwrap();
    static ref CONTENT_TYPE: Regex = Regex::new(r"(?im)^content-type:[ \t]*([^\r\n]+)").unwrap();
    static ref BOUNDARY_PARAM: Regex =
        Regex::new(r#"(?i)\bboundary=(?:"([^"]+)"|([^;\s]+))"#).unwrap();
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl MultipartPart {
    /// The part's bytes as UTF-8 text.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Extract the `boundary` parameter from a `Content-Type` value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let caps = BOUNDARY_PARAM.captures(content_type)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Split `body` into parts delimited by `boundary`.
///
/// Returns `None` when the body holds no opening boundary or a part is
/// missing its header separator.
pub fn decode(body: &[u8], boundary: &str) -> Option<Vec<MultipartPart>> {
    let delimiter = format!("\r\n--{boundary}\r\n").into_bytes();
    let closing = format!("\r\n--{boundary}--\r\n").into_bytes();

    // A body may open with the delimiter minus its leading CRLF.
    let mut part_start = if body.starts_with(&delimiter[2..]) {
        delimiter.len() - 2
    } else {
        find(body, &delimiter, 0)? + delimiter.len()
    };

    let mut parts = Vec::new();
    loop {
        let (part_end, is_last) = match find(body, &delimiter, part_start) {
            Some(pos) => (pos, false),
            None => match find(body, &closing, part_start) {
                Some(pos) => (pos, true),
                None => break,
            },
        };

        let separator = find(&body[..part_end], HEADER_SEPARATOR, part_start)?;
        let headers = String::from_utf8_lossy(&body[part_start..separator]);
        let data = Bytes::copy_from_slice(&body[separator + HEADER_SEPARATOR.len()..part_end]);
        parts.push(parse_part(&headers, data));

        if is_last {
            break;
        }
        part_start = part_end + delimiter.len();
    }

    Some(parts)
}

fn parse_part(headers: &str, data: Bytes) -> MultipartPart {
    let capture = |re: &Regex| {
        re.captures(headers)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    };

    MultipartPart {
        field_name: capture(&FIELD_NAME).unwrap_or_default(),
        file_name: capture(&FILE_NAME),
        content_type: capture(&CONTENT_TYPE),
        data,
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
