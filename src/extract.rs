//! Text extraction boundary.
//!
//! Converts a raw upload (bytes + declared content type) into plain text.
//! Plain text, markdown and HTML are handled in-process; binary formats
//! like PDF and DOCX would plug in behind the same function and are
//! reported as unsupported here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("file is not valid UTF-8")]
    InvalidEncoding,
    #[error("no extractable text in file")]
    Empty,
}

/// Strips charset suffixes like "text/html; charset=utf-8" and lowercases.
fn normalize_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Whether an upload with this content type can be extracted at all.
/// Checked at upload time so unsupported files are rejected synchronously
/// instead of failing later in the background.
pub fn is_supported_media_type(content_type: &str) -> bool {
    matches!(
        normalize_media_type(content_type).as_str(),
        "text/plain" | "text/markdown" | "text/html"
    )
}

/// Extracts plain text from an uploaded file.
pub fn extract(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    let media_type = normalize_media_type(content_type);

    let text = match media_type.as_str() {
        "text/plain" | "text/markdown" => decode_utf8(bytes)?,
        "text/html" => strip_html_tags(&decode_utf8(bytes)?),
        other => return Err(ExtractError::Unsupported(other.to_string())),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }

    Ok(text)
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidEncoding)
}

/// Removes tags and script/style bodies, keeping visible text one line per
/// source line.
fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut skip_until: Option<&'static str> = None;

    let lower = html.to_ascii_lowercase();
    let mut i = 0;
    let chars: Vec<char> = html.chars().collect();
    let chars_lower: Vec<char> = lower.chars().collect();

    while i < chars.len() {
        if let Some(closing) = skip_until {
            let remaining: String = chars_lower[i..chars.len().min(i + closing.len())]
                .iter()
                .collect();
            if remaining == closing {
                skip_until = None;
                i += closing.len();
            } else {
                i += 1;
            }
            continue;
        }

        let ahead: String = chars_lower[i..chars.len().min(i + 7)].iter().collect();
        if ahead.starts_with("<script") {
            skip_until = Some("</script>");
            i += 7;
            continue;
        }
        if ahead.starts_with("<style") {
            skip_until = Some("</style>");
            i += 6;
            continue;
        }

        let c = chars[i];
        if c == '<' {
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
        } else if !in_tag {
            result.push(c);
        }
        i += 1;
    }

    result
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
