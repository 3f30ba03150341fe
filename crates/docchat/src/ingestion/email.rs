//! RFC 822 / MIME email text extraction

use base64::Engine;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;

use crate::error::{Error, Result};

/// Headers carried into the extracted text, in output order
const KEPT_HEADERS: &[(&str, &str)] = &[
    ("subject", "Subject"),
    ("from", "From"),
    ("to", "To"),
    ("cc", "Cc"),
    ("date", "Date"),
];

/// Maximum multipart nesting followed before giving up on a branch
const MAX_MIME_DEPTH: usize = 8;

static ENCODED_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\?([^?]+)\?([BbQq])\?([^?]*)\?=").expect("valid regex"));
static ADJACENT_ENCODED_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?=\s+=\?").expect("valid regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

type Headers = Vec<(String, String)>;

/// Extract headers and the readable body of an `.eml` file as plain text
pub fn extract_email_text(path: &Path, data: &[u8]) -> Result<String> {
    let raw = String::from_utf8_lossy(data).replace("\r\n", "\n");
    let (headers, body) = split_message(&raw);

    let header_lines: Vec<String> = KEPT_HEADERS
        .iter()
        .filter_map(|(key, label)| {
            header_value(&headers, key).map(|v| format!("{}: {}", label, decode_encoded_words(v)))
        })
        .collect();

    if header_lines.is_empty() {
        return Err(Error::extraction(path, "no message headers found"));
    }

    let (plain, html) = extract_body(&headers, body, 0);
    let body_text = plain
        .or_else(|| html.map(|h| html_to_text(&h)))
        .unwrap_or_default();

    let mut text = header_lines.join("\n");
    let body_text = body_text.trim();
    if !body_text.is_empty() {
        text.push_str("\n\n");
        text.push_str(body_text);
    }

    Ok(text)
}

/// Split a message (or MIME part) into unfolded headers and body
fn split_message(raw: &str) -> (Headers, &str) {
    let (head, body) = match raw.find("\n\n") {
        Some(pos) => (&raw[..pos], &raw[pos + 2..]),
        None => (raw, ""),
    };

    let mut headers: Headers = Vec::new();
    for line in head.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // folded continuation of the previous header
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    (headers, body)
}

fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}

/// Media type (lowercased) and parameters of a Content-Type header
fn content_type(headers: &Headers) -> (String, Vec<(String, String)>) {
    let Some(raw) = header_value(headers, "content-type") else {
        return ("text/plain".to_string(), Vec::new());
    };

    let mut segments = raw.split(';');
    let mime = segments.next().unwrap_or("").trim().to_lowercase();
    let params = segments
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().trim_matches('"').to_string()))
        .collect();

    (mime, params)
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// First text/plain and first text/html bodies found, depth first
fn extract_body(headers: &Headers, body: &str, depth: usize) -> (Option<String>, Option<String>) {
    let (mime, params) = content_type(headers);

    if mime.starts_with("multipart/") {
        let Some(boundary) = param(&params, "boundary") else {
            return (None, None);
        };
        if depth >= MAX_MIME_DEPTH {
            return (None, None);
        }

        let mut plain = None;
        let mut html = None;
        for part in split_multipart(body, boundary) {
            let (part_headers, part_body) = split_message(part);
            let (p, h) = extract_body(&part_headers, part_body, depth + 1);
            plain = plain.or(p);
            html = html.or(h);
            if plain.is_some() {
                break;
            }
        }
        return (plain, html);
    }

    let disposition = header_value(headers, "content-disposition").unwrap_or("");
    if disposition.to_lowercase().starts_with("attachment") {
        return (None, None);
    }

    let charset = param(&params, "charset").unwrap_or("utf-8");
    let encoding = header_value(headers, "content-transfer-encoding").unwrap_or("7bit");
    let decode = || decode_transfer(body, encoding, charset);

    match mime.as_str() {
        "text/plain" => (Some(decode()), None),
        "text/html" => (None, Some(decode())),
        _ => (None, None),
    }
}

/// Parts between `--boundary` delimiter lines, excluding preamble and epilogue
fn split_multipart<'a>(body: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();
    let mut sections = body.split(delimiter.as_str());
    sections.next(); // preamble

    for section in sections {
        if section.starts_with("--") {
            break; // closing delimiter
        }
        parts.push(section.strip_prefix('\n').unwrap_or(section));
    }

    parts
}

fn decode_transfer(body: &str, encoding: &str, charset: &str) -> String {
    let bytes = match encoding.trim().to_lowercase().as_str() {
        "base64" => {
            let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            match base64::engine::general_purpose::STANDARD.decode(compact) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("Invalid base64 email part: {}", e);
                    return String::new();
                }
            }
        }
        "quoted-printable" => decode_quoted_printable(body, false),
        _ => body.as_bytes().to_vec(),
    };

    decode_charset(&bytes, charset)
}

/// Decode quoted-printable; `underscore_space` enables the RFC 2047 "Q" variant
fn decode_quoted_printable(input: &str, underscore_space: bool) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'=' if bytes.get(i + 1) == Some(&b'\n') => i += 2, // soft line break
            b'=' => match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                    out.push(hex_value(hi) << 4 | hex_value(lo));
                    i += 3;
                }
                _ => {
                    out.push(b'=');
                    i += 1;
                }
            },
            b'_' if underscore_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn decode_charset(bytes: &[u8], charset: &str) -> String {
    match charset.to_lowercase().as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "windows-1252" | "us-ascii" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decode RFC 2047 encoded words such as `=?UTF-8?B?T2zDoQ==?=`
fn decode_encoded_words(value: &str) -> String {
    let joined = ADJACENT_ENCODED_WORDS.replace_all(value, "?==?");
    ENCODED_WORD
        .replace_all(&joined, |caps: &Captures| {
            let charset = &caps[1];
            let payload = &caps[3];
            let bytes = if caps[2].eq_ignore_ascii_case("b") {
                match base64::engine::general_purpose::STANDARD.decode(payload) {
                    Ok(bytes) => bytes,
                    Err(_) => return caps[0].to_string(),
                }
            } else {
                decode_quoted_printable(payload, true)
            };
            decode_charset(&bytes, charset)
        })
        .into_owned()
}

fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let text = document
        .root_element()
        .text()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    WHITESPACE_RUN.replace_all(&text, " ").into_owned()
}
