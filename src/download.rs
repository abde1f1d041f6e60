use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::error::{AppError, Result};

const USER_AGENT: &str = "lightnode-launcher";

/// A fully buffered HTTP response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    pub fn is_json(&self) -> bool {
        self.content_type.contains("json")
    }

    pub fn is_octet_stream(&self) -> bool {
        self.content_type.contains("octet-stream")
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// GET `url` and buffer the body. Non-2xx statuses are network errors.
pub async fn fetch(client: &Client, url: &str, timeout: Duration) -> Result<FetchedBody> {
    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    Ok(FetchedBody {
        content_type,
        bytes: bytes.to_vec(),
    })
}

/// Stream `url` into `dest`, creating parent directories.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let mut file = fs::File::create(dest).map_err(|e| AppError::io(e.to_string()))?;
    let mut written = 0u64;

    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::network(e.to_string()))?;
        file.write_all(&chunk)
            .map_err(|e| AppError::io(e.to_string()))?;
        written += chunk.len() as u64;
    }

    Ok(written)
}

/// Extract script or config text from a response that may wrap it in JSON,
/// quote it, or escape its newlines.
pub fn normalize_text_response(body: &FetchedBody) -> String {
    let raw = String::from_utf8_lossy(&body.bytes);

    let mut text = None;
    if body.is_json() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
            text = match value {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(map) => ["content", "script", "data", "genesis", "config"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(|v| v.as_str()).map(str::to_string)),
                _ => None,
            };
        }
    }

    let text = text.unwrap_or_else(|| {
        let stripped = raw.trim();
        let quoted = stripped.len() >= 2
            && ((stripped.starts_with('"') && stripped.ends_with('"'))
                || (stripped.starts_with('\'') && stripped.ends_with('\'')));
        if quoted {
            serde_json::from_str::<String>(stripped).unwrap_or_else(|_| raw.to_string())
        } else if raw.contains("\\n") && !raw.contains('\n') {
            unescape(&raw).unwrap_or_else(|| raw.to_string())
        } else {
            raw.to_string()
        }
    });

    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn unescape(raw: &str) -> Option<String> {
    let escaped_quotes = raw.replace('"', "\\\"");
    serde_json::from_str::<String>(&format!("\"{escaped_quotes}\"")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(content_type: &str, text: &str) -> FetchedBody {
        FetchedBody {
            content_type: content_type.to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn json_string_and_known_keys_are_unwrapped() {
        assert_eq!(
            normalize_text_response(&body("application/json", "\"#!/bin/bash\\necho hi\"")),
            "#!/bin/bash\necho hi"
        );
        assert_eq!(
            normalize_text_response(&body(
                "application/json",
                r#"{"genesis": "[chain]\r\nsm_crypto=false"}"#
            )),
            "[chain]\nsm_crypto=false"
        );
    }

    #[test]
    fn escaped_newlines_in_plain_text_are_unescaped() {
        assert_eq!(
            normalize_text_response(&body("text/plain", "line1\\nline2 \"quoted\"")),
            "line1\nline2 \"quoted\""
        );
    }

    #[test]
    fn plain_text_passes_through_with_lf_endings() {
        assert_eq!(
            normalize_text_response(&body("text/plain", "a\r\nb\rc\n")),
            "a\nb\nc\n"
        );
    }
}
