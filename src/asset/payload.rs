use serde_json::Value;

use crate::download::FetchedBody;
use crate::error::{AppError, Result};

const NODES_FORMAT_ERROR: &str = "节点列表格式错误：期望为 List[str] 或 {\"nodes\": List[str]}";

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Accept `["ip:port", ...]` or `{"nodes": [...]}`, either directly or wrapped
/// in a JSON string.
pub fn parse_nodes_list(body: &FetchedBody) -> Result<Vec<String>> {
    let mut parsed = if body.is_json() {
        serde_json::from_slice::<Value>(&body.bytes).ok()
    } else {
        None
    };

    if parsed.is_none() {
        let raw = String::from_utf8_lossy(&body.bytes);
        let mut text = raw.trim().to_string();
        if is_quoted(&text) {
            if let Ok(inner) = serde_json::from_str::<String>(&text) {
                text = inner;
            }
        }
        parsed = serde_json::from_str::<Value>(&text).ok();
    }

    if let Some(Value::String(inner)) = &parsed {
        parsed = serde_json::from_str::<Value>(inner).ok();
    }

    let nodes = match &parsed {
        Some(value @ Value::Array(_)) => string_list(value),
        Some(Value::Object(map)) => map.get("nodes").and_then(string_list),
        _ => None,
    };
    nodes.ok_or_else(|| AppError::network(NODES_FORMAT_ERROR))
}

/// Link returned by the executions endpoint when it does not serve the binary
/// itself.
pub(crate) fn download_link(body: &FetchedBody) -> Option<String> {
    let link = match serde_json::from_slice::<Value>(&body.bytes) {
        Ok(Value::String(s)) if body.is_json() => s,
        _ => String::from_utf8_lossy(&body.bytes).into_owned(),
    };
    let link = link.trim().trim_matches('"').trim();
    (!link.is_empty()).then(|| link.to_string())
}

/// Whether the executions endpoint answered with the binary itself.
pub(crate) fn is_binary_payload(body: &FetchedBody) -> bool {
    body.is_octet_stream() || body.text().is_none()
}
