//! Outbound control frames.
//!
//! ```text
//! {"action":"start","key":"org/model","repoId":"org/model","kind":"checkpoints",
//!  "path":"unet","includePatterns":["*.safetensors"]}
//! {"action":"cancel","key":"org/model"}
//! ```

use serde_json::{json, Map, Value};

use crate::download::{DownloadKey, SourceParams};

/// Ask the server to begin fetching `source` and report progress for `key`.
pub fn start_request(key: &DownloadKey, source: &SourceParams) -> String {
    let mut request = Map::new();
    request.insert("action".to_string(), json!("start"));
    request.insert("key".to_string(), json!(key.as_str()));
    request.insert("repoId".to_string(), json!(source.repo_id));
    request.insert("kind".to_string(), json!(source.kind));

    if let Some(path) = &source.path {
        request.insert("path".to_string(), json!(path));
    }
    if !source.include_patterns.is_empty() {
        request.insert("includePatterns".to_string(), json!(source.include_patterns));
    }
    if !source.exclude_patterns.is_empty() {
        request.insert("excludePatterns".to_string(), json!(source.exclude_patterns));
    }

    Value::Object(request).to_string()
}

/// Ask the server to stop the transfer for `key`.
pub fn cancel_request(key: &DownloadKey) -> String {
    json!({ "action": "cancel", "key": key.as_str() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_minimal() {
        let source = SourceParams::new("org/model", "checkpoints");
        let key = DownloadKey::for_source(&source);
        let value: Value = serde_json::from_str(&start_request(&key, &source)).unwrap();

        assert_eq!(value["action"], "start");
        assert_eq!(value["key"], "org/model");
        assert_eq!(value["repoId"], "org/model");
        assert_eq!(value["kind"], "checkpoints");
        assert!(value.get("path").is_none());
        assert!(value.get("includePatterns").is_none());
    }

    #[test]
    fn test_start_request_with_path_and_patterns() {
        let source = SourceParams::new("org/model", "loras")
            .with_path("styles")
            .with_include("*.safetensors")
            .with_exclude("*.bin");
        let key = DownloadKey::for_source(&source);
        let value: Value = serde_json::from_str(&start_request(&key, &source)).unwrap();

        assert_eq!(value["key"], "org/model/styles");
        assert_eq!(value["path"], "styles");
        assert_eq!(value["includePatterns"], json!(["*.safetensors"]));
        assert_eq!(value["excludePatterns"], json!(["*.bin"]));
    }

    #[test]
    fn test_cancel_request() {
        let key = DownloadKey::new("org/model").unwrap();
        let value: Value = serde_json::from_str(&cancel_request(&key)).unwrap();
        assert_eq!(value, json!({"action": "cancel", "key": "org/model"}));
    }
}
