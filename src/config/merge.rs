//! Configuration merge logic
//!
//! - Objects: deep-merge by key
//! - Arrays: replace (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Deep merge `overlay` onto `base`.
///
/// Null in the overlay overrides like any other scalar.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge config layers in order (first is base, last has highest precedence).
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(
            json!({"remote": {"timeout_seconds": 300}}),
            json!({"remote": {"timeout_seconds": 60}}),
        );
        assert_eq!(result["remote"]["timeout_seconds"], 60);
    }

    #[test]
    fn test_nested_keys_preserved() {
        let base = json!({
            "remote": {"enabled": false, "backend": "gcs", "key_layout": "nested"}
        });
        let overlay = json!({
            "remote": {"enabled": true, "bucket": "prebuilt-frameworks"}
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["remote"]["enabled"], true);
        assert_eq!(result["remote"]["bucket"], "prebuilt-frameworks");
        assert_eq!(result["remote"]["backend"], "gcs");
        assert_eq!(result["remote"]["key_layout"], "nested");
    }

    #[test]
    fn test_array_replace() {
        let result = deep_merge(
            json!({"archive": {"exclude": ["*.dSYM", "*.bcsymbolmap"]}}),
            json!({"archive": {"exclude": ["*.swiftsourceinfo"]}}),
        );
        assert_eq!(result["archive"]["exclude"], json!(["*.swiftsourceinfo"]));
    }

    #[test]
    fn test_null_override() {
        let result = deep_merge(
            json!({"toolchain": {"version": "14.2"}}),
            json!({"toolchain": {"version": null}}),
        );
        assert!(result["toolchain"]["version"].is_null());
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({
            "local": {"enabled": true, "root": "/builtin"},
            "remote": {"enabled": false}
        });
        let host = json!({"local": {"root": "/host"}});
        let project = json!({"remote": {"enabled": true, "bucket": "team-bucket"}});
        let cli = json!({"remote": {"enabled": false}});

        let result = merge_layers(vec![builtin, host, project, cli]);

        assert_eq!(result["local"]["root"], "/host");
        assert_eq!(result["local"]["enabled"], true);
        assert_eq!(result["remote"]["enabled"], false);
        assert_eq!(result["remote"]["bucket"], "team-bucket");
    }

    #[test]
    fn test_merge_no_layers_is_null() {
        assert!(merge_layers(Vec::new()).is_null());
    }
}
