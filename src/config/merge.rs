//! Settings merging
//!
//! Settings files are merged as YAML values before deserialization, so a
//! drop-in only overrides the keys it sets:
//! 1. base settings file
//! 2. `cidata.d/*.yaml` (sorted alphabetically)

use serde_yaml::Value;
use tracing::debug;

/// Merge two YAML values recursively
///
/// Mappings merge key by key; a null overlay keeps the base; anything else in
/// the overlay replaces the base value.
pub fn merge_yaml_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        // Both are mappings - merge recursively
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();

            for (key, overlay_value) in overlay_map {
                if let Some(base_value) = result.get(key) {
                    let merged = merge_yaml_values(base_value, overlay_value);
                    result.insert(key.clone(), merged);
                } else {
                    result.insert(key.clone(), overlay_value.clone());
                }
            }

            Value::Mapping(result)
        }

        // Overlay is null - keep base value
        (base_value, Value::Null) => base_value.clone(),

        // All other cases - overlay wins
        (_, overlay_value) => overlay_value.clone(),
    }
}

/// Merge values in order (later values have higher priority)
pub fn merge_all(values: &[Value]) -> Value {
    values.iter().fold(Value::Null, |merged, value| {
        debug!("Merging settings layer");
        merge_yaml_values(&merged, value)
    })
}
