use encounter_core::{
    canonical_timestamp, ControlKind, ControlNode, FieldValue, ObsValue, TransformConfig,
};
use serde_json::{Map, Value};

/// Wire value for a control, `None` when nothing was captured.
pub fn normalize(control: &ControlNode, config: &TransformConfig) -> Option<ObsValue> {
    control
        .value
        .as_ref()
        .map(|value| normalize_value(control.kind, value, config))
}

pub(crate) fn normalize_value(
    kind: ControlKind,
    value: &FieldValue,
    config: &TransformConfig,
) -> ObsValue {
    match value {
        FieldValue::Bool(flag) => ObsValue::Bool(*flag),
        FieldValue::Number(number) => ObsValue::Number(number.clone()),
        FieldValue::Text(text) => ObsValue::Text(text.clone()),
        FieldValue::Date(at) => ObsValue::Text(canonical_timestamp(at)),
        FieldValue::Coded(coded) => {
            if !is_select(kind) {
                if let Some(reference) = attachment_reference(&coded.extra, config) {
                    return ObsValue::Text(reference.to_string());
                }
            }
            ObsValue::Coded(coded.clone())
        }
        FieldValue::Json(Value::Object(map)) => {
            // A select answer keeps its shape even if it also carries a url.
            if !(is_select(kind) && map.contains_key("id")) {
                if let Some(reference) = attachment_reference(map, config) {
                    return ObsValue::Text(reference.to_string());
                }
            }
            ObsValue::Json(Value::Object(map.clone()))
        }
        FieldValue::Json(other) => ObsValue::Json(other.clone()),
        FieldValue::List(_) => ObsValue::Json(Value::from(value.clone())),
    }
}

fn is_select(kind: ControlKind) -> bool {
    matches!(kind, ControlKind::Select | ControlKind::Multiselect)
}

/// First configured reference key holding a string.
fn attachment_reference<'a>(
    map: &'a Map<String, Value>,
    config: &TransformConfig,
) -> Option<&'a str> {
    config
        .attachment_reference_keys
        .iter()
        .find_map(|key| map.get(key).and_then(Value::as_str))
}
