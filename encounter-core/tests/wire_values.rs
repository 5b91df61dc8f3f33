use encounter_core::{
    CodedAnswer, ControlKind, ControlNode, FieldValue, FormMetadata, ObsValue, Observation,
    ScriptFailure, TransformConfig,
};
use serde_json::json;

#[test]
fn coded_answers_keep_unknown_members() {
    let raw = json!({ "id": "a-1", "displayText": "Yes", "conceptClass": "Misc" });

    let value: ObsValue = serde_json::from_value(raw.clone()).unwrap();

    match &value {
        ObsValue::Coded(answer) => {
            assert_eq!(answer.id, "a-1");
            assert_eq!(answer.display_text.as_deref(), Some("Yes"));
        }
        other => panic!("expected coded answer, got {other:?}"),
    }
    assert_eq!(serde_json::to_value(value).unwrap(), raw);
}

#[test]
fn objects_with_url_are_not_coded_answers() {
    let value = FieldValue::from(json!({ "id": "f-1", "url": "/files/1" }));

    assert!(matches!(value, FieldValue::Json(_)));
}

#[test]
fn control_tree_reads_from_ui_json() {
    let node: ControlNode = serde_json::from_value(json!({
        "id": "Form.1/1-0",
        "conceptId": "c-symptoms",
        "kind": "multiselect",
        "value": [{ "id": "a" }, { "id": "b" }]
    }))
    .unwrap();

    assert_eq!(node.kind, ControlKind::Multiselect);
    assert_eq!(
        node.value,
        Some(FieldValue::List(vec![
            FieldValue::Coded(CodedAnswer::new("a")),
            FieldValue::Coded(CodedAnswer::new("b")),
        ]))
    );
    assert!(node.children.is_empty());
}

#[test]
fn observation_wire_shape_omits_absent_members() {
    let observation = Observation {
        field_path: Some("Form.1/2-0".into()),
        value: Some(ObsValue::Number(7.into())),
        ..Observation::for_concept("c-score")
    };

    assert_eq!(
        serde_json::to_value(&observation).unwrap(),
        json!({ "concept": { "id": "c-score" }, "value": 7, "fieldPath": "Form.1/2-0" })
    );
    assert_eq!(observation.correlation_key(), "Form.1/2-0");
    assert_eq!(Observation::for_concept("c-x").correlation_key(), "c-x");
}

#[test]
fn form_label_prefers_display_name() {
    let mut metadata = FormMetadata {
        id: "f".into(),
        name: "vitals_v2".into(),
        display_name: Some("Vitals".into()),
        version: "2".into(),
        save_script: None,
    };
    assert_eq!(metadata.label(), "Vitals");

    metadata.display_name = Some("  ".into());
    assert_eq!(metadata.label(), "vitals_v2");
}

#[test]
fn partial_config_fills_defaults() {
    let config: TransformConfig = serde_json::from_value(json!({ "strict_datatypes": true })).unwrap();

    assert!(config.strict_datatypes);
    assert_eq!(config.attachment_reference_keys, ["url"]);
}

#[test]
fn failure_description_priority() {
    assert_eq!(ScriptFailure::Error("boom".into()).describe(), "boom");
    assert_eq!(ScriptFailure::Value(json!("plain")).describe(), "plain");
    assert_eq!(
        ScriptFailure::Value(json!({ "message": "nested" })).describe(),
        "nested"
    );
    assert_eq!(ScriptFailure::Value(json!(3)).describe(), "Unknown error occurred");
}
