use std::cell::Cell;

use base64::{engine::general_purpose, Engine as _};
use chrono::{TimeZone, Utc};
use encounter_core::{
    ControlKind, ControlNode, FormDefinition, FormMetadata, ObsValue, Observation, ScriptContext,
    ScriptEncoding, ScriptExecutor, ScriptFailure, TransformConfig,
};
use encounter_forms::{prepare_encounter, run_save_script, SaveRequest};
use serde_json::{json, Value};

/// Stand-in for the sandboxed interpreter.
struct StubExecutor<F> {
    calls: Cell<usize>,
    behaviour: F,
}

impl<F> StubExecutor<F>
where
    F: Fn(&str, &mut ScriptContext) -> Result<Option<Vec<Observation>>, ScriptFailure>,
{
    fn new(behaviour: F) -> Self {
        Self {
            calls: Cell::new(0),
            behaviour,
        }
    }
}

impl<F> ScriptExecutor for StubExecutor<F>
where
    F: Fn(&str, &mut ScriptContext) -> Result<Option<Vec<Observation>>, ScriptFailure>,
{
    fn execute(
        &self,
        _form_state: Option<&Value>,
        script: &str,
        _patient_id: &str,
        context: &mut ScriptContext,
    ) -> Result<Option<Vec<Observation>>, ScriptFailure> {
        self.calls.set(self.calls.get() + 1);
        (self.behaviour)(script, context)
    }
}

fn vitals(script: Option<Value>) -> FormMetadata {
    FormMetadata {
        id: "form-vitals".into(),
        name: "vitals_v2".into(),
        display_name: Some("Vitals".into()),
        version: "2".into(),
        save_script: script,
    }
}

fn observations() -> Vec<Observation> {
    vec![Observation {
        field_path: Some("pulse".into()),
        value: Some(ObsValue::Number(88.into())),
        ..Observation::for_concept("c-pulse")
    }]
}

fn untouched() -> StubExecutor<impl Fn(&str, &mut ScriptContext) -> Result<Option<Vec<Observation>>, ScriptFailure>> {
    StubExecutor::new(|_: &str, _: &mut ScriptContext| Ok(None))
}

#[test]
fn form_without_script_returns_input_unchanged() {
    let executor = untouched();
    let input = observations();

    let output = run_save_script(
        &vitals(None),
        &input,
        "patient-1",
        None,
        &executor,
        &TransformConfig::default(),
    )
    .unwrap();

    assert_eq!(output, input);
    assert_eq!(executor.calls.get(), 0);
}

#[test]
fn thrown_error_is_wrapped_with_form_name() {
    let executor = StubExecutor::new(|_: &str, _: &mut ScriptContext| {
        Err(ScriptFailure::Error("boom".into()))
    });

    let err = run_save_script(
        &vitals(Some(json!("throw new Error('boom')"))),
        &observations(),
        "patient-1",
        None,
        &executor,
        &TransformConfig::default(),
    )
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Vitals"), "{message}");
    assert!(message.contains("boom"), "{message}");
}

#[test]
fn blank_or_non_string_scripts_fail_before_execution() {
    let executor = untouched();

    for script in [json!(""), json!("   \n\t"), json!(42), json!({ "code": "x" })] {
        let err = run_save_script(
            &vitals(Some(script)),
            &observations(),
            "patient-1",
            None,
            &executor,
            &TransformConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.form_name, "Vitals");
    }

    assert_eq!(executor.calls.get(), 0);
}

#[test]
fn returned_list_is_adopted_verbatim() {
    let replacement = vec![Observation {
        value: Some(ObsValue::Text("computed".into())),
        ..Observation::for_concept("c-score")
    }];
    let expected = replacement.clone();
    let executor =
        StubExecutor::new(move |_: &str, _: &mut ScriptContext| Ok(Some(replacement.clone())));

    let output = run_save_script(
        &vitals(Some(json!("return computeScore(obs)"))),
        &observations(),
        "patient-1",
        None,
        &executor,
        &TransformConfig::default(),
    )
    .unwrap();

    assert_eq!(output, expected);
}

#[test]
fn mutations_to_the_context_copy_are_kept_and_caller_list_is_untouched() {
    let executor = StubExecutor::new(|_: &str, context: &mut ScriptContext| {
        assert_eq!(context.patient_id, "patient-1");
        assert_eq!(context.form_name, "vitals_v2");
        context.observations[0].interpretation = Some("ABNORMAL".into());
        context.observations.push(Observation::for_concept("c-flag"));
        Ok(None)
    });
    let input = observations();

    let output = run_save_script(
        &vitals(Some(json!("flag(obs)"))),
        &input,
        "patient-1",
        None,
        &executor,
        &TransformConfig::default(),
    )
    .unwrap();

    assert_eq!(output.len(), 2);
    assert_eq!(output[0].interpretation.as_deref(), Some("ABNORMAL"));
    assert_eq!(input, observations());
}

#[test]
fn failure_detail_follows_extraction_priority() {
    let cases = [
        (ScriptFailure::Text("raw text".into()), "raw text"),
        (ScriptFailure::Value(json!({ "message": "from field" })), "from field"),
        (ScriptFailure::Value(json!({ "code": 7 })), "Unknown error occurred"),
        (ScriptFailure::Unknown, "Unknown error occurred"),
    ];

    for (failure, expected) in cases {
        let executor =
            StubExecutor::new(move |_: &str, _: &mut ScriptContext| Err(failure.clone()));
        let err = run_save_script(
            &vitals(Some(json!("run()"))),
            &observations(),
            "patient-1",
            None,
            &executor,
            &TransformConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.detail, expected);
    }
}

#[test]
fn panicking_executor_surfaces_as_script_error() {
    let executor = StubExecutor::new(|_: &str, _: &mut ScriptContext| -> Result<Option<Vec<Observation>>, ScriptFailure> {
        panic!("interpreter crashed")
    });

    let err = run_save_script(
        &vitals(Some(json!("run()"))),
        &observations(),
        "patient-1",
        None,
        &executor,
        &TransformConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err.detail, "interpreter crashed");
}

#[test]
fn base64_scripts_are_decoded_before_execution() {
    let config = TransformConfig {
        script_encoding: ScriptEncoding::Base64,
        ..TransformConfig::default()
    };
    let encoded = general_purpose::STANDARD.encode("return obs;");
    let executor = StubExecutor::new(|script: &str, _: &mut ScriptContext| {
        assert_eq!(script, "return obs;");
        Ok(None)
    });

    run_save_script(
        &vitals(Some(Value::String(encoded))),
        &observations(),
        "patient-1",
        None,
        &executor,
        &config,
    )
    .unwrap();
    assert_eq!(executor.calls.get(), 1);

    let err = run_save_script(
        &vitals(Some(json!("%%% not base64 %%%"))),
        &observations(),
        "patient-1",
        None,
        &executor,
        &config,
    )
    .unwrap_err();
    assert_eq!(err.form_name, "Vitals");
    assert_eq!(executor.calls.get(), 1);
}

#[test]
fn prepare_encounter_runs_every_stage() {
    let form = FormDefinition {
        id: "form-vitals".into(),
        name: "Vitals".into(),
        version: "2".into(),
        published: true,
        schema: json!({ "controls": [{ "concept": { "uuid": "c-pulse", "datatype": "Numeric" } }] }),
    };
    let controls = vec![
        ControlNode::new("pulse", "c-pulse", ControlKind::Number).with_value(88_i64),
        ControlNode::new("temp", "c-temp", ControlKind::Number),
    ];
    let state = json!({ "children": [{ "id": "temp", "conceptId": "c-temp", "comment": "refused" }] });
    let executor = StubExecutor::new(|_: &str, context: &mut ScriptContext| {
        assert_eq!(context.observations.len(), 2);
        Ok(None)
    });

    let payload = prepare_encounter(
        &SaveRequest {
            form: &form,
            metadata: &vitals(Some(json!("noop()"))),
            controls: &controls,
            form_state: Some(&state),
            patient_id: "patient-1",
            visit_id: Some("visit-9"),
            encounter_type_id: None,
        },
        &executor,
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        &TransformConfig::default(),
    )
    .unwrap();

    assert_eq!(payload.patient_id, "patient-1");
    assert_eq!(payload.visit_id.as_deref(), Some("visit-9"));
    assert_eq!(payload.form_id, "form-vitals");
    assert_eq!(payload.observations.len(), 2);
    assert_eq!(payload.observations[1].comment.as_deref(), Some("refused"));
    assert_eq!(executor.calls.get(), 1);
}
