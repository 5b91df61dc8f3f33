use std::panic::{self, AssertUnwindSafe};

use base64::{engine::general_purpose, Engine as _};
use encounter_core::{
    FormMetadata, Observation, ScriptContext, ScriptEncoding, ScriptError, ScriptExecutor,
    ScriptFailure, TransformConfig,
};
use serde_json::Value;

/// Run the form's save script, if any, against a private copy of
/// `observations`.
///
/// The executor may return a replacement list or mutate the copy held in the
/// context. Every failure, including a panic inside the executor, comes back
/// as one [`ScriptError`] naming the form.
pub fn run_save_script(
    form: &FormMetadata,
    observations: &[Observation],
    patient_id: &str,
    form_state: Option<&Value>,
    executor: &dyn ScriptExecutor,
    config: &TransformConfig,
) -> Result<Vec<Observation>, ScriptError> {
    let Some(raw_script) = form.save_script.as_ref() else {
        return Ok(observations.to_vec());
    };

    execute(form, raw_script, observations, patient_id, form_state, executor, config).map_err(
        |failure| {
            let err = ScriptError {
                form_name: form.label().to_string(),
                detail: failure.describe(),
            };
            tracing::warn!(form = %form.name, patient = patient_id, "{err}");
            err
        },
    )
}

fn execute(
    form: &FormMetadata,
    raw_script: &Value,
    observations: &[Observation],
    patient_id: &str,
    form_state: Option<&Value>,
    executor: &dyn ScriptExecutor,
    config: &TransformConfig,
) -> Result<Vec<Observation>, ScriptFailure> {
    let script = decode_script(raw_script, config.script_encoding)?;

    let mut context = ScriptContext {
        observations: observations.to_vec(),
        patient_id: patient_id.to_string(),
        form_id: form.id.clone(),
        form_name: form.name.clone(),
        form_version: form.version.clone(),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        executor.execute(form_state, &script, patient_id, &mut context)
    }))
    .map_err(|payload| panic_failure(&*payload))??;

    match outcome {
        Some(replacement) => Ok(replacement),
        None => {
            tracing::debug!(form = %form.name, "save script returned no list, keeping context");
            Ok(context.observations)
        }
    }
}

fn decode_script(raw: &Value, encoding: ScriptEncoding) -> Result<String, ScriptFailure> {
    let text = raw
        .as_str()
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ScriptFailure::Error("save script must be a non-empty string".into()))?;

    let script = match encoding {
        ScriptEncoding::Plain => text.to_string(),
        ScriptEncoding::Base64 => {
            let bytes = general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|err| ScriptFailure::from_error(&err))?;
            String::from_utf8(bytes).map_err(|err| ScriptFailure::from_error(&err))?
        }
    };

    if script.trim().is_empty() {
        return Err(ScriptFailure::Error("save script is empty after decoding".into()));
    }
    Ok(script)
}

fn panic_failure(payload: &(dyn std::any::Any + Send)) -> ScriptFailure {
    if let Some(message) = payload.downcast_ref::<&str>() {
        ScriptFailure::Text((*message).to_string())
    } else if let Some(message) = payload.downcast_ref::<String>() {
        ScriptFailure::Text(message.clone())
    } else {
        ScriptFailure::Unknown
    }
}
