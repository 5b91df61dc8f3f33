use chrono::{DateTime, Utc};
use encounter_core::{
    ControlNode, EncounterPayload, FormDefinition, FormMetadata, ScriptError, ScriptExecutor,
    TransformConfig,
};
use serde_json::Value;

use crate::{extract_notes, form_to_observations, run_save_script};

/// Everything the UI layer hands over when the clinician presses save.
#[derive(Debug, Clone, Copy)]
pub struct SaveRequest<'a> {
    pub form: &'a FormDefinition,
    pub metadata: &'a FormMetadata,
    pub controls: &'a [ControlNode],
    /// Raw submitted state, used for note recovery and passed to the script.
    pub form_state: Option<&'a Value>,
    pub patient_id: &'a str,
    pub visit_id: Option<&'a str>,
    pub encounter_type_id: Option<&'a str>,
}

/// Build the persistence payload: encode controls, recover notes, run the
/// save script.
pub fn prepare_encounter(
    request: &SaveRequest<'_>,
    executor: &dyn ScriptExecutor,
    now: DateTime<Utc>,
    config: &TransformConfig,
) -> Result<EncounterPayload, ScriptError> {
    let mut observations = form_to_observations(request.controls, request.form, now, config);

    if let Some(state) = request.form_state {
        extract_notes(state, &mut observations);
    }

    let observations = run_save_script(
        request.metadata,
        &observations,
        request.patient_id,
        request.form_state,
        executor,
        config,
    )?;

    tracing::info!(
        form = %request.form.name,
        patient = request.patient_id,
        observations = observations.len(),
        "encounter ready to save"
    );

    Ok(EncounterPayload {
        patient_id: request.patient_id.to_string(),
        visit_id: request.visit_id.map(str::to_string),
        encounter_type_id: request.encounter_type_id.map(str::to_string),
        form_id: request.form.id.clone(),
        observations,
    })
}
