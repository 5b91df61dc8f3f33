use chrono::{DateTime, Utc};
use encounter_core::{
    ConceptRef, ControlKind, ControlNode, FieldValue, FormDefinition, Observation,
    TransformConfig,
};

use crate::normalize::normalize_value;
use crate::resolver::{resolve_datatype, resolve_datatype_strict};

/// Flatten a control tree into the observation list persisted at save time.
///
/// `now` is stamped on every observation produced by this call.
pub fn form_to_observations(
    controls: &[ControlNode],
    form: &FormDefinition,
    now: DateTime<Utc>,
    config: &TransformConfig,
) -> Vec<Observation> {
    let encoder = Encoder {
        form,
        now,
        namespace: config.namespace_for(form),
        config,
    };

    let mut observations = Vec::new();
    for control in controls {
        encoder.encode(control, &mut observations);
    }

    tracing::debug!(
        form = %form.name,
        controls = controls.len(),
        observations = observations.len(),
        "encoded form state"
    );
    observations
}

/// [`form_to_observations`] stamped with the current instant.
pub fn form_to_observations_now(
    controls: &[ControlNode],
    form: &FormDefinition,
    config: &TransformConfig,
) -> Vec<Observation> {
    form_to_observations(controls, form, Utc::now(), config)
}

struct Encoder<'a> {
    form: &'a FormDefinition,
    now: DateTime<Utc>,
    namespace: String,
    config: &'a TransformConfig,
}

impl Encoder<'_> {
    fn encode(&self, control: &ControlNode, out: &mut Vec<Observation>) {
        if control.kind == ControlKind::Section
            && control.concept_id.is_empty()
            && control.value.is_none()
        {
            // Structural label; its members still belong to the encounter.
            for child in &control.children {
                self.encode(child, out);
            }
            return;
        }

        if !control.children.is_empty() {
            let mut group = self.base(control);
            for child in &control.children {
                self.encode(child, &mut group.children);
            }
            out.push(group);
            return;
        }

        let Some(value) = control.value.as_ref() else {
            tracing::trace!(field = %control.id, "skipping empty control");
            return;
        };

        match value {
            FieldValue::List(items) if control.kind == ControlKind::Multiselect => {
                for item in items {
                    let mut observation = self.base(control);
                    observation.value = Some(normalize_value(control.kind, item, self.config));
                    out.push(observation);
                }
            }
            _ => {
                let mut observation = self.base(control);
                observation.value = Some(normalize_value(control.kind, value, self.config));
                out.push(observation);
            }
        }
    }

    fn base(&self, control: &ControlNode) -> Observation {
        Observation {
            concept: ConceptRef {
                id: control.concept_id.clone(),
            },
            datatype: self.datatype(&control.concept_id),
            value: None,
            timestamp: Some(self.now),
            namespace: Some(self.namespace.clone()),
            field_path: Some(control.id.clone()),
            comment: control.comment.clone(),
            interpretation: control.interpretation.clone(),
            children: Vec::new(),
        }
    }

    fn datatype(&self, concept_id: &str) -> Option<String> {
        if !self.config.strict_datatypes {
            return resolve_datatype(&self.form.schema, concept_id);
        }
        match resolve_datatype_strict(&self.form.schema, concept_id) {
            Ok(datatype) => datatype,
            Err(err) => {
                tracing::warn!(form = %self.form.name, "{err}");
                None
            }
        }
    }
}
