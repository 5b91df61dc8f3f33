use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Utc};
use encounter_core::{ControlKind, ControlNode, FieldValue, FormDefinition, ObsValue, Observation};

use crate::resolver::resolve_datatype;

/// Rebuild editable controls from a saved observation list.
///
/// Observations sharing a field path (or concept id when the path is
/// missing) merge into one `multiselect` control, in list order.
pub fn observations_to_form(
    observations: &[Observation],
    form: &FormDefinition,
) -> Vec<ControlNode> {
    let mut controls: Vec<ControlNode> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for observation in observations {
        let key = observation.correlation_key().to_string();

        if observation.is_group() {
            let members = observations_to_form(&observation.children, form);
            match index.entry(key) {
                Entry::Occupied(entry) => {
                    let group = &mut controls[*entry.get()];
                    group.children.extend(members);
                    copy_notes(group, observation);
                }
                Entry::Vacant(entry) => {
                    let mut group = ControlNode::new(
                        entry.key().clone(),
                        observation.concept.id.clone(),
                        ControlKind::Group,
                    )
                    .with_children(members);
                    copy_notes(&mut group, observation);
                    entry.insert(controls.len());
                    controls.push(group);
                }
            }
            continue;
        }

        let value = observation.value.clone().map(decode_value);
        match index.entry(key) {
            Entry::Occupied(entry) => {
                let control = &mut controls[*entry.get()];
                merge_value(control, value);
                copy_notes(control, observation);
            }
            Entry::Vacant(entry) => {
                let kind = control_kind(observation, value.as_ref(), form);
                let mut control =
                    ControlNode::new(entry.key().clone(), observation.concept.id.clone(), kind);
                control.value = value;
                copy_notes(&mut control, observation);
                entry.insert(controls.len());
                controls.push(control);
            }
        }
    }

    controls
}

/// A repeated key always makes a multiselect. Its value is a list of the
/// answers seen so far, or absent while none has been seen.
fn merge_value(control: &mut ControlNode, value: Option<FieldValue>) {
    control.kind = ControlKind::Multiselect;
    let mut items = match control.value.take() {
        None => Vec::new(),
        Some(FieldValue::List(items)) => items,
        Some(existing) => vec![existing],
    };
    items.extend(value);
    control.value = (!items.is_empty()).then_some(FieldValue::List(items));
}

/// Last contributing observation wins.
fn copy_notes(control: &mut ControlNode, observation: &Observation) {
    if observation.interpretation.is_some() {
        control.interpretation = observation.interpretation.clone();
    }
    if observation.comment.is_some() {
        control.comment = observation.comment.clone();
    }
}

/// Only full datetimes become dates; `2024-05-01` stays a string.
fn decode_value(value: ObsValue) -> FieldValue {
    match value {
        ObsValue::Bool(flag) => FieldValue::Bool(flag),
        ObsValue::Number(number) => FieldValue::Number(number),
        ObsValue::Text(text) => match parse_strict_datetime(&text) {
            Some(at) => FieldValue::Date(at),
            None => FieldValue::Text(text),
        },
        ObsValue::Coded(coded) => FieldValue::Coded(coded),
        ObsValue::Json(other) => FieldValue::from(other),
    }
}

fn parse_strict_datetime(text: &str) -> Option<DateTime<Utc>> {
    if text.as_bytes().get(10) != Some(&b'T') {
        return None;
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn control_kind(
    observation: &Observation,
    value: Option<&FieldValue>,
    form: &FormDefinition,
) -> ControlKind {
    let datatype = observation
        .datatype
        .clone()
        .or_else(|| resolve_datatype(&form.schema, &observation.concept.id));

    if let Some(kind) = datatype.as_deref().and_then(kind_for_datatype) {
        return kind;
    }

    match value {
        Some(FieldValue::Date(_)) => ControlKind::Datetime,
        Some(FieldValue::Coded(_)) => ControlKind::Select,
        Some(FieldValue::Number(_)) => ControlKind::Number,
        _ => ControlKind::Text,
    }
}

fn kind_for_datatype(datatype: &str) -> Option<ControlKind> {
    match datatype.to_ascii_lowercase().as_str() {
        "coded" => Some(ControlKind::Select),
        "numeric" | "number" => Some(ControlKind::Number),
        "date" => Some(ControlKind::Date),
        "datetime" => Some(ControlKind::Datetime),
        "text" => Some(ControlKind::Text),
        _ => None,
    }
}
