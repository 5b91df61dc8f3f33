use encounter_core::{ConceptRef, Observation};
use serde_json::Value;

use crate::resolver::{concept_reference, non_empty_str};

/// Append note-only observations for fields that carry a comment or an
/// interpretation but no value.
///
/// Walks the raw submitted form state (`children` arrays at any depth). A
/// concept that already has an observation is never added a second time.
pub fn extract_notes(form_state: &Value, observations: &mut Vec<Observation>) {
    let before = observations.len();
    visit(form_state, observations);
    let added = observations.len() - before;
    if added > 0 {
        tracing::debug!(added, "recovered note-only observations");
    }
}

fn visit(node: &Value, observations: &mut Vec<Observation>) {
    match node {
        Value::Array(items) => {
            for item in items {
                visit(item, observations);
            }
        }
        Value::Object(_) => {
            if let Some(note) = note_for(node) {
                if !contains_concept(observations, &note.concept.id) {
                    observations.push(note);
                }
            }
            if let Some(children) = node.get("children") {
                visit(children, observations);
            }
        }
        _ => {}
    }
}

fn note_for(node: &Value) -> Option<Observation> {
    let concept_id = node_concept_id(node)?;

    // A nested value object wraps the captured value together with its notes.
    let value_object = node
        .get("value")
        .filter(|value| value.get("concept").is_some());
    let captured = match value_object {
        Some(inner) => inner.get("value"),
        None => node.get("value"),
    };
    if !is_empty(captured) {
        return None;
    }

    let comment = note_text(node, value_object, "comment");
    let interpretation = note_text(node, value_object, "interpretation");
    if comment.is_none() && interpretation.is_none() {
        return None;
    }

    let field_path = non_empty_str(node.get("fieldPath"))
        .or_else(|| non_empty_str(node.get("id")))
        .map(str::to_string);

    Some(Observation {
        concept: ConceptRef {
            id: concept_id.to_string(),
        },
        field_path,
        comment,
        interpretation,
        ..Observation::default()
    })
}

/// Own `conceptId`, then the value object's concept, then the control's.
fn node_concept_id(node: &Value) -> Option<&str> {
    non_empty_str(node.get("conceptId"))
        .or_else(|| {
            node.get("value")
                .and_then(|value| value.get("concept"))
                .and_then(concept_reference)
        })
        .or_else(|| {
            node.get("control")
                .and_then(|control| control.get("concept"))
                .and_then(concept_reference)
        })
}

fn note_text(node: &Value, value_object: Option<&Value>, key: &str) -> Option<String> {
    non_empty_str(node.get(key))
        .or_else(|| value_object.and_then(|inner| non_empty_str(inner.get(key))))
        .map(str::to_string)
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

fn contains_concept(observations: &[Observation], concept_id: &str) -> bool {
    observations.iter().any(|observation| {
        observation.concept.id == concept_id || contains_concept(&observation.children, concept_id)
    })
}
