use std::collections::BTreeMap;

use serde_json::Value;

use crate::FormsError;

/// Datatype declared for `concept_id`, first match in pre-order.
///
/// Anything that is not a recognisable control definition is ignored, so a
/// foreign or truncated schema simply yields `None`.
pub fn resolve_datatype(schema: &Value, concept_id: &str) -> Option<String> {
    if concept_id.is_empty() {
        return None;
    }
    find_first(schema, concept_id).map(str::to_string)
}

/// Like [`resolve_datatype`] but rejects a concept bound to two datatypes.
pub fn resolve_datatype_strict(
    schema: &Value,
    concept_id: &str,
) -> Result<Option<String>, FormsError> {
    if concept_id.is_empty() {
        return Ok(None);
    }

    let mut found: Option<String> = None;
    let mut conflict: Option<String> = None;
    visit_bindings(schema, &mut |binding| {
        if binding.concept_id != concept_id || conflict.is_some() {
            return;
        }
        let Some(datatype) = binding.datatype else {
            return;
        };
        match &found {
            None => found = Some(datatype.to_string()),
            Some(first) if first != datatype => conflict = Some(datatype.to_string()),
            Some(_) => {}
        }
    });

    match (found, conflict) {
        (Some(first), Some(second)) => Err(FormsError::ConflictingDatatype {
            concept_id: concept_id.to_string(),
            first,
            second,
        }),
        (found, None) => Ok(found),
        (None, Some(_)) => Ok(None),
    }
}

/// A concept bound to more than one datatype somewhere in a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatatypeConflict {
    pub concept_id: String,
    /// Distinct datatypes in the order they were first seen.
    pub datatypes: Vec<String>,
}

/// Report every concept that the schema binds to several datatypes.
pub fn find_datatype_conflicts(schema: &Value) -> Vec<DatatypeConflict> {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    visit_bindings(schema, &mut |binding| {
        let Some(datatype) = binding.datatype else {
            return;
        };
        let entry = seen.entry(binding.concept_id.to_string()).or_default();
        if !entry.iter().any(|known| known == datatype) {
            entry.push(datatype.to_string());
        }
    });

    seen.into_iter()
        .filter(|(_, datatypes)| datatypes.len() > 1)
        .map(|(concept_id, datatypes)| DatatypeConflict {
            concept_id,
            datatypes,
        })
        .collect()
}

struct Binding<'a> {
    concept_id: &'a str,
    datatype: Option<&'a str>,
}

fn find_first<'a>(node: &'a Value, concept_id: &str) -> Option<&'a str> {
    match node {
        Value::Array(items) => items.iter().find_map(|item| find_first(item, concept_id)),
        Value::Object(map) => {
            if let Some(binding) = concept_binding(node) {
                if binding.concept_id == concept_id {
                    if let Some(datatype) = binding.datatype {
                        return Some(datatype);
                    }
                }
            }
            map.values().find_map(|child| find_first(child, concept_id))
        }
        _ => None,
    }
}

fn visit_bindings<'a>(node: &'a Value, visit: &mut dyn FnMut(Binding<'a>)) {
    match node {
        Value::Array(items) => {
            for item in items {
                visit_bindings(item, visit);
            }
        }
        Value::Object(map) => {
            if let Some(binding) = concept_binding(node) {
                visit(binding);
            }
            for child in map.values() {
                visit_bindings(child, visit);
            }
        }
        _ => {}
    }
}

/// A control definition binds a concept either through a nested `concept`
/// object or a flat `conceptId` member.
fn concept_binding(node: &Value) -> Option<Binding<'_>> {
    if let Some(concept) = node.get("concept").filter(|concept| concept.is_object()) {
        let concept_id = concept_reference(concept)?;
        let datatype = non_empty_str(concept.get("datatype"))
            .or_else(|| non_empty_str(node.get("datatype")));
        return Some(Binding {
            concept_id,
            datatype,
        });
    }

    let concept_id = non_empty_str(node.get("conceptId"))?;
    Some(Binding {
        concept_id,
        datatype: non_empty_str(node.get("datatype")),
    })
}

/// Concept id carried by a concept reference: a bare string, or an object
/// with `uuid` (preferred) or `id`.
pub(crate) fn concept_reference(concept: &Value) -> Option<&str> {
    match concept {
        Value::String(id) if !id.is_empty() => Some(id),
        Value::Object(_) => {
            non_empty_str(concept.get("uuid")).or_else(|| non_empty_str(concept.get("id")))
        }
        _ => None,
    }
}

pub(crate) fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
}
