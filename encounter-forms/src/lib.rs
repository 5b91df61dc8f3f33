//! Form state <-> observation converters and the save-time script stage.
//!
//! Every transform is a pure function of its inputs. Malformed or partial
//! documents degrade to "skip" or "not found"; only the script stage fails.

mod normalize;
mod notes;
mod pipeline;
mod resolver;
mod script;
mod to_form;
mod to_observations;

pub use normalize::normalize;
pub use notes::extract_notes;
pub use pipeline::{prepare_encounter, SaveRequest};
pub use resolver::{
    find_datatype_conflicts, resolve_datatype, resolve_datatype_strict, DatatypeConflict,
};
pub use script::run_save_script;
pub use to_form::observations_to_form;
pub use to_observations::{form_to_observations, form_to_observations_now};

/// Errors raised by the strict schema helpers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormsError {
    #[error("Concept {concept_id} is bound to conflicting datatypes {first} and {second}")]
    ConflictingDatatype {
        concept_id: String,
        first: String,
        second: String,
    },
}
