//! Scenario Registry (C1) and VAD Policy (C2), spec §4.1-§4.2.
//!
//! Pure logic only: both resolution namespaces and the keyword-based VAD
//! selection are closed sums (spec §9), so there is a single dispatch
//! function per concern instead of an open trait hierarchy. Persistence of
//! custom scenarios belongs to the calling service.

mod registry;
mod vad;

pub use registry::{
    builtins, create_custom, custom_id_owner, delete, get_owned, is_custom_id, list_for,
    make_custom_id, resolve, update, validate_custom_fields, ScenarioError,
};
pub use vad::{vad_policy_for, Eagerness, SemanticVadParams, ServerVadParams, VadMode, VadOverride};
