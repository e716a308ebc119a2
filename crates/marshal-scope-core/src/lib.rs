//! Scope resolution for marshal-facing event data.
//!
//! Decides who may see or act on checklist items, notes, contacts and incidents.
//! Everything in this crate is synchronous and side-effect free over facts that the
//! caller has already loaded: build a [`MarshalContext`] (or [`PreloadedFacts`] for a
//! whole event), then evaluate.

mod checklist;
mod context;
mod evaluator;
mod facts;
mod geo;
mod incident;
mod ledger;
mod notes;
mod scope;

pub use checklist::{
    build_item_with_status, can_complete, completion_report, determine_completion_context,
    is_completed_in_context, is_relevant, items_for_marshal, prepare_completion, ChecklistItem,
    ChecklistItemWithStatus, CompletionContextKey, CompletionReport, ContextCompletionStatus,
    RequestedContext,
};
pub use context::{MarshalContext, MarshalContextBuilder, PreloadedFacts};
pub use evaluator::{
    all_area_contexts, all_checkpoint_contexts, default_tie_breakers, evaluate, ScopeMatchResult,
    RULESET_VERSION,
};
pub use facts::{
    Area, Assignment, CheckpointLookup, EventFactSource, EventFacts, EventRole, InMemoryFactSource,
    Location, Marshal, RoleKind,
};
pub use geo::{GeoPoint, Polygon};
pub use incident::{
    can_view_incident, resolve_visibility, visible_incidents, CheckpointSnapshot, Incident,
    IncidentSeverity, IncidentViewer, IncidentVisibility,
};
pub use ledger::{ActorRef, ActorType, ChecklistCompletion, CompletionId, CompletionLedger};
pub use notes::{
    contacts_for_marshal, notes_for_marshal, Contact, Note, NoteForMarshal, NotePriority,
};
pub use scope::{
    ContextType, ItemType, ScopeConfiguration, ScopeKind, Specificity, TargetIds, ALL_AREAS,
    ALL_CHECKPOINTS, ALL_MARSHALS,
};

/// Errors raised at the collaborator boundary.
///
/// Matching never produces one of these: missing facts degrade to "does not match".
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ScopeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("fact source error: {0}")]
    Facts(String),
}
