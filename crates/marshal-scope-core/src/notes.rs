use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::context::MarshalContext;
use crate::evaluator::evaluate;
use crate::facts::CheckpointLookup;
use crate::scope::{ScopeConfiguration, ScopeKind};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NotePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub scope_configurations: Vec<ScopeConfiguration>,
    #[serde(default)]
    pub priority: NotePriority,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteForMarshal {
    #[serde(flatten)]
    pub note: Note,
    pub matched_scope: Option<ScopeKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub scope_configurations: Vec<ScopeConfiguration>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub is_primary: bool,
}

fn note_order(lhs: &Note, rhs: &Note) -> Ordering {
    rhs.is_pinned
        .cmp(&lhs.is_pinned)
        .then_with(|| rhs.priority.cmp(&lhs.priority))
        .then_with(|| lhs.display_order.cmp(&rhs.display_order))
        .then_with(|| lhs.created_at.cmp(&rhs.created_at))
        .then_with(|| lhs.id.cmp(&rhs.id))
}

/// Notes relevant to the marshal: pinned first, then most urgent.
#[must_use]
pub fn notes_for_marshal(
    notes: &[Note],
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
) -> Vec<NoteForMarshal> {
    let mut relevant = notes
        .iter()
        .filter_map(|note| {
            let result = evaluate(&note.scope_configurations, ctx, lookup);
            result.is_relevant.then(|| NoteForMarshal {
                note: note.clone(),
                matched_scope: result.winning_scope(),
            })
        })
        .collect::<Vec<_>>();
    relevant.sort_by(|lhs, rhs| note_order(&lhs.note, &rhs.note));
    relevant
}

#[must_use]
pub fn contacts_for_marshal(
    contacts: &[Contact],
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
) -> Vec<Contact> {
    let mut relevant = contacts
        .iter()
        .filter(|contact| evaluate(&contact.scope_configurations, ctx, lookup).is_relevant)
        .cloned()
        .collect::<Vec<_>>();
    relevant.sort_by(|lhs, rhs| {
        rhs.is_primary
            .cmp(&lhs.is_primary)
            .then_with(|| lhs.display_order.cmp(&rhs.display_order))
            .then_with(|| lhs.name.cmp(&rhs.name))
            .then_with(|| lhs.id.cmp(&rhs.id))
    });
    relevant
}
