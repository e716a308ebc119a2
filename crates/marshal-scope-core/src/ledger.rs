use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::scope::ContextType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CompletionId(pub Ulid);

impl CompletionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CompletionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CompletionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ActorType {
    Marshal,
    AreaLead,
    EventAdmin,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActorRef {
    pub actor_type: ActorType,
    pub actor_id: String,
    pub actor_name: String,
}

/// One completion of a checklist item in one context.
///
/// Personal completions carry `context_owner_marshal_id`; shared ones are identified by
/// their context alone, whoever submitted them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistCompletion {
    pub completion_id: CompletionId,
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub context_owner_marshal_id: Option<String>,
    pub completion_context_type: ContextType,
    pub completion_context_id: String,
    pub completed_by: ActorRef,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub uncompleted_by: Option<ActorRef>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub uncompleted_at: Option<OffsetDateTime>,
}

impl ChecklistCompletion {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// Completion records for one event. Append and soft-delete only.
///
/// Two submissions for the same shared context may both land; readers treat any
/// active record in a context as "completed", so duplicates are harmless.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CompletionLedger {
    completions: Vec<ChecklistCompletion>,
}

impl CompletionLedger {
    #[must_use]
    pub fn new(completions: Vec<ChecklistCompletion>) -> Self {
        Self { completions }
    }

    #[must_use]
    pub fn all(&self) -> &[ChecklistCompletion] {
        &self.completions
    }

    pub fn active(&self) -> impl Iterator<Item = &ChecklistCompletion> {
        self.completions
            .iter()
            .filter(|completion| completion.is_active())
    }

    pub fn for_item<'a>(
        &'a self,
        item_id: &'a str,
    ) -> impl Iterator<Item = &'a ChecklistCompletion> + 'a {
        self.completions
            .iter()
            .filter(move |completion| completion.item_id == item_id)
    }

    pub fn record(&mut self, completion: ChecklistCompletion) {
        tracing::debug!(
            completion_id = %completion.completion_id,
            item_id = %completion.item_id,
            context_type = %completion.completion_context_type,
            context_id = %completion.completion_context_id,
            "completion recorded"
        );
        self.completions.push(completion);
    }

    /// Soft-delete one completion, keeping who un-completed it and when.
    /// Returns `None` when the completion is unknown or already retracted.
    pub fn retract(
        &mut self,
        completion_id: CompletionId,
        actor: ActorRef,
        at: OffsetDateTime,
    ) -> Option<&ChecklistCompletion> {
        let completion = self
            .completions
            .iter_mut()
            .find(|completion| {
                completion.completion_id == completion_id && completion.is_active()
            })?;
        completion.is_deleted = true;
        completion.uncompleted_by = Some(actor);
        completion.uncompleted_at = Some(at);
        tracing::debug!(completion_id = %completion_id, "completion retracted");
        Some(&*completion)
    }
}
