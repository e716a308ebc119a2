use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::context::{MarshalContext, PreloadedFacts};
use crate::evaluator::{all_area_contexts, all_checkpoint_contexts, evaluate, ScopeMatchResult};
use crate::facts::CheckpointLookup;
use crate::ledger::{ActorRef, ActorType, ChecklistCompletion, CompletionId};
use crate::scope::{ContextType, ScopeConfiguration, ScopeKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    pub id: String,
    pub event_id: String,
    pub text: String,
    #[serde(default)]
    pub scope_configurations: Vec<ScopeConfiguration>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub visible_from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub visible_until: Option<OffsetDateTime>,
}

impl ChecklistItem {
    /// Both bounds are inclusive and optional; an open bound is always satisfied.
    #[must_use]
    pub fn is_visible_at(&self, now: OffsetDateTime) -> bool {
        !self.visible_from.is_some_and(|from| now < from)
            && !self.visible_until.is_some_and(|until| now > until)
    }
}

/// A context the actor asks to act in, such as the second of two assigned checkpoints.
///
/// `None` in its place means "whatever the evaluator picks".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedContext<'a> {
    pub context_type: ContextType,
    pub context_id: &'a str,
}

impl<'a> RequestedContext<'a> {
    #[must_use]
    pub fn checkpoint(checkpoint_id: &'a str) -> Self {
        Self {
            context_type: ContextType::Checkpoint,
            context_id: checkpoint_id,
        }
    }

    #[must_use]
    pub fn area(area_id: &'a str) -> Self {
        Self {
            context_type: ContextType::Area,
            context_id: area_id,
        }
    }
}

/// The dedup key an actor's completion of an item is filed under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionContextKey {
    pub context_type: ContextType,
    pub context_id: String,
    pub scope: ScopeKind,
}

impl CompletionContextKey {
    fn from_match(result: &ScopeMatchResult) -> Option<Self> {
        Some(Self {
            context_type: result.context_type,
            context_id: result.context_id.clone()?,
            scope: result.winning_scope()?,
        })
    }

    fn covers(&self, completion: &ChecklistCompletion, item_id: &str, viewer_id: &str) -> bool {
        if completion.item_id != item_id || !completion.is_active() {
            return false;
        }
        match self.context_type {
            ContextType::Personal => {
                completion.context_owner_marshal_id.as_deref() == Some(viewer_id)
            }
            ContextType::Checkpoint | ContextType::Area => {
                completion.completion_context_type == self.context_type
                    && completion.completion_context_id == self.context_id
            }
        }
    }
}

/// Display-ready projection of one item for one viewer in one completion context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItemWithStatus {
    pub item_id: String,
    pub event_id: String,
    pub text: String,
    pub display_order: i32,
    pub is_required: bool,
    pub is_completed: bool,
    pub can_complete: bool,
    pub completed_by_actor_name: Option<String>,
    pub completed_by_actor_id: Option<String>,
    pub completed_by_actor_type: Option<ActorType>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub matched_scope: Option<ScopeKind>,
    pub completion_context_type: Option<ContextType>,
    pub completion_context_id: Option<String>,
    pub context_owner_marshal_id: Option<String>,
}

#[must_use]
pub fn is_relevant(item: &ChecklistItem, ctx: &MarshalContext, lookup: &CheckpointLookup) -> bool {
    evaluate(&item.scope_configurations, ctx, lookup).is_relevant
}

/// Write access. Same rule set as [`is_relevant`] today; kept apart so the two can diverge.
#[must_use]
pub fn can_complete(item: &ChecklistItem, ctx: &MarshalContext, lookup: &CheckpointLookup) -> bool {
    evaluate(&item.scope_configurations, ctx, lookup).is_relevant
}

/// Lowest area scope kind under which `area_id` is a shared context for the actor.
fn area_scope_for(
    configs: &[ScopeConfiguration],
    ctx: &MarshalContext,
    area_id: &str,
) -> Option<ScopeKind> {
    let eligible = ctx.eligible_area_ids();
    configs
        .iter()
        .filter(|config| {
            let held = match config.scope {
                ScopeKind::OnePerArea => &eligible,
                ScopeKind::OneLeadPerArea => &ctx.area_lead_for_area_ids,
                _ => return false,
            };
            config.ids.select(held).contains(&area_id)
        })
        .map(|config| config.scope)
        .min()
}

fn resolve_context(
    item: &ChecklistItem,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    result: &ScopeMatchResult,
    requested: Option<RequestedContext<'_>>,
) -> Option<CompletionContextKey> {
    let Some(requested) = requested else {
        return CompletionContextKey::from_match(result);
    };
    let configs = &item.scope_configurations;
    let scope = match requested.context_type {
        ContextType::Personal => {
            return CompletionContextKey::from_match(result).filter(|key| {
                key.context_type == ContextType::Personal
                    && key.context_id == requested.context_id
            });
        }
        ContextType::Checkpoint => all_checkpoint_contexts(configs, ctx, lookup)
            .iter()
            .any(|checkpoint_id| checkpoint_id == requested.context_id)
            .then_some(ScopeKind::OnePerCheckpoint),
        ContextType::Area => area_scope_for(configs, ctx, requested.context_id),
    };
    let Some(scope) = scope else {
        tracing::debug!(
            marshal_id = %ctx.marshal_id,
            item_id = %item.id,
            context_type = %requested.context_type,
            context_id = %requested.context_id,
            "requested completion context is not held by the actor"
        );
        return None;
    };
    Some(CompletionContextKey {
        context_type: requested.context_type,
        context_id: requested.context_id.to_string(),
        scope,
    })
}

/// The context a completion would be filed under: `requested` when the actor holds it,
/// otherwise the evaluator's winner when nothing is requested.
///
/// A requested context the actor does not hold yields `None`.
#[must_use]
pub fn determine_completion_context(
    item: &ChecklistItem,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    requested: Option<RequestedContext<'_>>,
) -> Option<CompletionContextKey> {
    let result = evaluate(&item.scope_configurations, ctx, lookup);
    resolve_context(item, ctx, lookup, &result, requested)
}

fn latest_covering<'c>(
    key: &CompletionContextKey,
    item: &ChecklistItem,
    ctx: &MarshalContext,
    completions: &'c [ChecklistCompletion],
) -> Option<&'c ChecklistCompletion> {
    completions
        .iter()
        .filter(|completion| key.covers(completion, &item.id, &ctx.marshal_id))
        .max_by(|lhs, rhs| {
            lhs.completed_at
                .cmp(&rhs.completed_at)
                .then_with(|| lhs.completion_id.cmp(&rhs.completion_id))
        })
}

/// True iff an active completion exists in the resolved context.
#[must_use]
pub fn is_completed_in_context(
    item: &ChecklistItem,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    completions: &[ChecklistCompletion],
    requested: Option<RequestedContext<'_>>,
) -> bool {
    determine_completion_context(item, ctx, lookup, requested)
        .is_some_and(|key| latest_covering(&key, item, ctx, completions).is_some())
}

/// Combine relevance, completion state and context into one display record. Pass
/// `precomputed` when the caller already evaluated this item for this viewer.
#[must_use]
pub fn build_item_with_status(
    item: &ChecklistItem,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    completions: &[ChecklistCompletion],
    precomputed: Option<&ScopeMatchResult>,
    requested: Option<RequestedContext<'_>>,
) -> ChecklistItemWithStatus {
    let computed;
    let result = if let Some(result) = precomputed {
        result
    } else {
        computed = evaluate(&item.scope_configurations, ctx, lookup);
        &computed
    };
    let key = resolve_context(item, ctx, lookup, result, requested);
    let completion = key
        .as_ref()
        .and_then(|key| latest_covering(key, item, ctx, completions));
    let completed_by = completion.map(|completion| &completion.completed_by);

    ChecklistItemWithStatus {
        item_id: item.id.clone(),
        event_id: item.event_id.clone(),
        text: item.text.clone(),
        display_order: item.display_order,
        is_required: item.is_required,
        is_completed: completion.is_some(),
        can_complete: result.is_relevant && key.is_some(),
        completed_by_actor_name: completed_by.map(|actor| actor.actor_name.clone()),
        completed_by_actor_id: completed_by.map(|actor| actor.actor_id.clone()),
        completed_by_actor_type: completed_by.map(|actor| actor.actor_type),
        completed_at: completion.map(|completion| completion.completed_at),
        matched_scope: key
            .as_ref()
            .map(|key| key.scope)
            .or_else(|| result.winning_scope()),
        completion_context_type: key.as_ref().map(|key| key.context_type),
        completion_context_id: key.as_ref().map(|key| key.context_id.clone()),
        context_owner_marshal_id: key
            .as_ref()
            .filter(|key| key.context_type == ContextType::Personal)
            .map(|_| ctx.marshal_id.clone()),
    }
}

/// The record an upstream handler appends when `actor` completes `item` on behalf of
/// `ctx` in `requested` (or the winning context). `None` when the actor cannot complete
/// the item there.
///
/// Existing completions are deliberately not consulted: concurrent submissions for one
/// shared context may both be written.
#[must_use]
pub fn prepare_completion(
    item: &ChecklistItem,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    requested: Option<RequestedContext<'_>>,
    actor: ActorRef,
    at: OffsetDateTime,
) -> Option<ChecklistCompletion> {
    let key = determine_completion_context(item, ctx, lookup, requested)?;
    Some(ChecklistCompletion {
        completion_id: CompletionId::new(),
        event_id: item.event_id.clone(),
        item_id: item.id.clone(),
        context_owner_marshal_id: (key.context_type == ContextType::Personal)
            .then(|| ctx.marshal_id.clone()),
        completion_context_type: key.context_type,
        completion_context_id: key.context_id,
        completed_by: actor,
        completed_at: at,
        is_deleted: false,
        uncompleted_by: None,
        uncompleted_at: None,
    })
}

/// One row per completion context the viewer holds on a visible, relevant item.
fn rows_for_item(
    item: &ChecklistItem,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    completions: &[ChecklistCompletion],
) -> Vec<ChecklistItemWithStatus> {
    let result = evaluate(&item.scope_configurations, ctx, lookup);
    if !result.is_relevant {
        return Vec::new();
    }
    if !result.context_type.is_shared() {
        return vec![build_item_with_status(item, ctx, lookup, completions, Some(&result), None)];
    }

    let shared_status = |context| {
        build_item_with_status(item, ctx, lookup, completions, Some(&result), Some(context))
    };
    let checkpoint_ids = all_checkpoint_contexts(&item.scope_configurations, ctx, lookup);
    let area_ids = all_area_contexts(&item.scope_configurations, ctx);
    let mut rows = checkpoint_ids
        .iter()
        .map(|checkpoint_id| shared_status(RequestedContext::checkpoint(checkpoint_id)))
        .collect::<Vec<_>>();
    rows.extend(
        area_ids
            .iter()
            .map(|area_id| shared_status(RequestedContext::area(area_id))),
    );
    rows
}

/// Items the marshal should see right now, with status, in display order.
///
/// A shared item yields one row per checkpoint or area the marshal acts for, checkpoints
/// first, so each context can be completed on its own.
#[must_use]
pub fn items_for_marshal(
    items: &[ChecklistItem],
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
    completions: &[ChecklistCompletion],
    now: OffsetDateTime,
) -> Vec<ChecklistItemWithStatus> {
    let mut visible = items
        .iter()
        .filter(|item| item.is_visible_at(now))
        .flat_map(|item| rows_for_item(item, ctx, lookup, completions))
        .collect::<Vec<_>>();
    visible.sort_by(|lhs, rhs| {
        lhs.display_order
            .cmp(&rhs.display_order)
            .then_with(|| lhs.item_id.cmp(&rhs.item_id))
    });
    visible
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextCompletionStatus {
    pub context_type: ContextType,
    pub context_id: String,
    pub is_completed: bool,
    pub completed_by: Option<ActorRef>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Admin view of one item across every shared context it applies to in the event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionReport {
    pub item_id: String,
    pub checkpoint_contexts: Vec<ContextCompletionStatus>,
    pub area_contexts: Vec<ContextCompletionStatus>,
    pub personal_completions: usize,
}

fn context_status(
    item: &ChecklistItem,
    context_type: ContextType,
    context_id: String,
    completions: &[ChecklistCompletion],
) -> ContextCompletionStatus {
    let latest = completions
        .iter()
        .filter(|completion| {
            completion.item_id == item.id
                && completion.is_active()
                && completion.completion_context_type == context_type
                && completion.completion_context_id == context_id
        })
        .max_by(|lhs, rhs| {
            lhs.completed_at
                .cmp(&rhs.completed_at)
                .then_with(|| lhs.completion_id.cmp(&rhs.completion_id))
        });
    ContextCompletionStatus {
        context_type,
        context_id,
        is_completed: latest.is_some(),
        completed_by: latest.map(|completion| completion.completed_by.clone()),
        completed_at: latest.map(|completion| completion.completed_at),
    }
}

#[must_use]
pub fn completion_report(
    item: &ChecklistItem,
    facts: &PreloadedFacts,
    completions: &[ChecklistCompletion],
) -> CompletionReport {
    let mut checkpoint_ids = BTreeSet::new();
    let mut area_ids = BTreeSet::new();
    for marshal_id in facts.marshal_ids() {
        let ctx = facts.context_for(marshal_id);
        checkpoint_ids.extend(all_checkpoint_contexts(
            &item.scope_configurations,
            &ctx,
            facts.checkpoint_lookup(),
        ));
        area_ids.extend(all_area_contexts(&item.scope_configurations, &ctx));
    }

    CompletionReport {
        item_id: item.id.clone(),
        checkpoint_contexts: checkpoint_ids
            .into_iter()
            .map(|id| context_status(item, ContextType::Checkpoint, id, completions))
            .collect(),
        area_contexts: area_ids
            .into_iter()
            .map(|id| context_status(item, ContextType::Area, id, completions))
            .collect(),
        personal_completions: completions
            .iter()
            .filter(|completion| {
                completion.item_id == item.id
                    && completion.is_active()
                    && completion.completion_context_type == ContextType::Personal
            })
            .count(),
    }
}
