use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use marshal_scope_core::{
    all_area_contexts, all_checkpoint_contexts, build_item_with_status, completion_report,
    contacts_for_marshal, default_tie_breakers, determine_completion_context, evaluate,
    items_for_marshal, notes_for_marshal, prepare_completion, resolve_visibility,
    visible_incidents, ActorRef, ActorType, ChecklistCompletion, ChecklistItem,
    ChecklistItemWithStatus, CompletionContextKey, CompletionLedger, CompletionReport, Contact,
    EventFacts, Incident, IncidentViewer, IncidentVisibility, InMemoryFactSource,
    MarshalContextBuilder, Note, NoteForMarshal, PreloadedFacts, RequestedContext, RoleKind,
    ScopeMatchResult, RULESET_VERSION,
};
pub use marshal_scope_core::ContextType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// One event as stored on disk: the facts plus every entity evaluated against them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventSnapshot {
    #[serde(flatten)]
    pub facts: EventFacts,
    #[serde(default)]
    pub checklist_items: Vec<ChecklistItem>,
    #[serde(default)]
    pub completions: CompletionLedger,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotFile {
    #[serde(default)]
    pub events: Vec<EventSnapshot>,
}

impl SnapshotFile {
    /// Parse by extension: `.yaml`/`.yml` as YAML, anything else as JSON.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, decoded, or fails fact validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot file {}", path.display()))?;
        let is_yaml = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| matches!(extension, "yaml" | "yml"));
        let file: Self = if is_yaml {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to decode YAML snapshot {}", path.display()))?
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to decode JSON snapshot {}", path.display()))?
        };
        file.validate()?;
        tracing::debug!(
            path = %path.display(),
            events = file.events.len(),
            "loaded snapshot file"
        );
        Ok(file)
    }

    /// # Errors
    /// Returns an error for duplicate event ids or invalid event facts.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for event in &self.events {
            event.facts.validate()?;
            if !seen.insert(event.facts.event_id.as_str()) {
                return Err(anyhow!("duplicate event_id in snapshot: {}", event.facts.event_id));
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when no event has this id.
    pub fn event(&self, event_id: &str) -> Result<&EventSnapshot> {
        self.events
            .iter()
            .find(|event| event.facts.event_id == event_id)
            .ok_or_else(|| anyhow!("event not found: {event_id}"))
    }

    fn fact_source(&self) -> InMemoryFactSource {
        self.events
            .iter()
            .map(|event| event.facts.clone())
            .collect()
    }
}

impl EventSnapshot {
    fn item(&self, item_id: &str) -> Result<&ChecklistItem> {
        self.checklist_items
            .iter()
            .find(|item| item.id == item_id)
            .ok_or_else(|| anyhow!("checklist item not found: {item_id}"))
    }

    fn incident(&self, incident_id: &str) -> Result<&Incident> {
        self.incidents
            .iter()
            .find(|incident| incident.id == incident_id)
            .ok_or_else(|| anyhow!("incident not found: {incident_id}"))
    }

    /// Event admin when asked explicitly, or when the marshal's person holds the role.
    fn viewer(&self, viewer: &ViewerRef) -> IncidentViewer {
        let holds_admin_role = viewer
            .marshal_id
            .as_deref()
            .and_then(|marshal_id| {
                self.facts
                    .marshals
                    .iter()
                    .find(|marshal| marshal.id == marshal_id)
            })
            .and_then(|marshal| marshal.person_id.as_deref())
            .is_some_and(|person_id| {
                self.facts
                    .roles
                    .iter()
                    .any(|role| role.person_id == person_id && role.role == RoleKind::EventAdmin)
            });
        IncidentViewer {
            marshal_id: viewer.marshal_id.clone(),
            is_event_admin: viewer.as_admin || holds_admin_role,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerRef {
    pub marshal_id: Option<String>,
    #[serde(default)]
    pub as_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemRequest {
    pub event_id: String,
    pub marshal_id: String,
    pub item_id: String,
    /// Shared context to act for. Given together with `context_id`, or not at all.
    #[serde(default)]
    pub context_type: Option<ContextType>,
    #[serde(default)]
    pub context_id: Option<String>,
}

impl ItemRequest {
    /// # Errors
    /// Returns an error when only one of `context_type` and `context_id` is set.
    pub fn requested_context(&self) -> Result<Option<RequestedContext<'_>>> {
        match (self.context_type, self.context_id.as_deref()) {
            (Some(context_type), Some(context_id)) => Ok(Some(RequestedContext {
                context_type,
                context_id,
            })),
            (None, None) => Ok(None),
            _ => Err(anyhow!("context_type and context_id MUST be given together")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarshalRequest {
    pub event_id: String,
    pub marshal_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluateItemResponse {
    pub snapshot_id: String,
    pub ruleset_version: String,
    pub tie_breakers: Vec<String>,
    pub event_id: String,
    pub marshal_id: String,
    pub item_id: String,
    pub result: ScopeMatchResult,
    pub status: ChecklistItemWithStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub marshal_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub items: Vec<ChecklistItemWithStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemContextsResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub marshal_id: String,
    pub item_id: String,
    pub winning_context: Option<CompletionContextKey>,
    /// The requested context once validated; `None` when absent or not held.
    pub requested_context: Option<CompletionContextKey>,
    pub checkpoint_contexts: Vec<String>,
    pub area_contexts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionReportResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub report: CompletionReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionPlan {
    pub snapshot_id: String,
    pub event_id: String,
    pub item_id: String,
    pub already_completed: bool,
    pub completion: Option<ChecklistCompletion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentVisibilityResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub incident_id: String,
    pub viewer: IncidentViewer,
    pub is_visible: bool,
    pub visibility: IncidentVisibility,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentView {
    pub incident: Incident,
    pub visibility: IncidentVisibility,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentsResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub viewer: IncidentViewer,
    pub incidents: Vec<IncidentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotesResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub marshal_id: String,
    pub notes: Vec<NoteForMarshal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactsResponse {
    pub snapshot_id: String,
    pub event_id: String,
    pub marshal_id: String,
    pub contacts: Vec<Contact>,
}

/// Read-only facade over a snapshot file. Every call reloads the file so each answer
/// reflects the bundle named by its `snapshot_id`.
#[derive(Debug, Clone)]
pub struct ScopeApi {
    snapshot_path: PathBuf,
}

struct Loaded {
    file: SnapshotFile,
    preloaded: PreloadedFacts,
    snapshot_id: String,
}

impl Loaded {
    fn event(&self) -> Result<&EventSnapshot> {
        self.file.event(&self.preloaded.event_id)
    }
}

impl ScopeApi {
    #[must_use]
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self { snapshot_path }
    }

    fn load(&self, event_id: &str) -> Result<Loaded> {
        let file = SnapshotFile::load(&self.snapshot_path)?;
        let event = file.event(event_id)?;
        let snapshot_id = compute_snapshot_id(event)?;
        let preloaded = MarshalContextBuilder::new(&file.fact_source()).preload(event_id)?;
        Ok(Loaded {
            file,
            preloaded,
            snapshot_id,
        })
    }

    /// Evaluate one checklist item for one marshal, optionally in a requested context.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be loaded, the event or item is unknown,
    /// or the requested context is only half given.
    pub fn evaluate_item(&self, input: &ItemRequest) -> Result<EvaluateItemResponse> {
        let requested = input.requested_context()?;
        let loaded = self.load(&input.event_id)?;
        let event = loaded.event()?;
        let item = event.item(&input.item_id)?;
        let ctx = loaded.preloaded.context_for(&input.marshal_id);
        let lookup = loaded.preloaded.checkpoint_lookup();

        let result = evaluate(&item.scope_configurations, &ctx, lookup);
        let status = build_item_with_status(
            item,
            &ctx,
            lookup,
            event.completions.all(),
            Some(&result),
            requested,
        );
        Ok(EvaluateItemResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            ruleset_version: RULESET_VERSION.to_string(),
            tie_breakers: default_tie_breakers(),
            event_id: input.event_id.clone(),
            marshal_id: input.marshal_id.clone(),
            item_id: input.item_id.clone(),
            result,
            status,
        })
    }

    /// Every checklist item visible to the marshal at `as_of` (default: now).
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be loaded or the event is unknown.
    pub fn checklist_for_marshal(&self, input: &MarshalRequest) -> Result<ChecklistResponse> {
        let loaded = self.load(&input.event_id)?;
        let event = loaded.event()?;
        let as_of = input.as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let ctx = loaded.preloaded.context_for(&input.marshal_id);
        let items = items_for_marshal(
            &event.checklist_items,
            &ctx,
            loaded.preloaded.checkpoint_lookup(),
            event.completions.all(),
            as_of,
        );
        tracing::debug!(
            event_id = %input.event_id,
            marshal_id = %input.marshal_id,
            items = items.len(),
            "checklist resolved"
        );
        Ok(ChecklistResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: input.event_id.clone(),
            marshal_id: input.marshal_id.clone(),
            as_of,
            items,
        })
    }

    /// The winning completion context plus every shared context the marshal acts for.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be loaded, the event or item is unknown,
    /// or the requested context is only half given.
    pub fn item_contexts(&self, input: &ItemRequest) -> Result<ItemContextsResponse> {
        let requested = input.requested_context()?;
        let loaded = self.load(&input.event_id)?;
        let item = loaded.event()?.item(&input.item_id)?;
        let ctx = loaded.preloaded.context_for(&input.marshal_id);
        let lookup = loaded.preloaded.checkpoint_lookup();
        let requested_context = requested.and_then(|requested| {
            determine_completion_context(item, &ctx, lookup, Some(requested))
        });
        Ok(ItemContextsResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: input.event_id.clone(),
            marshal_id: input.marshal_id.clone(),
            item_id: input.item_id.clone(),
            winning_context: determine_completion_context(item, &ctx, lookup, None),
            requested_context,
            checkpoint_contexts: all_checkpoint_contexts(&item.scope_configurations, &ctx, lookup),
            area_contexts: all_area_contexts(&item.scope_configurations, &ctx),
        })
    }

    /// # Errors
    /// Returns an error when the snapshot cannot be loaded or the event or item is unknown.
    pub fn completion_report(
        &self,
        event_id: &str,
        item_id: &str,
    ) -> Result<CompletionReportResponse> {
        let loaded = self.load(event_id)?;
        let event = loaded.event()?;
        let item = event.item(item_id)?;
        Ok(CompletionReportResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: event_id.to_string(),
            report: completion_report(item, &loaded.preloaded, event.completions.all()),
        })
    }

    /// Preview the record a completion by this marshal would append. Nothing is written.
    ///
    /// With a requested context the plan targets that context, or carries no completion
    /// when the marshal does not hold it.
    ///
    /// # Errors
    /// Returns an error when the snapshot cannot be loaded, the event or item is unknown,
    /// or the requested context is only half given.
    pub fn plan_completion(
        &self,
        input: &ItemRequest,
        at: Option<OffsetDateTime>,
    ) -> Result<CompletionPlan> {
        let requested = input.requested_context()?;
        let loaded = self.load(&input.event_id)?;
        let event = loaded.event()?;
        let item = event.item(&input.item_id)?;
        let ctx = loaded.preloaded.context_for(&input.marshal_id);
        let lookup = loaded.preloaded.checkpoint_lookup();

        let actor_type = if ctx.is_area_lead() {
            ActorType::AreaLead
        } else {
            ActorType::Marshal
        };
        let actor = ActorRef {
            actor_type,
            actor_id: input.marshal_id.clone(),
            actor_name: loaded
                .preloaded
                .marshals
                .get(&input.marshal_id)
                .map_or_else(|| input.marshal_id.clone(), |marshal| marshal.name.clone()),
        };
        let status = build_item_with_status(
            item,
            &ctx,
            lookup,
            event.completions.all(),
            None,
            requested,
        );
        let completion = prepare_completion(
            item,
            &ctx,
            lookup,
            requested,
            actor,
            at.unwrap_or_else(OffsetDateTime::now_utc),
        );
        Ok(CompletionPlan {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: input.event_id.clone(),
            item_id: input.item_id.clone(),
            already_completed: status.is_completed,
            completion,
        })
    }

    /// # Errors
    /// Returns an error when the snapshot cannot be loaded or the event or incident is unknown.
    pub fn incident_visibility(
        &self,
        event_id: &str,
        incident_id: &str,
        viewer: &ViewerRef,
    ) -> Result<IncidentVisibilityResponse> {
        let loaded = self.load(event_id)?;
        let event = loaded.event()?;
        let incident = event.incident(incident_id)?;
        let viewer = event.viewer(viewer);
        let visibility = resolve_visibility(incident, &viewer, &loaded.preloaded);
        Ok(IncidentVisibilityResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: event_id.to_string(),
            incident_id: incident_id.to_string(),
            is_visible: visibility.is_visible(),
            viewer,
            visibility,
        })
    }

    /// # Errors
    /// Returns an error when the snapshot cannot be loaded or the event is unknown.
    pub fn incidents_for_viewer(
        &self,
        event_id: &str,
        viewer: &ViewerRef,
    ) -> Result<IncidentsResponse> {
        let loaded = self.load(event_id)?;
        let event = loaded.event()?;
        let viewer = event.viewer(viewer);
        let incidents = visible_incidents(&event.incidents, &viewer, &loaded.preloaded)
            .into_iter()
            .map(|(incident, visibility)| IncidentView {
                incident: incident.clone(),
                visibility,
            })
            .collect();
        Ok(IncidentsResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: event_id.to_string(),
            viewer,
            incidents,
        })
    }

    /// # Errors
    /// Returns an error when the snapshot cannot be loaded or the event is unknown.
    pub fn notes_for_marshal(&self, event_id: &str, marshal_id: &str) -> Result<NotesResponse> {
        let loaded = self.load(event_id)?;
        let ctx = loaded.preloaded.context_for(marshal_id);
        let lookup = loaded.preloaded.checkpoint_lookup();
        Ok(NotesResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: event_id.to_string(),
            marshal_id: marshal_id.to_string(),
            notes: notes_for_marshal(&loaded.event()?.notes, &ctx, lookup),
        })
    }

    /// # Errors
    /// Returns an error when the snapshot cannot be loaded or the event is unknown.
    pub fn contacts_for_marshal(
        &self,
        event_id: &str,
        marshal_id: &str,
    ) -> Result<ContactsResponse> {
        let loaded = self.load(event_id)?;
        let ctx = loaded.preloaded.context_for(marshal_id);
        let lookup = loaded.preloaded.checkpoint_lookup();
        Ok(ContactsResponse {
            snapshot_id: loaded.snapshot_id.clone(),
            event_id: event_id.to_string(),
            marshal_id: marshal_id.to_string(),
            contacts: contacts_for_marshal(&loaded.event()?.contacts, &ctx, lookup),
        })
    }
}

fn snapshot_entries<T: Serialize>(kind: &str, values: &[T]) -> Result<Vec<String>> {
    values
        .iter()
        .map(|value| {
            let encoded = serde_json::to_string(value)
                .with_context(|| format!("failed to encode {kind} for snapshot id"))?;
            Ok(format!("{kind}:{encoded}"))
        })
        .collect()
}

/// `snap_` plus the first 16 hex digits of a SHA-256 over the event id and the sorted,
/// serialized content of every fact and entity in the event. Declaration order is ignored;
/// any edit to a field is not.
///
/// # Errors
/// Returns an error when an entity cannot be serialized.
pub fn compute_snapshot_id(event: &EventSnapshot) -> Result<String> {
    let facts = &event.facts;
    let mut entries = Vec::new();
    entries.extend(snapshot_entries("marshal", &facts.marshals)?);
    entries.extend(snapshot_entries("location", &facts.locations)?);
    entries.extend(snapshot_entries("area", &facts.areas)?);
    entries.extend(snapshot_entries("assignment", &facts.assignments)?);
    entries.extend(snapshot_entries("role", &facts.roles)?);
    entries.extend(snapshot_entries("item", &event.checklist_items)?);
    entries.extend(snapshot_entries("completion", event.completions.all())?);
    entries.extend(snapshot_entries("note", &event.notes)?);
    entries.extend(snapshot_entries("contact", &event.contacts)?);
    entries.extend(snapshot_entries("incident", &event.incidents)?);
    entries.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(facts.event_id.as_bytes());
    for entry in entries {
        hasher.update(b"\n");
        hasher.update(entry.as_bytes());
    }
    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    Ok(format!("snap_{}", &digest_hex[..16]))
}
