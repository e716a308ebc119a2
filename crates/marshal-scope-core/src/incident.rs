use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::context::PreloadedFacts;
use crate::facts::Location;
use crate::geo::GeoPoint;

/// Checkpoint details frozen onto an incident when it is logged, so later edits to the
/// checkpoint never change who could see a historical incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    pub checkpoint_id: String,
    pub checkpoint_name: String,
    #[serde(default)]
    pub area_ids: BTreeSet<String>,
}

impl CheckpointSnapshot {
    #[must_use]
    pub fn capture(location: &Location) -> Self {
        Self {
            checkpoint_id: location.id.clone(),
            checkpoint_name: location.name.clone(),
            area_ids: location.area_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum IncidentSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: String,
    pub event_id: String,
    #[serde(default)]
    pub reported_by_marshal_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: IncidentSeverity,
    #[serde(default)]
    pub checkpoint: Option<CheckpointSnapshot>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(with = "time::serde::rfc3339")]
    pub reported_at: OffsetDateTime,
}

/// Who is asking. Admin status comes from the caller's role lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentViewer {
    pub marshal_id: Option<String>,
    pub is_event_admin: bool,
}

impl IncidentViewer {
    #[must_use]
    pub fn marshal(marshal_id: impl Into<String>) -> Self {
        Self {
            marshal_id: Some(marshal_id.into()),
            is_event_admin: false,
        }
    }

    #[must_use]
    pub fn admin() -> Self {
        Self {
            marshal_id: None,
            is_event_admin: true,
        }
    }
}

/// The first rule that grants visibility, or `Hidden`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IncidentVisibility {
    EventAdmin,
    Reporter,
    AssignedToCheckpoint { checkpoint_id: String },
    AreaLeadOfCheckpointArea { area_id: String },
    AreaLeadOfContainingArea { area_id: String },
    Hidden,
}

impl IncidentVisibility {
    #[must_use]
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Hidden)
    }
}

/// Checkpoint-chain rule over a set of anchor checkpoints and their areas.
fn chain_visibility<'a>(
    viewer_id: &str,
    checkpoint_ids: impl IntoIterator<Item = &'a str>,
    area_ids: &BTreeSet<String>,
    facts: &PreloadedFacts,
) -> Option<IncidentVisibility> {
    let assigned = facts.assignments_by_marshal.get(viewer_id);
    if let Some(checkpoint_id) = checkpoint_ids
        .into_iter()
        .find(|checkpoint_id| assigned.is_some_and(|ids| ids.contains(*checkpoint_id)))
    {
        return Some(IncidentVisibility::AssignedToCheckpoint {
            checkpoint_id: checkpoint_id.to_string(),
        });
    }
    area_ids
        .iter()
        .find(|area_id| facts.is_area_lead(viewer_id, area_id))
        .map(|area_id| IncidentVisibility::AreaLeadOfCheckpointArea {
            area_id: area_id.clone(),
        })
}

/// Only leads of a containing area qualify; assignment inside the area is not enough.
fn geographic_visibility(
    viewer_id: &str,
    point: GeoPoint,
    facts: &PreloadedFacts,
) -> Option<IncidentVisibility> {
    let lead_areas = facts.area_leads_by_marshal_id.get(viewer_id)?;
    lead_areas
        .iter()
        .filter_map(|area_id| facts.area(area_id))
        .find(|area| area.polygon.contains(point))
        .map(|area| IncidentVisibility::AreaLeadOfContainingArea {
            area_id: area.id.clone(),
        })
}

/// Decide whether `viewer` may see `incident`, and why.
///
/// Admin short-circuits, then authorship. The chain anchor is the tagged checkpoint
/// snapshot; an untagged incident with a coordinate uses the geographic rule instead;
/// one with neither falls back to the reporter's current checkpoints.
#[must_use]
pub fn resolve_visibility(
    incident: &Incident,
    viewer: &IncidentViewer,
    facts: &PreloadedFacts,
) -> IncidentVisibility {
    if viewer.is_event_admin {
        return IncidentVisibility::EventAdmin;
    }
    let Some(viewer_id) = viewer.marshal_id.as_deref() else {
        return IncidentVisibility::Hidden;
    };
    if incident.reported_by_marshal_id.as_deref() == Some(viewer_id) {
        return IncidentVisibility::Reporter;
    }

    let decision = match (&incident.checkpoint, incident.location) {
        (Some(snapshot), _) => chain_visibility(
            viewer_id,
            std::iter::once(snapshot.checkpoint_id.as_str()),
            &snapshot.area_ids,
            facts,
        ),
        (None, Some(point)) => geographic_visibility(viewer_id, point, facts),
        (None, None) => {
            let reporter_checkpoints = incident
                .reported_by_marshal_id
                .as_deref()
                .and_then(|reporter| facts.assignments_by_marshal.get(reporter))
                .cloned()
                .unwrap_or_default();
            let area_ids = reporter_checkpoints
                .iter()
                .filter_map(|checkpoint_id| facts.checkpoint_lookup().get(checkpoint_id))
                .flat_map(|location| location.area_ids.iter().cloned())
                .collect();
            chain_visibility(
                viewer_id,
                reporter_checkpoints.iter().map(String::as_str),
                &area_ids,
                facts,
            )
        }
    };

    let decision = decision.unwrap_or(IncidentVisibility::Hidden);
    tracing::trace!(
        incident_id = %incident.id,
        viewer_id,
        visible = decision.is_visible(),
        "incident visibility"
    );
    decision
}

#[must_use]
pub fn can_view_incident(
    incident: &Incident,
    viewer: &IncidentViewer,
    facts: &PreloadedFacts,
) -> bool {
    resolve_visibility(incident, viewer, facts).is_visible()
}

/// Incidents the viewer may see, newest first.
#[must_use]
pub fn visible_incidents<'a>(
    incidents: &'a [Incident],
    viewer: &IncidentViewer,
    facts: &PreloadedFacts,
) -> Vec<(&'a Incident, IncidentVisibility)> {
    let mut visible = incidents
        .iter()
        .map(|incident| (incident, resolve_visibility(incident, viewer, facts)))
        .filter(|(_, visibility)| visibility.is_visible())
        .collect::<Vec<_>>();
    visible.sort_by(|(lhs, _), (rhs, _)| {
        rhs.reported_at
            .cmp(&lhs.reported_at)
            .then_with(|| lhs.id.cmp(&rhs.id))
    });
    visible
}
