use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::facts::{
    Area, Assignment, CheckpointLookup, EventFactSource, EventRole, Location, Marshal, RoleKind,
};
use crate::ScopeError;

/// Flat, comparison-ready facts about one actor. Built per request, never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarshalContext {
    pub marshal_id: String,
    pub assigned_area_ids: BTreeSet<String>,
    pub assigned_location_ids: BTreeSet<String>,
    pub area_lead_for_area_ids: BTreeSet<String>,
}

impl MarshalContext {
    #[must_use]
    pub fn new(marshal_id: impl Into<String>) -> Self {
        Self {
            marshal_id: marshal_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_area_lead(&self) -> bool {
        !self.area_lead_for_area_ids.is_empty()
    }

    #[must_use]
    pub fn leads_area(&self, area_id: &str) -> bool {
        self.area_lead_for_area_ids.contains(area_id)
    }

    #[must_use]
    pub fn leads_any_area_of(&self, location: &Location) -> bool {
        location
            .area_ids
            .iter()
            .any(|area_id| self.leads_area(area_id))
    }

    /// Checkpoints the actor may act for: direct assignments plus every checkpoint in
    /// an area the actor leads.
    #[must_use]
    pub fn eligible_checkpoint_ids(&self, lookup: &CheckpointLookup) -> BTreeSet<String> {
        let mut eligible = self.assigned_location_ids.clone();
        if self.is_area_lead() {
            eligible.extend(
                lookup
                    .values()
                    .filter(|location| self.leads_any_area_of(location))
                    .map(|location| location.id.clone()),
            );
        }
        eligible
    }

    /// Areas the actor belongs to through an assignment or leads.
    #[must_use]
    pub fn eligible_area_ids(&self) -> BTreeSet<String> {
        self.assigned_area_ids
            .union(&self.area_lead_for_area_ids)
            .cloned()
            .collect()
    }
}

fn derive_area_ids<'a>(
    location_ids: impl IntoIterator<Item = &'a String>,
    lookup: &CheckpointLookup,
) -> BTreeSet<String> {
    location_ids
        .into_iter()
        .filter_map(|location_id| lookup.get(location_id))
        .flat_map(|location| location.area_ids.iter().cloned())
        .collect()
}

fn lead_area_ids<'a>(roles: impl IntoIterator<Item = &'a EventRole>) -> BTreeSet<String> {
    roles
        .into_iter()
        .filter(|role| role.role == RoleKind::AreaLead)
        .flat_map(|role| role.area_ids.iter().cloned())
        .collect()
}

/// One event's facts, indexed once so that contexts for many marshals (or many items
/// for one marshal) can be built without refetching. Read-only during evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreloadedFacts {
    pub event_id: String,
    pub assignments_by_marshal: BTreeMap<String, BTreeSet<String>>,
    pub locations_by_id: CheckpointLookup,
    pub areas: BTreeMap<String, Area>,
    pub area_leads_by_marshal_id: BTreeMap<String, BTreeSet<String>>,
    pub marshals: BTreeMap<String, Marshal>,
}

impl PreloadedFacts {
    #[must_use]
    pub fn from_parts(
        event_id: &str,
        marshals: Vec<Marshal>,
        locations: Vec<Location>,
        areas: Vec<Area>,
        assignments: Vec<Assignment>,
        roles: &[EventRole],
    ) -> Self {
        let mut assignments_by_marshal: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for assignment in assignments {
            assignments_by_marshal
                .entry(assignment.marshal_id)
                .or_default()
                .insert(assignment.location_id);
        }

        let mut area_leads_by_marshal_id = BTreeMap::new();
        for marshal in &marshals {
            let Some(person_id) = &marshal.person_id else {
                continue;
            };
            let lead_ids = lead_area_ids(roles.iter().filter(|role| &role.person_id == person_id));
            if !lead_ids.is_empty() {
                area_leads_by_marshal_id.insert(marshal.id.clone(), lead_ids);
            }
        }

        Self {
            event_id: event_id.to_string(),
            assignments_by_marshal,
            locations_by_id: locations
                .into_iter()
                .map(|location| (location.id.clone(), location))
                .collect(),
            areas: areas
                .into_iter()
                .map(|area| (area.id.clone(), area))
                .collect(),
            area_leads_by_marshal_id,
            marshals: marshals
                .into_iter()
                .map(|marshal| (marshal.id.clone(), marshal))
                .collect(),
        }
    }

    /// Build one marshal's context from the preloaded indexes. An unknown marshal gets
    /// an empty context.
    #[must_use]
    pub fn context_for(&self, marshal_id: &str) -> MarshalContext {
        let assigned_location_ids = self
            .assignments_by_marshal
            .get(marshal_id)
            .cloned()
            .unwrap_or_default();
        MarshalContext {
            marshal_id: marshal_id.to_string(),
            assigned_area_ids: derive_area_ids(&assigned_location_ids, &self.locations_by_id),
            assigned_location_ids,
            area_lead_for_area_ids: self
                .area_leads_by_marshal_id
                .get(marshal_id)
                .cloned()
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn checkpoint_lookup(&self) -> &CheckpointLookup {
        &self.locations_by_id
    }

    #[must_use]
    pub fn area(&self, area_id: &str) -> Option<&Area> {
        self.areas.get(area_id)
    }

    #[must_use]
    pub fn is_area_lead(&self, marshal_id: &str, area_id: &str) -> bool {
        self.area_leads_by_marshal_id
            .get(marshal_id)
            .is_some_and(|areas| areas.contains(area_id))
    }

    /// Every marshal known to the event, plus anyone with an assignment but no marshal row.
    #[must_use]
    pub fn marshal_ids(&self) -> BTreeSet<&str> {
        self.marshals
            .keys()
            .chain(self.assignments_by_marshal.keys())
            .map(String::as_str)
            .collect()
    }

    #[must_use]
    pub fn marshals_assigned_to(&self, location_id: &str) -> BTreeSet<&str> {
        self.assignments_by_marshal
            .iter()
            .filter(|(_, location_ids)| location_ids.contains(location_id))
            .map(|(marshal_id, _)| marshal_id.as_str())
            .collect()
    }

    #[must_use]
    pub fn area_leads_of(&self, area_id: &str) -> BTreeSet<&str> {
        self.area_leads_by_marshal_id
            .iter()
            .filter(|(_, area_ids)| area_ids.contains(area_id))
            .map(|(marshal_id, _)| marshal_id.as_str())
            .collect()
    }
}

/// Gathers [`MarshalContext`] facts from a storage collaborator.
pub struct MarshalContextBuilder<'a, S: EventFactSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: EventFactSource + ?Sized> MarshalContextBuilder<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Fetch just the facts one marshal needs.
    ///
    /// A missing marshal or a marshal without a linked person yields no area-lead ids.
    ///
    /// # Errors
    /// Propagates [`ScopeError::Facts`] from the fact source.
    pub fn build(&self, event_id: &str, marshal_id: &str) -> Result<MarshalContext, ScopeError> {
        let assigned_location_ids = self
            .source
            .assignments_for_marshal(event_id, marshal_id)?
            .into_iter()
            .collect::<BTreeSet<_>>();
        let lookup = self
            .source
            .locations(event_id)?
            .into_iter()
            .map(|location| (location.id.clone(), location))
            .collect::<CheckpointLookup>();

        let person_id = self
            .source
            .marshal(event_id, marshal_id)?
            .and_then(|marshal| marshal.person_id);
        let area_lead_for_area_ids = match person_id {
            Some(person_id) => lead_area_ids(&self.source.roles_for_person(event_id, &person_id)?),
            None => {
                tracing::trace!(event_id, marshal_id, "no linked person; no area-lead roles");
                BTreeSet::new()
            }
        };

        let context = MarshalContext {
            marshal_id: marshal_id.to_string(),
            assigned_area_ids: derive_area_ids(&assigned_location_ids, &lookup),
            assigned_location_ids,
            area_lead_for_area_ids,
        };
        tracing::debug!(
            event_id,
            marshal_id,
            locations = context.assigned_location_ids.len(),
            areas = context.assigned_area_ids.len(),
            lead_areas = context.area_lead_for_area_ids.len(),
            "built marshal context"
        );
        Ok(context)
    }

    /// Fetch every fact for the event once.
    ///
    /// # Errors
    /// Propagates [`ScopeError::Facts`] from the fact source.
    pub fn preload(&self, event_id: &str) -> Result<PreloadedFacts, ScopeError> {
        let roles = self.source.roles(event_id)?;
        let preloaded = PreloadedFacts::from_parts(
            event_id,
            self.source.marshals(event_id)?,
            self.source.locations(event_id)?,
            self.source.areas(event_id)?,
            self.source.assignments(event_id)?,
            &roles,
        );
        tracing::debug!(
            event_id,
            marshals = preloaded.marshals.len(),
            locations = preloaded.locations_by_id.len(),
            areas = preloaded.areas.len(),
            "preloaded event facts"
        );
        Ok(preloaded)
    }
}
