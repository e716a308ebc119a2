use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::geo::{GeoPoint, Polygon};
use crate::ScopeError;

/// Checkpoint id to checkpoint, as handed to the evaluator.
pub type CheckpointLookup = BTreeMap<String, Location>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marshal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub person_id: Option<String>,
}

/// A checkpoint. Belongs to zero or more areas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub area_ids: BTreeSet<String>,
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Area {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub polygon: Polygon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub marshal_id: String,
    pub location_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RoleKind {
    AreaLead,
    EventAdmin,
    #[serde(other)]
    Other,
}

/// A person-linked role entry. Area-lead entries carry the areas they lead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRole {
    pub person_id: String,
    pub role: RoleKind,
    #[serde(default)]
    pub area_ids: BTreeSet<String>,
}

/// Everything the engine needs to know about one event, as delivered by the storage layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventFacts {
    pub event_id: String,
    #[serde(default)]
    pub marshals: Vec<Marshal>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub areas: Vec<Area>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub roles: Vec<EventRole>,
}

impl EventFacts {
    /// Structural checks performed once at the boundary, before any evaluation.
    ///
    /// Dangling references (an assignment to an unknown checkpoint, a checkpoint in an
    /// unknown area) are tolerated; they simply never match.
    ///
    /// # Errors
    /// Returns [`ScopeError::Validation`] for an empty event id, duplicate ids, or
    /// out-of-range coordinates.
    pub fn validate(&self) -> Result<(), ScopeError> {
        if self.event_id.trim().is_empty() {
            return Err(ScopeError::Validation("event_id MUST be provided".to_string()));
        }

        let marshal_ids = self.marshals.iter().map(|marshal| marshal.id.as_str());
        ensure_unique("marshal", marshal_ids)?;
        let location_ids = self.locations.iter().map(|location| location.id.as_str());
        ensure_unique("location", location_ids)?;
        ensure_unique("area", self.areas.iter().map(|area| area.id.as_str()))?;

        for location in &self.locations {
            if let Some(position) = &location.position {
                position.validate()?;
            }
        }
        for area in &self.areas {
            area.polygon.validate()?;
        }

        let known_locations = self
            .locations
            .iter()
            .map(|location| location.id.as_str())
            .collect::<BTreeSet<_>>();
        for assignment in &self.assignments {
            if !known_locations.contains(assignment.location_id.as_str()) {
                tracing::warn!(
                    event_id = %self.event_id,
                    marshal_id = %assignment.marshal_id,
                    location_id = %assignment.location_id,
                    "assignment references an unknown checkpoint"
                );
            }
        }

        Ok(())
    }
}

fn ensure_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ScopeError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(ScopeError::Validation(format!("{kind} id MUST be non-empty")));
        }
        if !seen.insert(id) {
            return Err(ScopeError::Validation(format!("duplicate {kind} id: {id}")));
        }
    }
    Ok(())
}

/// Read side of the storage collaborators. Implementations load facts; they never
/// take part in matching.
pub trait EventFactSource {
    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn assignments(&self, event_id: &str) -> Result<Vec<Assignment>, ScopeError>;

    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn locations(&self, event_id: &str) -> Result<Vec<Location>, ScopeError>;

    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn areas(&self, event_id: &str) -> Result<Vec<Area>, ScopeError>;

    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn marshals(&self, event_id: &str) -> Result<Vec<Marshal>, ScopeError>;

    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn roles(&self, event_id: &str) -> Result<Vec<EventRole>, ScopeError>;

    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn marshal(&self, event_id: &str, marshal_id: &str) -> Result<Option<Marshal>, ScopeError> {
        Ok(self
            .marshals(event_id)?
            .into_iter()
            .find(|marshal| marshal.id == marshal_id))
    }

    /// Checkpoint ids the marshal is assigned to.
    ///
    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn assignments_for_marshal(
        &self,
        event_id: &str,
        marshal_id: &str,
    ) -> Result<Vec<String>, ScopeError> {
        Ok(self
            .assignments(event_id)?
            .into_iter()
            .filter(|assignment| assignment.marshal_id == marshal_id)
            .map(|assignment| assignment.location_id)
            .collect())
    }

    /// # Errors
    /// Returns [`ScopeError::Facts`] when the backing store cannot deliver facts.
    fn roles_for_person(
        &self,
        event_id: &str,
        person_id: &str,
    ) -> Result<Vec<EventRole>, ScopeError> {
        Ok(self
            .roles(event_id)?
            .into_iter()
            .filter(|role| role.person_id == person_id)
            .collect())
    }
}

/// Fact source over fully materialized event facts. Unknown events have no facts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFactSource {
    events: BTreeMap<String, EventFacts>,
}

impl InMemoryFactSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, facts: EventFacts) {
        self.events.insert(facts.event_id.clone(), facts);
    }

    #[must_use]
    pub fn event(&self, event_id: &str) -> Option<&EventFacts> {
        self.events.get(event_id)
    }

    fn with_event<T>(&self, event_id: &str, select: impl FnOnce(&EventFacts) -> Vec<T>) -> Vec<T> {
        self.events.get(event_id).map(select).unwrap_or_default()
    }
}

impl FromIterator<EventFacts> for InMemoryFactSource {
    fn from_iter<I: IntoIterator<Item = EventFacts>>(iter: I) -> Self {
        let mut source = Self::new();
        for facts in iter {
            source.insert(facts);
        }
        source
    }
}

impl EventFactSource for InMemoryFactSource {
    fn assignments(&self, event_id: &str) -> Result<Vec<Assignment>, ScopeError> {
        Ok(self.with_event(event_id, |facts| facts.assignments.clone()))
    }

    fn locations(&self, event_id: &str) -> Result<Vec<Location>, ScopeError> {
        Ok(self.with_event(event_id, |facts| facts.locations.clone()))
    }

    fn areas(&self, event_id: &str) -> Result<Vec<Area>, ScopeError> {
        Ok(self.with_event(event_id, |facts| facts.areas.clone()))
    }

    fn marshals(&self, event_id: &str) -> Result<Vec<Marshal>, ScopeError> {
        Ok(self.with_event(event_id, |facts| facts.marshals.clone()))
    }

    fn roles(&self, event_id: &str) -> Result<Vec<EventRole>, ScopeError> {
        Ok(self.with_event(event_id, |facts| facts.roles.clone()))
    }
}
