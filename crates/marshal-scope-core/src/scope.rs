use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ScopeError;

pub const ALL_MARSHALS: &str = "ALL_MARSHALS";
pub const ALL_CHECKPOINTS: &str = "ALL_CHECKPOINTS";
pub const ALL_AREAS: &str = "ALL_AREAS";

/// Precedence of a matching configuration. Declaration order is the ranking:
/// `Marshal` beats `Checkpoint` beats `Area`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Specificity {
    Marshal,
    Checkpoint,
    Area,
}

impl Specificity {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Marshal => 1,
            Self::Checkpoint => 2,
            Self::Area => 3,
        }
    }
}

/// Deduplication granularity implied by a winning scope.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
pub enum ContextType {
    #[default]
    Personal,
    Checkpoint,
    Area,
}

impl ContextType {
    #[must_use]
    pub fn is_shared(self) -> bool {
        !matches!(self, Self::Personal)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "Personal",
            Self::Checkpoint => "Checkpoint",
            Self::Area => "Area",
        }
    }
}

impl Display for ContextType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ItemType {
    Marshal,
    Checkpoint,
    Area,
}

impl ItemType {
    /// Wire sentinel meaning "every target of this type".
    #[must_use]
    pub fn all_sentinel(self) -> &'static str {
        match self {
            Self::Marshal => ALL_MARSHALS,
            Self::Checkpoint => ALL_CHECKPOINTS,
            Self::Area => ALL_AREAS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ScopeKind {
    SpecificPeople,
    EveryoneAtCheckpoints,
    EveryoneInAreas,
    Everyone,
    OnePerCheckpoint,
    OnePerArea,
    OneLeadPerArea,
    EveryAreaLead,
    #[serde(other)]
    Unrecognized,
}

impl ScopeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpecificPeople => "SpecificPeople",
            Self::EveryoneAtCheckpoints => "EveryoneAtCheckpoints",
            Self::EveryoneInAreas => "EveryoneInAreas",
            Self::Everyone => "Everyone",
            Self::OnePerCheckpoint => "OnePerCheckpoint",
            Self::OnePerArea => "OnePerArea",
            Self::OneLeadPerArea => "OneLeadPerArea",
            Self::EveryAreaLead => "EveryAreaLead",
            Self::Unrecognized => "Unrecognized",
        }
    }

    /// Unknown strings map to [`ScopeKind::Unrecognized`], which never matches.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "SpecificPeople" => Self::SpecificPeople,
            "EveryoneAtCheckpoints" => Self::EveryoneAtCheckpoints,
            "EveryoneInAreas" => Self::EveryoneInAreas,
            "Everyone" => Self::Everyone,
            "OnePerCheckpoint" => Self::OnePerCheckpoint,
            "OnePerArea" => Self::OnePerArea,
            "OneLeadPerArea" => Self::OneLeadPerArea,
            "EveryAreaLead" => Self::EveryAreaLead,
            _ => Self::Unrecognized,
        }
    }

    #[must_use]
    pub fn specificity(self) -> Specificity {
        match self {
            Self::SpecificPeople => Specificity::Marshal,
            Self::EveryoneAtCheckpoints | Self::OnePerCheckpoint => Specificity::Checkpoint,
            Self::EveryoneInAreas
            | Self::Everyone
            | Self::OnePerArea
            | Self::OneLeadPerArea
            | Self::EveryAreaLead
            | Self::Unrecognized => Specificity::Area,
        }
    }

    /// Unrecognized kinds fall back to `Personal` so any stray completion stays private.
    #[must_use]
    pub fn context_family(self) -> ContextType {
        match self {
            Self::OnePerCheckpoint => ContextType::Checkpoint,
            Self::OnePerArea | Self::OneLeadPerArea => ContextType::Area,
            Self::SpecificPeople
            | Self::EveryoneAtCheckpoints
            | Self::EveryoneInAreas
            | Self::Everyone
            | Self::EveryAreaLead
            | Self::Unrecognized => ContextType::Personal,
        }
    }

    /// The kind of id listed in `ids`, if the kind uses them at all.
    #[must_use]
    pub fn target_type(self) -> Option<ItemType> {
        match self {
            Self::SpecificPeople => Some(ItemType::Marshal),
            Self::EveryoneAtCheckpoints | Self::OnePerCheckpoint => Some(ItemType::Checkpoint),
            Self::EveryoneInAreas
            | Self::OnePerArea
            | Self::OneLeadPerArea
            | Self::EveryAreaLead => Some(ItemType::Area),
            Self::Everyone | Self::Unrecognized => None,
        }
    }
}

impl Display for ScopeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target set of one configuration. `All` replaces the wire sentinels.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TargetIds {
    All,
    Only(BTreeSet<String>),
}

impl TargetIds {
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(id),
        }
    }

    /// Ids held by the actor that this target set selects, in ascending order.
    #[must_use]
    pub fn select<'a>(&self, held: &'a BTreeSet<String>) -> Vec<&'a str> {
        held.iter()
            .filter(|id| self.contains(id))
            .map(String::as_str)
            .collect()
    }
}

/// One policy clause attached to a checklist item, note or contact.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(from = "WireScopeConfiguration", into = "WireScopeConfiguration")]
pub struct ScopeConfiguration {
    pub scope: ScopeKind,
    pub item_type: Option<ItemType>,
    pub ids: TargetIds,
}

impl ScopeConfiguration {
    #[must_use]
    pub fn new(scope: ScopeKind, ids: TargetIds) -> Self {
        Self {
            scope,
            item_type: scope.target_type(),
            ids,
        }
    }

    pub fn only<I, S>(scope: ScopeKind, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(scope, TargetIds::only(ids))
    }

    #[must_use]
    pub fn all(scope: ScopeKind) -> Self {
        Self::new(scope, TargetIds::All)
    }

    #[must_use]
    pub fn everyone() -> Self {
        Self::all(ScopeKind::Everyone)
    }

    /// Decode a JSON-encoded configuration list as stored alongside an entity.
    /// A blank column is an empty list.
    ///
    /// # Errors
    /// Returns [`ScopeError::Validation`] when the column is not a JSON array of configurations.
    pub fn list_from_json(raw: &str) -> Result<Vec<Self>, ScopeError> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(raw)
            .map_err(|err| ScopeError::Validation(format!("invalid scope configurations: {err}")))
    }

    /// Encode a configuration list into its stored JSON form.
    ///
    /// # Errors
    /// Returns [`ScopeError::Validation`] if serialization fails.
    pub fn list_to_json(configs: &[Self]) -> Result<String, ScopeError> {
        serde_json::to_string(configs).map_err(|err| {
            ScopeError::Validation(format!("cannot encode scope configurations: {err}"))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireScopeConfiguration {
    scope: ScopeKind,
    #[serde(rename = "itemType", alias = "item_type", default)]
    item_type: Option<ItemType>,
    #[serde(default)]
    ids: Vec<String>,
}

impl From<WireScopeConfiguration> for ScopeConfiguration {
    fn from(wire: WireScopeConfiguration) -> Self {
        // Only the sentinel of the kind's own target type counts; any other stays a literal id.
        let sentinel = wire.scope.target_type().map(ItemType::all_sentinel);
        let ids = if sentinel.is_some_and(|sentinel| wire.ids.iter().any(|id| id == sentinel)) {
            TargetIds::All
        } else {
            TargetIds::Only(wire.ids.into_iter().collect())
        };
        Self {
            scope: wire.scope,
            item_type: wire.item_type,
            ids,
        }
    }
}

impl From<ScopeConfiguration> for WireScopeConfiguration {
    fn from(config: ScopeConfiguration) -> Self {
        let ids = match config.ids {
            TargetIds::All => config
                .scope
                .target_type()
                .map(|target| vec![target.all_sentinel().to_string()])
                .unwrap_or_default(),
            TargetIds::Only(ids) => ids.into_iter().collect(),
        };
        Self {
            scope: config.scope,
            item_type: config.item_type,
            ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test IDs: TSCP-001
    #[test]
    fn wire_sentinel_becomes_explicit_all_variant() {
        let configs = match ScopeConfiguration::list_from_json(
            r#"[{"scope":"OnePerCheckpoint","itemType":"Checkpoint","ids":["ALL_CHECKPOINTS"]}]"#,
        ) {
            Ok(configs) => configs,
            Err(err) => panic!("configurations should decode: {err}"),
        };

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].scope, ScopeKind::OnePerCheckpoint);
        assert_eq!(configs[0].ids, TargetIds::All);
        assert_eq!(configs[0].item_type, Some(ItemType::Checkpoint));
    }

    // Test IDs: TSCP-002
    #[test]
    fn sentinel_of_another_family_stays_literal() {
        let configs = match ScopeConfiguration::list_from_json(
            r#"[{"scope":"EveryoneInAreas","itemType":"Area","ids":["ALL_MARSHALS"]}]"#,
        ) {
            Ok(configs) => configs,
            Err(err) => panic!("configurations should decode: {err}"),
        };

        assert_eq!(configs[0].ids, TargetIds::only(["ALL_MARSHALS"]));
    }

    // Test IDs: TSCP-003
    #[test]
    fn unknown_scope_kind_decodes_as_unrecognized_personal() {
        let configs = match ScopeConfiguration::list_from_json(
            r#"[{"scope":"EveryoneOnMars","itemType":null,"ids":["a"]}]"#,
        ) {
            Ok(configs) => configs,
            Err(err) => panic!("unknown kinds must not fail decoding: {err}"),
        };

        assert_eq!(configs[0].scope, ScopeKind::Unrecognized);
        assert_eq!(configs[0].scope.context_family(), ContextType::Personal);
        assert_eq!(ScopeKind::parse("EveryoneOnMars"), ScopeKind::Unrecognized);
    }

    // Test IDs: TSCP-004
    #[test]
    fn blank_column_is_empty_list_and_garbage_is_rejected() {
        assert_eq!(ScopeConfiguration::list_from_json("  "), Ok(Vec::new()));

        let err = match ScopeConfiguration::list_from_json("{not json") {
            Ok(configs) => panic!("garbage should not decode: {configs:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("invalid scope configurations"));
    }

    // Test IDs: TSCP-005
    #[test]
    fn all_variant_encodes_back_to_family_sentinel() {
        let encoded = match ScopeConfiguration::list_to_json(&[
            ScopeConfiguration::all(ScopeKind::SpecificPeople),
            ScopeConfiguration::only(ScopeKind::OnePerArea, ["area-b", "area-a"]),
        ]) {
            Ok(encoded) => encoded,
            Err(err) => panic!("configurations should encode: {err}"),
        };

        let expected = concat!(
            r#"[{"scope":"SpecificPeople","itemType":"Marshal","ids":["ALL_MARSHALS"]},"#,
            r#"{"scope":"OnePerArea","itemType":"Area","ids":["area-a","area-b"]}]"#,
        );
        assert_eq!(encoded, expected);
    }

    #[test]
    fn specificity_and_family_table() {
        assert_eq!(ScopeKind::SpecificPeople.specificity().rank(), 1);
        assert_eq!(ScopeKind::OnePerCheckpoint.specificity().rank(), 2);
        assert_eq!(ScopeKind::Everyone.specificity().rank(), 3);
        assert_eq!(
            ScopeKind::OneLeadPerArea.context_family(),
            ContextType::Area
        );
        assert_eq!(
            ScopeKind::EveryAreaLead.context_family(),
            ContextType::Personal
        );
        assert!(Specificity::Marshal < Specificity::Checkpoint);
        assert!(Specificity::Checkpoint < Specificity::Area);
    }
}
