use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::context::MarshalContext;
use crate::facts::CheckpointLookup;
use crate::scope::{ContextType, ScopeConfiguration, ScopeKind, Specificity, TargetIds};

pub const RULESET_VERSION: &str = "scope-ordering.v1";

/// Outcome of evaluating one entity's configurations for one actor.
///
/// When `is_relevant` is false there is no winner, no specificity and no context id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeMatchResult {
    pub is_relevant: bool,
    pub winning_config: Option<ScopeConfiguration>,
    pub specificity: Option<Specificity>,
    pub context_type: ContextType,
    pub context_id: Option<String>,
}

impl ScopeMatchResult {
    #[must_use]
    pub fn not_relevant() -> Self {
        Self {
            is_relevant: false,
            winning_config: None,
            specificity: None,
            context_type: ContextType::Personal,
            context_id: None,
        }
    }

    #[must_use]
    pub fn winning_scope(&self) -> Option<ScopeKind> {
        self.winning_config.as_ref().map(|config| config.scope)
    }
}

#[derive(Debug, Clone)]
struct MatchCandidate<'a> {
    config: &'a ScopeConfiguration,
    specificity: Specificity,
    context_type: ContextType,
    context_id: String,
    matched_id: Option<String>,
}

impl MatchCandidate<'_> {
    fn is_personal(&self) -> bool {
        !self.context_type.is_shared()
    }

    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        lhs.specificity
            .cmp(&rhs.specificity)
            .then_with(|| lhs.is_personal().cmp(&rhs.is_personal()))
            .then_with(|| lhs.context_id.cmp(&rhs.context_id))
            .then_with(|| lhs.config.scope.cmp(&rhs.config.scope))
            .then_with(|| lhs.matched_id.cmp(&rhs.matched_id))
            .then_with(|| lhs.config.cmp(rhs.config))
    }
}

#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec![
        "specificity asc (marshal, checkpoint, area)".to_string(),
        "shared context before personal".to_string(),
        "context_id asc".to_string(),
        "scope_kind asc".to_string(),
        "matched_id asc".to_string(),
        "configuration asc".to_string(),
    ]
}

fn personal<'a>(
    config: &'a ScopeConfiguration,
    ctx: &MarshalContext,
    matched_id: Option<&str>,
) -> MatchCandidate<'a> {
    MatchCandidate {
        config,
        specificity: config.scope.specificity(),
        context_type: ContextType::Personal,
        context_id: ctx.marshal_id.clone(),
        matched_id: matched_id.map(str::to_string),
    }
}

fn shared<'a>(
    config: &'a ScopeConfiguration,
    context_type: ContextType,
    context_id: &str,
) -> MatchCandidate<'a> {
    MatchCandidate {
        config,
        specificity: config.scope.specificity(),
        context_type,
        context_id: context_id.to_string(),
        matched_id: Some(context_id.to_string()),
    }
}

/// Lowest id in `held` selected by `ids`; `All` with nothing held falls back to `None`.
fn first_selected<'h>(ids: &TargetIds, held: &'h BTreeSet<String>) -> Option<&'h str> {
    ids.select(held).into_iter().next()
}

/// Test one configuration. Each configuration contributes at most one candidate: the
/// lowest matching id, so a multi-id clause stays deterministic.
fn candidate_for<'a>(
    config: &'a ScopeConfiguration,
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
) -> Option<MatchCandidate<'a>> {
    match config.scope {
        ScopeKind::SpecificPeople => match &config.ids {
            TargetIds::All => Some(personal(config, ctx, None)),
            TargetIds::Only(ids) if ids.contains(&ctx.marshal_id) => {
                Some(personal(config, ctx, Some(ctx.marshal_id.as_str())))
            }
            TargetIds::Only(_) => None,
        },
        ScopeKind::EveryoneAtCheckpoints => match &config.ids {
            TargetIds::All => Some(personal(config, ctx, None)),
            ids => first_selected(ids, &ctx.assigned_location_ids)
                .map(|matched| personal(config, ctx, Some(matched))),
        },
        ScopeKind::EveryoneInAreas => match &config.ids {
            TargetIds::All => Some(personal(config, ctx, None)),
            ids => first_selected(ids, &ctx.assigned_area_ids)
                .map(|matched| personal(config, ctx, Some(matched))),
        },
        ScopeKind::Everyone => Some(personal(config, ctx, None)),
        ScopeKind::EveryAreaLead => first_selected(&config.ids, &ctx.area_lead_for_area_ids)
            .map(|matched| personal(config, ctx, Some(matched))),
        ScopeKind::OnePerCheckpoint => {
            let eligible = ctx.eligible_checkpoint_ids(lookup);
            first_selected(&config.ids, &eligible)
                .map(|matched| shared(config, ContextType::Checkpoint, matched))
        }
        ScopeKind::OnePerArea => {
            let eligible = ctx.eligible_area_ids();
            first_selected(&config.ids, &eligible)
                .map(|matched| shared(config, ContextType::Area, matched))
        }
        ScopeKind::OneLeadPerArea => first_selected(&config.ids, &ctx.area_lead_for_area_ids)
            .map(|matched| shared(config, ContextType::Area, matched)),
        ScopeKind::Unrecognized => {
            tracing::warn!(
                marshal_id = %ctx.marshal_id,
                "scope configuration has an unrecognized scope kind; it never matches"
            );
            None
        }
    }
}

/// Pick the single most specific matching configuration and derive its completion context.
///
/// Pure over its inputs: the same configurations in any order give the same result.
#[must_use]
pub fn evaluate(
    configs: &[ScopeConfiguration],
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
) -> ScopeMatchResult {
    let candidates = configs
        .iter()
        .filter_map(|config| candidate_for(config, ctx, lookup))
        .collect::<Vec<_>>();
    tracing::trace!(
        marshal_id = %ctx.marshal_id,
        configs = configs.len(),
        candidates = candidates.len(),
        "evaluated scope configurations"
    );

    let Some(winner) = candidates.into_iter().min_by(MatchCandidate::cmp) else {
        return ScopeMatchResult::not_relevant();
    };
    tracing::debug!(
        marshal_id = %ctx.marshal_id,
        scope = %winner.config.scope,
        context_type = %winner.context_type,
        context_id = %winner.context_id,
        "scope winner selected"
    );

    ScopeMatchResult {
        is_relevant: true,
        winning_config: Some(winner.config.clone()),
        specificity: Some(winner.specificity),
        context_type: winner.context_type,
        context_id: Some(winner.context_id),
    }
}

/// Every checkpoint at which the actor shares a `OnePerCheckpoint` completion, not just
/// the winning one. Used for reporting.
#[must_use]
pub fn all_checkpoint_contexts(
    configs: &[ScopeConfiguration],
    ctx: &MarshalContext,
    lookup: &CheckpointLookup,
) -> Vec<String> {
    let eligible = ctx.eligible_checkpoint_ids(lookup);
    configs
        .iter()
        .filter(|config| config.scope == ScopeKind::OnePerCheckpoint)
        .flat_map(|config| config.ids.select(&eligible))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Every area at which the actor shares a `OnePerArea`/`OneLeadPerArea` completion.
#[must_use]
pub fn all_area_contexts(configs: &[ScopeConfiguration], ctx: &MarshalContext) -> Vec<String> {
    let eligible = ctx.eligible_area_ids();
    let mut area_ids = BTreeSet::new();
    for config in configs {
        let selected = match config.scope {
            ScopeKind::OnePerArea => config.ids.select(&eligible),
            ScopeKind::OneLeadPerArea => config.ids.select(&ctx.area_lead_for_area_ids),
            _ => continue,
        };
        area_ids.extend(selected.into_iter().map(str::to_string));
    }
    area_ids.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::facts::Location;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    fn location(id: &str, area_ids: &[&str]) -> Location {
        Location {
            id: id.to_string(),
            name: id.to_string(),
            area_ids: set(area_ids),
            position: None,
        }
    }

    /// c1, c2 in a1; c3 in a1 and a2; c4 in a2.
    fn lookup() -> CheckpointLookup {
        [
            location("c1", &["a1"]),
            location("c2", &["a1"]),
            location("c3", &["a1", "a2"]),
            location("c4", &["a2"]),
        ]
        .into_iter()
        .map(|location| (location.id.clone(), location))
        .collect()
    }

    fn ctx(marshal_id: &str, locations: &[&str], lead_areas: &[&str]) -> MarshalContext {
        let lookup = lookup();
        let assigned_location_ids = set(locations);
        let assigned_area_ids = assigned_location_ids
            .iter()
            .filter_map(|id| lookup.get(id))
            .flat_map(|location| location.area_ids.iter().cloned())
            .collect();
        MarshalContext {
            marshal_id: marshal_id.to_string(),
            assigned_area_ids,
            assigned_location_ids,
            area_lead_for_area_ids: set(lead_areas),
        }
    }

    fn config(scope: ScopeKind, ids: &[&str]) -> ScopeConfiguration {
        ScopeConfiguration::only(scope, ids.iter().copied())
    }

    fn eval(configs: &[ScopeConfiguration], ctx: &MarshalContext) -> ScopeMatchResult {
        evaluate(configs, ctx, &lookup())
    }

    // Test IDs: TEVAL-001
    #[test]
    fn empty_configuration_list_is_not_relevant() {
        let result = eval(&[], &ctx("m1", &["c1"], &[]));
        assert_eq!(result, ScopeMatchResult::not_relevant());
        assert!(result.winning_config.is_none());
        assert!(result.context_id.is_none());
    }

    // Test IDs: TEVAL-002
    #[test]
    fn empty_ids_never_match() {
        let marshal = ctx("m1", &["c1"], &["a1"]);
        for scope in [
            ScopeKind::SpecificPeople,
            ScopeKind::EveryoneAtCheckpoints,
            ScopeKind::EveryoneInAreas,
            ScopeKind::OnePerCheckpoint,
            ScopeKind::OnePerArea,
            ScopeKind::OneLeadPerArea,
            ScopeKind::EveryAreaLead,
        ] {
            let result = eval(&[config(scope, &[])], &marshal);
            assert!(!result.is_relevant, "{scope} with no ids must not match");
        }
    }

    // Test IDs: TEVAL-003
    #[test]
    fn sentinels_satisfy_their_family_tests() {
        let marshal = ctx("m1", &["c1"], &[]);
        for scope in [
            ScopeKind::SpecificPeople,
            ScopeKind::EveryoneAtCheckpoints,
            ScopeKind::EveryoneInAreas,
        ] {
            let result = eval(&[ScopeConfiguration::all(scope)], &marshal);
            assert!(result.is_relevant, "{scope} with sentinel must match");
            assert_eq!(result.context_type, ContextType::Personal);
            assert_eq!(result.context_id.as_deref(), Some("m1"));
        }
        assert!(eval(&[ScopeConfiguration::everyone()], &marshal).is_relevant);
    }

    // Test IDs: TEVAL-004
    #[test]
    fn marshal_rank_beats_area_rank_regardless_of_order() {
        let marshal = ctx("m1", &["c1"], &[]);
        let named = config(ScopeKind::SpecificPeople, &["m1"]);
        let area_wide = config(ScopeKind::OnePerArea, &["a1"]);

        for configs in [
            vec![named.clone(), area_wide.clone()],
            vec![area_wide, named.clone()],
        ] {
            let result = eval(&configs, &marshal);
            assert_eq!(result.winning_config.as_ref(), Some(&named));
            assert_eq!(result.specificity, Some(Specificity::Marshal));
            assert_eq!(result.context_type, ContextType::Personal);
            assert_eq!(result.context_id.as_deref(), Some("m1"));
        }
    }

    // Test IDs: TEVAL-005
    #[test]
    fn multi_checkpoint_config_uses_matching_id_as_context() {
        let marshal = ctx("m1", &["c2"], &[]);
        let configs = [config(ScopeKind::OnePerCheckpoint, &["c1", "c2", "c4"])];
        let result = eval(&configs, &marshal);

        assert_eq!(result.context_type, ContextType::Checkpoint);
        assert_eq!(result.context_id.as_deref(), Some("c2"));
    }

    // Test IDs: TEVAL-006
    #[test]
    fn equal_rank_ties_break_on_lowest_context_id() {
        let marshal = ctx("m1", &["c1", "c4"], &[]);
        let configs = vec![
            config(ScopeKind::OnePerArea, &["a2"]),
            config(ScopeKind::OnePerArea, &["a1"]),
        ];
        let result = eval(&configs, &marshal);

        assert_eq!(result.context_type, ContextType::Area);
        assert_eq!(result.context_id.as_deref(), Some("a1"));
    }

    // Test IDs: TEVAL-007
    #[test]
    fn shared_kind_wins_over_personal_kind_at_equal_rank() {
        let marshal = ctx("m1", &["c1"], &[]);
        let configs = vec![
            config(ScopeKind::EveryoneAtCheckpoints, &["c1"]),
            config(ScopeKind::OnePerCheckpoint, &["c1"]),
        ];
        let result = eval(&configs, &marshal);
        assert_eq!(result.winning_scope(), Some(ScopeKind::OnePerCheckpoint));
        assert_eq!(result.context_type, ContextType::Checkpoint);
        assert_eq!(result.context_id.as_deref(), Some("c1"));

        let configs = vec![
            ScopeConfiguration::everyone(),
            config(ScopeKind::OnePerArea, &["a1"]),
        ];
        let result = eval(&configs, &marshal);
        assert_eq!(result.winning_scope(), Some(ScopeKind::OnePerArea));
        assert_eq!(result.context_id.as_deref(), Some("a1"));
    }

    // Test IDs: TEVAL-008
    #[test]
    fn one_per_checkpoint_beats_everyone_in_area() {
        let marshal = ctx("m1", &["c1"], &[]);
        let configs = vec![
            config(ScopeKind::EveryoneInAreas, &["a1"]),
            config(ScopeKind::OnePerCheckpoint, &["c1"]),
        ];
        let result = eval(&configs, &marshal);
        assert_eq!(result.winning_scope(), Some(ScopeKind::OnePerCheckpoint));
        assert_eq!(result.specificity, Some(Specificity::Checkpoint));
    }

    // Test IDs: TEVAL-009
    #[test]
    fn personal_winner_uses_viewer_id_as_context() {
        let marshal = ctx("m7", &["c3"], &[]);
        let result = eval(&[config(ScopeKind::EveryoneInAreas, &["a2"])], &marshal);
        assert_eq!(result.context_type, ContextType::Personal);
        assert_eq!(result.context_id.as_deref(), Some("m7"));
    }

    // Test IDs: TEVAL-010
    #[test]
    fn area_lead_is_admitted_without_assignment() {
        let lead = ctx("lead", &[], &["a2"]);

        let per_area = eval(&[config(ScopeKind::OnePerArea, &["a2"])], &lead);
        assert_eq!(per_area.context_id.as_deref(), Some("a2"));

        let per_checkpoint = eval(&[config(ScopeKind::OnePerCheckpoint, &["c1", "c4"])], &lead);
        assert_eq!(per_checkpoint.context_type, ContextType::Checkpoint);
        assert_eq!(per_checkpoint.context_id.as_deref(), Some("c4"));

        let one_lead = eval(&[config(ScopeKind::OneLeadPerArea, &["a2"])], &lead);
        assert_eq!(one_lead.context_type, ContextType::Area);
        assert_eq!(one_lead.context_id.as_deref(), Some("a2"));

        let every_lead = eval(&[config(ScopeKind::EveryAreaLead, &["a2"])], &lead);
        assert_eq!(every_lead.context_type, ContextType::Personal);
        assert_eq!(every_lead.context_id.as_deref(), Some("lead"));
    }

    // Test IDs: TEVAL-011
    #[test]
    fn assigned_non_lead_fails_lead_only_scopes() {
        let marshal = ctx("m1", &["c1", "c3"], &[]);
        for scope in [ScopeKind::OneLeadPerArea, ScopeKind::EveryAreaLead] {
            assert!(!eval(&[config(scope, &["a1", "a2"])], &marshal).is_relevant);
            assert!(!eval(&[ScopeConfiguration::all(scope)], &marshal).is_relevant);
        }
        assert!(eval(&[config(ScopeKind::OnePerArea, &["a1"])], &marshal).is_relevant);
    }

    // Test IDs: TEVAL-012
    #[test]
    fn shared_sentinel_needs_a_concrete_anchor() {
        let unassigned = ctx("m9", &[], &[]);
        let per_checkpoint = [ScopeConfiguration::all(ScopeKind::OnePerCheckpoint)];
        let per_area = [ScopeConfiguration::all(ScopeKind::OnePerArea)];
        assert!(!eval(&per_checkpoint, &unassigned).is_relevant);
        assert!(!eval(&per_area, &unassigned).is_relevant);

        let marshal = ctx("m1", &["c4", "c2"], &[]);
        let result = eval(&per_checkpoint, &marshal);
        assert_eq!(result.context_id.as_deref(), Some("c2"));
    }

    // Test IDs: TEVAL-013
    #[test]
    fn unrecognized_kind_never_matches() {
        let configs = vec![ScopeConfiguration {
            scope: ScopeKind::Unrecognized,
            item_type: None,
            ids: TargetIds::All,
        }];
        assert!(!eval(&configs, &ctx("m1", &["c1"], &["a1"])).is_relevant);
    }

    // Test IDs: TEVAL-014
    #[test]
    fn enumerations_return_every_shared_context() {
        let lead_and_marshal = ctx("m1", &["c1"], &["a2"]);
        let configs = vec![
            ScopeConfiguration::all(ScopeKind::OnePerCheckpoint),
            config(ScopeKind::OnePerArea, &["a1", "a2", "a3"]),
            config(ScopeKind::OneLeadPerArea, &["a1"]),
            config(ScopeKind::EveryoneInAreas, &["a1"]),
        ];

        assert_eq!(
            all_checkpoint_contexts(&configs, &lead_and_marshal, &lookup()),
            vec!["c1".to_string(), "c3".to_string(), "c4".to_string()]
        );
        assert_eq!(
            all_area_contexts(&configs, &lead_and_marshal),
            vec!["a1".to_string(), "a2".to_string()]
        );
    }

    fn seeded_permutation(configs: &[ScopeConfiguration], seed: u64) -> Vec<ScopeConfiguration> {
        fn splitmix64(mut value: u64) -> u64 {
            value = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
            value = (value ^ (value >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            value = (value ^ (value >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            value ^ (value >> 31)
        }

        let mut keyed = configs
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, config)| {
                let index_u64 = u64::try_from(index).unwrap_or(u64::MAX);
                (splitmix64(seed ^ index_u64), config)
            })
            .collect::<Vec<_>>();
        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, config)| config).collect()
    }

    fn mixed_configs() -> Vec<ScopeConfiguration> {
        vec![
            config(ScopeKind::EveryoneInAreas, &["a1"]),
            config(ScopeKind::OnePerArea, &["a2", "a1"]),
            config(ScopeKind::OnePerCheckpoint, &["c3", "c1"]),
            config(ScopeKind::EveryoneAtCheckpoints, &["c1"]),
            config(ScopeKind::OneLeadPerArea, &["a2"]),
            ScopeConfiguration::everyone(),
            config(ScopeKind::EveryAreaLead, &["a2"]),
        ]
    }

    fn arb_scope_kind() -> impl Strategy<Value = ScopeKind> {
        prop_oneof![
            Just(ScopeKind::SpecificPeople),
            Just(ScopeKind::EveryoneAtCheckpoints),
            Just(ScopeKind::EveryoneInAreas),
            Just(ScopeKind::Everyone),
            Just(ScopeKind::OnePerCheckpoint),
            Just(ScopeKind::OnePerArea),
            Just(ScopeKind::OneLeadPerArea),
            Just(ScopeKind::EveryAreaLead),
        ]
    }

    fn arb_config() -> impl Strategy<Value = ScopeConfiguration> {
        let ids = prop::sample::subsequence(
            vec!["m1", "m2", "c1", "c2", "c3", "c4", "a1", "a2"],
            0..4,
        );
        (arb_scope_kind(), ids, any::<bool>()).prop_map(|(scope, ids, all)| {
            if all {
                ScopeConfiguration::all(scope)
            } else {
                ScopeConfiguration::only(scope, ids)
            }
        })
    }

    // Test IDs: TDET-001
    proptest! {
        #[test]
        fn property_evaluation_is_deterministic_under_seeded_permutations(
            seed_a in any::<u64>(),
            seed_b in any::<u64>(),
        ) {
            let base = mixed_configs();
            let marshal = ctx("m1", &["c1", "c3"], &["a2"]);
            let result_a = evaluate(&seeded_permutation(&base, seed_a), &marshal, &lookup());
            let result_b = evaluate(&seeded_permutation(&base, seed_b), &marshal, &lookup());
            prop_assert_eq!(result_a, result_b);
        }
    }

    // Test IDs: TDET-002
    proptest! {
        #[test]
        fn property_random_configs_are_order_independent(
            configs in prop::collection::vec(arb_config(), 0..6),
            seed in any::<u64>(),
        ) {
            let marshal = ctx("m1", &["c2", "c4"], &["a1"]);
            let forward = evaluate(&configs, &marshal, &lookup());
            let permuted = evaluate(&seeded_permutation(&configs, seed), &marshal, &lookup());
            prop_assert_eq!(&forward, &permuted);
            prop_assert_eq!(forward.is_relevant, forward.context_id.is_some());
            prop_assert_eq!(forward.is_relevant, forward.winning_config.is_some());
        }
    }

    // Test IDs: TPREC-001
    proptest! {
        #[test]
        fn property_named_marshal_always_beats_area_rank(
            area_configs in prop::collection::vec(
                prop_oneof![
                    Just(ScopeKind::EveryoneInAreas),
                    Just(ScopeKind::OnePerArea),
                    Just(ScopeKind::Everyone),
                ],
                1..4,
            ),
            seed in any::<u64>(),
        ) {
            let marshal = ctx("m1", &["c1"], &[]);
            let named = config(ScopeKind::SpecificPeople, &["m2", "m1"]);
            let mut configs = area_configs
                .into_iter()
                .map(|scope| config(scope, &["a1"]))
                .collect::<Vec<_>>();
            configs.push(named.clone());
            let result = evaluate(&seeded_permutation(&configs, seed), &marshal, &lookup());
            prop_assert_eq!(result.winning_config, Some(named));
            prop_assert_eq!(result.specificity, Some(Specificity::Marshal));
        }
    }
}
