use std::collections::BTreeSet;

use criterion::{criterion_group, criterion_main, Criterion};
use marshal_scope_core::{
    evaluate, items_for_marshal, Assignment, ChecklistItem, EventRole, Location, Marshal,
    PreloadedFacts, RoleKind, ScopeConfiguration, ScopeKind,
};
use time::OffsetDateTime;

fn mk_location(index: usize) -> Location {
    Location {
        id: format!("c{index}"),
        name: format!("Checkpoint {index}"),
        area_ids: [format!("a{}", index % 20)].into_iter().collect(),
        position: None,
    }
}

fn mk_facts() -> PreloadedFacts {
    let marshals = (0..1_000)
        .map(|index| Marshal {
            id: format!("m{index}"),
            name: format!("Marshal {index}"),
            person_id: Some(format!("p{index}")),
        })
        .collect::<Vec<_>>();
    let assignments = (0..1_000)
        .map(|index| Assignment {
            marshal_id: format!("m{index}"),
            location_id: format!("c{}", index % 200),
        })
        .collect();
    let roles = (0..20)
        .map(|index| EventRole {
            person_id: format!("p{index}"),
            role: RoleKind::AreaLead,
            area_ids: [format!("a{index}")].into_iter().collect::<BTreeSet<_>>(),
        })
        .collect::<Vec<_>>();
    PreloadedFacts::from_parts(
        "bench-event",
        marshals,
        (0..200).map(mk_location).collect(),
        Vec::new(),
        assignments,
        &roles,
    )
}

fn mk_configs(index: usize) -> Vec<ScopeConfiguration> {
    vec![
        ScopeConfiguration::only(ScopeKind::SpecificPeople, [format!("m{index}")]),
        ScopeConfiguration::only(
            ScopeKind::OnePerCheckpoint,
            (0..10).map(|offset| format!("c{}", index + offset)),
        ),
        ScopeConfiguration::only(ScopeKind::OnePerArea, [format!("a{}", index % 20)]),
        ScopeConfiguration::all(ScopeKind::EveryAreaLead),
        ScopeConfiguration::everyone(),
    ]
}

fn mk_item(index: usize) -> ChecklistItem {
    ChecklistItem {
        id: format!("item-{index:04}"),
        event_id: "bench-event".to_string(),
        text: format!("Benchmark task {index}"),
        scope_configurations: mk_configs(index % 200),
        display_order: i32::try_from(index % 50).unwrap_or_default(),
        is_required: index % 3 == 0,
        visible_from: None,
        visible_until: None,
    }
}

fn bench_evaluate_many_marshals(c: &mut Criterion) {
    let facts = mk_facts();
    let configs = mk_configs(7);
    let contexts = facts
        .marshal_ids()
        .into_iter()
        .map(|id| facts.context_for(id))
        .collect::<Vec<_>>();

    c.bench_function("evaluate_one_item_1000_marshals", |b| {
        b.iter(|| {
            let relevant = contexts
                .iter()
                .filter(|ctx| evaluate(&configs, ctx, facts.checkpoint_lookup()).is_relevant)
                .count();
            if relevant == 0 {
                panic!("evaluator benchmark matched nobody");
            }
        });
    });
}

fn bench_checklist_for_marshal(c: &mut Criterion) {
    let facts = mk_facts();
    let items = (0..1_000).map(mk_item).collect::<Vec<_>>();
    let ctx = facts.context_for("m3");
    let lookup = facts.checkpoint_lookup();

    c.bench_function("checklist_1000_items_one_marshal", |b| {
        b.iter(|| {
            let visible = items_for_marshal(&items, &ctx, lookup, &[], OffsetDateTime::UNIX_EPOCH);
            if visible.is_empty() {
                panic!("checklist benchmark produced no items");
            }
        });
    });
}

criterion_group!(
    evaluator_benches,
    bench_evaluate_many_marshals,
    bench_checklist_for_marshal
);
criterion_main!(evaluator_benches);
