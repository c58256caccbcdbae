//! Resolution latency benchmarks against the in-memory store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rolegate::{
    AuthzEngine, EngineConfig, EntityRef, EntityType, GrantedPermissions, InMemoryStore, NewRole,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Engine with `roles` roles carrying ten permissions each, all held by one user
fn populated_engine(rt: &Runtime, roles: usize) -> (AuthzEngine, EntityRef) {
    rt.block_on(async {
        let config = EngineConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let engine = AuthzEngine::new(config, Arc::new(InMemoryStore::new())).unwrap();
        let user = EntityRef::new("User", "bench");

        for r in 0..roles {
            let role = engine
                .create_role(NewRole::new(format!("Role {}", r)))
                .await
                .unwrap();
            for p in 0..10 {
                engine
                    .assign_permission(&role.entity_ref(), &format!("module{}.area{}", r, p).into())
                    .await
                    .unwrap();
            }
            engine.assign_role(&user, &(&role).into()).await.unwrap();
            engine
                .grant_access(&role.entity_ref(), &EntityRef::new("Article", r.to_string()), None, None)
                .await
                .unwrap();
        }

        (engine, user)
    })
}

fn bench_has_permission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("has_permission");

    for roles in [1, 10, 50] {
        let (engine, user) = populated_engine(&rt, roles);
        group.bench_with_input(BenchmarkId::new("roles", roles), &roles, |b, &roles| {
            let query = format!("module{}.area3.edit", roles - 1);
            b.to_async(&rt).iter(|| async {
                black_box(engine.has_permission(&user, &query).await.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_has_access(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("has_access");

    for roles in [1, 10, 50] {
        let (engine, user) = populated_engine(&rt, roles);
        let target = EntityRef::new("Article", (roles - 1).to_string());
        group.bench_with_input(BenchmarkId::new("roles", roles), &roles, |b, _| {
            b.to_async(&rt)
                .iter(|| async { black_box(engine.has_access(&user, &target).await.unwrap()) });
        });
    }

    group.finish();
}

fn bench_accessible_ids(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, user) = populated_engine(&rt, 50);
    let article = EntityType::from("Article");

    c.bench_function("accessible_ids_50_roles", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(engine.accessible_ids(&user, &article).await.unwrap()) });
    });
}

fn bench_granted_lookup(c: &mut Criterion) {
    let granted = GrantedPermissions::new((0..1_000).map(|i| format!("module{}.area{}", i % 100, i)));

    c.bench_function("granted_permissions_lookup", |b| {
        b.iter(|| black_box(granted.grants(black_box("module42.area942.reports.export"))));
    });
}

criterion_group!(
    benches,
    bench_has_permission,
    bench_has_access,
    bench_accessible_ids,
    bench_granted_lookup
);
criterion_main!(benches);
