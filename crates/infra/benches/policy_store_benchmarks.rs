use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use orgguard_auth::{PolicyTuple, RoleLink};
use orgguard_core::TenantId;
use orgguard_infra::{InMemoryPolicyPersistence, PolicyEnforcer};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// `tenants` tenants, each with `per_tenant` role tuples and a user linked through a two-level chain.
fn seeded(rt: &tokio::runtime::Runtime, tenants: usize, per_tenant: usize) -> (PolicyEnforcer, TenantId) {
    let enforcer = PolicyEnforcer::new(Arc::new(InMemoryPolicyPersistence::new()));
    let mut last = TenantId::new();
    rt.block_on(async {
        for _ in 0..tenants {
            let t = TenantId::new();
            for i in 0..per_tenant {
                enforcer
                    .add_policy(PolicyTuple::new("Clerk", t, format!("store:area{i}"), "view"))
                    .await
                    .unwrap();
            }
            enforcer.add_role_for_user(RoleLink::new("Manager", "Clerk", t)).await.unwrap();
            enforcer.add_role_for_user(RoleLink::new("alice", "Manager", t)).await.unwrap();
            last = t;
        }
        enforcer.save().await.unwrap();
    });
    (enforcer, last)
}

fn bench_check(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("policy_check");
    for per_tenant in [10usize, 100, 1_000] {
        let (enforcer, tenant) = seeded(&rt, 8, per_tenant);
        group.bench_with_input(BenchmarkId::from_parameter(per_tenant), &per_tenant, |b, _| {
            b.iter(|| {
                rt.block_on(enforcer.check(black_box("alice"), tenant, black_box("store:area7"), "view"))
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_write_and_save(c: &mut Criterion) {
    let rt = runtime();
    let (enforcer, tenant) = seeded(&rt, 8, 100);
    let mut n = 0u64;
    c.bench_function("policy_write_and_save", |b| {
        b.iter(|| {
            n += 1;
            rt.block_on(async {
                enforcer
                    .add_policy(PolicyTuple::new("Clerk", tenant, format!("hrms:slot{n}"), "view"))
                    .await
                    .unwrap();
                enforcer.save().await.unwrap();
            })
        })
    });
}

criterion_group!(benches, bench_check, bench_write_and_save);
criterion_main!(benches);
