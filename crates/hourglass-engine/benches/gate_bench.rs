// Benchmarks for the cooldown gate hot path
// Measures evaluate() for committing, denying, and wildcard-resolved invocations

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hourglass_engine::{
    CooldownGate, CooldownGroup, EngineSettings, GateRequest, RuleSet, StaticPermissions,
};
use uuid::Uuid;

const T0: i64 = 1_700_000_000_000;

fn bench_rules() -> RuleSet {
    let mut rules = RuleSet::new(0)
        .with_rule("home", 10)
        .with_rule("admin*", 5)
        .with_group(CooldownGroup::new("vip", 0.5));
    for i in 0..200 {
        rules = rules.with_rule(&format!("command{}", i), 30);
    }
    rules
}

fn bench_evaluate_commit(c: &mut Criterion) {
    let gate = CooldownGate::new(EngineSettings::default(), bench_rules());
    let mut now = T0;

    c.bench_function("evaluate_commit", |b| {
        b.iter(|| {
            // Step past the 10s window so every call commits
            now += 11_000;
            let request = GateRequest::new(Uuid::nil(), "/home");
            gate.evaluate(black_box(&request), black_box(now))
        })
    });
}

fn bench_evaluate_deny(c: &mut Criterion) {
    let gate = CooldownGate::new(EngineSettings::default(), bench_rules());
    let actor = Uuid::new_v4();
    let request = GateRequest::new(actor, "/home");
    gate.evaluate(&request, T0);

    c.bench_function("evaluate_deny", |b| {
        b.iter(|| gate.evaluate(black_box(&request), black_box(T0 + 1_000)))
    });
}

fn bench_evaluate_group_wildcard(c: &mut Criterion) {
    let perms = Arc::new(StaticPermissions::new());
    let mut group = c.benchmark_group("evaluate_group_wildcard");

    for actors in [10usize, 1_000] {
        let gate = CooldownGate::new(EngineSettings::default(), bench_rules())
            .with_permissions(perms.clone());
        let ids: Vec<Uuid> = (0..actors).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            perms.grant(*id, "hourglass.group.vip");
        }
        let mut idx = 0;
        let mut now = T0;

        group.bench_with_input(BenchmarkId::from_parameter(actors), &ids, |b, ids| {
            b.iter(|| {
                idx = (idx + 1) % ids.len();
                now += 3_000;
                let request = GateRequest::new(ids[idx], "/adminkick someone");
                gate.evaluate(black_box(&request), black_box(now))
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_evaluate_commit,
    bench_evaluate_deny,
    bench_evaluate_group_wildcard
);
criterion_main!(benches);
