use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use sieve_node_registry::prelude::*;
use sieve_node_registry::registry::SubEntityOp;

fn pid(raw: u64) -> PointId {
    PointId::new(raw).expect("nonzero PointId")
}

fn quad_grid(n: u64) -> InMemoryMesh {
    let mut m = InMemoryMesh::serial();
    let node = |i: u64, j: u64| pid(1 + i + j * (n + 1));
    for j in 0..n {
        for i in 0..n {
            m.add_element(
                EntityKey::element(pid(1 + i + j * n)),
                CellType::Quadrilateral,
                &[node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1)],
                0,
            )
            .expect("valid quad");
        }
    }
    m
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");
    let needed = [NeededEntity::edge_midpoints(), NeededEntity::new(EntityRank::Element, 1)];

    for &n in &[16u64, 64u64] {
        let mesh = quad_grid(n);
        let elements = mesh.elements();

        group.bench_with_input(BenchmarkId::new("register_only", n), &n, |b, _| {
            b.iter(|| {
                let mut reg = NodeRegistry::default();
                reg.begin_registration().expect("fresh registry");
                for &e in &elements {
                    reg.do_for_all_sub_entities(
                        &mesh,
                        SubEntityOp::Register,
                        e,
                        &needed,
                        &mut UniformRefinement,
                    )
                    .expect("registration");
                }
                black_box(reg.map().len());
            });
        });

        group.bench_with_input(BenchmarkId::new("full_cycle", n), &n, |b, _| {
            b.iter(|| {
                let mut m = mesh.clone();
                let mut reg = NodeRegistry::default();
                let s = reg
                    .refine_cycle(&mut m, &NoComm, &needed, &mut UniformRefinement)
                    .expect("cycle");
                black_box(s);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_registration);
criterion_main!(benches);
