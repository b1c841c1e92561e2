//! Benchmarks for the fixed-point driver.
//!
//! Exercises semi-naive transitive closure on chain and complete graphs,
//! and lattice joins over a keyed max domain.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_core::solver::lattice;
use strata_core::{
    BodyAtom, Clause, Interpretation, PredicateAtom, Program, Solver, Term, Value,
};

fn edge_fact(a: i64, b: i64) -> Clause {
    Clause::fact(PredicateAtom::new(
        "edge",
        vec![
            Term::constant(Value::Int64(a)),
            Term::constant(Value::Int64(b)),
        ],
    ))
}

fn closure_program(edges: impl IntoIterator<Item = (i64, i64)>) -> Program {
    let mut program = Program::new();
    program.declare("edge", Interpretation::relation(2));
    program.declare("path", Interpretation::relation(2));
    for (a, b) in edges {
        program.add_fact(edge_fact(a, b));
    }
    program.add_clause(Clause::new(
        PredicateAtom::new("path", vec![Term::var("x"), Term::var("y")]),
        vec![BodyAtom::Predicate(PredicateAtom::new(
            "edge",
            vec![Term::var("x"), Term::var("y")],
        ))],
    ));
    program.add_clause(Clause::new(
        PredicateAtom::new("path", vec![Term::var("x"), Term::var("z")]),
        vec![
            BodyAtom::Predicate(PredicateAtom::new(
                "path",
                vec![Term::var("x"), Term::var("y")],
            )),
            BodyAtom::Predicate(PredicateAtom::new(
                "edge",
                vec![Term::var("y"), Term::var("z")],
            )),
        ],
    ));
    program
}

fn bench_chain_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_closure");
    for size in [10i64, 50, 100] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let program = closure_program((0..size).map(|i| (i, i + 1)));
                let model = Solver::new(program).unwrap().solve().unwrap();
                black_box(model)
            });
        });
    }
    group.finish();
}

fn bench_complete_graph_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("complete_graph_closure");
    for size in [5i64, 10, 15] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let edges = (0..size)
                    .flat_map(|i| (0..size).filter(move |&j| j != i).map(move |j| (i, j)));
                let model = Solver::new(closure_program(edges)).unwrap().solve().unwrap();
                black_box(model)
            });
        });
    }
    group.finish();
}

fn bench_lattice_joins(c: &mut Criterion) {
    c.bench_function("lattice_max_joins", |b| {
        b.iter(|| {
            let mut program = Program::new();
            program.declare("best", lattice::int_max(2));
            for i in 0..500i64 {
                program.add_fact(Clause::fact(PredicateAtom::new(
                    "best",
                    vec![
                        Term::constant(Value::Int64(i % 10)),
                        Term::constant(Value::Int64(i)),
                    ],
                )));
            }
            let model = Solver::new(program).unwrap().solve().unwrap();
            black_box(model)
        });
    });
}

criterion_group!(
    benches,
    bench_chain_closure,
    bench_complete_graph_closure,
    bench_lattice_joins
);
criterion_main!(benches);
