//! Clause dependency graph and stratification.
//!
//! For every clause with head `H` and body predicate atom `B` the graph gets
//! an edge `H -> B`, tagged negative when the atom is negated or when it
//! reads a lattice cell as a ground threshold test (`leq(get(k), v)` flips as
//! the cell rises, so the cell must be complete first). A lattice atom whose
//! value position is a variable is a monotone join read and stays positive,
//! which is what admits recursion through lattice predicates.
//!
//! Any strongly connected component containing a negative edge rejects the
//! program. Stratum numbers are assigned over the condensation, dependencies
//! first.

use crate::error::{Result, SolveError};
use crate::program::{Clause, Interpretation, Program};
use crate::symbol::Symbol;
use std::collections::BTreeMap;
use tracing::debug;

/// Stratification result plus the index the worklist runs on.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Stratum per predicate.
    pub stratum: BTreeMap<Symbol, usize>,
    /// Number of strata.
    pub stratum_count: usize,
    /// Stratum of each clause (by index into `Program::clauses`).
    pub clause_stratum: Vec<usize>,
    /// Clause indices grouped by stratum.
    pub strata_clauses: Vec<Vec<usize>>,
    /// Positive body occurrences per predicate: `(clause index, body index)`.
    pub dependents: BTreeMap<Symbol, Vec<(usize, usize)>>,
}

impl DependencyGraph {
    /// Stratum of a predicate; predicates without clauses sit in stratum 0.
    pub fn stratum_of(&self, predicate: &Symbol) -> usize {
        self.stratum.get(predicate).copied().unwrap_or(0)
    }
}

/// Whether a body atom over a lattice predicate reads the cell as a
/// threshold test rather than a join.
fn is_lattice_test(atom: &crate::program::PredicateAtom, interp: &Interpretation) -> bool {
    if !interp.is_lattice() {
        return false;
    }
    match atom.terms.last() {
        Some(value_term) => {
            let mut vars = Vec::new();
            value_term.variables(&mut vars);
            vars.is_empty()
        }
        None => false,
    }
}

/// Build the dependency graph and assign strata, rejecting negative cycles.
pub fn stratify(program: &Program) -> Result<DependencyGraph> {
    // Deterministic predicate numbering.
    let ids: BTreeMap<&Symbol, usize> = program
        .interpretations
        .keys()
        .enumerate()
        .map(|(i, p)| (p, i))
        .collect();
    let symbols: Vec<&Symbol> = program.interpretations.keys().collect();
    let n = symbols.len();

    let mut adj: Vec<Vec<(usize, bool)>> = vec![Vec::new(); n];
    for clause in &program.clauses {
        let head = match ids.get(&clause.head.predicate) {
            Some(&id) => id,
            None => continue, // admission rejects these before stratification
        };
        for (_, atom) in clause.body_predicates() {
            let body = match ids.get(&atom.predicate) {
                Some(&id) => id,
                None => continue,
            };
            let interp = &program.interpretations[&atom.predicate];
            let negative = atom.negated || is_lattice_test(atom, interp);
            adj[head].push((body, negative));
        }
    }

    let targets: Vec<Vec<usize>> = adj
        .iter()
        .map(|edges| edges.iter().map(|&(w, _)| w).collect())
        .collect();
    let (comp, comps) = tarjan(n, &targets);

    // A negative edge inside a component is a negative cycle.
    for (v, edges) in adj.iter().enumerate() {
        for &(w, negative) in edges {
            if negative && comp[v] == comp[w] {
                let mut cycle: Vec<Symbol> =
                    comps[comp[v]].iter().map(|&u| symbols[u].clone()).collect();
                cycle.sort();
                return Err(SolveError::Unstratifiable {
                    predicate: symbols[v].clone(),
                    cycle,
                });
            }
        }
    }

    // Components come out dependencies-first, so one pass suffices.
    let mut comp_stratum = vec![0usize; comps.len()];
    for (ci, members) in comps.iter().enumerate() {
        let mut level = 0;
        for &v in members {
            for &(w, negative) in &adj[v] {
                if comp[w] != ci {
                    level = level.max(comp_stratum[comp[w]] + usize::from(negative));
                }
            }
        }
        comp_stratum[ci] = level;
    }

    let stratum: BTreeMap<Symbol, usize> = symbols
        .iter()
        .enumerate()
        .map(|(v, p)| ((*p).clone(), comp_stratum[comp[v]]))
        .collect();
    let stratum_count = comp_stratum.iter().max().map_or(1, |&m| m + 1);

    let clause_stratum: Vec<usize> = program
        .clauses
        .iter()
        .map(|clause| stratum.get(&clause.head.predicate).copied().unwrap_or(0))
        .collect();
    let mut strata_clauses = vec![Vec::new(); stratum_count];
    for (idx, &s) in clause_stratum.iter().enumerate() {
        strata_clauses[s].push(idx);
    }

    let dependents = build_dependents(&program.clauses);

    debug!(
        predicates = n,
        strata = stratum_count,
        clauses = program.clauses.len(),
        "program stratified"
    );

    Ok(DependencyGraph {
        stratum,
        stratum_count,
        clause_stratum,
        strata_clauses,
        dependents,
    })
}

/// Map each predicate to the positive body occurrences that read it.
fn build_dependents(clauses: &[Clause]) -> BTreeMap<Symbol, Vec<(usize, usize)>> {
    let mut dependents: BTreeMap<Symbol, Vec<(usize, usize)>> = BTreeMap::new();
    for (clause_idx, clause) in clauses.iter().enumerate() {
        for (body_idx, atom) in clause.body_predicates() {
            if !atom.negated {
                dependents
                    .entry(atom.predicate.clone())
                    .or_default()
                    .push((clause_idx, body_idx));
            }
        }
    }
    dependents
}

/// Iterative Tarjan. Returns the component of every node and the component
/// member lists in emission order (every component after the ones it can
/// reach).
fn tarjan(n: usize, adj: &[Vec<usize>]) -> (Vec<usize>, Vec<Vec<usize>>) {
    const UNVISITED: usize = usize::MAX;

    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut comp = vec![UNVISITED; n];
    let mut comps: Vec<Vec<usize>> = Vec::new();
    let mut next_index = 0usize;
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        low[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        frames.push((root, 0));

        while let Some(&mut (v, ref mut pos)) = frames.last_mut() {
            if *pos < adj[v].len() {
                let w = adj[v][*pos];
                *pos += 1;
                if index[w] == UNVISITED {
                    index[w] = next_index;
                    low[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                frames.pop();
                if low[v] == index[v] {
                    let mut members = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        comp[w] = comps.len();
                        members.push(w);
                        if w == v {
                            break;
                        }
                    }
                    comps.push(members);
                }
                if let Some(&mut (parent, _)) = frames.last_mut() {
                    low[parent] = low[parent].min(low[v]);
                }
            }
        }
    }

    (comp, comps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{BodyAtom, Interpretation, PredicateAtom, Term};
    use crate::solver::lattice;
    use crate::value::Value;

    fn atom(p: &str, vars: &[&str]) -> PredicateAtom {
        PredicateAtom::new(p, vars.iter().map(|v| Term::var(*v)).collect())
    }

    fn neg_atom(p: &str, vars: &[&str]) -> PredicateAtom {
        PredicateAtom::negated(p, vars.iter().map(|v| Term::var(*v)).collect())
    }

    #[test]
    fn test_positive_cycle_is_permitted() {
        let mut program = Program::new();
        program.declare("A", Interpretation::relation(1));
        program.declare("B", Interpretation::relation(1));
        program.add_clause(Clause::new(
            atom("A", &["c"]),
            vec![BodyAtom::Predicate(atom("B", &["c"]))],
        ));
        program.add_clause(Clause::new(
            atom("B", &["c"]),
            vec![BodyAtom::Predicate(atom("A", &["c"]))],
        ));

        let graph = stratify(&program).unwrap();
        assert_eq!(graph.stratum_count, 1);
        assert_eq!(graph.stratum_of(&Symbol::new("A")), 0);
        assert_eq!(graph.stratum_of(&Symbol::new("B")), 0);
    }

    #[test]
    fn test_long_positive_cycle_stratifies() {
        let mut program = Program::new();
        for i in 1..=10 {
            program.declare(format!("Foo{}", i).as_str(), Interpretation::relation(1));
        }
        for i in 1..=10 {
            let next = if i == 10 { 1 } else { i + 1 };
            program.add_clause(Clause::new(
                atom(format!("Foo{}", i).as_str(), &["x"]),
                vec![BodyAtom::Predicate(atom(
                    format!("Foo{}", next).as_str(),
                    &["x"],
                ))],
            ));
        }

        let graph = stratify(&program).unwrap();
        assert_eq!(graph.stratum_count, 1);
    }

    #[test]
    fn test_negation_crosses_downward() {
        let mut program = Program::new();
        program.declare("P", Interpretation::relation(1));
        program.declare("S", Interpretation::relation(1));
        program.declare("Q", Interpretation::relation(1));
        program.add_clause(Clause::new(
            atom("Q", &["x"]),
            vec![
                BodyAtom::Predicate(atom("S", &["x"])),
                BodyAtom::Predicate(neg_atom("P", &["x"])),
            ],
        ));

        let graph = stratify(&program).unwrap();
        assert_eq!(graph.stratum_of(&Symbol::new("P")), 0);
        assert_eq!(graph.stratum_of(&Symbol::new("S")), 0);
        assert_eq!(graph.stratum_of(&Symbol::new("Q")), 1);
        assert_eq!(graph.stratum_count, 2);
    }

    #[test]
    fn test_negative_cycle_rejected() {
        let mut program = Program::new();
        program.declare("A", Interpretation::relation(1));
        program.declare("B", Interpretation::relation(1));
        program.add_clause(Clause::new(
            atom("A", &["x"]),
            vec![BodyAtom::Predicate(neg_atom("B", &["x"]))],
        ));
        program.add_clause(Clause::new(
            atom("B", &["x"]),
            vec![BodyAtom::Predicate(neg_atom("A", &["x"]))],
        ));

        let err = stratify(&program).unwrap_err();
        match err {
            SolveError::Unstratifiable { cycle, .. } => {
                assert_eq!(cycle, vec![Symbol::new("A"), Symbol::new("B")]);
            }
            other => panic!("expected Unstratifiable, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_self_loop_rejected() {
        let mut program = Program::new();
        program.declare("A", Interpretation::relation(1));
        program.add_clause(Clause::new(
            atom("A", &["x"]),
            vec![BodyAtom::Predicate(neg_atom("A", &["x"]))],
        ));
        assert!(matches!(
            stratify(&program),
            Err(SolveError::Unstratifiable { .. })
        ));
    }

    #[test]
    fn test_lattice_join_read_recursion_is_positive() {
        let mut program = Program::new();
        program.declare("Phi", Interpretation::relation(3));
        program.declare("Sign", lattice::flat(2, Value::tag("Bot"), Value::tag("Top")));
        // Sign(x, a) :- Phi(x, y, z), Sign(y, a).
        program.add_clause(Clause::new(
            atom("Sign", &["x", "a"]),
            vec![
                BodyAtom::Predicate(atom("Phi", &["x", "y", "z"])),
                BodyAtom::Predicate(atom("Sign", &["y", "a"])),
            ],
        ));

        let graph = stratify(&program).unwrap();
        assert_eq!(graph.stratum_count, 1);
    }

    #[test]
    fn test_lattice_threshold_test_crosses_downward() {
        let mut program = Program::new();
        program.declare("Sign", lattice::flat(2, Value::tag("Bot"), Value::tag("Top")));
        program.declare("Alarm", Interpretation::relation(1));
        program.declare("Var", Interpretation::relation(1));
        // Alarm(x) :- Var(x), Sign(x, Top).
        program.add_clause(Clause::new(
            atom("Alarm", &["x"]),
            vec![
                BodyAtom::Predicate(atom("Var", &["x"])),
                BodyAtom::Predicate(PredicateAtom::new(
                    "Sign",
                    vec![Term::var("x"), Term::constant(Value::tag("Top"))],
                )),
            ],
        ));

        let graph = stratify(&program).unwrap();
        assert!(graph.stratum_of(&Symbol::new("Alarm")) > graph.stratum_of(&Symbol::new("Sign")));
    }

    #[test]
    fn test_dependents_skip_negated_occurrences() {
        let mut program = Program::new();
        program.declare("P", Interpretation::relation(1));
        program.declare("S", Interpretation::relation(1));
        program.declare("Q", Interpretation::relation(1));
        program.add_clause(Clause::new(
            atom("Q", &["x"]),
            vec![
                BodyAtom::Predicate(atom("S", &["x"])),
                BodyAtom::Predicate(neg_atom("P", &["x"])),
            ],
        ));

        let graph = stratify(&program).unwrap();
        assert_eq!(graph.dependents.get(&Symbol::new("S")), Some(&vec![(0, 0)]));
        assert_eq!(graph.dependents.get(&Symbol::new("P")), None);
    }
}
