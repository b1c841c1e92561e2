//! Semi-naive fixed-point driver.
//!
//! Strata run in ascending order. Entering a stratum the driver satisfies
//! the stratum's ground facts, then enqueues one full pass (empty seed) for
//! every clause of the stratum; that pass is what fires clauses whose bodies
//! live entirely in lower strata. From then on the FIFO worklist carries the
//! deltas: every novel fact wakes the dependent body occurrences with a seed
//! environment pre-bound against the new tuple, and evaluation skips the
//! seeded atom so only derivations involving the new fact are recomputed.
//!
//! Quiescence is worklist emptiness. Termination rests on finite relational
//! domains and the ascending chain condition of every lattice in use.

use crate::error::Result;
use crate::program::{BodyAtom, Environment, Interpretation, PredicateAtom, Program};
use crate::solver::evaluate::{unify_term, unify_tuple};
use crate::solver::lattice::LatticeStore;
use crate::solver::resolve::resolve;
use crate::solver::store::FactStore;
use crate::solver::stratify::DependencyGraph;
use crate::solver::{CancelToken, SolveStats, Solver};
use crate::symbol::Symbol;
use crate::value::Value;
use std::collections::VecDeque;
use tracing::trace;

/// One scheduled clause evaluation.
#[derive(Debug, Clone)]
struct WorkItem {
    clause: usize,
    seed: Environment,
    skip: Option<usize>,
}

impl Solver {
    /// Run every stratum; `Ok(false)` when the token fired first.
    pub(crate) fn run(&mut self, token: &CancelToken) -> Result<bool> {
        for stratum in 0..self.graph.stratum_count {
            if token.is_cancelled() {
                trace!(stratum, "cancelled at stratum boundary");
                return Ok(false);
            }
            self.run_stratum(stratum)?;
        }
        Ok(true)
    }

    fn run_stratum(&mut self, stratum: usize) -> Result<()> {
        let mut queue: VecDeque<WorkItem> = VecDeque::new();

        // Ground facts of this stratum. The initial full pass below sees
        // them, so novelty here does not need to enqueue anything.
        for fact in &self.program.facts {
            if self.graph.stratum_of(&fact.head.predicate) != stratum {
                continue;
            }
            satisfy(
                &self.program,
                &mut self.facts,
                &mut self.lattices,
                &mut self.stats,
                &fact.head,
                &Environment::new(),
            )?;
        }

        for &clause_idx in &self.graph.strata_clauses[stratum] {
            queue.push_back(WorkItem {
                clause: clause_idx,
                seed: Environment::new(),
                skip: None,
            });
        }

        while let Some(item) = queue.pop_front() {
            let clause = &self.program.clauses[item.clause];
            let schedule = &self.schedules[item.clause];
            let head_bindings = resolve(
                clause,
                schedule,
                item.seed,
                item.skip,
                &self.program,
                &self.facts,
                &self.lattices,
            )?;
            self.stats.rules_fired += 1;

            for env in head_bindings {
                let derived = satisfy(
                    &self.program,
                    &mut self.facts,
                    &mut self.lattices,
                    &mut self.stats,
                    &clause.head,
                    &env,
                )?;
                if let Some((predicate, tuple)) = derived {
                    enqueue_dependents(
                        &self.program,
                        &self.graph,
                        &mut queue,
                        stratum,
                        &predicate,
                        &tuple,
                    );
                }
            }
        }

        trace!(stratum, "stratum quiescent");
        Ok(())
    }
}

/// Ground the head under `env` and hand it to the store matching the head's
/// interpretation. Returns the derived tuple when the store reported
/// novelty (or a lattice change), which is what drives the worklist.
fn satisfy(
    program: &Program,
    facts: &mut FactStore,
    lattices: &mut LatticeStore,
    stats: &mut SolveStats,
    head: &PredicateAtom,
    env: &Environment,
) -> Result<Option<(Symbol, Vec<Value>)>> {
    let interp = program.interpretation(&head.predicate, head.span)?;
    let mut tuple = Vec::with_capacity(head.terms.len());
    for term in &head.terms {
        tuple.push(term.ground(env, head.span)?);
    }

    let changed = match interp {
        Interpretation::Relation { .. } => facts.insert(&head.predicate, tuple.clone()),
        Interpretation::LatticeMap { .. } => {
            let split = tuple.len() - 1;
            let (key, value) = tuple.split_at(split);
            let changed = lattices.join(&head.predicate, key, value[0].to_owned(), interp);
            if changed {
                // Re-read: the cell now holds the joined value, which may
                // sit above what this derivation contributed.
                let stored = lattices.get(&head.predicate, key, interp);
                tuple = key.to_vec();
                tuple.push(stored);
            }
            changed
        }
    };

    if !changed {
        return Ok(None);
    }
    *stats.facts_derived.entry(head.predicate.clone()).or_insert(0) += 1;
    Ok(Some((head.predicate.clone(), tuple)))
}

/// Wake every same-stratum clause that reads `predicate` in its body.
fn enqueue_dependents(
    program: &Program,
    graph: &DependencyGraph,
    queue: &mut VecDeque<WorkItem>,
    stratum: usize,
    predicate: &Symbol,
    tuple: &[Value],
) {
    let Some(occurrences) = graph.dependents.get(predicate) else {
        return;
    };
    for &(clause_idx, body_idx) in occurrences {
        if graph.clause_stratum[clause_idx] != stratum {
            continue;
        }
        let clause = &program.clauses[clause_idx];
        let atom = match &clause.body[body_idx] {
            BodyAtom::Predicate(p) => p,
            BodyAtom::Function(_) => continue,
        };
        let is_lattice = program
            .interpretations
            .get(&atom.predicate)
            .map(Interpretation::is_lattice)
            .unwrap_or(false);

        if is_lattice {
            // Seed the key bindings only and keep the atom in the schedule,
            // so it re-reads the freshest cell value on evaluation.
            let key_len = atom.terms.len() - 1;
            let mut env = Environment::new();
            let mut matched = true;
            for (term, value) in atom.terms[..key_len].iter().zip(tuple[..key_len].iter()) {
                match unify_term(term, value, &env) {
                    Some(next) => env = next,
                    None => {
                        matched = false;
                        break;
                    }
                }
            }
            if matched {
                queue.push_back(WorkItem {
                    clause: clause_idx,
                    seed: env,
                    skip: None,
                });
            }
        } else if let Some(seed) = unify_tuple(atom, tuple, &Environment::new()) {
            queue.push_back(WorkItem {
                clause: clause_idx,
                seed,
                skip: Some(body_idx),
            });
        }
    }
}
