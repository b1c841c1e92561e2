//! Bottom-up fixed-point solver.
//!
//! [`Solver::new`] admits a program (declaration checks, well-moded body
//! scheduling, stratification) and [`Solver::solve`] runs the semi-naive
//! driver stratum by stratum until quiescence. The solver is transactional:
//! the result is either a complete [`Model`] or a single [`SolveError`]
//! (cancellation hands back the partial model).
//!
//! One `Solver` owns its fact store, lattice store, dependency index and
//! worklist; there is no internal locking. Independent solver instances may
//! run on separate threads.

pub mod lattice;
pub mod store;
pub mod stratify;

mod evaluate;
mod fixpoint;
mod resolve;

use crate::error::{Result, SolveError, Span};
use crate::program::{BodyAtom, FunctionAtom, Interpretation, PredicateAtom, Program};
use crate::symbol::Symbol;
use crate::value::{Value, MAX_ARITY};
use lattice::LatticeStore;
use resolve::{schedule_body, Schedule};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::FactStore;
use stratify::{stratify, DependencyGraph};
use tracing::{debug, instrument};

/// External cancellation token, polled at stratum boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Evaluation statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolveStats {
    /// Novel facts (or lattice cell changes) per head predicate.
    pub facts_derived: BTreeMap<Symbol, u64>,
    /// Number of worklist items resolved.
    pub rules_fired: u64,
    /// Wall-clock time of the solve.
    pub wall_clock: Duration,
}

/// The minimal model of a program.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    relations: BTreeMap<Symbol, BTreeSet<Vec<Value>>>,
    lattices: BTreeMap<Symbol, BTreeMap<Vec<Value>, Value>>,
    stats: SolveStats,
}

impl Model {
    /// The tuples of a relational predicate.
    pub fn relation(&self, predicate: &Symbol) -> Option<&BTreeSet<Vec<Value>>> {
        self.relations.get(predicate)
    }

    /// The populated cells of a lattice predicate.
    pub fn lattice(&self, predicate: &Symbol) -> Option<&BTreeMap<Vec<Value>, Value>> {
        self.lattices.get(predicate)
    }

    /// Evaluation statistics.
    pub fn stats(&self) -> &SolveStats {
        &self.stats
    }

    /// Relational and lattice predicates with at least one derivation.
    pub fn predicates(&self) -> impl Iterator<Item = &Symbol> {
        self.relations.keys().chain(self.lattices.keys())
    }
}

/// A solver instance owning every store of one invocation.
#[derive(Debug)]
pub struct Solver {
    program: Program,
    graph: DependencyGraph,
    schedules: Vec<Schedule>,
    facts: FactStore,
    lattices: LatticeStore,
    stats: SolveStats,
}

impl Solver {
    /// Admit a program: declaration checks, body scheduling, stratification.
    pub fn new(program: Program) -> Result<Self> {
        validate(&program)?;
        let graph = stratify(&program)?;

        let mut schedules = Vec::with_capacity(program.clauses.len());
        for clause in &program.clauses {
            let schedule = schedule_body(clause, &program)?;
            // Rule safety: every head variable must be bound by the body.
            for variable in clause.head.variables() {
                if !schedule.bound.contains(&variable) {
                    return Err(SolveError::UnboundVariable {
                        variable,
                        span: clause.head.span,
                    });
                }
            }
            schedules.push(schedule);
        }

        let facts = FactStore::new(&program.interpretations);
        let lattices = LatticeStore::new(&program.interpretations);
        debug!(
            facts = program.facts.len(),
            clauses = program.clauses.len(),
            strata = graph.stratum_count,
            "program admitted"
        );

        Ok(Solver {
            program,
            graph,
            schedules,
            facts,
            lattices,
            stats: SolveStats::default(),
        })
    }

    /// Run to quiescence.
    pub fn solve(self) -> Result<Model> {
        self.solve_with_cancel(&CancelToken::new())
    }

    /// Run to quiescence, polling `token` at stratum boundaries.
    #[instrument(level = "debug", skip_all)]
    pub fn solve_with_cancel(mut self, token: &CancelToken) -> Result<Model> {
        let start = Instant::now();
        let completed = self.run(token)?;
        self.stats.wall_clock = start.elapsed();
        let model = self.snapshot();
        if completed {
            Ok(model)
        } else {
            Err(SolveError::Cancelled {
                partial: Box::new(model),
            })
        }
    }

    /// Copy the stores into a deterministic, ordered model.
    fn snapshot(&self) -> Model {
        let relations = self
            .facts
            .predicates()
            .map(|predicate| {
                let tuples = self
                    .facts
                    .tuples(predicate)
                    .iter()
                    .map(|tuple| tuple.to_vec())
                    .collect();
                (predicate.clone(), tuples)
            })
            .collect();
        let lattices = self
            .lattices
            .predicates()
            .map(|predicate| (predicate.clone(), self.lattices.entries(predicate)))
            .collect();
        Model {
            relations,
            lattices,
            stats: self.stats.clone(),
        }
    }
}

/// Declaration-level checks over every atom of the program.
fn validate(program: &Program) -> Result<()> {
    for (predicate, interp) in &program.interpretations {
        let arity = interp.arity();
        if arity == 0 || arity > MAX_ARITY {
            return Err(SolveError::ArityMismatch {
                predicate: predicate.clone(),
                declared: arity,
                found: arity,
                span: Span::default(),
            });
        }
    }

    for fact in &program.facts {
        check_head(program, &fact.head)?;
        if let Some(variable) = fact.head.variables().into_iter().next() {
            return Err(SolveError::UnboundVariable {
                variable,
                span: fact.head.span,
            });
        }
    }

    for clause in &program.clauses {
        check_head(program, &clause.head)?;
        for atom in &clause.body {
            match atom {
                BodyAtom::Predicate(p) => check_atom(program, p)?,
                BodyAtom::Function(FunctionAtom::Lub(predicate, _, _, _, span)) => {
                    match program.interpretation(predicate, *span)? {
                        Interpretation::LatticeMap { .. } => {}
                        Interpretation::Relation { .. } => {
                            return Err(SolveError::LatticeContract {
                                predicate: predicate.clone(),
                                message: "lub applied to a non-lattice predicate".to_string(),
                            })
                        }
                    }
                }
                BodyAtom::Function(_) => {}
            }
        }
    }
    Ok(())
}

fn check_head(program: &Program, head: &PredicateAtom) -> Result<()> {
    if head.negated {
        return Err(SolveError::NonRelationalHead {
            predicate: head.predicate.clone(),
            span: head.span,
        });
    }
    check_atom(program, head)
}

fn check_atom(program: &Program, atom: &PredicateAtom) -> Result<()> {
    let interp = program.interpretation(&atom.predicate, atom.span)?;
    if interp.arity() != atom.arity() {
        return Err(SolveError::ArityMismatch {
            predicate: atom.predicate.clone(),
            declared: interp.arity(),
            found: atom.arity(),
            span: atom.span,
        });
    }
    Ok(())
}
