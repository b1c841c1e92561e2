//! Clause resolution: well-moded body ordering and the conjunctive fold.
//!
//! The schedule for a clause is fixed at admission: positive relational
//! atoms first in declaration order, then a deterministic fixpoint pass that
//! admits negated, lattice and functional atoms as their variables become
//! bound. Resolution itself is a left fold over that order: each atom
//! consumes the current frontier of environments and produces the next one.

use crate::error::{Result, SolveError};
use crate::program::{
    BodyAtom, Clause, Environment, FunctionAtom, Interpretation, Program, Term,
};
use crate::solver::evaluate::{eval_function, extend};
use crate::solver::lattice::LatticeStore;
use crate::solver::store::FactStore;
use crate::symbol::Symbol;
use ahash::AHashSet;
use std::collections::BTreeSet;

/// Evaluation order of a clause body plus the set of variables it binds.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    /// Body indices in evaluation order.
    pub order: Vec<usize>,
    /// Variables bound once the whole body has run.
    pub bound: BTreeSet<Symbol>,
}

/// Compute a well-moded evaluation order for `clause`, or reject it.
pub(crate) fn schedule_body(clause: &Clause, program: &Program) -> Result<Schedule> {
    let mut order = Vec::with_capacity(clause.body.len());
    let mut bound: BTreeSet<Symbol> = BTreeSet::new();
    let mut pending: Vec<usize> = Vec::new();

    // Positive relational atoms bind their variables by enumeration.
    for (idx, atom) in clause.body.iter().enumerate() {
        match atom {
            BodyAtom::Predicate(p) if !p.negated && !is_lattice(program, &p.predicate) => {
                order.push(idx);
                bound.extend(p.variables());
            }
            _ => pending.push(idx),
        }
    }

    // Everything else joins the order once its mode requirement is met.
    while !pending.is_empty() {
        let mut progressed = false;
        let mut remaining = Vec::with_capacity(pending.len());
        for &idx in &pending {
            if eligible(&clause.body[idx], program, &bound) {
                bind_outputs(&clause.body[idx], program, &mut bound);
                order.push(idx);
                progressed = true;
            } else {
                remaining.push(idx);
            }
        }
        pending = remaining;
        if !progressed {
            return Err(mode_error(&clause.body[pending[0]], &bound));
        }
    }

    Ok(Schedule { order, bound })
}

fn is_lattice(program: &Program, predicate: &Symbol) -> bool {
    program
        .interpretations
        .get(predicate)
        .map(Interpretation::is_lattice)
        .unwrap_or(false)
}

fn term_vars(term: &Term) -> Vec<Symbol> {
    let mut out = Vec::new();
    term.variables(&mut out);
    out
}

fn all_bound(vars: &[Symbol], bound: &BTreeSet<Symbol>) -> bool {
    vars.iter().all(|v| bound.contains(v))
}

/// Whether an atom can run given the variables bound so far.
fn eligible(atom: &BodyAtom, program: &Program, bound: &BTreeSet<Symbol>) -> bool {
    match atom {
        BodyAtom::Predicate(p) => {
            if p.negated && !is_lattice(program, &p.predicate) {
                return all_bound(&p.variables(), bound);
            }
            // Lattice atom: the key must ground; the value position may bind.
            let arity = p.terms.len();
            let key_vars: Vec<Symbol> = p.terms[..arity.saturating_sub(1)]
                .iter()
                .flat_map(term_vars)
                .collect();
            if !all_bound(&key_vars, bound) {
                return false;
            }
            if p.negated {
                return all_bound(&term_vars(&p.terms[arity - 1]), bound);
            }
            true
        }
        BodyAtom::Function(f) => match f {
            FunctionAtom::Eq(lhs, rhs, _) => {
                all_bound(&term_vars(lhs), bound) || all_bound(&term_vars(rhs), bound)
            }
            FunctionAtom::Cmp(_, lhs, rhs, _) => {
                all_bound(&term_vars(lhs), bound) && all_bound(&term_vars(rhs), bound)
            }
            FunctionAtom::Arith(_, lhs, rhs, _, _) | FunctionAtom::Lub(_, lhs, rhs, _, _) => {
                all_bound(&term_vars(lhs), bound) && all_bound(&term_vars(rhs), bound)
            }
        },
    }
}

/// Record the variables an eligible atom will bind when it runs.
fn bind_outputs(atom: &BodyAtom, program: &Program, bound: &mut BTreeSet<Symbol>) {
    match atom {
        BodyAtom::Predicate(p) => {
            if !p.negated && is_lattice(program, &p.predicate) {
                if let Some(value_term) = p.terms.last() {
                    bound.extend(term_vars(value_term));
                }
            }
        }
        BodyAtom::Function(f) => match f {
            FunctionAtom::Eq(lhs, rhs, _) => {
                bound.extend(term_vars(lhs));
                bound.extend(term_vars(rhs));
            }
            FunctionAtom::Cmp(..) => {}
            FunctionAtom::Arith(_, _, _, result, _) | FunctionAtom::Lub(_, _, _, result, _) => {
                bound.extend(term_vars(result));
            }
        },
    }
}

fn mode_error(atom: &BodyAtom, bound: &BTreeSet<Symbol>) -> SolveError {
    match atom {
        BodyAtom::Predicate(p) => {
            let variable = p
                .variables()
                .into_iter()
                .find(|v| !bound.contains(v))
                .unwrap_or_else(|| p.predicate.clone());
            if p.negated {
                SolveError::UngroundNegation {
                    predicate: p.predicate.clone(),
                    variable,
                    span: p.span,
                }
            } else {
                SolveError::UnboundVariable {
                    variable,
                    span: p.span,
                }
            }
        }
        BodyAtom::Function(f) => {
            let variable = f
                .variables()
                .into_iter()
                .find(|v| !bound.contains(v))
                .unwrap_or_else(|| Symbol::new("_"));
            SolveError::UnboundVariable {
                variable,
                span: f.span(),
            }
        }
    }
}

/// Resolve a clause body into head bindings, starting from `seed`.
///
/// `skip` marks the body atom the seed already satisfied (the one the
/// freshly derived fact matched); every other atom runs against the full
/// store. The frontier is deduplicated so equal environments do not fan out.
pub(crate) fn resolve(
    clause: &Clause,
    schedule: &Schedule,
    seed: Environment,
    skip: Option<usize>,
    program: &Program,
    facts: &FactStore,
    lattices: &LatticeStore,
) -> Result<Vec<Environment>> {
    let mut frontier = vec![seed];

    for &idx in &schedule.order {
        if skip == Some(idx) {
            continue;
        }
        let mut next = Vec::new();
        let mut seen: AHashSet<Environment> = AHashSet::new();
        for env in &frontier {
            let extensions = match &clause.body[idx] {
                BodyAtom::Predicate(p) => {
                    let interp = program.interpretation(&p.predicate, p.span)?;
                    extend(p, interp, facts, lattices, env)?
                }
                BodyAtom::Function(f) => eval_function(f, &program.interpretations, env)?,
            };
            for extension in extensions {
                if seen.insert(extension.clone()) {
                    next.push(extension);
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    Ok(frontier)
}
