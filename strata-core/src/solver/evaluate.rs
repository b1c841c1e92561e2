//! Per-atom environment extension.
//!
//! `extend` takes one body atom, the stores, and a partial environment and
//! yields every extension satisfying the atom. An empty result models
//! failure of the conjunct; errors are reserved for mode violations the
//! admission checks should have made impossible.

use crate::error::{Result, SolveError, Span};
use crate::program::{
    ArithOp, CmpOp, Environment, FunctionAtom, Interpretation, PredicateAtom, Term,
};
use crate::solver::lattice::LatticeStore;
use crate::solver::store::FactStore;
use crate::symbol::Symbol;
use crate::value::Value;
use std::collections::BTreeMap;

/// Unify one term against a retrieved ground value.
///
/// Constants test equality, free variables bind, constructor terms match
/// structurally and may bind variables inside the constructor.
pub(crate) fn unify_term(term: &Term, value: &Value, env: &Environment) -> Option<Environment> {
    match term {
        Term::Constant(constant) => (constant == value).then(|| env.clone()),
        Term::Variable(name) => env.bind(name.clone(), value.clone()),
        Term::Ctor(name, args) => match value {
            Value::Ctor(vname, vargs) if vname == name && vargs.len() == args.len() => {
                let mut current = env.clone();
                for (arg, varg) in args.iter().zip(vargs.iter()) {
                    current = unify_term(arg, varg, &current)?;
                }
                Some(current)
            }
            _ => None,
        },
    }
}

/// Unify a whole atom against a ground tuple, starting from `env`.
pub(crate) fn unify_tuple(
    atom: &PredicateAtom,
    tuple: &[Value],
    env: &Environment,
) -> Option<Environment> {
    if atom.terms.len() != tuple.len() {
        return None;
    }
    let mut current = env.clone();
    for (term, value) in atom.terms.iter().zip(tuple.iter()) {
        current = unify_term(term, value, &current)?;
    }
    Some(current)
}

/// Extend `env` through one predicate atom.
pub(crate) fn extend(
    atom: &PredicateAtom,
    interp: &Interpretation,
    facts: &FactStore,
    lattices: &LatticeStore,
    env: &Environment,
) -> Result<Vec<Environment>> {
    if interp.is_lattice() {
        return extend_lattice(atom, interp, lattices, env);
    }
    if atom.negated {
        return extend_negated(atom, facts, env);
    }
    extend_positive(atom, facts, env)
}

/// Positive relational atom: prefix lookup plus unification of the rest.
fn extend_positive(
    atom: &PredicateAtom,
    facts: &FactStore,
    env: &Environment,
) -> Result<Vec<Environment>> {
    // Longest leading run of terms that ground under the environment.
    let mut prefix = Vec::new();
    for term in &atom.terms {
        match term.try_ground(env) {
            Some(value) => prefix.push(value),
            None => break,
        }
    }

    if prefix.len() == atom.terms.len() {
        // Fully ground: a membership test.
        return Ok(if facts.contains(&atom.predicate, &prefix) {
            vec![env.clone()]
        } else {
            vec![]
        });
    }

    let mut out = Vec::new();
    for tuple in facts.lookup(&atom.predicate, &prefix) {
        let mut current = env.clone();
        let mut matched = true;
        for (term, value) in atom.terms.iter().zip(tuple.iter()).skip(prefix.len()) {
            match unify_term(term, value, &current) {
                Some(next) => current = next,
                None => {
                    matched = false;
                    break;
                }
            }
        }
        if matched {
            out.push(current);
        }
    }
    Ok(out)
}

/// Negation as failure over a complete lower stratum.
fn extend_negated(
    atom: &PredicateAtom,
    facts: &FactStore,
    env: &Environment,
) -> Result<Vec<Environment>> {
    let tuple = ground_all(atom, env)?;
    Ok(if facts.contains(&atom.predicate, &tuple) {
        vec![]
    } else {
        vec![env.clone()]
    })
}

/// Lattice atom: bind the value position to the cell, or test `leq`.
fn extend_lattice(
    atom: &PredicateAtom,
    interp: &Interpretation,
    lattices: &LatticeStore,
    env: &Environment,
) -> Result<Vec<Environment>> {
    let arity = atom.terms.len();
    let mut key = Vec::with_capacity(arity - 1);
    for term in &atom.terms[..arity - 1] {
        key.push(term.ground(env, atom.span)?);
    }
    let cell = lattices.get(&atom.predicate, &key, interp);
    let value_term = &atom.terms[arity - 1];

    if atom.negated {
        // Complement of the threshold test; key and value must be ground.
        let value = ground_term_for_negation(atom, value_term, env)?;
        let leq = lattice_leq(interp);
        return Ok(if leq(&cell, &value) {
            vec![]
        } else {
            vec![env.clone()]
        });
    }

    match value_term.try_ground(env) {
        Some(value) => {
            // Upper-approximation reading: the atom holds when the cell is
            // still below the requested value.
            let leq = lattice_leq(interp);
            Ok(if leq(&cell, &value) {
                vec![env.clone()]
            } else {
                vec![]
            })
        }
        None => Ok(unify_term(value_term, &cell, env).into_iter().collect()),
    }
}

fn lattice_leq(interp: &Interpretation) -> &crate::program::LeqFn {
    match interp {
        Interpretation::LatticeMap { leq, .. } => leq,
        // extend_lattice is only reached for lattice interpretations.
        Interpretation::Relation { .. } => unreachable!("lattice atom over a relation"),
    }
}

/// Ground every term of a negated atom, reporting `UngroundNegation`.
fn ground_all(atom: &PredicateAtom, env: &Environment) -> Result<Vec<Value>> {
    let mut tuple = Vec::with_capacity(atom.terms.len());
    for term in &atom.terms {
        match term.try_ground(env) {
            Some(value) => tuple.push(value),
            None => {
                let mut vars = Vec::new();
                term.variables(&mut vars);
                let variable = vars
                    .into_iter()
                    .find(|v| !env.is_bound(v))
                    .unwrap_or_else(|| atom.predicate.clone());
                return Err(SolveError::UngroundNegation {
                    predicate: atom.predicate.clone(),
                    variable,
                    span: atom.span,
                });
            }
        }
    }
    Ok(tuple)
}

fn ground_term_for_negation(
    atom: &PredicateAtom,
    term: &Term,
    env: &Environment,
) -> Result<Value> {
    term.try_ground(env).ok_or_else(|| {
        let mut vars = Vec::new();
        term.variables(&mut vars);
        let variable = vars
            .into_iter()
            .find(|v| !env.is_bound(v))
            .unwrap_or_else(|| atom.predicate.clone());
        SolveError::UngroundNegation {
            predicate: atom.predicate.clone(),
            variable,
            span: atom.span,
        }
    })
}

/// Evaluate a functional atom: a test, or a binding of one free term.
pub(crate) fn eval_function(
    atom: &FunctionAtom,
    interpretations: &BTreeMap<Symbol, Interpretation>,
    env: &Environment,
) -> Result<Vec<Environment>> {
    match atom {
        FunctionAtom::Eq(lhs, rhs, span) => eval_eq(lhs, rhs, *span, env),
        FunctionAtom::Cmp(op, lhs, rhs, span) => {
            let a = ground_operand(lhs, *span, env)?;
            let b = ground_operand(rhs, *span, env)?;
            Ok(if compare(*op, &a, &b) {
                vec![env.clone()]
            } else {
                vec![]
            })
        }
        FunctionAtom::Arith(op, lhs, rhs, result, span) => {
            let a = ground_operand(lhs, *span, env)?;
            let b = ground_operand(rhs, *span, env)?;
            match arith(*op, &a, &b) {
                Some(value) => bind_result(result, value, *span, env),
                None => Ok(vec![]),
            }
        }
        FunctionAtom::Lub(predicate, lhs, rhs, result, span) => {
            let a = ground_operand(lhs, *span, env)?;
            let b = ground_operand(rhs, *span, env)?;
            let lub = match interpretations.get(predicate) {
                Some(Interpretation::LatticeMap { lub, .. }) => lub,
                _ => {
                    return Err(SolveError::LatticeContract {
                        predicate: predicate.clone(),
                        message: "lub applied to a non-lattice predicate".to_string(),
                    })
                }
            };
            bind_result(result, lub(&a, &b), *span, env)
        }
    }
}

fn eval_eq(lhs: &Term, rhs: &Term, span: Span, env: &Environment) -> Result<Vec<Environment>> {
    match (lhs.try_ground(env), rhs.try_ground(env)) {
        (Some(a), Some(b)) => Ok(if a == b { vec![env.clone()] } else { vec![] }),
        (Some(a), None) => Ok(unify_term(rhs, &a, env).into_iter().collect()),
        (None, Some(b)) => Ok(unify_term(lhs, &b, env).into_iter().collect()),
        (None, None) => {
            let mut vars = Vec::new();
            lhs.variables(&mut vars);
            rhs.variables(&mut vars);
            let variable = vars
                .into_iter()
                .find(|v| !env.is_bound(v))
                .unwrap_or_else(|| Symbol::new("_"));
            Err(SolveError::UnboundVariable { variable, span })
        }
    }
}

fn ground_operand(term: &Term, span: Span, env: &Environment) -> Result<Value> {
    term.try_ground(env).ok_or_else(|| {
        let mut vars = Vec::new();
        term.variables(&mut vars);
        let variable = vars
            .into_iter()
            .find(|v| !env.is_bound(v))
            .unwrap_or_else(|| Symbol::new("_"));
        SolveError::UnboundVariable { variable, span }
    })
}

fn bind_result(
    result: &Term,
    value: Value,
    span: Span,
    env: &Environment,
) -> Result<Vec<Environment>> {
    match result.try_ground(env) {
        Some(existing) => Ok(if existing == value {
            vec![env.clone()]
        } else {
            vec![]
        }),
        None => match result {
            Term::Variable(_) | Term::Ctor(_, _) => {
                Ok(unify_term(result, &value, env).into_iter().collect())
            }
            Term::Constant(_) => Err(SolveError::UnboundVariable {
                variable: Symbol::new("_"),
                span,
            }),
        },
    }
}

/// Integer comparison across widths; other values fall back to structural
/// ordering.
fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    let ordering = match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    };
    match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Ne => ordering.is_ne(),
    }
}

/// Total integer arithmetic; `None` on a non-integer operand or a zero
/// divisor, which fails the atom rather than erroring.
fn arith(op: ArithOp, a: &Value, b: &Value) -> Option<Value> {
    let x = a.as_int()?;
    let y = b.as_int()?;
    let result = match op {
        ArithOp::Add => x.checked_add(y)?,
        ArithOp::Sub => x.checked_sub(y)?,
        ArithOp::Mul => x.checked_mul(y)?,
        ArithOp::Div => x.checked_div(y)?,
        ArithOp::Rem => x.checked_rem(y)?,
    };
    i64::try_from(result).ok().map(Value::Int64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::lattice;

    fn fact_store(predicate: &str, arity: usize, tuples: &[Vec<Value>]) -> FactStore {
        let mut interps = BTreeMap::new();
        interps.insert(Symbol::new(predicate), Interpretation::relation(arity));
        let mut store = FactStore::new(&interps);
        for tuple in tuples {
            store.insert(&Symbol::new(predicate), tuple.clone());
        }
        store
    }

    fn empty_lattices() -> LatticeStore {
        LatticeStore::new(&BTreeMap::new())
    }

    #[test]
    fn test_extend_positive_binds_free_variables() {
        let store = fact_store(
            "edge",
            2,
            &[
                vec![Value::Int64(1), Value::Int64(2)],
                vec![Value::Int64(1), Value::Int64(3)],
                vec![Value::Int64(2), Value::Int64(3)],
            ],
        );
        let atom = PredicateAtom::new(
            "edge",
            vec![Term::constant(Value::Int64(1)), Term::var("y")],
        );
        let interp = Interpretation::relation(2);

        let envs = extend(&atom, &interp, &store, &empty_lattices(), &Environment::new()).unwrap();
        assert_eq!(envs.len(), 2);
        let ys: Vec<&Value> = envs.iter().filter_map(|e| e.get(&Symbol::new("y"))).collect();
        assert_eq!(ys, vec![&Value::Int64(2), &Value::Int64(3)]);
    }

    #[test]
    fn test_extend_positive_ground_membership() {
        let store = fact_store("edge", 2, &[vec![Value::Int64(1), Value::Int64(2)]]);
        let interp = Interpretation::relation(2);
        let hit = PredicateAtom::new(
            "edge",
            vec![Term::constant(Value::Int64(1)), Term::constant(Value::Int64(2))],
        );
        let miss = PredicateAtom::new(
            "edge",
            vec![Term::constant(Value::Int64(2)), Term::constant(Value::Int64(1))],
        );

        let env = Environment::new();
        assert_eq!(
            extend(&hit, &interp, &store, &empty_lattices(), &env)
                .unwrap()
                .len(),
            1
        );
        assert!(extend(&miss, &interp, &store, &empty_lattices(), &env)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_extend_positive_repeated_variable() {
        let store = fact_store(
            "edge",
            2,
            &[
                vec![Value::Int64(1), Value::Int64(1)],
                vec![Value::Int64(1), Value::Int64(2)],
            ],
        );
        let atom = PredicateAtom::new("edge", vec![Term::var("x"), Term::var("x")]);
        let interp = Interpretation::relation(2);

        let envs = extend(&atom, &interp, &store, &empty_lattices(), &Environment::new()).unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].get(&Symbol::new("x")), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_extend_constructor_pattern() {
        let store = fact_store(
            "holds",
            1,
            &[
                vec![Value::ctor(Symbol::new("Some"), vec![Value::Int64(7)])],
                vec![Value::tag("None")],
            ],
        );
        let atom = PredicateAtom::new("holds", vec![Term::ctor("Some", vec![Term::var("n")])]);
        let interp = Interpretation::relation(1);

        let envs = extend(&atom, &interp, &store, &empty_lattices(), &Environment::new()).unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].get(&Symbol::new("n")), Some(&Value::Int64(7)));
    }

    #[test]
    fn test_extend_negated_requires_ground() {
        let store = fact_store("p", 1, &[vec![Value::Int64(1)]]);
        let interp = Interpretation::relation(1);
        let atom = PredicateAtom::negated("p", vec![Term::var("x")]);

        let err = extend(&atom, &interp, &store, &empty_lattices(), &Environment::new())
            .unwrap_err();
        assert!(matches!(err, SolveError::UngroundNegation { .. }));

        let env = Environment::new()
            .bind(Symbol::new("x"), Value::Int64(2))
            .unwrap();
        let envs = extend(&atom, &interp, &store, &empty_lattices(), &env).unwrap();
        assert_eq!(envs.len(), 1);
    }

    #[test]
    fn test_extend_lattice_binds_and_tests() {
        let interp = lattice::int_max(2);
        let mut interps = BTreeMap::new();
        interps.insert(Symbol::new("best"), interp.clone());
        let mut lattices = LatticeStore::new(&interps);
        let facts = FactStore::new(&BTreeMap::new());
        lattices.join(&Symbol::new("best"), &[Value::str("k")], Value::Int64(4), &interp);

        let env = Environment::new()
            .bind(Symbol::new("k"), Value::str("k"))
            .unwrap();

        // Variable value position binds to the cell.
        let read = PredicateAtom::new("best", vec![Term::var("k"), Term::var("v")]);
        let envs = extend(&read, &interp, &facts, &lattices, &env).unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].get(&Symbol::new("v")), Some(&Value::Int64(4)));

        // Ground value position is an upper-bound test.
        let below = PredicateAtom::new(
            "best",
            vec![Term::var("k"), Term::constant(Value::Int64(9))],
        );
        assert_eq!(extend(&below, &interp, &facts, &lattices, &env).unwrap().len(), 1);
        let above = PredicateAtom::new(
            "best",
            vec![Term::var("k"), Term::constant(Value::Int64(2))],
        );
        assert!(extend(&above, &interp, &facts, &lattices, &env)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_eval_cmp_and_arith() {
        let interps = BTreeMap::new();
        let env = Environment::new()
            .bind(Symbol::new("n"), Value::Int64(5))
            .unwrap();

        let gt = FunctionAtom::Cmp(
            CmpOp::Gt,
            Term::var("n"),
            Term::constant(Value::Int64(0)),
            Span::default(),
        );
        assert_eq!(eval_function(&gt, &interps, &env).unwrap().len(), 1);

        let sum = FunctionAtom::Arith(
            ArithOp::Add,
            Term::var("n"),
            Term::constant(Value::Int64(2)),
            Term::var("m"),
            Span::default(),
        );
        let envs = eval_function(&sum, &interps, &env).unwrap();
        assert_eq!(envs[0].get(&Symbol::new("m")), Some(&Value::Int64(7)));

        let div = FunctionAtom::Arith(
            ArithOp::Div,
            Term::var("n"),
            Term::constant(Value::Int64(0)),
            Term::var("q"),
            Span::default(),
        );
        assert!(eval_function(&div, &interps, &env).unwrap().is_empty());
    }

    #[test]
    fn test_eval_eq_binds_one_side() {
        let interps = BTreeMap::new();
        let env = Environment::new()
            .bind(Symbol::new("x"), Value::Int64(3))
            .unwrap();

        let eq = FunctionAtom::Eq(Term::var("y"), Term::var("x"), Span::default());
        let envs = eval_function(&eq, &interps, &env).unwrap();
        assert_eq!(envs[0].get(&Symbol::new("y")), Some(&Value::Int64(3)));

        let both_free = FunctionAtom::Eq(Term::var("a"), Term::var("b"), Span::default());
        assert!(matches!(
            eval_function(&both_free, &interps, &Environment::new()),
            Err(SolveError::UnboundVariable { .. })
        ));
    }

    #[test]
    fn test_eval_lub_through_interpretation() {
        let mut interps = BTreeMap::new();
        interps.insert(
            Symbol::new("Sign"),
            lattice::flat(2, Value::tag("Bot"), Value::tag("Top")),
        );
        let env = Environment::new()
            .bind(Symbol::new("a"), Value::tag("Pos"))
            .unwrap()
            .bind(Symbol::new("b"), Value::tag("Neg"))
            .unwrap();

        let lub = FunctionAtom::Lub(
            Symbol::new("Sign"),
            Term::var("a"),
            Term::var("b"),
            Term::var("c"),
            Span::default(),
        );
        let envs = eval_function(&lub, &interps, &env).unwrap();
        assert_eq!(envs[0].get(&Symbol::new("c")), Some(&Value::tag("Top")));
    }
}
