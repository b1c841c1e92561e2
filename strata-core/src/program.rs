//! Program representation handed over by the front-end.
//!
//! A [`Program`] couples the interpretation map (which predicate is a
//! relation, which is a lattice map) with ground facts and proper clauses.
//! Everything here is immutable once built; the solver never mutates a
//! program, it only reads it.

use crate::error::{Result, SolveError, Span};
use crate::symbol::Symbol;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A term in a clause: a constant, a variable, or a constructor applied to
/// sub-terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A ground constant.
    Constant(Value),
    /// A variable, bound during evaluation.
    Variable(Symbol),
    /// Constructor application over sub-terms, e.g. `Some(x)`.
    Ctor(Symbol, Vec<Term>),
}

impl Term {
    /// Create a variable term.
    pub fn var(name: impl Into<Symbol>) -> Self {
        Term::Variable(name.into())
    }

    /// Create a constant term.
    pub fn constant(value: Value) -> Self {
        Term::Constant(value)
    }

    /// Create a constructor term.
    pub fn ctor(name: impl Into<Symbol>, args: Vec<Term>) -> Self {
        Term::Ctor(name.into(), args)
    }

    /// Get the variable name if this is a variable.
    pub fn as_variable(&self) -> Option<&Symbol> {
        match self {
            Term::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// Collect every variable occurring in this term into `out`.
    pub fn variables(&self, out: &mut Vec<Symbol>) {
        match self {
            Term::Constant(_) => {}
            Term::Variable(name) => out.push(name.clone()),
            Term::Ctor(_, args) => {
                for arg in args {
                    arg.variables(out);
                }
            }
        }
    }

    /// Ground this term under `env`, or report the first unbound variable.
    pub fn ground(&self, env: &Environment, span: Span) -> Result<Value> {
        match self {
            Term::Constant(value) => Ok(value.clone()),
            Term::Variable(name) => {
                env.get(name)
                    .cloned()
                    .ok_or_else(|| SolveError::UnboundVariable {
                        variable: name.clone(),
                        span,
                    })
            }
            Term::Ctor(name, args) => {
                let mut grounded = Vec::with_capacity(args.len());
                for arg in args {
                    grounded.push(arg.ground(env, span)?);
                }
                Ok(Value::ctor(name.clone(), grounded))
            }
        }
    }

    /// Ground this term under `env` if every variable in it is bound.
    pub fn try_ground(&self, env: &Environment) -> Option<Value> {
        match self {
            Term::Constant(value) => Some(value.clone()),
            Term::Variable(name) => env.get(name).cloned(),
            Term::Ctor(name, args) => {
                let mut grounded = Vec::with_capacity(args.len());
                for arg in args {
                    grounded.push(arg.try_ground(env)?);
                }
                Some(Value::ctor(name.clone(), grounded))
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Constant(value) => write!(f, "{}", value),
            Term::Variable(name) => write!(f, "{}", name),
            Term::Ctor(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A predicate atom: predicate symbol, ordered terms, polarity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateAtom {
    /// Predicate name.
    pub predicate: Symbol,
    /// Arguments, arity 1..=5.
    pub terms: Vec<Term>,
    /// Whether this occurrence is negated.
    pub negated: bool,
    /// Source location.
    pub span: Span,
}

impl PredicateAtom {
    /// Create a positive atom.
    pub fn new(predicate: impl Into<Symbol>, terms: Vec<Term>) -> Self {
        PredicateAtom {
            predicate: predicate.into(),
            terms,
            negated: false,
            span: Span::default(),
        }
    }

    /// Create a negated atom.
    pub fn negated(predicate: impl Into<Symbol>, terms: Vec<Term>) -> Self {
        PredicateAtom {
            predicate: predicate.into(),
            terms,
            negated: true,
            span: Span::default(),
        }
    }

    /// Attach a source span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Number of terms.
    pub fn arity(&self) -> usize {
        self.terms.len()
    }

    /// Every variable occurring in this atom.
    pub fn variables(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        for term in &self.terms {
            term.variables(&mut out);
        }
        out
    }
}

impl fmt::Display for PredicateAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        write!(f, "{}(", self.predicate)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", term)?;
        }
        write!(f, ")")
    }
}

/// Comparison operator in a functional atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// Strictly less.
    Lt,
    /// Less or equal.
    Le,
    /// Strictly greater.
    Gt,
    /// Greater or equal.
    Ge,
    /// Not equal.
    Ne,
}

/// Arithmetic operator in a functional atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division; fails (no extension) on a zero divisor.
    Div,
    /// Remainder; fails on a zero divisor.
    Rem,
}

/// A functional or constraint atom.
///
/// These never touch the fact store; they test or bind values once their
/// operands are ground. The front-end lowers surface syntax like `n > 0`,
/// `z = x + y` and `lub(a, b)` head arguments into these shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionAtom {
    /// `lhs = rhs`; binds a single free side when the other grounds.
    Eq(Term, Term, Span),
    /// Comparison over ground operands.
    Cmp(CmpOp, Term, Term, Span),
    /// `result := lhs op rhs` over integers; binds `result` when free.
    Arith(ArithOp, Term, Term, Term, Span),
    /// `result := lub(lhs, rhs)` under the named lattice predicate.
    Lub(Symbol, Term, Term, Term, Span),
}

impl FunctionAtom {
    /// Source location of this atom.
    pub fn span(&self) -> Span {
        match self {
            FunctionAtom::Eq(_, _, span)
            | FunctionAtom::Cmp(_, _, _, span)
            | FunctionAtom::Arith(_, _, _, _, span)
            | FunctionAtom::Lub(_, _, _, _, span) => *span,
        }
    }

    /// Every variable occurring in this atom.
    pub fn variables(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        match self {
            FunctionAtom::Eq(a, b, _) | FunctionAtom::Cmp(_, a, b, _) => {
                a.variables(&mut out);
                b.variables(&mut out);
            }
            FunctionAtom::Arith(_, a, b, r, _) | FunctionAtom::Lub(_, a, b, r, _) => {
                a.variables(&mut out);
                b.variables(&mut out);
                r.variables(&mut out);
            }
        }
        out
    }
}

/// One atom of a clause body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyAtom {
    /// A (possibly negated) predicate atom over the fact or lattice store.
    Predicate(PredicateAtom),
    /// A functional or constraint atom.
    Function(FunctionAtom),
}

/// A Horn clause: `head :- body`. A clause with an empty body is a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Head atom.
    pub head: PredicateAtom,
    /// Body atoms in declaration order.
    pub body: Vec<BodyAtom>,
    /// Source location of the whole clause.
    pub span: Span,
}

impl Clause {
    /// Create a clause.
    pub fn new(head: PredicateAtom, body: Vec<BodyAtom>) -> Self {
        let span = head.span;
        Clause { head, body, span }
    }

    /// Create a fact (clause with empty body).
    pub fn fact(head: PredicateAtom) -> Self {
        Clause::new(head, vec![])
    }

    /// Whether this clause is a fact.
    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// The predicate atoms of the body, with their body positions.
    pub fn body_predicates(&self) -> impl Iterator<Item = (usize, &PredicateAtom)> {
        self.body.iter().enumerate().filter_map(|(i, atom)| match atom {
            BodyAtom::Predicate(p) => Some((i, p)),
            BodyAtom::Function(_) => None,
        })
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            write!(f, " :- ")?;
            for (i, atom) in self.body.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match atom {
                    BodyAtom::Predicate(p) => write!(f, "{}", p)?,
                    BodyAtom::Function(fa) => write!(f, "{:?}", fa)?,
                }
            }
        }
        write!(f, ".")
    }
}

/// Partial order of a lattice interpretation.
pub type LeqFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Least upper bound of a lattice interpretation.
pub type LubFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Declared meaning of a predicate symbol.
///
/// The join of a lattice interpretation must be commutative, associative,
/// idempotent and monotone; the solver trusts the program to supply such
/// functions and relies on finite lattice height for termination.
#[derive(Clone)]
pub enum Interpretation {
    /// A finite relation of the given arity.
    Relation {
        /// Declared arity.
        arity: usize,
    },
    /// A keyed lattice map: `arity - 1` key positions, one value position.
    LatticeMap {
        /// Declared arity, keys plus the value position.
        arity: usize,
        /// Least element, the default for absent keys.
        bottom: Value,
        /// Partial order.
        leq: LeqFn,
        /// Least upper bound.
        lub: LubFn,
    },
}

impl Interpretation {
    /// Declare a relation.
    pub fn relation(arity: usize) -> Self {
        Interpretation::Relation { arity }
    }

    /// Declare a lattice map.
    pub fn lattice(arity: usize, bottom: Value, leq: LeqFn, lub: LubFn) -> Self {
        Interpretation::LatticeMap {
            arity,
            bottom,
            leq,
            lub,
        }
    }

    /// Declared arity.
    pub fn arity(&self) -> usize {
        match self {
            Interpretation::Relation { arity } => *arity,
            Interpretation::LatticeMap { arity, .. } => *arity,
        }
    }

    /// Whether this is a lattice interpretation.
    pub fn is_lattice(&self) -> bool {
        matches!(self, Interpretation::LatticeMap { .. })
    }
}

impl fmt::Debug for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpretation::Relation { arity } => {
                f.debug_struct("Relation").field("arity", arity).finish()
            }
            Interpretation::LatticeMap { arity, bottom, .. } => f
                .debug_struct("LatticeMap")
                .field("arity", arity)
                .field("bottom", bottom)
                .finish_non_exhaustive(),
        }
    }
}

/// A complete program as produced by the front-end.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Declared meaning per predicate symbol.
    pub interpretations: BTreeMap<Symbol, Interpretation>,
    /// Clauses with empty body and ground head.
    pub facts: Vec<Clause>,
    /// Clauses with non-empty body.
    pub clauses: Vec<Clause>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Program::default()
    }

    /// Declare a predicate.
    pub fn declare(&mut self, predicate: impl Into<Symbol>, interp: Interpretation) -> &mut Self {
        self.interpretations.insert(predicate.into(), interp);
        self
    }

    /// Add a ground fact.
    pub fn add_fact(&mut self, fact: Clause) -> &mut Self {
        self.facts.push(fact);
        self
    }

    /// Add a proper clause.
    pub fn add_clause(&mut self, clause: Clause) -> &mut Self {
        self.clauses.push(clause);
        self
    }

    /// Look up the interpretation of `predicate`, or fail with
    /// [`SolveError::UnknownPredicate`].
    pub fn interpretation(&self, predicate: &Symbol, span: Span) -> Result<&Interpretation> {
        self.interpretations
            .get(predicate)
            .ok_or_else(|| SolveError::UnknownPredicate {
                predicate: predicate.clone(),
                span,
            })
    }
}

/// Finite mapping from variables to values, extended purely functionally.
///
/// Environments are short-lived: they exist for the duration of one clause
/// resolution and are never retained across clause boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Environment {
    bindings: BTreeMap<Symbol, Value>,
}

impl Environment {
    /// The empty environment.
    pub fn new() -> Self {
        Environment::default()
    }

    /// Look up a binding.
    pub fn get(&self, variable: &Symbol) -> Option<&Value> {
        self.bindings.get(variable)
    }

    /// Whether a variable is bound.
    pub fn is_bound(&self, variable: &Symbol) -> bool {
        self.bindings.contains_key(variable)
    }

    /// Extend with a binding. Returns `None` when `variable` is already
    /// bound to a different value.
    pub fn bind(&self, variable: Symbol, value: Value) -> Option<Environment> {
        match self.bindings.get(&variable) {
            Some(existing) if *existing != value => None,
            Some(_) => Some(self.clone()),
            None => {
                let mut extended = self.clone();
                extended.bindings.insert(variable, value);
                Some(extended)
            }
        }
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (variable, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", variable, value)?;
        }
        write!(f, "}}")
    }
}
