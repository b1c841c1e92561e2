//! STRATA core - bottom-up fixed-point solver for stratified Datalog with
//! lattices.
//!
//! The front-end hands over a typed [`Program`]: interpretations (relation
//! or lattice map per predicate), ground facts, and Horn clauses. The solver
//! stratifies the program, then runs a semi-naive worklist per stratum until
//! quiescence and returns the minimal [`Model`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod program;
pub mod solver;
pub mod symbol;
pub mod value;

pub use error::{Result, SolveError, Span};
pub use program::{
    ArithOp, BodyAtom, Clause, CmpOp, Environment, FunctionAtom, Interpretation, PredicateAtom,
    Program, Term,
};
pub use solver::{CancelToken, Model, SolveStats, Solver};
pub use symbol::Symbol;
pub use value::Value;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
