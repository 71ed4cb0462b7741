//! Generic signature construction.
//!
//! This crate collects generic requirements (stated, inferred, and derived
//! from protocol declarations) over a set of generic type parameters, and
//! canonicalizes them into a minimal, conflict-diagnosed generic signature.

pub mod builder;
pub mod diag;
pub mod types;
