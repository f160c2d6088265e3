//! Thin wrappers that turn an `ndarray` matrix into `(U, S, Vt)`.
//!
//! [`dense`] runs the pure-Rust `nalgebra` decomposition and is always available;
//! [`faer`] is compiled in with the `faer` feature.

pub mod dense;
#[cfg(feature = "faer")]
pub mod faer;
