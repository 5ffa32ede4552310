//! # uci-core
//!
//! Shared primitives for the UCI minibatch reader.
//!
//! This crate provides:
//! - [`Error`] / [`Result`] — the reader's error taxonomy
//! - [`Element`] / [`ElemKind`] — output element types (f32, f64)
//! - [`Matrix`] — dense column-major `[dim, samples]` output buffer

pub mod element;
pub mod error;
pub mod matrix;

pub use element::{ElemKind, Element};
pub use error::{Error, Result};
pub use matrix::Matrix;
