//! Utilities

pub mod diag;
