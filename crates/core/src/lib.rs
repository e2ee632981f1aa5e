//! Domain logic for recurring card benefit cycles.
//!
//! This crate has zero internal dependencies. It owns the calendar
//! arithmetic that turns a benefit's schedule into a concrete cycle window,
//! the structural checks that guard those windows, and the declarative
//! migration plan format consumed by the worker.

pub mod benefit;
pub mod cycle;
pub mod cycle_validation;
pub mod error;
pub mod migration;
pub mod plan;
pub mod types;
