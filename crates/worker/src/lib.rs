//! Background services for benefit cycles.
//!
//! - [`migration::MigrationEngine`]: applies a versioned plan to every
//!   account holding a card product.
//! - [`materializer::CycleMaterializer`]: keeps one status row per active
//!   occurrence and hands digests to a notifier.
//! - [`trigger`]: the interval loop that drives the materializer.

pub mod batch;
pub mod config;
pub mod materializer;
pub mod migration;
pub mod telemetry;
pub mod trigger;
