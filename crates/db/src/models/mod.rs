//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the input types its repository accepts.

pub mod account_card;
pub mod benefit;
pub mod benefit_status;
pub mod card_template;
