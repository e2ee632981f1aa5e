//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods.
//! Methods that run both standalone and inside an account transaction take
//! any `PgExecutor`, so callers pass either `&PgPool` or `&mut *tx`.

pub mod account_card_repo;
pub mod benefit_repo;
pub mod benefit_status_repo;
pub mod card_template_repo;

pub use account_card_repo::AccountCardRepo;
pub use benefit_repo::BenefitRepo;
pub use benefit_status_repo::BenefitStatusRepo;
pub use card_template_repo::CardTemplateRepo;
