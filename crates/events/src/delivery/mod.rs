//! External notification delivery channels.
//!
//! - [`email`]: SMTP delivery via `lettre`.
//! - [`webhook`]: HTTP POST delivery with retry via `reqwest`.

pub mod email;
pub mod webhook;
