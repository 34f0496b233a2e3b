//! Service layer for the sync application.
//!
//! This module contains the business logic for:
//! - Upstream access (`ResultsVault`)
//! - Entity normalization (`normalize_match`, `parse_grade`)
//! - Notifications (`Notifier`)

pub mod normalizer;
pub mod notifier;
pub mod upstream;

pub use normalizer::{normalize_match, parse_grade};
pub use notifier::{Notifier, notify};
pub use upstream::ResultsVault;
