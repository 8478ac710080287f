//! Daily API quota: accounting and project rotation

pub mod ledger;
pub mod rotation;

pub use ledger::{ProjectQuota, QuotaLedger, QuotaStatus, Reservation, DEFAULT_UPLOAD_COST};
pub use rotation::select_project;
