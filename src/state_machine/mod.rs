//! # Status State Machine
//!
//! The authoritative set of legal states and transitions per external
//! system, applied uniformly regardless of which client produced the
//! outcome. See [`states`] for the vocabulary and [`transitions`] for the
//! legal edges.

pub mod states;
pub mod transitions;

pub use states::{FacilityStatus, RelayStatus, ReportStatus};
pub use transitions::{next_relay_status, next_report_status, RelayEvent, ReportEvent};
