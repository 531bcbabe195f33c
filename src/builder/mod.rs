//! # Payload Builders
//!
//! Pure construction logic shared by the dispatch loop: publishable
//! photometry selection, report payloads with archival fallback, reporter
//! strings, and relay messages. Everything here is deterministic and
//! side-effect free; the loops own persistence and I/O.

pub mod authors;
pub mod relay;
pub mod report;

pub use authors::build_reporter_string;
pub use relay::{build_relay_message, RelayMessage, RelayTarget};
pub use report::{
    build_report_content, build_remarks, merge_photometry_options, publishable_photometry,
    to_report_payload, PhotometryOptions, ReportContent,
};
