//! # External Service Clients
//!
//! One client per external system: the report clearinghouse
//! (validate/submit/status-check), the pub/sub alert relay
//! (validate/submit), and the generic facility HTTP client whose
//! responses are classified by per-facility adapters. All clients take an
//! explicit configuration struct; nothing reads process-wide state.

pub mod adapters;
pub mod facility;
pub mod relay;
pub mod report;

pub use adapters::{
    AdapterRegistry, AtlasAdapter, FacilityAdapter, PanstarrsAdapter, PollOutcome,
};
pub use facility::{FacilityHttpClient, FacilityResponse};
pub use relay::{RelayClient, RelayClientConfig};
pub use report::{ReportClient, ReportClientConfig, ReportStatusReply};
