//! # Data Model
//!
//! Row structs for the transactional store plus the plain data types that
//! flow between the builder, clients, and loops. Query logic lives behind
//! the [`crate::store`] traits; the models stay passive.

pub mod facility_transaction;
pub mod photometry;
pub mod sharing_service;
pub mod submission_request;

pub use facility_transaction::{FacilityTransactionRequest, NewFacilityTransactionRequest};
pub use photometry::{Author, ObjectCoords, PhotometryPoint};
pub use sharing_service::SharingService;
pub use submission_request::{NewSubmissionRequest, SubmissionRequest};
