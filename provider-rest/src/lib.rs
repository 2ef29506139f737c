//! # REST Data Service Provider
//!
//! Wire layer for the remote REST data service.
//!
//! ## Overview
//!
//! - [`RestRequest`] constructors for sObject CRUD, upsert by external id,
//!   composite, sObject Collections and query
//! - [`RestClient`] resolving paths against the instance URL and attaching the
//!   bearer token
//! - Wire types for composite, collection and query payloads
//! - [`SoqlBuilder`] for the conflict-check queries
//!
//! Everything above the wire (which request a record needs, what to do with
//! the answer) lives in `core-sync`.

pub mod client;
pub mod error;
pub mod request;
pub mod soql;
pub mod types;

pub use client::{RestClient, RestResponse};
pub use error::{RestError, Result};
pub use request::{RestRequest, MAX_COLLECTION_RECORDS, MAX_COMPOSITE_SUBREQUESTS};
pub use soql::SoqlBuilder;
pub use types::{
    CollectionError, CollectionResult, CompositeResponse, CompositeSubresponse, QueryResponse,
};
