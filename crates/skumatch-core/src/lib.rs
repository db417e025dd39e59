//! skumatch core library: reconcile a catalog's stored product identifiers
//! against an external price list.
//!
//! The matcher indexes one corpus by normalised head code, scores candidates
//! from the other, and hands accepted proposals to a claim table that keeps
//! identifiers unique across the catalog. Writes go through the
//! [`store::CatalogStore`] trait in a single transaction per run.

pub mod config;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod prep;
pub mod query;
pub mod report;
pub mod store;
pub mod tabular;
