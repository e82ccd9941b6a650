//! Ingestion Service Module
//!
//! Handles the acquisition, preprocessing, and durable storage of books from
//! Project Gutenberg.
//!
//! ## Workflow
//! 1. **Claim**: take the cluster-wide claim for the book id; a concurrent
//!    ingestion of the same id loses the claim race and is turned away.
//! 2. **Download**: fetch the raw text from Project Gutenberg.
//! 3. **Persist**: split into header/content/footer and store the JSON document
//!    in the date/hour-bucketed datalake; parse the catalog summary.
//! 4. **Replicate**: push the document to peers until the replication factor is
//!    met; a quorum shortfall aborts the ingestion and releases the claim.
//! 5. **Publish**: emit the `document_ingested` event that drives indexing.

pub mod datalake;
pub mod handlers;
pub mod replication;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
