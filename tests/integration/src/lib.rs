//! End-to-end tests for the ingestion pipeline.

mod backpressure;
mod checkpoints;
mod failures;
