//! Planning module for seed runs.
//!
//! This module decides what a sync has to do for each resource and
//! backend, and reports what a dry run found or a sync applied.

mod diff;
mod report;

pub use diff::{
    CompareScope, DiffType, changed_fields, classify, classify_write_only, normalize,
    payload_differs, strip_response_fields,
};
pub use report::{DiffEntry, DiffReport, SeedReport};
