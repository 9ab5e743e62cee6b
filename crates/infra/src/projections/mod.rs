//! Projections: consume published envelopes, maintain disposable read models.
//!
//! Every projection here is cursor-guarded per (tenant, aggregate) stream, so
//! at-least-once delivery from the bus is safe: replays at or below the cursor
//! are ignored, and a rebuild clears cursors and replays from scratch.

pub mod contract_summary;
pub mod project_rollup;

pub use contract_summary::{ContractSummary, ContractSummaryProjection};
pub use project_rollup::{ProjectRollup, ProjectRollupProjection};
