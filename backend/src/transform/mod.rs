//! Transformation: rules, execution strategies, batch driver and pipeline.
//!
//! - Rules: model, loader and row evaluator
//! - Strategy: custom and auto-generate rule resolution
//! - Batch: row-by-row driver with failure reporting
//! - Pipeline: end-to-end runs

pub mod batch;
pub mod pipeline;
pub mod rules;
pub mod strategy;

pub use batch::{run, run_with_state, BatchOptions, BatchOutcome, BatchSummary, RowFailure};
pub use pipeline::*;
pub use rules::*;
pub use strategy::{BatchState, DeterministicStrategy, ExecutionStrategy, Strategy, StrategyKind};
