//! # hachimi-engine
//!
//! Resurfacing engine for the hachimi engagement history.
//!
//! - `sampler`: stratified candidate pool drawn from the score index
//! - `selection`: weighted selection without replacement
//! - `engine`: observe, exempt, resonance selection, feedback, retention
//! - `history`: filter and sort for browsing
//! - `log`: bounded activity log with subscribers
//! - `dispatcher`: async request/response front door
//! - `lab`: Monte Carlo simulation of the selection weights

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod history;
pub mod lab;
pub mod log;
pub mod sampler;
pub mod selection;

pub use dispatcher::{Dispatcher, DispatcherHandle, Request, Response};
pub use engine::{EngineStats, ObserveOutcome, ResonanceEngine};
pub use error::EngineError;
pub use history::{HistoryQuery, InteractionFilter, SortField, SortOrder, TimeWindow};
pub use lab::{mock_pool, simulate, LabRow};
pub use log::{LogEntry, LogHub, LogLevel};
pub use sampler::StratifiedSampler;
pub use selection::select;
