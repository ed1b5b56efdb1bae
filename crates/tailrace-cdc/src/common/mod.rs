//! # Common Types and Plumbing
//!
//! Source-agnostic pieces of the commit-log pipeline:
//!
//! - [`ChangeEvent`] / [`CellData`] - the emitted data model
//! - [`TableSchema`] / [`SchemaLookup`] - externally-supplied column layout
//! - [`ChangeEventQueue`] - bounded ingestion/publishing handoff
//! - [`FieldFilter`] - column exclusion
//! - [`CommitLogConfig`] - pipeline configuration
//! - [`CdcError`] - error taxonomy with retry classification

mod cell;
mod config;
mod error;
mod event;
mod filter;
mod queue;
mod schema;

pub use cell::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use filter::*;
pub use queue::*;
pub use schema::*;
