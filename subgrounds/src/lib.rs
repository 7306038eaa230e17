//! Client side GraphQL query construction for The Graph subgraphs.
//!
//! Queries are built as [`Selection`](query::Selection) trees, rewritten by a
//! [`TransformPipeline`](transform::TransformPipeline), paginated automatically by a
//! [`PaginationStrategy`](pagination::PaginationStrategy) and merged back into one
//! response per document.
//!
//! Nothing in this crate performs I/O. Executions are state machines that hand out
//! the next [`Document`](query::Document) to send and are resumed with the data the
//! caller received; [`Subgrounds`](client::Subgrounds) drives them over a
//! [`Transport`](client::Transport) for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod client;
pub mod configuration;
pub mod error;
pub mod execution;
pub mod json_ext;
pub mod pagination;
pub mod query;
pub mod schema;
pub mod transform;

pub use client::AsyncTransport;
pub use client::Subgrounds;
pub use client::Transport;
pub use configuration::Configuration;
pub use error::SubgroundsError;
pub use execution::Execution;
pub use execution::PageStep;
pub use execution::StreamingExecution;

/// Outcome of resuming a state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<R, T> {
    /// The caller must perform `R` and resume with its result.
    Continue(R),
    /// The machine finished with `T`.
    Done(T),
}
