//! Query service: the orchestration between HTTP handlers and the engine.
//!
//! 1. **Resolution**: entity name (or plural alias) to descriptor
//! 2. **Parsing** (`rapq_core::ParsedFragments`): fragment text to typed expressions
//! 3. **Composition** (`rapq_core::compose`): fragments plus pagination
//! 4. **Execution** ([`crate::execution`]): fetch, and count when paged
//! 5. **Envelope** (`rapq_core::EnvelopeBuilder`): items, page metadata, links

pub mod config;
pub mod error;
pub mod query;

pub use config::QueryConfig;
pub use error::{ErrorResponse, QueryError};
pub use query::QueryService;
