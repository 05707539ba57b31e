//! Reference execution backend.
//!
//! - [`table`]: per-entity record tables and the snapshot queries read from
//! - [`eval`]: expression evaluation with SQL null semantics
//! - [`plan`]: shape validation and the filter/group/order/slice pipeline
//! - [`memory`]: [`MemoryBackend`], the [`ExecutionBackend`](crate::traits::ExecutionBackend)
//!   implementation tying them together

pub(crate) mod eval;
pub mod memory;
pub(crate) mod plan;
pub mod table;

pub use memory::MemoryBackend;
pub use table::EntityTable;
