//! `rapq` core: entity schemas, the fragment expression language, query
//! composition, and paged hypermedia envelopes.
//!
//! Everything here is synchronous and free of I/O. Execution against a store
//! and the HTTP surface live in `rapq-server`.

pub mod compose;
pub mod expr;
pub mod page;
pub mod query;
pub mod registry;
pub mod schema;
pub mod types;

pub use compose::{compose, ComposedQuery, Pagination, Selection};
pub use expr::{parse, ExpressionError, ExpressionKind, ParsedExpression};
pub use page::{
    BaseUrlError, EnvelopeBuilder, Link, Links, PageMetadata, RecordEnvelope, ResultEnvelope,
    ALTERNATE_PAGE_SIZES, DEFAULT_PAGE_SIZE,
};
pub use query::{Fragment, ParseError, ParsedFragments, QueryRequest};
pub use registry::{EntityRegistry, EntityScope, NotFoundError, RegistryError};
pub use schema::{EntityDefinition, EntityDescriptor, FieldDef, FieldType, RelationDef};
pub use types::{Row, Value};
