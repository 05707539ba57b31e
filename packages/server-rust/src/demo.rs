//! Built-in book/author schema and records, served when no schema or data
//! file is given.

use std::path::Path;

use anyhow::Context;
use rapq_core::{EntityDefinition, EntityDescriptor, EntityRegistry, FieldType, RegistryError, Value};

use crate::storage::MemoryBackend;

/// `(id, first name, last name)`
pub const AUTHORS: [(i64, &str, &str); 2] = [(1, "Mark", "Twain"), (2, "Zdenek", "Miller")];

/// `(id, title, author id)`
pub const BOOKS: [(i64, &str, i64); 5] = [
    (1, "Hahaha", 1),
    (2, "Krtek", 2),
    (3, "The Adventures of Tom Sawyer", 1),
    (4, "Krtek a autícko", 2),
    (5, "Adventures of Huckleberry Finn", 1),
];

/// Registry with `book` (`id`, `title`, `author`) and `author` (`id`,
/// `firstName`, `lastName`).
///
/// # Errors
///
/// Never fails for the built-in schema; the signature matches
/// [`registry_from_json`].
pub fn registry() -> Result<EntityRegistry, RegistryError> {
    EntityRegistry::new([
        EntityDescriptor::builder("Book")
            .field("id", FieldType::Integer)
            .field("title", FieldType::Text)
            .relation("author", "Author")
            .build(),
        EntityDescriptor::builder("Author")
            .field("id", FieldType::Integer)
            .field("firstName", FieldType::Text)
            .field("lastName", FieldType::Text)
            .build(),
    ])
}

/// Builds a registry from a JSON array of entity definitions.
///
/// # Errors
///
/// Fails on malformed JSON or an inconsistent set of definitions.
pub fn registry_from_json(json: &str) -> anyhow::Result<EntityRegistry> {
    let definitions: Vec<EntityDefinition> =
        serde_json::from_str(json).context("schema must be an array of entity definitions")?;
    Ok(EntityRegistry::new(
        definitions.into_iter().map(EntityDescriptor::from),
    )?)
}

/// Reads a schema file and builds the registry it describes.
///
/// # Errors
///
/// Fails if the file cannot be read, or as [`registry_from_json`] does.
pub fn registry_from_file(path: &Path) -> anyhow::Result<EntityRegistry> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema {}", path.display()))?;
    registry_from_json(&text).with_context(|| format!("in schema {}", path.display()))
}

/// Stores the built-in authors and books.
///
/// # Errors
///
/// Fails if the backend's registry lacks the demo entities.
pub fn seed(backend: &MemoryBackend) -> anyhow::Result<usize> {
    for (id, first, last) in AUTHORS {
        backend.insert(
            "author",
            record([
                ("id", Value::Int(id)),
                ("firstName", Value::String(first.to_string())),
                ("lastName", Value::String(last.to_string())),
            ]),
        )?;
    }
    for (id, title, author) in BOOKS {
        backend.insert(
            "book",
            record([
                ("id", Value::Int(id)),
                ("title", Value::String(title.to_string())),
                ("author", Value::Int(author)),
            ]),
        )?;
    }
    Ok(AUTHORS.len() + BOOKS.len())
}

fn record<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Map(
        fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    )
}
