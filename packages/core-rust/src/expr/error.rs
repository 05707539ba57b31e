/// Failure to turn an expression fragment into a typed expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// The text does not match the grammar. `position` is a byte offset.
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Brackets, calls or operator chains nest beyond `limit` levels.
    #[error("expression nested deeper than {limit} levels at position {position}")]
    TooDeep { position: usize, limit: usize },

    /// A path does not resolve against the entity's schema.
    #[error("unknown field '{path}' on entity '{entity}'")]
    UnknownField { entity: String, path: String },

    /// Operands of an operator have incompatible types.
    #[error("type mismatch in '{expression}': {detail}")]
    TypeMismatch { expression: String, detail: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("aggregate '{expression}' cannot contain another aggregate")]
    NestedAggregate { expression: String },

    /// Two projection items produce the same output label.
    #[error("duplicate projection label '{label}'")]
    DuplicateLabel { label: String },
}
