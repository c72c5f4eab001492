#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' is empty")]
    EmptyField(&'static str),
    #[error("field '{field}' is not a finite number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unknown transaction direction '{0}'")]
    UnknownDirection(String),
    #[error("expected {expected} fields but found {found}")]
    FieldCount { expected: usize, found: usize },
}
