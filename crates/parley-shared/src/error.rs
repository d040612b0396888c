use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity is empty")]
    Empty,

    #[error("Identity contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("Identity has no addressable characters: {0}")]
    Unaddressable(String),
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid identity in record: {0}")]
    Identity(#[from] IdentityError),
}
