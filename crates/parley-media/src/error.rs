use thiserror::Error;

use parley_shared::RecordError;
use parley_store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Local media unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum NegotiatorError {
    #[error("A call is already in progress ({0})")]
    Busy(&'static str),

    #[error("No call in progress")]
    NoCall,

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

pub type Result<T> = std::result::Result<T, NegotiatorError>;
