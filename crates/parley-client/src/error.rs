use thiserror::Error;

use parley_media::NegotiatorError;
use parley_shared::{IdentityError, RecordError};
use parley_store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Call error: {0}")]
    Call(#[from] NegotiatorError),

    #[error("No incoming call pending")]
    NoPendingCall,

    #[error("Attachment too large: {0} bytes")]
    AttachmentTooLarge(usize),

    #[error("Message text too large: {0} bytes")]
    TextTooLarge(usize),

    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    #[error("Session closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;
