use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PageError {
    #[error("Insufficient space in page")]
    InsufficientSpace,

    #[error("Invalid slot number")]
    InvalidSlot,

    #[error("Record not found")]
    RecordNotFound,
}
