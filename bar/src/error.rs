use thiserror::Error;

use crate::menu::MenuError;

#[derive(Error, Debug)]
pub enum BarError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    // Details stay in the log; callers only ever see the generic message.
    #[error("Database error")]
    Storage(#[from] anyhow::Error),
}

impl BarError {
    pub fn validation(message: impl Into<String>) -> Self {
        BarError::Validation(message.into())
    }
}

impl From<MenuError> for BarError {
    fn from(err: MenuError) -> Self {
        match err {
            MenuError::Missing(_) => BarError::NotFound("Drink"),
            other => BarError::Validation(other.to_string()),
        }
    }
}

impl warp::reject::Reject for BarError {}

pub type Result<T> = std::result::Result<T, BarError>;
