pub use crate::model::*;

use miette::Diagnostic;
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("malformed cbor: {0}")]
    CborError(#[from] crate::cbor::CborError),

    #[error("chain store error: {0}")]
    StoreError(String),

    #[error("sql error: {0}")]
    SqlError(String),

    #[error("node cli failed: {0}")]
    NodeError(String),

    #[error("wallet error: {0}")]
    WalletError(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn config(text: impl Display) -> Error {
        Error::ConfigError(text.to_string())
    }

    pub fn parse(error: impl Display) -> Error {
        Error::ParseError(error.to_string())
    }

    pub fn server(error: impl Display) -> Error {
        Error::ServerError(error.to_string())
    }

    pub fn store(error: impl Display) -> Error {
        Error::StoreError(error.to_string())
    }

    pub fn sql(error: impl Display) -> Error {
        Error::SqlError(error.to_string())
    }

    pub fn node(error: impl Display) -> Error {
        Error::NodeError(error.to_string())
    }

    pub fn wallet(error: impl Display) -> Error {
        Error::WalletError(error.to_string())
    }

    pub fn message(text: impl Into<String>) -> Error {
        Error::Message(text.into())
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Error::sql(err)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Error::sql(err)
    }
}
