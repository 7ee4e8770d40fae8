//! Pipeline error that may occur while crawling, replaying or exporting.
//!
//! See [`AppError`].

use std::error::Error;

use derive_more::Display;

/// An error raised by any stage of the pipeline.
#[derive(Debug, Display)]
#[non_exhaustive]
pub enum AppError {
    /// The database rejected an operation or the connection failed.
    #[display("database error: {_0}")]
    Db(sqlx::Error),
    /// The HTTP client failed before a response was produced.
    #[display("http error: {_0}")]
    Http(reqwest::Error),
    /// The upstream API answered with a non-200 status.
    ///
    /// Carries the response body and a snapshot of the request tracker so
    /// the operator can tell a rate-limit from an outage.
    #[display(
        "upstream returned {status} for {url}: {body} \
         ({last_minute} requests in 60s, {last_quarter_hour} in 900s)"
    )]
    Upstream {
        status: u16,
        url: String,
        body: String,
        last_minute: usize,
        last_quarter_hour: usize,
    },
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Db(err) => Some(err),
            AppError::Http(err) => Some(err),
            AppError::Upstream { .. } => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Db(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Http(err)
    }
}
