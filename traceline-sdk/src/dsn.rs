//! Client keys.
//!
//! A DSN looks like `https://<public_key>@<host>[:port]/<project_id>`. The
//! public key ends up in the dynamic sampling context and the whole string
//! in envelope headers.
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors parsing a [`Dsn`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseDsnError {
    /// Not a URL at all.
    #[error("invalid dsn url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL carries no username.
    #[error("dsn has no public key")]
    MissingPublicKey,
    /// The URL path has no final segment.
    #[error("dsn has no project id")]
    MissingProjectId,
    /// Only http and https are supported.
    #[error("unsupported dsn scheme {0:?}")]
    UnsupportedScheme(String),
}

/// A parsed client key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dsn {
    url: Url,
    project_id: String,
}

impl Dsn {
    /// The public key, used as `public_key` in the sampling context.
    pub fn public_key(&self) -> &str {
        self.url.username()
    }

    /// The project the key belongs to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Host the key points at.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

impl FromStr for Dsn {
    type Err = ParseDsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ParseDsnError::UnsupportedScheme(other.to_string())),
        }
        if url.username().is_empty() {
            return Err(ParseDsnError::MissingPublicKey);
        }
        let project_id = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or(ParseDsnError::MissingProjectId)?
            .to_string();

        Ok(Dsn { url, project_id })
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl Serialize for Dsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
