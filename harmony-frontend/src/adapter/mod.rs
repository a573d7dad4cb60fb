//! Protocol adapters
//!
//! Each adapter turns one external request dialect into an [`Operation`].
//! Adapters either produce a complete operation or reject the request;
//! nothing is dispatched until every parameter has been validated.
//!
//! [`Operation`]: harmony_core::domain::operation::Operation

pub mod wms;

use thiserror::Error;

use crate::catalog::CatalogError;

/// Adapter error type
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The request is malformed or cannot be satisfied
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl AdapterError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AdapterError::BadRequest(message.into())
    }
}

/// Query parameters with case-insensitive names
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parses a raw `application/x-www-form-urlencoded` query string
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Self { pairs }
    }

    /// Last value given for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value given for `name`, in request order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty value of a required parameter
    pub fn required(&self, name: &str) -> Result<&str, AdapterError> {
        match self.get(name).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(AdapterError::bad_request(format!(
                "Missing required parameter \"{}\"",
                name
            ))),
        }
    }
}
