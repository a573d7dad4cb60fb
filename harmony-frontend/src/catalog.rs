//! Metadata catalog collaborator
//!
//! Resolves collection, variable and granule identifiers. The frontend only
//! depends on the [`Catalog`] trait; [`CmrClient`] talks to a CMR search API.

use std::time::Duration;

use async_trait::async_trait;
use harmony_core::domain::operation::{Granule, Variable};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Catalog error type
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("catalog returned status {status}: {message}")]
    ApiError { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: String,
    pub short_name: String,
    /// Variables associated with the collection, when the catalog reports them
    pub variables: Option<Vec<String>>,
}

/// Which granules of a collection to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranuleQuery<'a> {
    /// Exactly this granule, if it belongs to the collection
    Id(&'a str),
    /// The catalog's default selection
    Default { limit: u32 },
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_collection(&self, id: &str) -> Result<Option<Collection>, CatalogError>;

    async fn find_variable(
        &self,
        collection: &Collection,
        id: &str,
    ) -> Result<Option<Variable>, CatalogError>;

    async fn find_granules(
        &self,
        collection: &Collection,
        query: GranuleQuery<'_>,
    ) -> Result<Vec<Granule>, CatalogError>;
}

/// HTTP client for the CMR search API
#[derive(Debug, Clone)]
pub struct CmrClient {
    base_url: String,
    client: Client,
}

impl CmrClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn search<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}/search/{}", self.base_url, path);
        tracing::debug!("Catalog query {} {:?}", url, query);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CatalogError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Catalog for CmrClient {
    async fn find_collection(&self, id: &str) -> Result<Option<Collection>, CatalogError> {
        let feed: Feed<CollectionEntry> = self
            .search("collections.json", &[("concept_id", id.to_string())])
            .await?;

        Ok(feed.feed.entry.into_iter().next().map(|entry| Collection {
            id: entry.id,
            short_name: entry.short_name,
            variables: entry.associations.map(|a| a.variables),
        }))
    }

    async fn find_variable(
        &self,
        collection: &Collection,
        id: &str,
    ) -> Result<Option<Variable>, CatalogError> {
        if let Some(associated) = &collection.variables {
            if !associated.iter().any(|v| v == id) {
                return Ok(None);
            }
        }

        let items: Items<VariableItem> = self
            .search("variables.json", &[("concept_id", id.to_string())])
            .await?;

        Ok(items.items.into_iter().next().map(|item| Variable {
            id: item.concept_id,
            name: item.name,
        }))
    }

    async fn find_granules(
        &self,
        collection: &Collection,
        query: GranuleQuery<'_>,
    ) -> Result<Vec<Granule>, CatalogError> {
        let mut params = vec![("collection_concept_id", collection.id.clone())];
        match query {
            GranuleQuery::Id(id) => {
                params.push(("concept_id", id.to_string()));
                params.push(("page_size", "1".to_string()));
            }
            GranuleQuery::Default { limit } => {
                params.push(("page_size", limit.to_string()));
            }
        }

        let feed: Feed<GranuleEntry> = self.search("granules.json", &params).await?;

        Ok(feed
            .feed
            .entry
            .into_iter()
            .map(|entry| {
                let url = entry
                    .links
                    .iter()
                    .find(|l| l.rel.ends_with("/data#"))
                    .map(|l| l.href.clone());
                Granule {
                    id: entry.id,
                    name: entry.title,
                    url,
                }
            })
            .collect())
    }
}

// =============================================================================
// CMR Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Feed<T> {
    feed: Entries<T>,
}

#[derive(Debug, Deserialize)]
struct Entries<T> {
    #[serde(default = "Vec::new")]
    entry: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    id: String,
    #[serde(default)]
    short_name: String,
    associations: Option<Associations>,
}

#[derive(Debug, Deserialize)]
struct Associations {
    #[serde(default)]
    variables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VariableItem {
    concept_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GranuleEntry {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    links: Vec<GranuleLink>,
}

#[derive(Debug, Deserialize)]
struct GranuleLink {
    #[serde(default)]
    rel: String,
    href: String,
}
