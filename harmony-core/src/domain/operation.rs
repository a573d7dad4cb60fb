//! Operation domain types
//!
//! The canonical, protocol-independent description of a processing request.
//! Protocol adapters build it once; backends only ever read it.

use serde::{Deserialize, Serialize};

/// A resolved processing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub sources: Vec<Source>,
    pub bounding_rectangle: Option<[f64; 4]>,
    pub crs: Option<String>,
    pub output_format: String,
    pub output_width: Option<u32>,
    pub output_height: Option<u32>,
    pub is_transparent: bool,
}

/// One catalog collection with the variables and granules selected from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub collection: String,
    pub variables: Vec<Variable>,
    pub granules: Vec<Granule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Granule {
    pub id: String,
    pub name: String,
    /// Data access URL, when the catalog lists one
    pub url: Option<String>,
}

impl Operation {
    /// Collection of the first source, used to pick a backend service
    pub fn primary_collection(&self) -> Option<&str> {
        self.sources.first().map(|s| s.collection.as_str())
    }

    pub fn granule_urls(&self) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|s| s.granules.iter())
            .filter_map(|g| g.url.clone())
            .collect()
    }
}
