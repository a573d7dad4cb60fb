//! WMS adapter
//!
//! Translates OGC WMS `GetMap` requests into operations.

use harmony_core::domain::operation::{Operation, Source};

use super::{AdapterError, QueryParams};
use crate::catalog::{Catalog, GranuleQuery};

pub const NO_MATCHING_GRANULES: &str = "No matching granules found.";

/// A syntactically valid GetMap request, not yet resolved against the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct GetMapRequest {
    pub collection_id: String,
    pub variable_id: String,
    pub granule_id: Option<String>,
    pub crs: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub bbox: [f64; 4],
    pub transparent: bool,
}

impl GetMapRequest {
    /// Validates every GetMap parameter. `collection_id` is the collection the
    /// endpoint was addressed to.
    pub fn parse(params: &QueryParams, collection_id: &str) -> Result<Self, AdapterError> {
        let service = params.required("service")?;
        if !service.eq_ignore_ascii_case("WMS") {
            return Err(AdapterError::bad_request(format!(
                "Invalid \"service\" parameter \"{}\": expected WMS",
                service
            )));
        }

        let request = params.required("request")?;
        if !request.eq_ignore_ascii_case("GetMap") {
            return Err(AdapterError::bad_request(format!(
                "Unsupported \"request\" parameter \"{}\": only GetMap is supported",
                request
            )));
        }

        let (layer_collection, variable_id) = parse_layers(params.required("layers")?)?;
        if layer_collection != collection_id {
            return Err(AdapterError::bad_request(format!(
                "Layer collection \"{}\" does not match requested collection \"{}\"",
                layer_collection, collection_id
            )));
        }

        let crs = params.required("crs")?.to_string();
        let format = params.required("format")?.to_string();
        let width = parse_dimension(params, "width")?;
        let height = parse_dimension(params, "height")?;
        let bbox = parse_bbox(params.required("bbox")?)?;
        let transparent = parse_transparent(params.get("transparent"))?;

        let granule_id = params
            .get("granuleid")
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string);

        Ok(Self {
            collection_id: layer_collection.to_string(),
            variable_id: variable_id.to_string(),
            granule_id,
            crs,
            format,
            width,
            height,
            bbox,
            transparent,
        })
    }

    /// Resolves catalog identifiers and builds the operation
    pub async fn resolve(
        self,
        catalog: &dyn Catalog,
        default_granule_limit: u32,
    ) -> Result<Operation, AdapterError> {
        let collection = catalog
            .find_collection(&self.collection_id)
            .await?
            .ok_or_else(|| {
                AdapterError::bad_request(format!(
                    "Unknown collection \"{}\" in \"layers\" parameter",
                    self.collection_id
                ))
            })?;

        let variable = catalog
            .find_variable(&collection, &self.variable_id)
            .await?
            .ok_or_else(|| {
                AdapterError::bad_request(format!(
                    "Unknown variable \"{}\" in collection \"{}\"",
                    self.variable_id, self.collection_id
                ))
            })?;

        let query = match &self.granule_id {
            Some(id) => GranuleQuery::Id(id),
            None => GranuleQuery::Default {
                limit: default_granule_limit,
            },
        };
        let granules = catalog.find_granules(&collection, query).await?;
        if granules.is_empty() {
            return Err(AdapterError::bad_request(NO_MATCHING_GRANULES));
        }

        tracing::debug!(
            "Resolved {} granule(s) for {}/{}",
            granules.len(),
            collection.id,
            variable.id
        );

        Ok(Operation {
            sources: vec![Source {
                collection: collection.id,
                variables: vec![variable],
                granules,
            }],
            bounding_rectangle: Some(self.bbox),
            crs: Some(self.crs),
            output_format: self.format,
            output_width: Some(self.width),
            output_height: Some(self.height),
            is_transparent: self.transparent,
        })
    }
}

/// Parses and resolves a GetMap request in one step
pub async fn build_operation(
    params: &QueryParams,
    collection_id: &str,
    catalog: &dyn Catalog,
    default_granule_limit: u32,
) -> Result<Operation, AdapterError> {
    GetMapRequest::parse(params, collection_id)?
        .resolve(catalog, default_granule_limit)
        .await
}

// =============================================================================
// Parameter Parsing
// =============================================================================

fn parse_layers(layers: &str) -> Result<(&str, &str), AdapterError> {
    match layers.split_once('/') {
        Some((collection, variable))
            if !collection.is_empty() && !variable.is_empty() && !variable.contains('/') =>
        {
            Ok((collection, variable))
        }
        _ => Err(AdapterError::bad_request(format!(
            "Invalid \"layers\" parameter \"{}\": expected collection/variable",
            layers
        ))),
    }
}

fn parse_dimension(params: &QueryParams, name: &str) -> Result<u32, AdapterError> {
    let raw = params.required(name)?;
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AdapterError::bad_request(format!(
            "Invalid \"{}\" parameter \"{}\": must be a positive integer",
            name, raw
        ))),
    }
}

fn parse_bbox(raw: &str) -> Result<[f64; 4], AdapterError> {
    let invalid = || {
        AdapterError::bad_request(format!(
            "Invalid \"bbox\" parameter \"{}\": expected four numbers west,south,east,north",
            raw
        ))
    };

    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok().filter(|f| f.is_finite()))
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(invalid)?;

    <[f64; 4]>::try_from(values).map_err(|_| invalid())
}

fn parse_transparent(raw: Option<&str>) -> Result<bool, AdapterError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(AdapterError::bad_request(format!(
            "Invalid \"transparent\" parameter \"{}\": expected TRUE or FALSE",
            v
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        COLLECTION, DEFAULT_GRANULE, FixtureCatalog, SPECIFIC_GRANULE, VARIABLE, get_map_query,
    };

    fn params(extra: &str) -> QueryParams {
        QueryParams::parse(Some(&format!("{}{}", get_map_query(), extra)))
    }

    fn bad_request(err: AdapterError) -> String {
        match err {
            AdapterError::BadRequest(msg) => msg,
            other => panic!("expected bad request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_valid_request() {
        let request = GetMapRequest::parse(&params(""), COLLECTION).unwrap();
        assert_eq!(request.collection_id, COLLECTION);
        assert_eq!(request.variable_id, VARIABLE);
        assert_eq!(request.granule_id, None);
        assert_eq!(request.crs, "CRS:84");
        assert_eq!(request.format, "image/tiff");
        assert_eq!(request.width, 128);
        assert_eq!(request.height, 128);
        assert_eq!(request.bbox, [-180.0, -90.0, 180.0, 90.0]);
        assert!(request.transparent);
    }

    #[test]
    fn test_missing_parameters_are_named() {
        for name in ["crs", "format", "width", "height", "bbox", "layers"] {
            let query: String = get_map_query()
                .split('&')
                .filter(|pair| !pair.starts_with(&format!("{}=", name)))
                .collect::<Vec<_>>()
                .join("&");
            let err = GetMapRequest::parse(&QueryParams::parse(Some(&query)), COLLECTION)
                .unwrap_err();
            assert_eq!(
                bad_request(err),
                format!("Missing required parameter \"{}\"", name)
            );
        }
    }

    #[test]
    fn test_rejects_wrong_service_and_request() {
        let query = get_map_query().replace("service=WMS", "service=WCS");
        let err = GetMapRequest::parse(&QueryParams::parse(Some(&query)), COLLECTION).unwrap_err();
        assert!(bad_request(err).contains("\"service\""));

        let query = get_map_query().replace("request=GetMap", "request=GetFeatureInfo");
        let err = GetMapRequest::parse(&QueryParams::parse(Some(&query)), COLLECTION).unwrap_err();
        assert!(bad_request(err).contains("\"request\""));
    }

    #[test]
    fn test_rejects_malformed_layers() {
        for layers in ["justacollection", "/V1", "C1/", "C1/V1/extra"] {
            assert!(parse_layers(layers).is_err(), "{} should be rejected", layers);
        }
        assert_eq!(parse_layers("C1/V1").unwrap(), ("C1", "V1"));

        let err = GetMapRequest::parse(&params(""), "C999-OTHER").unwrap_err();
        assert!(bad_request(err).contains("does not match"));
    }

    #[test]
    fn test_bbox_parsing() {
        assert_eq!(
            parse_bbox("-180, -90, 180, 90").unwrap(),
            [-180.0, -90.0, 180.0, 90.0]
        );
        for raw in ["1,2,3", "1,2,3,4,5", "a,2,3,4", "1,2,,4", "NaN,2,3,4", "inf,2,3,4"] {
            let err = parse_bbox(raw).unwrap_err();
            assert!(bad_request(err).contains("\"bbox\""), "{} should be rejected", raw);
        }
    }

    #[test]
    fn test_dimensions_must_be_positive_integers() {
        for width in ["0", "-1", "12.5", "abc"] {
            let query = get_map_query().replace("width=128", &format!("width={}", width));
            let err =
                GetMapRequest::parse(&QueryParams::parse(Some(&query)), COLLECTION).unwrap_err();
            assert!(bad_request(err).contains("\"width\""));
        }
    }

    #[test]
    fn test_transparent_is_case_insensitive() {
        assert!(parse_transparent(Some("TRUE")).unwrap());
        assert!(parse_transparent(Some("true")).unwrap());
        assert!(!parse_transparent(Some("False")).unwrap());
        assert!(!parse_transparent(None).unwrap());
        assert!(parse_transparent(Some("yes")).is_err());
    }

    #[tokio::test]
    async fn test_resolves_default_granule() {
        let catalog = FixtureCatalog::new();
        let operation = build_operation(&params(""), COLLECTION, &catalog, 1)
            .await
            .unwrap();

        let source = &operation.sources[0];
        assert_eq!(source.collection, COLLECTION);
        assert_eq!(source.variables[0].id, VARIABLE);
        assert_eq!(source.granules.len(), 1);
        assert_eq!(source.granules[0].id, DEFAULT_GRANULE);

        assert_eq!(operation.bounding_rectangle, Some([-180.0, -90.0, 180.0, 90.0]));
        assert_eq!(operation.crs.as_deref(), Some("CRS:84"));
        assert_eq!(operation.output_format, "image/tiff");
        assert_eq!(operation.output_width, Some(128));
        assert_eq!(operation.output_height, Some(128));
        assert!(operation.is_transparent);
    }

    #[tokio::test]
    async fn test_resolves_requested_granule() {
        let catalog = FixtureCatalog::new();
        let extra = format!("&granuleId={}", SPECIFIC_GRANULE);
        let operation = build_operation(&params(&extra), COLLECTION, &catalog, 1)
            .await
            .unwrap();

        let granules = &operation.sources[0].granules;
        assert_eq!(granules.len(), 1);
        assert_eq!(granules[0].id, SPECIFIC_GRANULE);
    }

    #[tokio::test]
    async fn test_no_matching_granules() {
        let catalog = FixtureCatalog::new();
        let err = build_operation(&params("&granuleId=G123-BOGUS"), COLLECTION, &catalog, 1)
            .await
            .unwrap_err();
        assert_eq!(bad_request(err), NO_MATCHING_GRANULES);
    }

    #[tokio::test]
    async fn test_unknown_collection_and_variable() {
        let catalog = FixtureCatalog::new();

        let query = get_map_query().replace(COLLECTION, "C404-NOPE");
        let err = build_operation(&QueryParams::parse(Some(&query)), "C404-NOPE", &catalog, 1)
            .await
            .unwrap_err();
        assert!(bad_request(err).starts_with("Unknown collection"));

        let query = get_map_query().replace(VARIABLE, "V404-NOPE");
        let err = build_operation(&QueryParams::parse(Some(&query)), COLLECTION, &catalog, 1)
            .await
            .unwrap_err();
        assert!(bad_request(err).starts_with("Unknown variable"));
    }

    #[tokio::test]
    async fn test_operation_reproduces_query_values() {
        let catalog = FixtureCatalog::new();
        let query = get_map_query()
            .replace("bbox=-180,-90,180,90", "bbox=-10.5,20.25,30,40.125")
            .replace("width=128", "width=640")
            .replace("height=128", "height=480")
            .replace("format=image/tiff", "format=image/png")
            .replace("transparent=TRUE", "transparent=false");
        let operation = build_operation(&QueryParams::parse(Some(&query)), COLLECTION, &catalog, 1)
            .await
            .unwrap();

        let json = serde_json::to_value(&operation).unwrap();
        assert_eq!(json["boundingRectangle"], serde_json::json!([-10.5, 20.25, 30.0, 40.125]));
        assert_eq!(json["crs"], "CRS:84");
        assert_eq!(json["outputFormat"], "image/png");
        assert_eq!(json["outputWidth"], 640);
        assert_eq!(json["outputHeight"], 480);
        assert_eq!(json["isTransparent"], false);
    }
}
