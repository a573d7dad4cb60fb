//! Shared fixtures for unit and HTTP-level tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use harmony_core::domain::job::Job;
use harmony_core::domain::operation::{Granule, Operation, Source, Variable};
use tower::ServiceExt;
use uuid::Uuid;

use crate::api::{AppState, create_router};
use crate::auth::{LoginRedirect, TrustedHeaderAuthenticator};
use crate::catalog::{Catalog, CatalogError, Collection, GranuleQuery};
use crate::repository::{JobStore, MemoryJobStore};
use crate::service::callback::CallbackRegistry;
use crate::service::invoker::stub::{StubBackend, StubMessage};
use crate::service::invoker::{ExecutionMode, ServiceConfig, ServiceInvoker, ServiceRegistry};

pub const COLLECTION: &str = "C1215669046-GES_DISC";
pub const VARIABLE: &str = "V1224729877-GES_DISC";
pub const DEFAULT_GRANULE: &str = "G1224343298-GES_DISC";
pub const SPECIFIC_GRANULE: &str = "G1224343299-GES_DISC";

pub const USER_HEADER: &str = "x-forwarded-user";

/// Query string of a complete GetMap request against the fixture catalog
pub fn get_map_query() -> String {
    [
        "service=WMS".to_string(),
        "request=GetMap".to_string(),
        "version=1.3.0".to_string(),
        format!("layers={}/{}", COLLECTION, VARIABLE),
        "crs=CRS:84".to_string(),
        "format=image/tiff".to_string(),
        "styles=".to_string(),
        "width=128".to_string(),
        "height=128".to_string(),
        "bbox=-180,-90,180,90".to_string(),
        "transparent=TRUE".to_string(),
    ]
    .join("&")
}

fn granule(id: &str) -> Granule {
    Granule {
        id: id.to_string(),
        name: format!("{}.nc4", id),
        url: Some(format!("https://data.example.com/granules/{}.nc4", id)),
    }
}

fn variable() -> Variable {
    Variable {
        id: VARIABLE.to_string(),
        name: "T2M".to_string(),
    }
}

/// The operation a default GetMap request resolves to
pub fn sample_operation() -> Operation {
    Operation {
        sources: vec![Source {
            collection: COLLECTION.to_string(),
            variables: vec![variable()],
            granules: vec![granule(DEFAULT_GRANULE)],
        }],
        bounding_rectangle: Some([-180.0, -90.0, 180.0, 90.0]),
        crs: Some("CRS:84".to_string()),
        output_format: "image/tiff".to_string(),
        output_width: Some(128),
        output_height: Some(128),
        is_transparent: true,
    }
}

/// In-memory catalog with one collection, one variable and two granules
#[derive(Debug, Clone)]
pub struct FixtureCatalog {
    granules: Vec<Granule>,
}

impl FixtureCatalog {
    pub fn new() -> Self {
        Self {
            granules: vec![granule(DEFAULT_GRANULE), granule(SPECIFIC_GRANULE)],
        }
    }
}

#[async_trait]
impl Catalog for FixtureCatalog {
    async fn find_collection(&self, id: &str) -> Result<Option<Collection>, CatalogError> {
        Ok((id == COLLECTION).then(|| Collection {
            id: COLLECTION.to_string(),
            short_name: "M2T1NXSLV".to_string(),
            variables: Some(vec![VARIABLE.to_string()]),
        }))
    }

    async fn find_variable(
        &self,
        collection: &Collection,
        id: &str,
    ) -> Result<Option<Variable>, CatalogError> {
        Ok((collection.id == COLLECTION && id == VARIABLE).then(variable))
    }

    async fn find_granules(
        &self,
        _collection: &Collection,
        query: GranuleQuery<'_>,
    ) -> Result<Vec<Granule>, CatalogError> {
        let granules = match query {
            GranuleQuery::Id(id) => self.granules.iter().filter(|g| g.id == id).cloned().collect(),
            GranuleQuery::Default { limit } => {
                self.granules.iter().take(limit as usize).cloned().collect()
            }
        };
        Ok(granules)
    }
}

/// A service backed by `stub` that serves every collection
pub fn stub_service(stub: StubBackend, is_async: bool, timeout_secs: Option<u64>) -> ServiceConfig {
    ServiceConfig {
        name: "harmony/stub".to_string(),
        collections: vec!["*".to_string()],
        mode: ExecutionMode::Stub(stub),
        is_async,
        timeout_secs,
    }
}

/// Polls until the job reaches a terminal status
pub async fn wait_for_terminal(store: &dyn JobStore, id: Uuid, owner: &str) -> Job {
    for _ in 0..200 {
        let job = store.get(id, owner).await.unwrap();
        if job.status().is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", id);
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// A fully wired application over in-memory collaborators
#[derive(Clone)]
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryJobStore>,
    pub callbacks: CallbackRegistry,
}

impl TestApp {
    pub fn new() -> Self {
        let stub = StubBackend::replying(vec![StubMessage::Redirect(
            "https://data.example.com/out.tif".to_string(),
        )]);
        Self::with_service(stub, false)
    }

    /// Backends get a short default timeout so timeout paths finish quickly
    pub fn with_service(stub: StubBackend, is_async: bool) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let callbacks = CallbackRegistry::new();
        let services = ServiceRegistry::new(vec![stub_service(stub, is_async, None)]).unwrap();
        let invoker = ServiceInvoker::new(
            services,
            store.clone(),
            callbacks.clone(),
            "http://localhost:3000",
            Duration::from_millis(300),
        );

        let state = AppState {
            store: store.clone(),
            catalog: Arc::new(FixtureCatalog::new()),
            invoker: Arc::new(invoker),
            callbacks: callbacks.clone(),
            auth: Arc::new(TrustedHeaderAuthenticator::new(USER_HEADER).unwrap()),
            login: Arc::new(
                LoginRedirect::new("https://urs.example.com", "harmony", "http://localhost:3000")
                    .unwrap(),
            ),
            default_granule_limit: 1,
        };

        Self {
            router: create_router(state),
            store,
            callbacks,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        self.send("GET", uri, user).await
    }

    pub async fn post(&self, uri: &str, user: Option<&str>) -> Response<Body> {
        self.send("POST", uri, user).await
    }

    async fn send(&self, method: &str, uri: &str, user: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }
}
