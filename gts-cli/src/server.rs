use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use gts::GtsOps;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::logging::log_requests;

#[derive(Clone)]
pub struct AppState {
    ops: Arc<GtsOps>,
}

pub struct GtsHttpServer {
    ops: Arc<GtsOps>,
    host: String,
    port: u16,
    verbose: u8,
}

impl GtsHttpServer {
    #[must_use]
    pub fn new(ops: GtsOps, host: String, port: u16, verbose: u8) -> Self {
        Self {
            ops: Arc::new(ops),
            host,
            port,
            verbose,
        }
    }

    /// Bind and serve until shutdown.
    ///
    /// # Errors
    /// Returns bind or accept failures.
    pub async fn run(self) -> anyhow::Result<()> {
        let app = Self::create_router(
            AppState {
                ops: self.ops.clone(),
            },
            self.verbose,
        );

        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Server listening on {addr}");
        axum::serve(listener, app).await?;
        Ok(())
    }

    #[must_use]
    pub fn create_router(state: AppState, verbose: u8) -> Router {
        let mut router = Router::new()
            .route("/entities", get(get_entities).post(add_entity))
            .route("/entities/bulk", post(add_entities))
            .route("/entities/{gts_id}", get(get_entity))
            .route("/schemas", post(add_schema))
            .route("/validate-id", get(validate_id))
            .route("/parse-id", get(parse_id))
            .route("/extract-id", post(extract_id))
            .route("/match-id-pattern", get(match_id_pattern))
            .route("/uuid", get(id_to_uuid))
            .route("/validate-instance", post(validate_instance))
            .route("/validate-schema", post(validate_schema))
            .route("/validate-entity", post(validate_entity))
            .route("/resolve-relationships", get(schema_graph))
            .route("/compatibility", get(compatibility))
            .route("/cast", post(cast))
            .route("/query", get(query))
            .route("/attr", get(attr))
            .with_state(state)
            .layer(tower_http::cors::CorsLayer::permissive());

        if verbose >= 1 {
            router = router.layer(middleware::from_fn(log_requests));
        }

        router
    }

    /// Router over fresh state; the entry point the tests drive.
    #[must_use]
    pub fn router_for(ops: GtsOps) -> Router {
        Self::create_router(
            AppState {
                ops: Arc::new(ops),
            },
            0,
        )
    }

    #[must_use]
    pub fn openapi_spec(&self) -> Value {
        json!({
            "openapi": "3.0.0",
            "info": {
                "title": "GTS Registry",
                "version": env!("CARGO_PKG_VERSION")
            },
            "servers": [{
                "url": format!("http://{}:{}", self.host, self.port)
            }],
            "paths": {
                "/entities": {
                    "get": { "summary": "List registered entities" },
                    "post": { "summary": "Register an entity (schema or instance)" }
                },
                "/entities/{gts_id}": {
                    "get": { "summary": "Fetch one entity by id" }
                },
                "/validate-id": { "get": { "summary": "Validate a GTS identifier" } },
                "/parse-id": { "get": { "summary": "Parse a GTS identifier into segments" } },
                "/extract-id": { "post": { "summary": "Extract ids from a JSON document" } },
                "/match-id-pattern": { "get": { "summary": "Match an id against a wildcard pattern" } },
                "/uuid": { "get": { "summary": "Derive the deterministic UUIDv5 of an id" } },
                "/validate-instance": { "post": { "summary": "Validate an instance against its type chain" } },
                "/validate-schema": { "post": { "summary": "Validate a schema as a refinement of its ancestors" } },
                "/validate-entity": { "post": { "summary": "Validate an entity, dispatching on its id shape" } },
                "/resolve-relationships": { "get": { "summary": "Resolve the reference graph of an entity" } },
                "/compatibility": { "get": { "summary": "Check minor-version compatibility of two schemas" } },
                "/cast": { "post": { "summary": "Cast an instance to a sibling minor version" } },
                "/query": { "get": { "summary": "Query entities by pattern and attribute filters" } },
                "/attr": { "get": { "summary": "Resolve an attribute path inside an entity" } }
            }
        })
    }
}

#[derive(Deserialize)]
struct GtsIdQuery {
    gts_id: String,
}

#[derive(Deserialize)]
struct MatchIdQuery {
    candidate: String,
    pattern: String,
}

#[derive(Deserialize)]
struct CompatibilityQuery {
    old_schema_id: String,
    new_schema_id: String,
}

#[derive(Deserialize)]
struct QueryParams {
    expr: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
struct AttrQuery {
    gts_with_path: String,
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
struct AddEntityQuery {
    #[serde(default, alias = "validate")]
    validation: bool,
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
struct SchemaRegister {
    type_id: String,
    #[serde(rename = "schema")]
    schema_content: Value,
}

#[derive(Deserialize)]
struct CastRequest {
    instance_id: String,
    to_schema_id: String,
}

#[derive(Deserialize)]
struct ValidateInstanceRequest {
    instance_id: String,
}

#[derive(Deserialize)]
struct ValidateSchemaRequest {
    schema_id: String,
}

#[derive(Deserialize)]
struct ValidateEntityRequest {
    #[serde(alias = "gts_id")]
    entity_id: String,
}

async fn get_entities(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.ops.get_entities(params.limit))
}

async fn get_entity(
    State(state): State<AppState>,
    Path(gts_id): Path<String>,
) -> impl IntoResponse {
    Json(state.ops.get_entity(&gts_id))
}

async fn add_entity(
    State(state): State<AppState>,
    Query(params): Query<AddEntityQuery>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let result = state.ops.add_entity(&body, params.validation);
    // Ingest-time validation failures are the one place the registry
    // reports an HTTP error status.
    let status = if params.validation && !result.ok {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    (status, Json(result))
}

async fn add_entities(
    State(state): State<AppState>,
    Json(body): Json<Vec<Value>>,
) -> impl IntoResponse {
    Json(state.ops.add_entities(&body))
}

async fn add_schema(
    State(state): State<AppState>,
    Json(body): Json<SchemaRegister>,
) -> impl IntoResponse {
    Json(state.ops.add_schema(body.type_id, &body.schema_content))
}

async fn validate_id(
    State(state): State<AppState>,
    Query(params): Query<GtsIdQuery>,
) -> impl IntoResponse {
    Json(state.ops.validate_id(&params.gts_id))
}

async fn parse_id(
    State(state): State<AppState>,
    Query(params): Query<GtsIdQuery>,
) -> impl IntoResponse {
    Json(state.ops.parse_id(&params.gts_id))
}

async fn extract_id(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    Json(state.ops.extract_id(&body))
}

async fn match_id_pattern(
    State(state): State<AppState>,
    Query(params): Query<MatchIdQuery>,
) -> impl IntoResponse {
    Json(state.ops.match_id_pattern(&params.candidate, &params.pattern))
}

async fn id_to_uuid(
    State(state): State<AppState>,
    Query(params): Query<GtsIdQuery>,
) -> impl IntoResponse {
    Json(state.ops.uuid(&params.gts_id))
}

async fn validate_instance(
    State(state): State<AppState>,
    Json(body): Json<ValidateInstanceRequest>,
) -> impl IntoResponse {
    Json(state.ops.validate_instance(&body.instance_id))
}

async fn validate_schema(
    State(state): State<AppState>,
    Json(body): Json<ValidateSchemaRequest>,
) -> impl IntoResponse {
    Json(state.ops.validate_schema(&body.schema_id))
}

async fn validate_entity(
    State(state): State<AppState>,
    Json(body): Json<ValidateEntityRequest>,
) -> impl IntoResponse {
    Json(state.ops.validate_entity(&body.entity_id))
}

async fn schema_graph(
    State(state): State<AppState>,
    Query(params): Query<GtsIdQuery>,
) -> impl IntoResponse {
    Json(state.ops.schema_graph(&params.gts_id))
}

async fn compatibility(
    State(state): State<AppState>,
    Query(params): Query<CompatibilityQuery>,
) -> impl IntoResponse {
    Json(
        state
            .ops
            .compatibility(&params.old_schema_id, &params.new_schema_id),
    )
}

async fn cast(State(state): State<AppState>, Json(body): Json<CastRequest>) -> impl IntoResponse {
    Json(state.ops.cast(&body.instance_id, &body.to_schema_id))
}

async fn query(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> impl IntoResponse {
    Json(state.ops.query(&params.expr, params.limit))
}

async fn attr(State(state): State<AppState>, Query(params): Query<AttrQuery>) -> impl IntoResponse {
    Json(state.ops.attr(&params.gts_with_path))
}
