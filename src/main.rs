//! BuyBot Admin - category service for the admin dashboard.
//!
//! Fetches categories from the BuyBot API, reconciles them into a sorted
//! hierarchy and serves it as nested JSON, picker options and CSV.

mod category;
mod config;
mod export;
mod store;
mod tree;
mod validation;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use category::CategoryRecord;
use config::AdminConfig;
use serde::Deserialize;
use std::sync::Arc;
use store::{CategorySource, HttpCategoryStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tree::{category_tree, Forest, SelectOption, TreeBuild};
use validation::{CategoryForm, FieldMessage, ImageUpload};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    source: Arc<dyn CategorySource>,
    config: Arc<AdminConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "buybot_admin=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdminConfig::from_env()?;
    let store = HttpCategoryStore::new(&config)?;
    info!("Category store: {}", config.api_base_url);

    let bind_addr = config.bind_addr;
    let state = AppState {
        source: Arc::new(store),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/categories", get(category_tree_view).post(create_category))
        .route("/categories/tree", get(category_tree_view))
        .route("/categories/options", get(category_options))
        .route("/categories/export", get(export_categories))
        // Room for a full-size image plus the text fields.
        .layer(DefaultBodyLimit::max(validation::MAX_IMAGE_BYTES + 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Which store endpoint a view is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeSource {
    Flat,
    Nested,
}

impl TreeSource {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "flat" => Some(Self::Flat),
            "nested" | "tree" => Some(Self::Nested),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TreeQuery {
    source: Option<String>,
}

impl TreeQuery {
    fn source(&self) -> Result<TreeSource, (StatusCode, String)> {
        match self.source.as_deref() {
            None => Ok(TreeSource::Flat),
            Some(s) => TreeSource::from_str(s).ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Unknown source: {}. Available: flat, nested", s),
                )
            }),
        }
    }
}

/// `{"categories": [...], "total": n, "warnings": [...]}`. The nested part
/// is streamed by `Forest::write_json` so deep trees serialize on any stack.
fn tree_response_body(build: &TreeBuild) -> serde_json::Result<Vec<u8>> {
    let warnings: Vec<String> = build.warnings.iter().map(|w| w.to_string()).collect();

    let mut body = b"{\"categories\":".to_vec();
    build.forest.write_json(&mut body)?;
    let total = build.forest.node_count();
    body.extend_from_slice(format!(",\"total\":{},\"warnings\":", total).as_bytes());
    serde_json::to_writer(&mut body, &warnings)?;
    body.push(b'}');
    Ok(body)
}

/// Nested, sibling-sorted category hierarchy.
async fn category_tree_view(
    State(state): State<AppState>,
    Query(query): Query<TreeQuery>,
) -> Result<Response, (StatusCode, String)> {
    let build = load_tree(&state, query.source()?).await.map_err(store_failure)?;

    info!(
        "Serving category tree: {} roots, {} categories, {} warnings",
        build.forest.roots().len(),
        build.forest.node_count(),
        build.warnings.len()
    );
    let body = tree_response_body(&build).map_err(|e| {
        error!("Category tree serialization failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Serialization failed: {}", e))
    })?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Indented options for the parent-category picker.
async fn category_options(
    State(state): State<AppState>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<SelectOption>>, (StatusCode, String)> {
    let build = load_tree(&state, query.source()?).await.map_err(store_failure)?;
    Ok(Json(build.forest.select_options(&state.config.indent_glyph)))
}

/// CSV download of the hierarchy in display order.
async fn export_categories(
    State(state): State<AppState>,
    Query(query): Query<TreeQuery>,
) -> Result<Response, (StatusCode, String)> {
    let build = load_tree(&state, query.source()?).await.map_err(store_failure)?;
    if build.forest.is_empty() {
        warn!("Category store returned no categories; exporting headers only");
    }

    let csv = export::forest_to_csv(&build.forest, &state.config.indent_glyph).map_err(|e| {
        error!("CSV export failed: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("CSV export failed: {}", e))
    })?;

    let filename = export::export_filename(
        &state.config.export_name,
        chrono::Utc::now().date_naive(),
    );
    info!("Exporting {} categories as {}", build.forest.node_count(), filename);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response())
}

/// Validate the "create category" form and forward it to the store.
async fn create_category(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CategoryRecord>), Response> {
    let form = read_category_form(multipart)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e).into_response())?;
    submit_category(&state, form).await
}

async fn read_category_form(mut multipart: Multipart) -> Result<CategoryForm, String> {
    let mut form = CategoryForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Multipart error: {}", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let filename = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Failed to read image: {}", e))?
                    .to_vec();
                form.image = Some(ImageUpload {
                    filename,
                    content_type,
                    data,
                });
            }
            "name" | "description" | "parentCategory" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| format!("Failed to read field {}: {}", name, e))?;
                match name.as_str() {
                    "name" => form.name = value,
                    "description" => form.description = Some(value),
                    _ => form.parent_category = Some(value),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn submit_category(
    state: &AppState,
    form: CategoryForm,
) -> Result<(StatusCode, Json<CategoryRecord>), Response> {
    // Parent ids are checked against the live snapshot when the store answers;
    // otherwise the store has the final word.
    let snapshot = match &form.parent_category {
        Some(parent) if !parent.trim().is_empty() => match state.source.fetch_records().await {
            Ok(records) => Some(category_tree(records).forest),
            Err(e) => {
                warn!("Skipping parent check, category snapshot unavailable: {:#}", e);
                None
            }
        },
        _ => None,
    };

    let category = validation::validate(form, snapshot.as_ref()).map_err(|errors| {
        let errors: Vec<FieldMessage> = errors.iter().map(FieldMessage::from).collect();
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "errors": errors })),
        )
            .into_response()
    })?;

    let record = state
        .source
        .create_category(category)
        .await
        .map_err(|e| store_failure(e).into_response())?;

    Ok((StatusCode::CREATED, Json(record)))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Fetch a fresh snapshot and turn it into a sorted forest.
async fn load_tree(state: &AppState, source: TreeSource) -> anyhow::Result<TreeBuild> {
    match source {
        TreeSource::Flat => {
            let records = state.source.fetch_records().await?;
            Ok(category_tree(records))
        }
        TreeSource::Nested => {
            let roots = state.source.fetch_tree().await?;
            Ok(TreeBuild {
                forest: Forest::from_nested(roots).sorted(),
                warnings: Vec::new(),
            })
        }
    }
}

fn store_failure(err: anyhow::Error) -> (StatusCode, String) {
    error!("Category store request failed: {:#}", err);
    (StatusCode::BAD_GATEWAY, format!("Category store request failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryNode;
    use crate::store::memory::MemoryCategorySource;

    fn state_with(source: MemoryCategorySource) -> AppState {
        let config = AdminConfig::from_lookup(|key| match key {
            "BUYBOT_API_BASE_URL" => Some("http://localhost:5000".to_string()),
            _ => None,
        })
        .unwrap();
        AppState {
            source: Arc::new(source),
            config: Arc::new(config),
        }
    }

    fn sample_records() -> Vec<CategoryRecord> {
        vec![
            CategoryRecord::new("1", "Electronics", None),
            CategoryRecord::new("2", "Phones", Some("1")),
            CategoryRecord::new("3", "Clothing", None),
        ]
    }

    fn form(name: &str, parent: Option<&str>) -> CategoryForm {
        CategoryForm {
            name: name.to_string(),
            parent_category: parent.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_tree_source_parsing() {
        assert_eq!(TreeQuery::default().source().unwrap(), TreeSource::Flat);
        let nested = TreeQuery {
            source: Some("nested".to_string()),
        };
        assert_eq!(nested.source().unwrap(), TreeSource::Nested);
        let bad = TreeQuery {
            source: Some("xml".to_string()),
        };
        assert_eq!(bad.source().unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    async fn tree_json(state: AppState, query: TreeQuery) -> serde_json::Value {
        let resp = category_tree_view(State(state), Query(query)).await.unwrap();
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_tree_view_from_flat_records() {
        let state = state_with(MemoryCategorySource::with_records(sample_records()));
        let resp = tree_json(state, TreeQuery::default()).await;

        assert_eq!(resp["total"], 3);
        assert_eq!(resp["warnings"], serde_json::json!([]));
        assert_eq!(resp["categories"][0]["name"], "Clothing");
        assert_eq!(resp["categories"][1]["name"], "Electronics");
        assert_eq!(resp["categories"][1]["children"][0]["name"], "Phones");
        assert_eq!(resp["categories"][1]["children"][0]["parentId"], "1");
    }

    #[tokio::test]
    async fn test_tree_view_reports_warnings() {
        let state = state_with(MemoryCategorySource::with_records(vec![
            CategoryRecord::new("1", "A", Some("2")),
            CategoryRecord::new("2", "B", Some("1")),
        ]));
        let resp = tree_json(state, TreeQuery::default()).await;

        assert_eq!(resp["categories"].as_array().unwrap().len(), 2);
        assert_eq!(resp["warnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tree_view_nested_source() {
        let source = MemoryCategorySource {
            tree: vec![
                CategoryNode::leaf(CategoryRecord::new("2", "Toys", None)),
                CategoryNode::leaf(CategoryRecord::new("1", "Books", None)),
            ],
            ..Default::default()
        };
        let query = TreeQuery {
            source: Some("nested".to_string()),
        };
        let resp = tree_json(state_with(source), query).await;
        assert_eq!(resp["categories"][0]["name"], "Books");
    }

    #[tokio::test]
    async fn test_store_failure_is_bad_gateway() {
        let state = state_with(MemoryCategorySource::failing());
        let err = category_tree_view(State(state), Query(TreeQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_options_use_configured_glyph() {
        let state = state_with(MemoryCategorySource::with_records(sample_records()));
        let Json(options) = category_options(State(state), Query(TreeQuery::default()))
            .await
            .unwrap();
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Clothing", "Electronics", "— Phones"]);
    }

    #[tokio::test]
    async fn test_export_headers_and_body() {
        let state = state_with(MemoryCategorySource::with_records(sample_records()));
        let resp = export_categories(State(state), Query(TreeQuery::default()))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"categories_"));

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap().lines().count(), 4);
    }

    #[tokio::test]
    async fn test_submit_category_created() {
        let state = state_with(MemoryCategorySource::with_records(sample_records()));
        let (status, Json(record)) = submit_category(&state, form("Tablets", Some("1")))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record.name, "Tablets");
        assert_eq!(record.parent_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_submit_category_unknown_parent() {
        let state = state_with(MemoryCategorySource::with_records(sample_records()));
        let resp = submit_category(&state, form("Tablets", Some("42")))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_submit_category_invalid_name() {
        let state = state_with(MemoryCategorySource::with_records(sample_records()));
        let resp = submit_category(&state, form("x", None)).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errors"][0]["field"], "name");
    }

    #[tokio::test]
    async fn test_submit_category_store_down() {
        let state = state_with(MemoryCategorySource::failing());
        let resp = submit_category(&state, form("Tablets", Some("1")))
            .await
            .unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
