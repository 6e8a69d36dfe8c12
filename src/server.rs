//! REST API for semsearch.
//!
//! Serves searches over a [`SearchContext`] registered as app data. The
//! context is read-only, so requests share it without locking. Embedding
//! and scoring run on actix's blocking pool so a slow model call never
//! stalls other requests.
//!
//! ## Endpoints
//!
//! - `POST /search` - Embed a prompt and return the nearest chunks
//! - `GET /health` - Store shape and active model
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use semsearch::{BertEmbedder, EmbeddingPolicy, Pooling, SearchContext, VectorStore};
//!
//! #[actix_web::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = VectorStore::load(std::path::Path::new("semantic_gooaq_minilm"))?;
//!     let policy = EmbeddingPolicy {
//!         model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
//!         pooling: Pooling::Mean,
//!         normalize: false,
//!     };
//!     let embedder = BertEmbedder::load(policy, None)?;
//!     let ctx = web::Data::new(SearchContext::new(store, Box::new(embedder))?);
//!
//!     HttpServer::new(move || App::new().app_data(ctx.clone()).configure(semsearch::server::config))
//!         .bind("127.0.0.1:8000")?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

use actix_web::error::InternalError;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;

use crate::config::MAX_BODY_BYTES;
use crate::error::SearchError;
use crate::service::{SearchContext, SearchRequest};

// --- Response structs ---

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    rows: usize,
    dimension: usize,
    model_id: &'a str,
}

/// `InvalidQuery` is the caller's fault (400). An empty store cannot serve
/// anything until restarted with data (503). Everything else is ours (500).
impl ResponseError for SearchError {
    fn status_code(&self) -> StatusCode {
        match self {
            SearchError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            SearchError::EmptyStore => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

// --- Handlers ---

async fn search_handler(
    ctx: web::Data<SearchContext>,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse, SearchError> {
    let request = body.into_inner();
    let worker_ctx = ctx.clone();

    let result = web::block(move || worker_ctx.search_request(&request))
        .await
        .map_err(|e| SearchError::Internal(e.to_string()))
        .and_then(|r| r);

    match result {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => {
            if e.is_client_error() {
                tracing::warn!(error = %e, "Rejected search request");
            } else {
                tracing::error!(error = %e, "Search failed");
            }
            Err(e)
        }
    }
}

async fn health_handler(ctx: web::Data<SearchContext>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        rows: ctx.store().rows(),
        dimension: ctx.store().dimension(),
        model_id: &ctx.policy().model_id,
    })
}

/// Malformed bodies get the same `{"error": ...}` shape as search errors.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| {
            let message = err.to_string();
            tracing::warn!(error = %message, "Rejected malformed request body");
            InternalError::from_response(err, HttpResponse::BadRequest().json(json!({ "error": message })))
                .into()
        })
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
       .service(web::resource("/search").route(web::post().to(search_handler)))
       .service(web::resource("/health").route(web::get().to(health_handler)));
}
