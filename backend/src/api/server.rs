//! HTTP server for the rulemap API.
//!
//! # API Endpoints
//!
//! | Method | Path              | Description                          |
//! |--------|-------------------|--------------------------------------|
//! | GET    | `/health`         | Health check                         |
//! | POST   | `/api/transform`  | Upload rules + input, get the output |
//! | GET    | `/api/logs`       | SSE stream for real-time logs        |
//!
//! `/api/transform` takes a multipart form:
//!
//! | Field         | Required | Content                                         |
//! |---------------|----------|-------------------------------------------------|
//! | `input`       | yes      | delimited input file                            |
//! | `rules`       | yes      | `.xlsx` workbook, mapping CSV or rule set JSON  |
//! | `lookups`     | no       | lookup CSV (for a mapping CSV)                  |
//! | `strategy`    | no       | `deterministic` (default) or `llm`              |
//! | `header_case` | no       | `as_is` (default), `lower` or `capitalize`      |
//! | `delimiter`   | no       | input delimiter, auto-detected when absent      |

use axum::{
    extract::Multipart,
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{error_response, TransformResponse};
use crate::error::{PipelineError, ServerError, ServerResult};
use crate::parser::HeaderCase;
use crate::sink::to_csv_string;
use crate::transform::pipeline::{load_rules_bytes, transform_bytes, TransformOptions};
use crate::transform::strategy::StrategyKind;

/// Build the router
pub fn router() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/transform", post(transform))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
}

/// Start the HTTP server
pub async fn start_server(port: u16) -> ServerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 rulemap server running on http://localhost:{}", port);
    println!("   POST /api/transform - Upload rules + input");
    println!("   GET  /api/logs      - SSE log stream");
    println!("   GET  /health        - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router()).await?;

    Ok(())
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(PipelineError::Csv(_) | PipelineError::Load(_) | PipelineError::EmptyInput) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServerError::Pipeline(PipelineError::Ai(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        log_error(format!("Request failed: {}", self));
        (self.status(), Json(error_response(&self.to_string()))).into_response()
    }
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rulemap",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "transform": "POST /api/transform",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // Lagged receivers skip what they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Uploaded form, before validation
#[derive(Default)]
struct TransformForm {
    input: Option<Vec<u8>>,
    rules: Option<(String, Vec<u8>)>,
    lookups: Option<Vec<u8>>,
    strategy: StrategyKind,
    header_case: HeaderCase,
    delimiter: Option<char>,
}

async fn read_form(mut multipart: Multipart) -> ServerResult<TransformForm> {
    let bad = |e: axum::extract::multipart::MultipartError| ServerError::BadRequest(format!("Multipart error: {}", e));
    let mut form = TransformForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "input" => form.input = Some(field.bytes().await.map_err(bad)?.to_vec()),
            "rules" => {
                let file_name = field.file_name().unwrap_or("rules.csv").to_string();
                form.rules = Some((file_name, field.bytes().await.map_err(bad)?.to_vec()));
            }
            "lookups" => form.lookups = Some(field.bytes().await.map_err(bad)?.to_vec()),
            "strategy" => {
                let text = field.text().await.map_err(bad)?;
                form.strategy = text.parse().map_err(ServerError::BadRequest)?;
            }
            "header_case" => {
                let text = field.text().await.map_err(bad)?;
                form.header_case = parse_header_case(&text)?;
            }
            "delimiter" => {
                let text = field.text().await.map_err(bad)?;
                form.delimiter = parse_delimiter(&text)?;
            }
            _ => {}
        }
    }

    Ok(form)
}

fn parse_header_case(text: &str) -> ServerResult<HeaderCase> {
    match text.trim().to_lowercase().replace('-', "_").as_str() {
        "" | "as_is" => Ok(HeaderCase::AsIs),
        "lower" => Ok(HeaderCase::Lower),
        "capitalize" => Ok(HeaderCase::Capitalize),
        other => Err(ServerError::BadRequest(format!("unknown header_case '{}'", other))),
    }
}

fn parse_delimiter(text: &str) -> ServerResult<Option<char>> {
    if text.eq_ignore_ascii_case("tab") || text == "\\t" {
        return Ok(Some('\t'));
    }
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(None),
        (Some(c), None) => Ok(Some(c)),
        _ => Err(ServerError::BadRequest(format!("delimiter '{}' is not one character", text))),
    }
}

/// Transform endpoint
async fn transform(multipart: Multipart) -> ServerResult<Json<TransformResponse>> {
    let form = read_form(multipart).await?;

    let input = form
        .input
        .ok_or_else(|| ServerError::BadRequest("No input file provided".to_string()))?;
    let (rules_name, rules_bytes) = form
        .rules
        .ok_or_else(|| ServerError::BadRequest("No rules file provided".to_string()))?;

    println!("\n{}", "=".repeat(70));
    println!("📄 NEW JOB: rules {} + input ({} bytes)", rules_name, input.len());
    println!("{}\n", "=".repeat(70));

    let loaded = load_rules_bytes(&rules_name, rules_bytes, form.lookups.as_deref()).map_err(PipelineError::from)?;
    let rule_count = loaded.rule_set.len();

    let options = TransformOptions {
        delimiter: form.delimiter,
        header_case: form.header_case,
        strategy: form.strategy,
        output: None,
        ..TransformOptions::default()
    };

    let report = transform_bytes(&input, loaded.rule_set, options).await?;
    let csv = to_csv_string(&report.columns, &report.outputs).map_err(PipelineError::from)?;

    log_info(format!("📊 {}", report.summary));

    let strategy = match form.strategy {
        StrategyKind::Deterministic => "deterministic",
        StrategyKind::Llm => "llm",
    };
    Ok(Json(TransformResponse::new(report, csv, rule_count, &loaded.warnings, strategy)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("").unwrap(), None);
        assert_eq!(parse_delimiter("|").unwrap(), Some('|'));
        assert_eq!(parse_delimiter("TAB").unwrap(), Some('\t'));
        assert!(parse_delimiter(";;").is_err());
    }

    #[test]
    fn test_parse_header_case() {
        assert_eq!(parse_header_case("lower").unwrap(), HeaderCase::Lower);
        assert_eq!(parse_header_case("as-is").unwrap(), HeaderCase::AsIs);
        assert!(parse_header_case("upper").is_err());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ServerError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServerError::Pipeline(PipelineError::EmptyInput).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "rulemap");
    }
}
