use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use glutenscan_core::{FlagResult, SafetyClassifier, Settings};
use glutenscan_ingredients::IngredientRuleEngine;
use glutenscan_ocr::{
    assess, Assessment, ImageSource, OcrBackend, OcrRequest, OcrResponse, ScanConfig, ScanError,
    ScanPipeline, ScanProfile, ScanReport,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Base64 photos from phones run to several megabytes.
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    /// Single-pass pipeline behind `/api/ocr`.
    ocr: Arc<ScanPipeline<dyn OcrBackend>>,
    /// Configured multi-pass pipeline behind `/api/scan`.
    scan: Arc<ScanPipeline<dyn OcrBackend>>,
    rules: Arc<IngredientRuleEngine>,
    classifier: Arc<SafetyClassifier>,
    engine_available: bool,
}

impl AppState {
    pub fn from_settings(
        backend: Arc<dyn OcrBackend>,
        settings: &Settings,
        engine_available: bool,
    ) -> Result<Self, ScanError> {
        let scan = ScanPipeline::from_settings(Arc::clone(&backend), settings)?;
        let ocr = ScanPipeline::with_config(
            backend,
            ScanProfile::basic(),
            ScanConfig::from_settings(settings),
        );
        Ok(Self {
            ocr: Arc::new(ocr),
            scan: Arc::new(scan),
            rules: Arc::new(IngredientRuleEngine::from_settings(&settings.rules)),
            classifier: Arc::new(SafetyClassifier::new(settings.safety.policy())),
            engine_available,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ocr", post(ocr_handler))
        .route("/api/scan", post(scan_handler))
        .route("/analyze", post(analyze_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        let status = match e {
            ScanError::Decode(_) => StatusCode::BAD_REQUEST,
            ScanError::AllPassesFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: &self.message })).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// POST /api/ocr
///
/// `{ "image": "<base64>" }` → `{ success, text, confidence }`, or
/// `{ success: false, error }` with 400 for bad input and 500 when
/// recognition fails.
pub async fn ocr_handler(
    State(state): State<AppState>,
    payload: Result<Json<OcrRequest>, JsonRejection>,
) -> (StatusCode, Json<OcrResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, Json(OcrResponse::failed(rejection.body_text())))
        }
    };
    if request.image.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(OcrResponse::failed("No image provided")));
    }

    match state.ocr.scan(ImageSource::DataUri(request.image), &()).await {
        Ok(report) => (
            StatusCode::OK,
            Json(OcrResponse::ok(report.raw_text.trim(), report.confidence)),
        ),
        Err(ScanError::Decode(e)) => (
            StatusCode::BAD_REQUEST,
            Json(OcrResponse::failed(format!("Invalid image data: {e}"))),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(OcrResponse::failed(e.to_string()))),
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub ingredients_text: Option<String>,
}

/// POST /analyze
pub async fn analyze_handler(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<FlagResult>, ApiError> {
    let Json(request) = payload?;
    let text = request
        .ingredients_text
        .ok_or_else(|| ApiError::bad_request("Missing ingredients_text parameter"))?;
    Ok(Json(state.rules.analyze(&text)))
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub scan: ScanReport,
    #[serde(flatten)]
    pub assessment: Assessment,
}

/// POST /api/scan
///
/// Full pipeline: multi-pass OCR, text normalization, rule analysis and verdict.
pub async fn scan_handler(
    State(state): State<AppState>,
    payload: Result<Json<OcrRequest>, JsonRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let Json(request) = payload?;
    if request.image.trim().is_empty() {
        return Err(ApiError::bad_request("No image provided"));
    }
    let scan = state.scan.scan(ImageSource::DataUri(request.image), &()).await?;
    let assessment = assess(&scan.text, &state.rules, &state.classifier);
    Ok(Json(ScanResponse { scan, assessment }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub engine: bool,
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: state.engine_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use base64::Engine as _;
    use glutenscan_ocr::{MockRecognizer, RemoteOcrClient, RemoteScanner, UnavailableRecognizer};
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use tower::ServiceExt;

    fn state_with(backend: Arc<dyn OcrBackend>) -> AppState {
        let mut settings = Settings::default();
        settings.scan.detect_orientation = false;
        AppState::from_settings(backend, &settings, true).unwrap()
    }

    fn mock_state(text: &str) -> AppState {
        state_with(Arc::new(MockRecognizer::new(text)))
    }

    fn png_base64() -> String {
        let img = RgbaImage::from_fn(32, 24, |x, _| {
            if x % 6 < 2 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(buf)
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn ocr_returns_text_and_confidence() {
        let app = router(mock_state("  INGREDIENTS: RICE, SALT \n"));
        let image = format!("data:image/png;base64,{}", png_base64());
        let (status, json) = post_json(app, "/api/ocr", serde_json::json!({ "image": image })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["text"], "INGREDIENTS: RICE, SALT");
        assert_eq!(json["confidence"], 90.0);
    }

    #[tokio::test]
    async fn ocr_without_image_is_bad_request() {
        let (status, json) =
            post_json(router(mock_state("x")), "/api/ocr", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json, serde_json::json!({"success": false, "error": "No image provided"}));
    }

    #[tokio::test]
    async fn ocr_with_garbage_image_is_bad_request() {
        let (status, json) = post_json(
            router(mock_state("x")),
            "/api/ocr",
            serde_json::json!({ "image": "bm90IGFuIGltYWdl" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid image data"));
    }

    #[tokio::test]
    async fn ocr_engine_failure_is_server_error() {
        let app = router(state_with(Arc::new(UnavailableRecognizer)));
        let (status, json) =
            post_json(app, "/api/ocr", serde_json::json!({ "image": png_base64() })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn analyze_flags_wheat() {
        let (status, json) = post_json(
            router(mock_state("")),
            "/analyze",
            serde_json::json!({ "ingredients_text": "wheat flour, water, salt" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["is_gluten_free"], false);
        assert!(!json["flagged_ingredients"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn analyze_requires_text() {
        let (status, json) =
            post_json(router(mock_state("")), "/analyze", serde_json::json!({"text": "rice"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Missing ingredients_text parameter");
    }

    #[tokio::test]
    async fn scan_returns_report_and_verdict() {
        let app = router(mock_state("lngredients: rice flour, sugar, barley malt"));
        let (status, json) =
            post_json(app, "/api/scan", serde_json::json!({ "image": png_base64() })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scan"]["text"], "Ingredients: rice flour, sugar, barley malt");
        assert_eq!(json["scan"]["profile"], "enhanced");
        assert_eq!(json["verdict"]["is_gluten_free"], false);
        assert_eq!(json["verdict"]["level"], "unsafe");
    }

    #[tokio::test]
    async fn health_reports_version() {
        let response = router(mock_state(""))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health.status, "healthy");
        assert!(health.engine);
    }

    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn remote_scanner_round_trip() {
        let base = serve(mock_state("lngredients: rice, salt")).await;
        let scanner = RemoteScanner::new(RemoteOcrClient::new(&base).unwrap());
        let source = ImageSource::Decoded(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            40,
            30,
            Rgba([250, 250, 250, 255]),
        )));
        let scan = scanner.scan(source, &()).await.unwrap();
        assert_eq!(scan.raw_text, "lngredients: rice, salt");
        assert_eq!(scan.text, "Ingredients: rice, salt");
        assert_eq!(scan.confidence, 90.0);
    }

    #[tokio::test]
    async fn remote_scanner_surfaces_server_error() {
        let base = serve(state_with(Arc::new(UnavailableRecognizer))).await;
        let scanner = RemoteScanner::new(RemoteOcrClient::new(&base).unwrap());
        let source = ImageSource::Decoded(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([0, 0, 0, 255]),
        )));
        match scanner.scan(source, &()).await {
            Err(ScanError::Remote(msg)) => assert!(msg.contains("OCR passes failed"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
