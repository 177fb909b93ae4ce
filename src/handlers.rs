use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::ClassifierError;
use crate::config::{AppConfig, ResponseShape};
use crate::error::ApiError;
use crate::models::{
    HealthResponse, MessageResponse, PredictQuery, PredictionsResponse, SingleResponse,
};
use crate::pipeline::Predictor;
use crate::upload;

pub const WELCOME: &str = "Welcome to the Plant Prediction API! Use /predict to classify images.";

/// Shared, read-only state injected into every handler.
pub struct AppState {
    pub predictor: Predictor,
    pub top_k: usize,
    pub response_shape: ResponseShape,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(predictor: Predictor, config: &AppConfig) -> Self {
        Self {
            predictor,
            top_k: config.predict.top_k,
            response_shape: config.predict.response_shape,
            upload_dir: config.upload.dir(),
            max_upload_bytes: config.server.max_upload_bytes,
        }
    }

    fn resolve_top_k(&self, requested: Option<usize>) -> Result<usize, ApiError> {
        match (self.response_shape, requested) {
            (ResponseShape::Single, _) => Ok(1),
            (ResponseShape::Ranked, Some(0)) => Err(ApiError::InvalidTopK),
            (ResponseShape::Ranked, Some(k)) => Ok(k),
            (ResponseShape::Ranked, None) => Ok(self.top_k),
        }
    }
}

/// Register routes; `/predict/` is kept as an alias of `/predict`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::InvalidQuery(err.to_string()).into()
    }))
    .route("/", web::get().to(index))
    .route("/health", web::get().to(health))
    .route("/predict", web::post().to(predict))
    .route("/predict/", web::post().to(predict));
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(MessageResponse { message: WELCOME })
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        labels: state.predictor.labels().len(),
    })
}

pub async fn predict(
    state: web::Data<AppState>,
    query: web::Query<PredictQuery>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("predict", request_id = %request_id);

    let result = run_prediction(state, query.into_inner(), payload, request_id)
        .instrument(span.clone())
        .await;

    if let Err(e) = &result {
        let _guard = span.enter();
        if e.is_client_error() {
            warn!(error = %e, "Rejected prediction request");
        } else {
            error!(error = %e, "Prediction failed");
        }
    }
    result
}

async fn run_prediction(
    state: web::Data<AppState>,
    query: PredictQuery,
    payload: Multipart,
    request_id: Uuid,
) -> Result<HttpResponse, ApiError> {
    let start = Instant::now();
    let top_k = state.resolve_top_k(query.top_k)?;

    let stored = upload::receive(
        payload,
        &state.upload_dir,
        request_id,
        state.max_upload_bytes,
    )
    .await?;
    info!(filename = %stored.filename, bytes = stored.size, "Upload stored");

    let predictor = state.predictor.clone();
    let path = stored.file.path().to_path_buf();
    let outcome = web::block(move || predictor.predict_file(&path, top_k))
        .await
        .map_err(|_| ApiError::Blocking);

    // remove the upload whatever the outcome; drop covers early returns
    if let Err(e) = stored.file.close() {
        warn!(error = %e, "Failed to remove temporary upload");
    }

    let predictions = outcome??;
    if let Some(best) = predictions.first() {
        info!(
            label = %best.label,
            confidence = best.confidence,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Prediction complete"
        );
    }

    let response = match state.response_shape {
        ResponseShape::Ranked => HttpResponse::Ok().json(PredictionsResponse { predictions }),
        ResponseShape::Single => {
            let best = predictions
                .into_iter()
                .next()
                .ok_or(ApiError::Classifier(ClassifierError::NoOutput))?;
            HttpResponse::Ok().json(SingleResponse::from(best))
        }
    };
    Ok(response)
}
