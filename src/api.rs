use std::sync::Arc;

use rocket::serde::json::{self, Json};
use rocket::{get, post, routes, Route, State};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::features::FeatureBatch;
use crate::types::{HealthResponse, ModelInfoResponse, PredictRequest, PredictResponse};

pub fn routes() -> Vec<Route> {
    routes![health, model_info, predict]
}

#[get("/health")]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[get("/model")]
pub async fn model_info(state: &State<Arc<AppState>>) -> Json<ModelInfoResponse> {
    Json(state.engine.describe())
}

/// Body errors are taken as a value so they surface as our 500 payload
/// instead of Rocket's default 400/422 catchers.
#[post("/predict", data = "<req>")]
pub async fn predict(
    state: &State<Arc<AppState>>,
    req: Result<Json<PredictRequest>, json::Error<'_>>,
) -> Result<Json<PredictResponse>, ApiError> {
    let req = req.map_err(|e| ApiError::Body(e.to_string()))?;

    let batch = FeatureBatch::from_nested(&req.features)?;
    let prediction = state.predict(batch).await?;

    Ok(Json(PredictResponse { prediction }))
}
