use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;

use log::warn;
use thiserror::Error;
use tokio::task::JoinError;

use crate::types::ErrorResponse;

/// Everything that can go wrong while serving a prediction.
///
/// The kinds stay distinct for logs and tests, but clients always get a
/// 500 with `{"error": <message>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    Body(String),
    #[error("invalid feature shape: {0}")]
    Shape(String),
    #[error("inference failed: {0:#}")]
    Inference(#[from] anyhow::Error),
    #[error("inference timed out after {0}ms")]
    Timeout(u64),
    #[error("inference worker failed: {0}")]
    Join(#[from] JoinError),
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        warn!("{} {} failed: {}", req.method(), req.uri(), self);

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (Status::InternalServerError, body).respond_to(req)
    }
}
