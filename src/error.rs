use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::num::ParseFloatError;
use thiserror::Error;

use crate::detect::DetectError;
use crate::models::SchemaError;
use crate::transport::TransportError;

/// Failures of the `query_range` response transformation. Any of these
/// replaces the upstream response with a gateway error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read HTTP response body: {0}")]
    ReadBody(#[source] reqwest::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to convert sample {value:?} to float: {source}")]
    SampleValue {
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("zero iterations specified")]
    ZeroIterations,

    #[error("failed to run peak detect: {0}")]
    Detection(#[from] DetectError),

    #[error("response transform task failed: {0}")]
    Worker(#[source] tokio::task::JoinError),
}

impl PipelineError {
    /// Short classification attached to log events.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ReadBody(_) => "failed to read HTTP response body",
            PipelineError::Transport(TransportError::Decode(_)) => {
                "failed to read gzip-encoded content"
            }
            PipelineError::Transport(TransportError::Encode(_)) => {
                "failed to write gzip-encoded content"
            }
            PipelineError::Schema(SchemaError::Encode(_)) => "failed to marshal JSON",
            PipelineError::Schema(_) => "failed to unmarshal JSON",
            PipelineError::SampleValue { .. } => "failed to convert sample to float",
            PipelineError::ZeroIterations => "configuration",
            PipelineError::Detection(_) => "failed to run peak detect",
            PipelineError::Worker(_) => "failed to join transform task",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse the target URI {uri:?}: {reason}")]
    InvalidTarget { uri: String, reason: String },

    #[error("failed to recognize log level {0:?}")]
    UnknownLogLevel(String),

    #[error("missing required setting: {0}")]
    MissingField(&'static str),

    #[error("failed to load config file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Request body error: {0}")]
    ClientBody(#[from] axum::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Upstream(_) | AppError::Pipeline(_) => StatusCode::BAD_GATEWAY,
            AppError::ClientBody(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(json!({
            "status": "error",
            "errorType": "execution",
            "error": self.to_string()
        }))).into_response()
    }
}
