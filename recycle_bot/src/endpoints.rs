//! HTTP endpoints serving the current prediction.
use std::sync::Arc;

use axum::Extension;

use crate::sink::PredictionSink;

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

/// Latest classification as plain text, or a placeholder before the
/// first prediction lands.
pub async fn prediction(Extension(sink): Extension<Arc<PredictionSink>>) -> String {
    match sink.latest() {
        Some(prediction) => prediction.label.to_owned(),
        None => "making prediction".to_owned(),
    }
}
