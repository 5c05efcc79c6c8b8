//! Recycle Bot: classifies waste seen by a camera and serves the label.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{routing::get, Extension, Router};
use clap::Parser;
use env_logger::TimestampPrecision;
use recycle_bot::{
    endpoints::{healthcheck, prediction},
    meter::spawn_meter_logger,
    nn::{ModelSource, RecycleModel, CLASSES},
    pipeline::{Pipeline, DEFAULT_FRAME_INTERVAL},
    sensors::{self, CameraConfig, Facing},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// URL of the serialized classifier graph
    #[clap(
        long,
        default_value = "http://localhost:8000/public/model/recycle_bot.onnx"
    )]
    model_url: String,

    /// Camera to use on devices with more than one
    #[clap(long, value_enum, default_value = "back")]
    facing: Facing,

    /// Requested capture width (the device may negotiate another)
    #[clap(long, default_value_t = 1280)]
    width: u32,

    /// Requested capture height (the device may negotiate another)
    #[clap(long, default_value_t = 720)]
    height: u32,

    /// Address to serve the prediction endpoint on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let camera_config = CameraConfig {
        facing: args.facing,
        ideal_width: args.width,
        ideal_height: args.height,
    };
    let model_source = ModelSource::with_default_cache(&args.model_url)?;

    let pipeline = Arc::new(Pipeline::new(CLASSES, DEFAULT_FRAME_INTERVAL));
    let sink = pipeline.sink();

    spawn_meter_logger();

    // Text display surface: log every label change.
    {
        let mut predictions = sink.subscribe();
        tokio::spawn(async move {
            while predictions.changed().await.is_ok() {
                let latest = predictions.borrow_and_update().clone();
                if let Some(prediction) = latest {
                    log::info!(
                        "Prediction: {} ({:.3})",
                        prediction.label,
                        prediction.score
                    );
                }
            }
        });
    }

    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let source_fut = async { sensors::open(&camera_config) };
            let model_fut = RecycleModel::load(&model_source);
            if let Err(err) = pipeline.run(source_fut, model_fut).await {
                log::error!("Startup failed: {err}");
            }
        });
    }

    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/prediction", get(prediction))
        .layer(Extension(sink));

    let addr: SocketAddr = args.server_address.parse()?;
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Ctrl-C: let the loop see the cancellation before exiting.
    pipeline.stop();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {err}");
    }
}
