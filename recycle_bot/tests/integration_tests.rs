use std::{sync::Arc, time::Duration};

use image::RgbImage;
use recycle_bot::{
    error::{IterationError, StartupError},
    nn::{InferModel, TrackedTensor, CLASSES},
    pipeline::{Pipeline, PipelineState},
    sensors::FrameSource,
};
use tokio::time::{sleep, timeout};
use tract_onnx::prelude::tensor1;

struct ConstantSource {
    frame: RgbImage,
}

impl FrameSource for ConstantSource {
    fn current_frame(&self) -> Option<RgbImage> {
        Some(self.frame.clone())
    }
}

struct FixedScoreModel {
    scores: Vec<f32>,
}

impl InferModel for FixedScoreModel {
    fn infer(&self, input: TrackedTensor) -> Result<TrackedTensor, IterationError> {
        drop(input);
        Ok(TrackedTensor::new(tensor1(&self.scores)))
    }
}

fn test_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(CLASSES, Duration::from_millis(1)))
}

#[tokio::test]
async fn end_to_end_publishes_cardboard() {
    let pipeline = test_pipeline();
    let sink = pipeline.sink();

    let runner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let source_fut = async {
                Ok::<_, StartupError>(ConstantSource {
                    frame: RgbImage::new(1280, 720),
                })
            };
            let model_fut = async {
                Ok::<_, StartupError>(FixedScoreModel {
                    scores: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                })
            };
            pipeline.run(source_fut, model_fut).await
        })
    };

    let mut predictions = sink.subscribe();
    let published = timeout(
        Duration::from_secs(5),
        predictions.wait_for(|prediction| prediction.is_some()),
    )
    .await
    .expect("no prediction within timeout")
    .expect("pipeline dropped the sink")
    .clone();

    assert_eq!(published.unwrap().label, "cardboard");

    pipeline.stop();
    timeout(Duration::from_secs(5), runner)
        .await
        .expect("pipeline did not stop")
        .expect("pipeline task panicked")
        .expect("pipeline reported a startup error");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn running_requires_both_startup_legs() {
    for camera_first in [true, false] {
        let pipeline = test_pipeline();
        let mut state = pipeline.watch_state();

        let (camera_delay, model_delay) = match camera_first {
            true => (Duration::ZERO, Duration::from_millis(120)),
            false => (Duration::from_millis(120), Duration::ZERO),
        };

        let runner = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let source_fut = async move {
                    sleep(camera_delay).await;
                    Ok::<_, StartupError>(ConstantSource {
                        frame: RgbImage::new(1280, 720),
                    })
                };
                let model_fut = async move {
                    sleep(model_delay).await;
                    Ok::<_, StartupError>(FixedScoreModel {
                        scores: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                    })
                };
                pipeline.run(source_fut, model_fut).await
            })
        };

        // One leg is done, the other is not: still loading.
        sleep(Duration::from_millis(60)).await;
        assert_eq!(pipeline.state(), PipelineState::Loading);

        timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == PipelineState::Running),
        )
        .await
        .expect("pipeline never entered Running")
        .unwrap();

        pipeline.stop();
        timeout(Duration::from_secs(5), runner)
            .await
            .expect("pipeline did not stop")
            .expect("pipeline task panicked")
            .expect("pipeline reported a startup error");
    }
}

#[tokio::test]
async fn failed_startup_leg_is_terminal() {
    let pipeline = test_pipeline();
    let sink = pipeline.sink();

    let source_fut = async {
        Ok::<_, StartupError>(ConstantSource {
            frame: RgbImage::new(1280, 720),
        })
    };
    let model_fut = async {
        Err::<FixedScoreModel, _>(StartupError::Load("connection refused".into()))
    };

    let result = pipeline.run(source_fut, model_fut).await;

    assert!(matches!(result, Err(StartupError::Load(_))));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(sink.latest(), None);
}

#[tokio::test]
async fn small_frames_are_skipped_without_publishing() {
    let pipeline = test_pipeline();
    let sink = pipeline.sink();

    let runner = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let source_fut = async {
                Ok::<_, StartupError>(ConstantSource {
                    // Smaller than the 384x512 crop in both dimensions
                    frame: RgbImage::new(320, 240),
                })
            };
            let model_fut = async {
                Ok::<_, StartupError>(FixedScoreModel {
                    scores: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                })
            };
            pipeline.run(source_fut, model_fut).await
        })
    };

    let mut state = pipeline.watch_state();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == PipelineState::Running),
    )
    .await
    .expect("pipeline never entered Running")
    .unwrap();

    // Let a few iterations hit the shape error.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.latest(), None);

    pipeline.stop();
    timeout(Duration::from_secs(5), runner)
        .await
        .expect("pipeline did not stop")
        .expect("pipeline task panicked")
        .expect("pipeline reported a startup error");
}
