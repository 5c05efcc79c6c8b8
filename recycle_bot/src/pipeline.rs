//! The per-frame classification loop.
//!
//! Camera and model come up in parallel; the loop starts only once both
//! are ready and then runs until stopped. Failures inside one iteration
//! are logged and never escape it.
use std::{future::Future, sync::Arc, time::Duration};

use image::RgbImage;
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{IterationError, StartupError},
    meter::METER,
    nn::{get_top_k_classes, preproc, warm_up, ClassTable, InferModel, Prediction},
    sensors::FrameSource,
    sink::PredictionSink,
};

/// Loop pacing, standing in for a display-refresh tick.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Loading,
    Running,
    Stopped,
}

pub struct Pipeline {
    classes: ClassTable,
    frame_interval: Duration,
    sink: Arc<PredictionSink>,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(classes: ClassTable, frame_interval: Duration) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            classes,
            frame_interval,
            sink: Arc::new(PredictionSink::new()),
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn sink(&self) -> Arc<PredictionSink> {
        Arc::clone(&self.sink)
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Invalidate the loop. The next scheduled iteration becomes a no-op.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Join the two startup legs, warm the model up and run the loop until
    /// stopped. A failed leg is terminal: the pipeline moves straight to
    /// `Stopped` without ever entering `Running`.
    pub async fn run<S, M>(
        &self,
        source_fut: impl Future<Output = Result<S, StartupError>>,
        model_fut: impl Future<Output = Result<M, StartupError>>,
    ) -> Result<(), StartupError>
    where
        S: FrameSource,
        M: InferModel,
    {
        self.state.send_replace(PipelineState::Loading);

        let (source, model) = match tokio::try_join!(source_fut, model_fut) {
            Ok(ready) => ready,
            Err(err) => {
                self.state.send_replace(PipelineState::Stopped);
                return Err(err);
            }
        };

        // Stopped while loading: skip warm-up, never show `Running`.
        if self.cancel.is_cancelled() {
            self.state.send_replace(PipelineState::Stopped);
            return Ok(());
        }

        warm_up(&model);

        self.state.send_replace(PipelineState::Running);
        self.run_loop(source, model).await;
        self.state.send_replace(PipelineState::Stopped);

        Ok(())
    }

    async fn run_loop(&self, source: impl FrameSource, model: impl InferModel) {
        let mut ticker = interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(frame) = source.current_frame() else {
                // Expected while the stream spins up.
                continue;
            };

            match classify(&frame, &model, self.classes) {
                Ok(prediction) => {
                    METER.tick_classified();
                    self.sink.publish(prediction);
                }
                Err(err) => log::warn!("Skipping frame: {err}"),
            }
        }
    }
}

/// One iteration: preprocess, infer, decode. Every tensor created here is
/// dropped before returning.
pub fn classify(
    frame: &RgbImage,
    model: &impl InferModel,
    classes: ClassTable,
) -> Result<Prediction, IterationError> {
    let input = preproc(frame)?;
    let output = model.infer(input)?;
    let scores = output.scores()?;

    get_top_k_classes(&scores, 1, classes)
        .into_iter()
        .next()
        .ok_or_else(|| IterationError::Infer("empty score vector".into()))
}
