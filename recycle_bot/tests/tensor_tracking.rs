//! Tensor bookkeeping over many loop iterations. Kept in its own binary
//! so no other test touches the global gauge while it runs.
use image::RgbImage;
use recycle_bot::{
    error::IterationError,
    meter::METER,
    nn::{warm_up, InferModel, TrackedTensor, CLASSES},
    pipeline::classify,
};
use tract_onnx::prelude::tensor1;

struct FixedScoreModel {
    scores: Vec<f32>,
}

impl InferModel for FixedScoreModel {
    fn infer(&self, input: TrackedTensor) -> Result<TrackedTensor, IterationError> {
        drop(input);
        Ok(TrackedTensor::new(tensor1(&self.scores)))
    }
}

struct FailingModel;

impl InferModel for FailingModel {
    fn infer(&self, _input: TrackedTensor) -> Result<TrackedTensor, IterationError> {
        Err(IterationError::Infer("executor fault".into()))
    }
}

// Single test function: the gauge is process-global, so the phases must
// not run on parallel test threads.
#[test]
fn no_live_tensors_after_any_iteration() {
    let frame = RgbImage::new(1280, 720);
    let model = FixedScoreModel {
        scores: vec![0.1, 0.05, 0.05, 0.1, 0.6, 0.1],
    };

    assert_eq!(METER.live_tensors(), 0);

    warm_up(&model);
    assert_eq!(METER.live_tensors(), 0);

    for iteration in 0..1000 {
        let prediction = classify(&frame, &model, CLASSES).unwrap();
        assert_eq!(prediction.label, "plastic");
        assert_eq!(
            METER.live_tensors(),
            0,
            "tensor leaked by iteration {iteration}"
        );
    }

    // Failed iterations must release the tensors created before the fault.
    for _ in 0..100 {
        assert!(classify(&frame, &FailingModel, CLASSES).is_err());
        assert_eq!(METER.live_tensors(), 0);
    }
}
