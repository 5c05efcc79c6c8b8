//! Waste classifier: model loading, warm-up, preprocessing and top-K
//! decoding.
//!
use std::path::{Path, PathBuf};

use image::RgbImage;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

use crate::{
    error::{IterationError, StartupError},
    meter::TensorGuard,
    utils::download_with_backoff,
    VIDEO_HEIGHT_PIXELS, VIDEO_WIDTH_PIXELS,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[Arc<Tensor>; 4]>;

/// Download attempts before giving up on the model fetch.
const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Class labels of the waste classifier, indexed by output position.
pub const CLASSES: ClassTable =
    ClassTable::new(&["cardboard", "glass", "metal", "paper", "plastic", "trash"]);

/// Immutable index-to-label mapping, defined once and injected wherever
/// scores are decoded.
#[derive(Clone, Copy, Debug)]
pub struct ClassTable {
    labels: &'static [&'static str],
}

impl ClassTable {
    pub const fn new(labels: &'static [&'static str]) -> Self {
        Self { labels }
    }

    pub fn label(&self, index: usize) -> &'static str {
        self.labels.get(index).copied().unwrap_or("unknown")
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One ranked classification result.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub label: &'static str,
    pub score: f32,
}

/// Tensor with a live-count guard attached. Dropping it updates the
/// gauge, so a leak across iterations shows up as a non-zero reading.
pub struct TrackedTensor {
    tensor: Arc<Tensor>,
    _guard: TensorGuard,
}

impl TrackedTensor {
    pub fn new(tensor: Tensor) -> Self {
        Self::from_shared(Arc::new(tensor))
    }

    pub fn from_shared(tensor: Arc<Tensor>) -> Self {
        Self {
            tensor,
            _guard: TensorGuard::acquire(),
        }
    }

    pub fn as_tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Take the inner tensor out, releasing the guard.
    pub fn into_tensor(self) -> Tensor {
        Arc::try_unwrap(self.tensor).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Read the tensor as a flat `f32` score vector.
    pub fn scores(&self) -> Result<Vec<f32>, IterationError> {
        let view = self
            .tensor
            .to_array_view::<f32>()
            .map_err(|err| IterationError::Infer(err.to_string()))?;
        Ok(view.iter().copied().collect())
    }
}

/// Models the pipeline can drive: one preprocessed `[1, H, W, 3]` input
/// in, one score tensor out.
pub trait InferModel {
    fn infer(&self, input: TrackedTensor) -> Result<TrackedTensor, IterationError>;
}

/// Where to fetch the classifier graph from and where to cache it.
#[derive(Clone, Debug)]
pub struct ModelSource {
    pub url: String,
    pub cache_dir: PathBuf,
}

impl ModelSource {
    /// Source with the cache under the platform cache directory.
    pub fn with_default_cache(url: &str) -> Result<Self, StartupError> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| StartupError::Load("no cache directory available".into()))?;
        Ok(Self {
            url: url.to_owned(),
            cache_dir: cache_dir.join("recycle_bot"),
        })
    }

    fn cached_path(&self) -> PathBuf {
        let filename = self
            .url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("model.onnx");
        self.cache_dir.join(filename)
    }
}

/// The loaded waste classifier. Created once at startup, immutable for
/// the process lifetime.
pub struct RecycleModel {
    model: NnModel,
}

impl RecycleModel {
    /// Fetch the graph if it is not cached yet, then parse it.
    pub async fn load(source: &ModelSource) -> Result<Self, StartupError> {
        let path = source.cached_path();
        if !path.exists() {
            std::fs::create_dir_all(&source.cache_dir)
                .map_err(|err| StartupError::Load(err.to_string()))?;
            let client = reqwest::Client::new();
            download_with_backoff(&client, &source.url, &path, DOWNLOAD_ATTEMPTS).await?;
            log::info!("Downloaded model to {}", path.display());
        }

        let model = load_graph(&path)?;
        Ok(Self { model })
    }
}

impl InferModel for RecycleModel {
    fn infer(&self, input: TrackedTensor) -> Result<TrackedTensor, IterationError> {
        let outputs: NnOut = self
            .model
            .run(tvec!(input.into_tensor()))
            .map_err(|err| IterationError::Infer(err.to_string()))?;
        let scores = outputs
            .into_iter()
            .next()
            .ok_or_else(|| IterationError::Infer("model produced no outputs".into()))?;
        Ok(TrackedTensor::from_shared(scores))
    }
}

fn load_graph(path: &Path) -> Result<NnModel, StartupError> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(
            1,
            VIDEO_HEIGHT_PIXELS as usize,
            VIDEO_WIDTH_PIXELS as usize,
            3
        ),
    );
    let parse = || -> TractResult<NnModel> {
        Ok(tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?)
    };
    parse().map_err(|err| StartupError::Load(format!("{}: {err}", path.display())))
}

/// Center-crop a frame to the model input size.
pub fn center_crop(frame: &RgbImage) -> Result<RgbImage, IterationError> {
    let (width, height) = frame.dimensions();
    if width < VIDEO_WIDTH_PIXELS || height < VIDEO_HEIGHT_PIXELS {
        return Err(IterationError::Shape { width, height });
    }

    let begin_width = width / 2 - VIDEO_WIDTH_PIXELS / 2;
    let begin_height = height / 2 - VIDEO_HEIGHT_PIXELS / 2;

    Ok(image::imageops::crop_imm(
        frame,
        begin_width,
        begin_height,
        VIDEO_WIDTH_PIXELS,
        VIDEO_HEIGHT_PIXELS,
    )
    .to_image())
}

/// Crop the frame, add the batch dimension and cast to `f32`.
///
/// Pixel values are cast as-is, without scaling or mean subtraction; the
/// exported graph expects raw `[0, 255]` inputs.
pub fn preproc(frame: &RgbImage) -> Result<TrackedTensor, IterationError> {
    let cropped = center_crop(frame)?;

    let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
        (
            1,
            VIDEO_HEIGHT_PIXELS as usize,
            VIDEO_WIDTH_PIXELS as usize,
            3,
        ),
        |(_, y, x, c)| cropped[(x as u32, y as u32)][c] as f32,
    )
    .into();

    Ok(TrackedTensor::new(tensor))
}

/// Rank the score vector descending and keep the `k` best entries, mapped
/// to labels through the class table.
pub fn get_top_k_classes(scores: &[f32], k: usize, classes: ClassTable) -> Vec<Prediction> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);

    ranked
        .into_iter()
        .map(|(index, score)| Prediction {
            label: classes.label(index),
            score,
        })
        .collect()
}

/// Run one discarded inference on a zero-filled input so lazy allocations
/// inside the runtime happen before the first real frame.
///
/// The output is never published. A failed warm-up is logged and
/// tolerated; real inference may still succeed afterwards.
pub fn warm_up(model: &impl InferModel) {
    let shape = [
        1,
        VIDEO_HEIGHT_PIXELS as usize,
        VIDEO_WIDTH_PIXELS as usize,
        3,
    ];
    let zeros = match Tensor::zero::<f32>(&shape) {
        Ok(tensor) => TrackedTensor::new(tensor),
        Err(err) => {
            log::warn!("Skipping model warm-up: {err}");
            return;
        }
    };

    if let Err(err) = model.infer(zeros) {
        log::warn!("Model warm-up failed: {err}");
    }
}
