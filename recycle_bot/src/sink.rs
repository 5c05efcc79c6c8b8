//! Latest-prediction fan-out.
//!
use tokio::sync::watch;

use crate::nn::Prediction;

/// Holds the most recent prediction and notifies observers. No history,
/// last write wins.
pub struct PredictionSink {
    tx: watch::Sender<Option<Prediction>>,
}

impl PredictionSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, prediction: Prediction) {
        self.tx.send_replace(Some(prediction));
    }

    pub fn latest(&self) -> Option<Prediction> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Prediction>> {
        self.tx.subscribe()
    }
}

impl Default for PredictionSink {
    fn default() -> Self {
        Self::new()
    }
}
