//! A YOLO (v1) style object detector built on libtorch.
//!
//! The network maps a `3x448x448` image to a `7x7` grid of predictions. Each
//! cell predicts `num_boxes` boxes encoded as `(x, y, w, h, confidence)`
//! followed by `num_classes` class scores.

mod common;
pub mod config;
pub mod layer;
pub mod model;
pub mod network;
pub mod transform;

pub use config::{Config, ModelConfig};
pub use layer::{Layer, LayerInit, LayerKind};
pub use model::{Yolo, YoloInit, YoloOutput};
pub use network::{LayerSummary, Network};
pub use transform::GridGeometry;
