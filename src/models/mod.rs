//! ONNX classifier components

pub mod aggregator;
pub mod inference;
pub mod loader;

pub use aggregator::ScoreAggregator;
pub use inference::OnnxClassifier;
pub use loader::ModelLoader;
