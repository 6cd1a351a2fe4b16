use crate::data::LabeledPoint;
use std::path::PathBuf;

/// A finished sample on its way to the writer.
pub struct SampleMessage {
    pub batch_id: usize,
    pub sample_id: String,
    pub points: Vec<LabeledPoint>,
    pub output_path: PathBuf,
}
