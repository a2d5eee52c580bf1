use crate::common::*;

/// A ground-truth box paired with its class index, in resized-image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBox {
    pub class_index: usize,
    pub bbox: Corners<f64>,
}
