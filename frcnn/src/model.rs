//! Network blocks: shared backbone, proposal head and classifier head.
//!
//! These are plain convolutional stacks kept deliberately simple; they are
//! driven as opaque tensor-to-tensor functions by the training loop.

use crate::common::*;

/// Side length of the pooled feature patch fed to the classifier head.
const POOL_SIZE: i64 = 7;
const BACKBONE_CHANNELS: [i64; 5] = [3, 64, 128, 256, 512];

/// Spatial size of one backbone output side for a given input side.
pub fn feature_size(mut side: i64) -> i64 {
    for _ in 0..BACKBONE_CHANNELS.len() - 1 {
        side = (side + 1) / 2;
    }
    side
}

fn conv_block(path: &nn::Path, in_channels: i64, out_channels: i64) -> nn::SequentialT {
    nn::seq_t()
        .add(nn::conv2d(
            path / "conv",
            in_channels,
            out_channels,
            3,
            nn::ConvConfig {
                stride: 2,
                padding: 1,
                ..Default::default()
            },
        ))
        .add(nn::batch_norm2d(path / "bn", out_channels, Default::default()))
        .add_fn(|xs| xs.relu())
}

/// The shared feature extractor with a total stride of 16.
#[derive(Debug)]
pub struct Backbone {
    seq: nn::SequentialT,
}

impl Backbone {
    pub fn new(path: &nn::Path) -> Self {
        let mut seq = nn::seq_t();
        for (index, window) in BACKBONE_CHANNELS.windows(2).enumerate() {
            let block_path = path / format!("block_{}", index).as_str();
            seq = seq.add(conv_block(&block_path, window[0], window[1]));
        }
        Self { seq }
    }

    pub fn forward_t(&self, image: &Tensor, train: bool) -> Tensor {
        self.seq.forward_t(image, train)
    }
}

/// The region proposal head.
#[derive(Debug)]
pub struct RpnHead {
    conv: nn::Conv2D,
    cls: nn::Conv2D,
    regr: nn::Conv2D,
}

impl RpnHead {
    pub fn new(path: &nn::Path, num_anchors: i64) -> Self {
        let channels = *BACKBONE_CHANNELS.last().unwrap();
        let conv = nn::conv2d(
            path / "conv",
            channels,
            channels,
            3,
            nn::ConvConfig {
                padding: 1,
                ..Default::default()
            },
        );
        let cls = nn::conv2d(path / "cls", channels, num_anchors, 1, Default::default());
        let regr = nn::conv2d(path / "regr", channels, num_anchors * 4, 1, Default::default());
        Self { conv, cls, regr }
    }

    /// Per-anchor objectness probabilities and box offsets.
    pub fn forward(&self, features: &Tensor) -> (Tensor, Tensor) {
        let shared = features.apply(&self.conv).relu();
        (shared.apply(&self.cls).sigmoid(), shared.apply(&self.regr))
    }
}

/// The second-stage head pooling each region from the shared feature map.
#[derive(Debug)]
pub struct ClassifierHead {
    fc1: nn::Linear,
    fc2: nn::Linear,
    cls: nn::Linear,
    regr: nn::Linear,
}

impl ClassifierHead {
    pub fn new(path: &nn::Path, num_classes: i64) -> Self {
        let channels = *BACKBONE_CHANNELS.last().unwrap();
        let fc1 = nn::linear(
            path / "fc1",
            channels * POOL_SIZE * POOL_SIZE,
            4096,
            Default::default(),
        );
        let fc2 = nn::linear(path / "fc2", 4096, 4096, Default::default());
        let cls = nn::linear(path / "cls", 4096, num_classes, Default::default());
        let regr = nn::linear(path / "regr", 4096, 4 * (num_classes - 1), Default::default());
        Self {
            fc1,
            fc2,
            cls,
            regr,
        }
    }

    /// Class probabilities and per-class offsets for each (x, y, w, h) row
    /// of `rois`, given in feature-grid units.
    pub fn forward(&self, features: &Tensor, rois: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_batch, _channels, feature_h, feature_w) = features.size4()?;
        let (num_rois, _coords) = rois.size2()?;
        let roi_values = Vec::<f32>::from(&rois.contiguous().view([-1]));

        let mut pooled = Vec::with_capacity(num_rois as usize);
        for roi in roi_values.chunks(4) {
            let x = (roi[0].round() as i64).clamp(0, feature_w - 1);
            let y = (roi[1].round() as i64).clamp(0, feature_h - 1);
            let w = (roi[2].round() as i64).clamp(1, feature_w - x);
            let h = (roi[3].round() as i64).clamp(1, feature_h - y);

            let patch = features.narrow(2, y, h).narrow(3, x, w);
            pooled.push(patch.adaptive_avg_pool2d(&[POOL_SIZE, POOL_SIZE]));
        }

        let pooled = Tensor::cat(&pooled, 0).view([num_rois, -1]);
        let hidden = pooled.apply(&self.fc1).relu().apply(&self.fc2).relu();
        let class_probs = hidden.apply(&self.cls).softmax(-1, Kind::Float);
        let offsets = hidden.apply(&self.regr);
        Ok((class_probs, offsets))
    }
}

/// The combined two-stage detector. All variables live under one variable
/// store root so a single checkpoint file covers the whole model.
#[derive(Debug)]
pub struct FasterRcnn {
    backbone: Backbone,
    rpn: RpnHead,
    classifier: ClassifierHead,
}

impl FasterRcnn {
    pub fn new(path: &nn::Path, num_classes: usize, num_anchors: usize) -> Result<Self> {
        ensure!(
            num_classes >= 2,
            "at least one foreground class plus background is required"
        );
        ensure!(num_anchors > 0, "at least one anchor shape is required");

        Ok(Self {
            backbone: Backbone::new(&(path / "base")),
            rpn: RpnHead::new(&(path / "rpn"), num_anchors as i64),
            classifier: ClassifierHead::new(&(path / "classifier"), num_classes as i64),
        })
    }

    /// Shared features for one image batch.
    pub fn features(&self, image: &Tensor, train: bool) -> Tensor {
        self.backbone.forward_t(image, train)
    }

    /// Shared features plus the proposal head output.
    pub fn rpn_forward(&self, image: &Tensor, train: bool) -> (Tensor, Tensor, Tensor) {
        let features = self.backbone.forward_t(image, train);
        let (cls, regr) = self.rpn.forward(&features);
        (features, cls, regr)
    }

    pub fn classifier_forward(
        &self,
        features: &Tensor,
        rois: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        self.classifier.forward(features, rois)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_size_matches_the_conv_stack() {
        assert_eq!(feature_size(600), 38);
        assert_eq!(feature_size(800), 50);
        assert_eq!(feature_size(16), 1);
    }

    #[test]
    fn forward_shapes_are_consistent() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = FasterRcnn::new(&vs.root(), 3, 9)?;

        let image = Tensor::zeros(&[1, 3, 64, 48], tch::kind::FLOAT_CPU);
        let (features, cls, regr) = model.rpn_forward(&image, false);

        let grid_h = feature_size(64);
        let grid_w = feature_size(48);
        assert_eq!(features.size(), vec![1, 512, grid_h, grid_w]);
        assert_eq!(cls.size(), vec![1, 9, grid_h, grid_w]);
        assert_eq!(regr.size(), vec![1, 36, grid_h, grid_w]);

        let rois = Tensor::of_slice(&[0.0f32, 0.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0]).view([2, 4]);
        let (class_probs, offsets) = model.classifier_forward(&features, &rois)?;
        assert_eq!(class_probs.size(), vec![2, 3]);
        assert_eq!(offsets.size(), vec![2, 8]);
        Ok(())
    }
}
