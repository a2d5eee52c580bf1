//! Detector configuration format.

use crate::common::*;

/// The hyperparameter set shared by the training and inference programs.
///
/// The training program writes it to disk once at startup so that the
/// inference program can reload the exact same settings later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Anchor box sizes in pixels on the resized image.
    pub anchor_box_scales: Vec<f64>,
    /// Anchor aspect ratios as (width, height) multipliers.
    pub anchor_box_ratios: Vec<(f64, f64)>,
    /// Total downscaling factor of the backbone.
    pub rpn_stride: i64,
    /// Target length of the shorter image side after resizing.
    pub im_size: i64,
    /// Per-channel means subtracted from the input image.
    pub img_channel_mean: [f64; 3],
    pub img_scaling_factor: f64,
    /// Anchors below this overlap against every ground-truth box are negative.
    pub rpn_min_overlap: R64,
    /// Anchors at or above this overlap are positive.
    pub rpn_max_overlap: R64,
    /// Proposals below this overlap are dropped entirely.
    pub classifier_min_overlap: R64,
    /// Proposals at or above this overlap are foreground.
    pub classifier_max_overlap: R64,
    /// Scaling applied to proposal-network regression targets.
    pub std_scaling: f64,
    /// Normalization weights for classifier regression targets.
    pub classifier_regr_std: [f64; 4],
    /// Number of regions of interest fed to one classifier update.
    pub num_rois: usize,
    pub use_horizontal_flips: bool,
    pub use_vertical_flips: bool,
    pub rot_90: bool,
    pub verbose: bool,
    /// Iterations per epoch.
    pub epoch_length: usize,
    pub num_epochs: usize,
    /// Path the combined model weights are saved to.
    pub model_path: PathBuf,
    /// Optional pretrained weights loaded at startup.
    pub base_net_weights: Option<PathBuf>,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    /// Class name to index mapping. The background class is always present
    /// and always last.
    pub class_mapping: IndexMap<String, usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anchor_box_scales: vec![128.0, 256.0, 512.0],
            anchor_box_ratios: vec![(1.0, 1.0), (1.0, 2.0), (2.0, 1.0)],
            rpn_stride: 16,
            im_size: 600,
            img_channel_mean: [123.68, 116.779, 103.939],
            img_scaling_factor: 1.0,
            rpn_min_overlap: r64(0.3),
            rpn_max_overlap: r64(0.7),
            classifier_min_overlap: r64(0.1),
            classifier_max_overlap: r64(0.5),
            std_scaling: 4.0,
            classifier_regr_std: [8.0, 8.0, 4.0, 4.0],
            num_rois: 32,
            use_horizontal_flips: false,
            use_vertical_flips: false,
            rot_90: false,
            verbose: true,
            epoch_length: 100,
            num_epochs: 2000,
            model_path: PathBuf::from("model_frcnn.ot"),
            base_net_weights: None,
            device: Device::Cpu,
            class_mapping: IndexMap::new(),
        }
    }
}

impl Config {
    pub const BACKGROUND_CLASS: &'static str = "bg";

    /// Number of anchor shapes per feature map location.
    pub fn num_anchors(&self) -> usize {
        self.anchor_box_scales.len() * self.anchor_box_ratios.len()
    }

    /// Number of classes including background.
    pub fn num_classes(&self) -> usize {
        self.class_mapping.len()
    }

    pub fn background_index(&self) -> usize {
        self.class_mapping.len() - 1
    }

    /// Anchor (width, height) pairs in resized-image pixels, in the fixed
    /// channel order shared by target generation and proposal decoding.
    pub fn anchor_shapes(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.anchor_box_scales.iter().flat_map(move |&scale| {
            self.anchor_box_ratios
                .iter()
                .map(move |&(rw, rh)| (scale * rw, scale * rh))
        })
    }

    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn store<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.anchor_box_scales.is_empty() && !self.anchor_box_ratios.is_empty(),
            "at least one anchor scale and ratio is required"
        );
        ensure!(
            self.num_rois >= 2,
            "num_rois must be at least 2, got {}",
            self.num_rois
        );
        ensure!(self.epoch_length > 0, "epoch_length must be positive");
        ensure!(self.rpn_stride > 0, "rpn_stride must be positive");
        ensure!(
            self.rpn_min_overlap < self.rpn_max_overlap,
            "rpn_min_overlap must be below rpn_max_overlap"
        );
        ensure!(
            self.classifier_min_overlap < self.classifier_max_overlap,
            "classifier_min_overlap must be below classifier_max_overlap"
        );
        ensure!(
            self.class_mapping.len() >= 2,
            "at least one foreground class plus background is required"
        );
        let background = self
            .class_mapping
            .get_index(self.background_index())
            .map(|(name, _)| name.as_str());
        ensure!(
            background == Some(Self::BACKGROUND_CLASS),
            "the background class must be present and last in the class mapping"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let class_mapping: IndexMap<String, usize> = [("person", 0), ("car", 1), ("bg", 2)]
            .into_iter()
            .map(|(name, index)| (name.to_owned(), index))
            .collect();
        Config {
            num_rois: 4,
            use_horizontal_flips: true,
            base_net_weights: Some(PathBuf::from("base.ot")),
            class_mapping,
            ..Config::default()
        }
    }

    #[test]
    fn config_round_trips_exactly() -> Result<()> {
        let config = sample_config();
        let path = std::env::temp_dir().join("frcnn-config-round-trip.json");
        config.store(&path)?;
        let restored = Config::open(&path)?;
        fs::remove_file(&path)?;
        assert_eq!(config, restored);
        Ok(())
    }

    #[test]
    fn validate_enforces_invariants() {
        let config = sample_config();
        assert!(config.validate().is_ok());

        let mut no_background = config.clone();
        no_background.class_mapping.shift_remove("bg");
        no_background.class_mapping.insert("cat".to_owned(), 2);
        assert!(no_background.validate().is_err());

        let mut single_roi = config;
        single_roi.num_rois = 1;
        assert!(single_roi.validate().is_err());
    }

    #[test]
    fn anchor_shapes_cover_all_combinations() {
        let config = sample_config();
        let shapes: Vec<_> = config.anchor_shapes().collect();
        assert_eq!(shapes.len(), config.num_anchors());
        assert_eq!(shapes[0], (128.0, 128.0));
        assert_eq!(shapes[1], (128.0, 256.0));
        assert_eq!(shapes[2], (256.0, 128.0));
        assert_eq!(shapes[3], (256.0, 256.0));
    }
}
