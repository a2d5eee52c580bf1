use super::{augment_sample, ImageRecord};
use crate::common::*;

/// One preprocessed sample ready for a training step.
#[derive(Debug)]
pub struct TrainingSample {
    /// Normalized image, shaped (1, 3, resized_h, resized_w).
    pub image: Tensor,
    pub rpn_targets: RpnTargets,
    /// Ground-truth boxes in resized-image pixels.
    pub boxes: Vec<LabeledBox>,
}

/// Infinite restartable shuffled cursor over one dataset split.
///
/// Each split owns its own order and random state, so the training and
/// validation streams advance independently.
#[derive(Debug)]
pub struct SampleStream {
    config: Arc<Config>,
    records: Vec<Arc<ImageRecord>>,
    order: Vec<usize>,
    cursor: usize,
    augment: bool,
    rng: StdRng,
}

impl SampleStream {
    pub fn new(
        config: Arc<Config>,
        records: Vec<ImageRecord>,
        augment: bool,
        mut rng: StdRng,
    ) -> Result<Self> {
        ensure!(!records.is_empty(), "cannot stream from an empty record list");

        let mut order: Vec<_> = (0..records.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            config,
            records: records.into_iter().map(Arc::new).collect(),
            order,
            cursor: 0,
            augment,
            rng,
        })
    }

    /// The next usable sample. Records that fail to load or yield no
    /// trainable anchors are skipped with a log line.
    pub fn next_sample(&mut self) -> Result<TrainingSample> {
        for _ in 0..self.records.len() {
            let record = self.advance();
            match self.prepare(&record) {
                Ok(Some(sample)) => return Ok(sample),
                Ok(None) => {
                    warn!(
                        "no usable anchors for '{}', skipping the record",
                        record.path.display()
                    );
                }
                Err(err) => {
                    warn!("skipping record: {:#}", err);
                }
            }
        }
        bail!(
            "no usable sample among {} records; every record was skipped",
            self.records.len()
        );
    }

    fn advance(&mut self) -> Arc<ImageRecord> {
        if self.cursor == self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }
        let record = self.records[self.order[self.cursor]].clone();
        self.cursor += 1;
        record
    }

    fn prepare(&mut self, record: &ImageRecord) -> Result<Option<TrainingSample>> {
        let image = tch::vision::image::load(&record.path)
            .with_context(|| format!("failed to load image '{}'", record.path.display()))?;

        let boxes: Vec<LabeledBox> = record
            .boxes
            .iter()
            .map(|gt| -> Result<_> {
                let class_index = *self
                    .config
                    .class_mapping
                    .get(&gt.class_name)
                    .ok_or_else(|| format_err!("unknown class '{}'", gt.class_name))?;
                Ok(LabeledBox {
                    class_index,
                    bbox: gt.bbox,
                })
            })
            .try_collect()?;

        let (image, boxes) = if self.augment {
            augment_sample(&self.config, image, boxes, &mut self.rng)?
        } else {
            (image, boxes)
        };

        // resize the shorter side to the configured length
        let (_channels, height, width) = image.size3()?;
        let (resized_w, resized_h) = resized_size(width, height, self.config.im_size);
        let image = tch::vision::image::resize(&image, resized_w, resized_h)?;
        let scale_x = resized_w as f64 / width as f64;
        let scale_y = resized_h as f64 / height as f64;
        let boxes: Vec<_> = boxes
            .into_iter()
            .map(|labeled| LabeledBox {
                class_index: labeled.class_index,
                bbox: labeled.bbox.scale(scale_x, scale_y),
            })
            .collect();

        let grid_w = model::feature_size(resized_w);
        let grid_h = model::feature_size(resized_h);
        let rpn_targets = match anchors::rpn_targets(
            &self.config,
            resized_w,
            resized_h,
            grid_w,
            grid_h,
            &boxes,
        )? {
            Some(targets) => targets,
            None => return Ok(None),
        };

        let image = normalize_image(&self.config, &image).unsqueeze(0);
        Ok(Some(TrainingSample {
            image,
            rpn_targets,
            boxes,
        }))
    }
}

/// The shorter side scaled to `im_size`, the other side scaled to match.
pub fn resized_size(width: i64, height: i64, im_size: i64) -> (i64, i64) {
    if width <= height {
        let factor = im_size as f64 / width as f64;
        (im_size, (height as f64 * factor).round() as i64)
    } else {
        let factor = im_size as f64 / height as f64;
        ((width as f64 * factor).round() as i64, im_size)
    }
}

fn normalize_image(config: &Config, image: &Tensor) -> Tensor {
    let mean: Vec<f32> = config
        .img_channel_mean
        .iter()
        .map(|&value| value as f32)
        .collect();
    let mean = Tensor::of_slice(&mean).view([3, 1, 1]);
    (image.to_kind(Kind::Float) - mean) / config.img_scaling_factor
}
