//! Decoding raw proposal-network output into candidate regions.

use crate::{common::*, config::Config};

/// A candidate box with its objectness score, in feature-grid units.
#[derive(Debug, Clone)]
pub struct ScoredBox {
    pub bbox: Corners<f64>,
    pub score: f32,
}

/// Proposal decoder initializer.
#[derive(Debug, Clone)]
pub struct ProposalDecoderInit {
    /// Boxes overlapping a better-scored box above this are suppressed.
    pub overlap_thresh: R64,
    /// Maximum number of emitted proposals.
    pub max_boxes: usize,
    /// If unset, anchors are emitted without applying predicted offsets.
    pub use_regression: bool,
}

impl Default for ProposalDecoderInit {
    fn default() -> Self {
        Self {
            overlap_thresh: r64(0.7),
            max_boxes: 300,
            use_regression: true,
        }
    }
}

impl ProposalDecoderInit {
    pub fn build(self) -> Result<ProposalDecoder> {
        let Self {
            overlap_thresh,
            max_boxes,
            use_regression,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&overlap_thresh.raw()),
            "overlap_thresh must be in [0, 1]"
        );
        ensure!(max_boxes > 0, "max_boxes must be positive");

        Ok(ProposalDecoder {
            overlap_thresh,
            max_boxes,
            use_regression,
        })
    }
}

/// Converts proposal-network score and offset maps into a pruned,
/// best-score-first list of candidate regions.
#[derive(Debug, Clone)]
pub struct ProposalDecoder {
    overlap_thresh: R64,
    max_boxes: usize,
    use_regression: bool,
}

impl ProposalDecoder {
    /// `rpn_cls` is (1, num_anchors, grid_h, grid_w) of objectness scores,
    /// `rpn_regr` is (1, 4 * num_anchors, grid_h, grid_w) of scaled offsets.
    pub fn forward(
        &self,
        config: &Config,
        rpn_cls: &Tensor,
        rpn_regr: &Tensor,
    ) -> Result<Vec<ScoredBox>> {
        let (_batch, channels, grid_h, grid_w) = rpn_cls.size4()?;
        let num_anchors = config.num_anchors() as i64;
        ensure!(
            channels == num_anchors,
            "expected {} score channels, got {}",
            num_anchors,
            channels
        );

        let scores = Vec::<f32>::from(&rpn_cls.contiguous().view([-1]));
        let deltas = Vec::<f32>::from(&rpn_regr.contiguous().view([-1]));
        let downscale = config.rpn_stride as f64;
        let plane = (grid_h * grid_w) as usize;

        let mut candidates = Vec::with_capacity(scores.len());
        for (anchor_index, (anchor_w, anchor_h)) in config.anchor_shapes().enumerate() {
            // anchor sizes in feature-grid units
            let anchor_w = anchor_w / downscale;
            let anchor_h = anchor_h / downscale;

            for y in 0..grid_h {
                for x in 0..grid_w {
                    let cell = (y * grid_w + x) as usize;
                    let score = scores[anchor_index * plane + cell];

                    let anchor = CenterSize::try_new(x as f64, y as f64, anchor_w, anchor_h)?
                        .to_corners();
                    let bbox = if self.use_regression {
                        let base = anchor_index * 4 * plane + cell;
                        let delta = BoxDelta {
                            dx: deltas[base] as f64 / config.std_scaling,
                            dy: deltas[base + plane] as f64 / config.std_scaling,
                            dw: deltas[base + 2 * plane] as f64 / config.std_scaling,
                            dh: deltas[base + 3 * plane] as f64 / config.std_scaling,
                        };
                        let decoded = delta.decode(&anchor).to_corners();
                        // a wild offset prediction falls back to the bare anchor
                        if [decoded.x1(), decoded.y1(), decoded.x2(), decoded.y2()]
                            .iter()
                            .all(|value| value.is_finite())
                        {
                            decoded
                        } else {
                            anchor
                        }
                    } else {
                        anchor
                    };

                    let bbox = bbox.clip((grid_w - 1) as f64, (grid_h - 1) as f64);
                    if bbox.w() <= 0.0 || bbox.h() <= 0.0 {
                        continue;
                    }
                    candidates.push(ScoredBox { bbox, score });
                }
            }
        }

        Ok(non_max_suppression(
            candidates,
            self.overlap_thresh.raw(),
            self.max_boxes,
        ))
    }
}

/// Greedy score-ordered suppression of overlapping boxes.
pub fn non_max_suppression(
    mut boxes: Vec<ScoredBox>,
    overlap_thresh: f64,
    max_boxes: usize,
) -> Vec<ScoredBox> {
    boxes.sort_by(|lhs, rhs| {
        rhs.score
            .partial_cmp(&lhs.score)
            .unwrap_or(Ordering::Equal)
    });

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();

    for lhs in 0..boxes.len() {
        if suppressed[lhs] {
            continue;
        }
        keep.push(boxes[lhs].clone());
        if keep.len() == max_boxes {
            break;
        }

        for rhs in (lhs + 1)..boxes.len() {
            if suppressed[rhs] {
                continue;
            }
            if boxes[lhs].bbox.iou_with(&boxes[rhs].bbox) > overlap_thresh {
                suppressed[rhs] = true;
            }
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x1: f64, y1: f64, x2: f64, y2: f64, score: f32) -> ScoredBox {
        ScoredBox {
            bbox: Corners::try_new(x1, y1, x2, y2).unwrap(),
            score,
        }
    }

    #[test]
    fn suppression_properties_hold() {
        let boxes = vec![
            scored(0.0, 0.0, 10.0, 10.0, 0.9),
            scored(1.0, 1.0, 11.0, 11.0, 0.8),
            scored(0.0, 0.0, 10.0, 10.0, 0.7),
            scored(20.0, 20.0, 30.0, 30.0, 0.95),
            scored(40.0, 0.0, 50.0, 10.0, 0.5),
        ];

        let kept = non_max_suppression(boxes, 0.7, 300);

        assert!(kept.len() <= 300);
        for window in kept.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for (lhs, rhs) in kept.iter().tuple_combinations() {
            assert!(lhs.bbox.iou_with(&rhs.bbox) <= 0.7);
        }
        // the duplicate of the best box is gone
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn max_boxes_caps_the_output() {
        let boxes: Vec<_> = (0..20)
            .map(|index| {
                let offset = index as f64 * 100.0;
                scored(offset, 0.0, offset + 10.0, 10.0, index as f32)
            })
            .collect();

        let kept = non_max_suppression(boxes, 0.7, 5);
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[0].score, 19.0);
    }

    #[test]
    fn empty_input_is_allowed() {
        assert!(non_max_suppression(Vec::new(), 0.7, 300).is_empty());
    }

    #[test]
    fn decoder_emits_anchors_without_regression() -> Result<()> {
        let class_mapping: IndexMap<String, usize> = [("thing", 0), ("bg", 1)]
            .into_iter()
            .map(|(name, index)| (name.to_owned(), index))
            .collect();
        let config = Config {
            anchor_box_scales: vec![8.0],
            anchor_box_ratios: vec![(1.0, 1.0)],
            rpn_stride: 4,
            class_mapping,
            ..Config::default()
        };
        let decoder = ProposalDecoderInit {
            use_regression: false,
            max_boxes: 10,
            ..Default::default()
        }
        .build()?;

        let scores = Tensor::of_slice(&[0.9f32, 0.1, 0.1, 0.1]).view([1, 1, 2, 2]);
        let deltas = Tensor::zeros(&[1, 4, 2, 2], tch::kind::FLOAT_CPU);
        let proposals = decoder.forward(&config, &scores, &deltas)?;

        assert!(!proposals.is_empty());
        assert!(proposals.len() <= 10);
        assert_eq!(proposals[0].score, 0.9);
        // the best-scored anchor sits at the grid origin
        assert_eq!(proposals[0].bbox.x1(), 0.0);
        assert_eq!(proposals[0].bbox.y1(), 0.0);
        Ok(())
    }
}
