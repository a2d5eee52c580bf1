//! Dense anchor training targets for the region proposal network.

use crate::{common::*, config::Config, label::LabeledBox};

/// Per-image training targets for the region proposal network.
#[derive(Debug)]
pub struct RpnTargets {
    /// Anchor validity and objectness labels, shaped
    /// (1, grid_h, grid_w, 2 * num_anchors).
    pub cls: Tensor,
    /// Positive-anchor masks and scaled box offsets, shaped
    /// (1, grid_h, grid_w, 8 * num_anchors).
    pub regr: Tensor,
}

#[derive(Debug)]
struct BestMatch {
    iou: f64,
    anchor: Option<(usize, BoxDelta<f64>)>,
    num_positives: usize,
}

/// Label every anchor on the feature grid against the ground-truth boxes.
///
/// Anchors crossing the image boundary are excluded from the loss. An
/// anchor is positive when its overlap with some ground-truth box reaches
/// `rpn_max_overlap`, or when it is the best-matching anchor of a box that
/// no anchor reaches the threshold for; it is negative when its best
/// overlap stays below `rpn_min_overlap`, and neutral otherwise. Returns
/// `None` when the image yields no anchor fully inside its bounds.
pub fn rpn_targets(
    config: &Config,
    resized_w: i64,
    resized_h: i64,
    grid_w: i64,
    grid_h: i64,
    boxes: &[LabeledBox],
) -> Result<Option<RpnTargets>> {
    ensure!(grid_w > 0 && grid_h > 0, "feature grid must be non-empty");
    let num_anchors = config.num_anchors();
    let downscale = config.rpn_stride as f64;
    let min_overlap = config.rpn_min_overlap.raw();
    let max_overlap = config.rpn_max_overlap.raw();

    let num_cells = (grid_h * grid_w) as usize;
    let mut valid = vec![0f32; num_cells * num_anchors];
    let mut positive = vec![0f32; num_cells * num_anchors];
    let mut regr = vec![0f32; num_cells * num_anchors * 4];
    let mut num_inside = 0usize;

    let mut best_matches: Vec<_> = boxes
        .iter()
        .map(|_| BestMatch {
            iou: 0.0,
            anchor: None,
            num_positives: 0,
        })
        .collect();

    for (anchor_index, (anchor_w, anchor_h)) in config.anchor_shapes().enumerate() {
        for x in 0..grid_w {
            let x1 = downscale * (x as f64 + 0.5) - anchor_w / 2.0;
            let x2 = x1 + anchor_w;
            if x1 < 0.0 || x2 > resized_w as f64 {
                continue;
            }
            for y in 0..grid_h {
                let y1 = downscale * (y as f64 + 0.5) - anchor_h / 2.0;
                let y2 = y1 + anchor_h;
                if y1 < 0.0 || y2 > resized_h as f64 {
                    continue;
                }

                let anchor = Corners::try_new(x1, y1, x2, y2)?;
                let flat = ((y * grid_w + x) as usize) * num_anchors + anchor_index;
                num_inside += 1;

                let mut is_positive = false;
                let mut is_neutral = false;
                let mut best_iou_for_anchor = 0.0;
                let mut best_delta = None;
                for (gt, best) in izip!(boxes, &mut best_matches) {
                    let iou = anchor.iou_with(&gt.bbox);
                    if iou > best.iou {
                        best.iou = iou;
                        best.anchor = Some((flat, BoxDelta::encode(&anchor, &gt.bbox)?));
                    }
                    if iou >= max_overlap {
                        is_positive = true;
                        best.num_positives += 1;
                        if iou > best_iou_for_anchor {
                            best_iou_for_anchor = iou;
                            best_delta = Some(BoxDelta::encode(&anchor, &gt.bbox)?);
                        }
                    } else if iou >= min_overlap {
                        is_neutral = true;
                    }
                }

                if is_positive {
                    valid[flat] = 1.0;
                    positive[flat] = 1.0;
                    if let Some(delta) = best_delta {
                        write_delta(&mut regr, flat, &delta);
                    }
                } else if is_neutral {
                    // neither objectness nor regression loss applies
                    valid[flat] = 0.0;
                } else {
                    valid[flat] = 1.0;
                }
            }
        }
    }

    if num_inside == 0 {
        return Ok(None);
    }

    // every ground-truth box keeps at least one positive anchor
    for best in &best_matches {
        if best.num_positives == 0 {
            if let Some((flat, delta)) = best.anchor {
                valid[flat] = 1.0;
                positive[flat] = 1.0;
                write_delta(&mut regr, flat, &delta);
            }
        }
    }

    let anchors = num_anchors as i64;
    let valid_t = Tensor::of_slice(&valid).view([1, grid_h, grid_w, anchors]);
    let positive_t = Tensor::of_slice(&positive).view([1, grid_h, grid_w, anchors]);
    let cls = Tensor::cat(&[&valid_t, &positive_t], 3);

    // each positive flag gates the four offsets of its anchor
    let mask: Vec<f32> = positive.iter().flat_map(|&flag| [flag; 4]).collect();
    let mask_t = Tensor::of_slice(&mask).view([1, grid_h, grid_w, 4 * anchors]);
    let regr_t =
        Tensor::of_slice(&regr).view([1, grid_h, grid_w, 4 * anchors]) * config.std_scaling;
    let regr = Tensor::cat(&[&mask_t, &regr_t], 3);

    Ok(Some(RpnTargets { cls, regr }))
}

fn write_delta(regr: &mut [f32], flat: usize, delta: &BoxDelta<f64>) {
    let base = flat * 4;
    regr[base] = delta.dx as f32;
    regr[base + 1] = delta.dy as f32;
    regr[base + 2] = delta.dw as f32;
    regr[base + 3] = delta.dh as f32;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let class_mapping: IndexMap<String, usize> = [("thing", 0), ("bg", 1)]
            .into_iter()
            .map(|(name, index)| (name.to_owned(), index))
            .collect();
        Config {
            anchor_box_scales: vec![8.0],
            anchor_box_ratios: vec![(1.0, 1.0)],
            rpn_stride: 4,
            class_mapping,
            ..Config::default()
        }
    }

    fn labeled(x1: f64, y1: f64, x2: f64, y2: f64) -> LabeledBox {
        LabeledBox {
            class_index: 0,
            bbox: Corners::try_new(x1, y1, x2, y2).unwrap(),
        }
    }

    fn channel_sum(tensor: &Tensor, offset: i64, len: i64) -> f64 {
        f64::from(
            &tensor
                .narrow(3, offset, len)
                .contiguous()
                .sum(Kind::Float),
        )
    }

    #[test]
    fn every_ground_truth_box_gets_a_positive_anchor() -> Result<()> {
        let config = test_config();
        // no anchor reaches the 0.7 threshold against this box
        let boxes = vec![labeled(0.0, 0.0, 6.0, 6.0)];
        let targets = rpn_targets(&config, 16, 16, 4, 4, &boxes)?.unwrap();

        let num_positives = channel_sum(&targets.cls, 1, 1);
        assert!(num_positives >= 1.0);

        // the regression mask gates four offsets per positive anchor
        let mask_sum = channel_sum(&targets.regr, 0, 4);
        assert_eq!(mask_sum, num_positives * 4.0);
        Ok(())
    }

    #[test]
    fn full_image_box_is_matched() -> Result<()> {
        let config = test_config();
        let boxes = vec![labeled(0.0, 0.0, 16.0, 16.0)];
        let targets = rpn_targets(&config, 16, 16, 4, 4, &boxes)?.unwrap();
        assert!(channel_sum(&targets.cls, 1, 1) >= 1.0);
        Ok(())
    }

    #[test]
    fn boundary_anchors_are_invalid() -> Result<()> {
        let config = test_config();
        let boxes = vec![labeled(0.0, 0.0, 6.0, 6.0)];
        let targets = rpn_targets(&config, 16, 16, 4, 4, &boxes)?.unwrap();

        // only the four centermost anchors fit inside a 16x16 image
        let valid_sum = channel_sum(&targets.cls, 0, 1);
        assert_eq!(valid_sum, 4.0);
        Ok(())
    }

    #[test]
    fn degenerate_image_yields_no_targets() -> Result<()> {
        let config = test_config();
        let boxes = vec![labeled(0.0, 0.0, 2.0, 2.0)];
        assert!(rpn_targets(&config, 2, 2, 1, 1, &boxes)?.is_none());
        Ok(())
    }

    #[test]
    fn targets_are_deterministic() -> Result<()> {
        let config = test_config();
        let boxes = vec![labeled(1.0, 2.0, 9.0, 11.0), labeled(4.0, 4.0, 12.0, 12.0)];
        let first = rpn_targets(&config, 16, 16, 4, 4, &boxes)?.unwrap();
        let second = rpn_targets(&config, 16, 16, 4, 4, &boxes)?.unwrap();

        let diff = f64::from(&(&first.cls - &second.cls).abs().sum(Kind::Float))
            + f64::from(&(&first.regr - &second.regr).abs().sum(Kind::Float));
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
