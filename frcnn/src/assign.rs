//! Matching decoded proposals against ground truth for the classifier head.

use crate::{common::*, config::Config, label::LabeledBox, proposal::ScoredBox};

/// Classifier-head training targets for the proposals that survived
/// matching, one row per retained proposal.
#[derive(Debug)]
pub struct RoiAssignment {
    /// Retained proposals as (x, y, w, h) rows on the feature grid,
    /// shaped (num_retained, 4).
    pub rois: Tensor,
    /// One-hot class labels including background,
    /// shaped (num_retained, num_classes).
    pub labels: Tensor,
    /// Per-class regression masks and offsets,
    /// shaped (num_retained, 8 * foreground classes).
    pub regr: Tensor,
    /// Row indices labeled with a foreground class.
    pub positives: Vec<i64>,
    /// Row indices labeled as background.
    pub negatives: Vec<i64>,
}

/// Label each proposal with a class (possibly background) and a regression
/// target by its best overlap against the ground-truth boxes.
///
/// Proposals whose best overlap stays below `classifier_min_overlap` are
/// dropped. Returns `None` when no proposal survives.
pub fn assign_rois(
    config: &Config,
    rois: &[ScoredBox],
    boxes: &[LabeledBox],
) -> Result<Option<RoiAssignment>> {
    let num_classes = config.num_classes();
    let num_foreground = num_classes - 1;
    let background = config.background_index();
    let downscale = config.rpn_stride as f64;
    let min_overlap = config.classifier_min_overlap.raw();
    let max_overlap = config.classifier_max_overlap.raw();
    let [sx, sy, sw, sh] = config.classifier_regr_std;

    // ground truth on the feature grid, rounded like the original
    // annotations it was derived from
    let gt_grid: Vec<(usize, Corners<f64>)> = boxes
        .iter()
        .filter_map(|gt| {
            let bbox = gt.bbox.scale(1.0 / downscale, 1.0 / downscale);
            let rounded = Corners::try_new(
                bbox.x1().round(),
                bbox.y1().round(),
                bbox.x2().round(),
                bbox.y2().round(),
            )
            .ok()?;
            if rounded.w() <= 0.0 || rounded.h() <= 0.0 {
                warn!("ground-truth box collapses on the feature grid, ignoring it");
                return None;
            }
            Some((gt.class_index, rounded))
        })
        .collect();

    let mut roi_rows = Vec::new();
    let mut label_rows = Vec::new();
    let mut mask_rows = Vec::new();
    let mut coord_rows = Vec::new();
    let mut positives = Vec::new();
    let mut negatives = Vec::new();

    for roi in rois {
        let bbox = &roi.bbox;
        let rounded = Corners::try_new(
            bbox.x1().round(),
            bbox.y1().round(),
            bbox.x2().round(),
            bbox.y2().round(),
        )?;

        let mut best_iou = 0.0;
        let mut best_gt = None;
        for (class_index, gt) in &gt_grid {
            let iou = rounded.iou_with(gt);
            if iou > best_iou {
                best_iou = iou;
                best_gt = Some((*class_index, gt));
            }
        }

        if best_iou < min_overlap {
            continue;
        }

        let row = roi_rows.len() as i64;
        roi_rows.push([
            rounded.x1() as f32,
            rounded.y1() as f32,
            rounded.w() as f32,
            rounded.h() as f32,
        ]);

        let mut label = vec![0f32; num_classes];
        let mut mask = vec![0f32; 4 * num_foreground];
        let mut coords = vec![0f32; 4 * num_foreground];

        match best_gt {
            Some((class_index, gt)) if best_iou >= max_overlap => {
                label[class_index] = 1.0;
                positives.push(row);

                let delta = BoxDelta::encode(&rounded, gt)?;
                let base = 4 * class_index;
                mask[base..base + 4].fill(1.0);
                coords[base] = (delta.dx * sx) as f32;
                coords[base + 1] = (delta.dy * sy) as f32;
                coords[base + 2] = (delta.dw * sw) as f32;
                coords[base + 3] = (delta.dh * sh) as f32;
            }
            _ => {
                label[background] = 1.0;
                negatives.push(row);
            }
        }

        label_rows.push(label);
        mask_rows.push(mask);
        coord_rows.push(coords);
    }

    if roi_rows.is_empty() {
        return Ok(None);
    }

    let num_retained = roi_rows.len() as i64;
    let rois = Tensor::of_slice(&roi_rows.concat()).view([num_retained, 4]);
    let labels =
        Tensor::of_slice(&label_rows.concat()).view([num_retained, num_classes as i64]);
    let masks =
        Tensor::of_slice(&mask_rows.concat()).view([num_retained, 4 * num_foreground as i64]);
    let coords =
        Tensor::of_slice(&coord_rows.concat()).view([num_retained, 4 * num_foreground as i64]);
    let regr = Tensor::cat(&[&masks, &coords], 1);

    Ok(Some(RoiAssignment {
        rois,
        labels,
        regr,
        positives,
        negatives,
    }))
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
            rpn_stride: 4,
            class_mapping,
            ..Config::default()
        }
    }

    fn scored(x1: f64, y1: f64, x2: f64, y2: f64) -> ScoredBox {
        ScoredBox {
            bbox: Corners::try_new(x1, y1, x2, y2).unwrap(),
            score: 1.0,
        }
    }

    #[test]
    fn matching_proposal_becomes_foreground() -> Result<()> {
        let config = test_config();
        // the full image on a 4x4 grid
        let boxes = vec![LabeledBox {
            class_index: 0,
            bbox: Corners::try_new(0.0, 0.0, 16.0, 16.0)?,
        }];
        let rois = vec![scored(0.0, 0.0, 4.0, 4.0)];

        let assignment = assign_rois(&config, &rois, &boxes)?.unwrap();
        assert_eq!(assignment.positives, vec![0]);
        assert!(assignment.negatives.is_empty());

        let labels = Vec::<f32>::from(&assignment.labels.view([-1]));
        assert_eq!(labels, vec![1.0, 0.0]);

        // the regression mask covers the matched class slot
        let regr = Vec::<f32>::from(&assignment.regr.view([-1]));
        assert_eq!(&regr[0..4], &[1.0, 1.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn weak_overlap_becomes_background() -> Result<()> {
        let config = test_config();
        let boxes = vec![LabeledBox {
            class_index: 0,
            bbox: Corners::try_new(0.0, 0.0, 16.0, 16.0)?,
        }];
        // a quarter cell against the full grid lands between the thresholds
        let rois = vec![scored(0.0, 0.0, 2.0, 2.0)];

        let assignment = assign_rois(&config, &rois, &boxes)?.unwrap();
        assert!(assignment.positives.is_empty());
        assert_eq!(assignment.negatives, vec![0]);

        let labels = Vec::<f32>::from(&assignment.labels.view([-1]));
        assert_eq!(labels, vec![0.0, 1.0]);

        let regr = Vec::<f32>::from(&assignment.regr.view([-1]));
        assert!(regr.iter().all(|&value| value == 0.0));
        Ok(())
    }

    #[test]
    fn no_overlap_yields_no_samples() -> Result<()> {
        let config = test_config();
        let boxes = vec![LabeledBox {
            class_index: 0,
            bbox: Corners::try_new(0.0, 0.0, 8.0, 8.0)?,
        }];
        let rois = vec![scored(100.0, 100.0, 104.0, 104.0)];

        assert!(assign_rois(&config, &rois, &boxes)?.is_none());
        Ok(())
    }
}
