//! Loss functions for the two training stages.

use crate::common::*;

const EPSILON: f64 = 1e-4;

/// Binary cross entropy over the anchors that participate in the loss.
///
/// `pred` is (1, num_anchors, grid_h, grid_w) of objectness probabilities;
/// `target` packs validity flags and labels as
/// (1, grid_h, grid_w, 2 * num_anchors).
pub fn rpn_loss_cls(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let (_batch, num_anchors, _grid_h, _grid_w) = pred.size4()?;
    let pred = pred.permute(&[0, 2, 3, 1]).clamp(EPSILON, 1.0 - EPSILON);
    let valid = target.narrow(3, 0, num_anchors);
    let labels = target.narrow(3, num_anchors, num_anchors);

    let cross_entropy: Tensor =
        -(&labels * pred.log() + (1.0 - &labels) * (1.0 - &pred).log());
    Ok((&valid * cross_entropy).sum(Kind::Float) / (valid.sum(Kind::Float) + EPSILON))
}

/// Smooth L1 over the offsets of positive anchors.
///
/// `pred` is (1, 4 * num_anchors, grid_h, grid_w); `target` packs masks and
/// offsets as (1, grid_h, grid_w, 8 * num_anchors).
pub fn rpn_loss_regr(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let (_batch, channels, _grid_h, _grid_w) = pred.size4()?;
    let pred = pred.permute(&[0, 2, 3, 1]);
    let mask = target.narrow(3, 0, channels);
    let offsets = target.narrow(3, channels, channels);
    Ok(masked_smooth_l1(&pred, &offsets, &mask))
}

/// Mean categorical cross entropy over the sampled proposals.
///
/// `pred` is (num_rois, num_classes) of class probabilities; `target` is
/// the matching one-hot labels.
pub fn class_loss_cls(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let (num_rois, _num_classes) = pred.size2()?;
    let pred = pred.clamp(EPSILON, 1.0 - EPSILON);
    Ok(-(target * pred.log()).sum(Kind::Float) / num_rois as f64)
}

/// Smooth L1 over the per-class offsets of foreground proposals.
///
/// `pred` is (num_rois, 4 * foreground classes); `target` packs masks and
/// offsets as (num_rois, 8 * foreground classes).
pub fn class_loss_regr(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let (_num_rois, channels) = pred.size2()?;
    let mask = target.narrow(1, 0, channels);
    let offsets = target.narrow(1, channels, channels);
    Ok(masked_smooth_l1(pred, &offsets, &mask))
}

/// Fraction of sampled proposals whose predicted class matches the label.
pub fn class_accuracy(pred: &Tensor, target: &Tensor) -> f64 {
    let correct = (pred.argmax(-1, false) - target.argmax(-1, false))
        .eq(0)
        .to_kind(Kind::Float)
        .mean(Kind::Float);
    f64::from(&correct)
}

fn masked_smooth_l1(pred: &Tensor, offsets: &Tensor, mask: &Tensor) -> Tensor {
    let diff = offsets - pred;
    let abs_diff = diff.abs();
    let is_small = abs_diff.le(1.0).to_kind(Kind::Float);
    let loss = &is_small * 0.5 * &diff * &diff + (1.0 - &is_small) * (&abs_diff - 0.5);
    (mask * loss).sum(Kind::Float) / (mask.sum(Kind::Float) + EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfect_rpn_predictions_cost_nothing() -> Result<()> {
        // two anchors on a 1x1 grid, first valid positive, second invalid
        let pred = Tensor::of_slice(&[1.0f32, 0.0]).view([1, 2, 1, 1]);
        let target = Tensor::of_slice(&[1.0f32, 0.0, 1.0, 1.0]).view([1, 1, 1, 2]);

        let loss = f64::from(&rpn_loss_cls(&pred, &target)?);
        assert_abs_diff_eq!(loss, 0.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn wrong_rpn_predictions_are_penalized() -> Result<()> {
        let pred = Tensor::of_slice(&[0.0f32, 0.0]).view([1, 2, 1, 1]);
        let target = Tensor::of_slice(&[1.0f32, 0.0, 1.0, 1.0]).view([1, 1, 1, 2]);

        let loss = f64::from(&rpn_loss_cls(&pred, &target)?);
        assert!(loss > 1.0);
        Ok(())
    }

    #[test]
    fn regression_loss_ignores_unmasked_offsets() -> Result<()> {
        // one anchor on a 1x1 grid with a zeroed mask
        let pred = Tensor::of_slice(&[5.0f32, 5.0, 5.0, 5.0]).view([1, 4, 1, 1]);
        let target = Tensor::zeros(&[1, 1, 1, 8], tch::kind::FLOAT_CPU);

        let loss = f64::from(&rpn_loss_regr(&pred, &target)?);
        assert_eq!(loss, 0.0);
        Ok(())
    }

    #[test]
    fn regression_loss_is_smooth_l1() -> Result<()> {
        let pred = Tensor::of_slice(&[0.5f32, 0.0, 0.0, 0.0]).view([1, 4, 1, 1]);
        let target = Tensor::of_slice(&[1.0f32, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0])
            .view([1, 1, 1, 8]);

        // |diff| = 0.5 on one offset, quadratic branch applies
        let loss = f64::from(&rpn_loss_regr(&pred, &target)?);
        assert_abs_diff_eq!(loss, 0.5 * 0.25 / 4.0, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn accuracy_counts_matching_rows() -> Result<()> {
        let pred = Tensor::of_slice(&[0.9f32, 0.1, 0.2, 0.8]).view([2, 2]);
        let target = Tensor::of_slice(&[1.0f32, 0.0, 1.0, 0.0]).view([2, 2]);

        assert_eq!(class_accuracy(&pred, &target), 0.5);
        Ok(())
    }

    #[test]
    fn confident_correct_classification_costs_little() -> Result<()> {
        let pred = Tensor::of_slice(&[0.99f32, 0.01]).view([1, 2]);
        let target = Tensor::of_slice(&[1.0f32, 0.0]).view([1, 2]);

        let loss = f64::from(&class_loss_cls(&pred, &target)?);
        assert!(loss < 0.05);
        Ok(())
    }
}
