//! Positive/negative balancing of classifier training samples.

use crate::common::*;

/// Select which labeled proposal rows feed one classifier update.
///
/// Up to `num_rois / 2` positives are taken (all of them when fewer are
/// available) and the remainder is filled with negatives, without
/// replacement when enough distinct negatives exist and with replacement
/// otherwise. The fallback keeps images with very few background
/// proposals usable.
pub fn sample_rois<R>(
    positives: &[i64],
    negatives: &[i64],
    num_rois: usize,
    rng: &mut R,
) -> Result<Vec<i64>>
where
    R: Rng,
{
    ensure!(num_rois > 0, "num_rois must be positive");
    ensure!(
        !positives.is_empty() || !negatives.is_empty(),
        "at least one labeled sample is required"
    );

    if num_rois == 1 {
        // a single-sample batch picks its side by fair coin first
        let preferred = if rng.gen_range(0..2) == 0 {
            negatives
        } else {
            positives
        };
        let pool = if preferred.is_empty() {
            if positives.is_empty() {
                negatives
            } else {
                positives
            }
        } else {
            preferred
        };
        return Ok(vec![pool[rng.gen_range(0..pool.len())]]);
    }

    let half = num_rois / 2;
    let mut selected: Vec<i64> = if positives.len() < half {
        positives.to_vec()
    } else {
        rand::seq::index::sample(rng, positives.len(), half)
            .into_iter()
            .map(|index| positives[index])
            .collect()
    };

    let needed = num_rois - selected.len();
    ensure!(
        !negatives.is_empty() || needed == 0,
        "no background samples available to fill the batch"
    );

    if negatives.len() >= needed {
        selected.extend(
            rand::seq::index::sample(rng, negatives.len(), needed)
                .into_iter()
                .map(|index| negatives[index]),
        );
    } else {
        // not enough distinct backgrounds, fall back to replacement
        selected.extend((0..needed).map(|_| negatives[rng.gen_range(0..negatives.len())]));
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(range: std::ops::Range<i64>) -> Vec<i64> {
        range.collect()
    }

    #[test]
    fn few_positives_are_all_kept() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let positives = indices(0..5);
        let negatives = indices(100..150);

        let selected = sample_rois(&positives, &negatives, 32, &mut rng)?;
        assert_eq!(selected.len(), 32);

        let num_positives = selected.iter().filter(|&&index| index < 100).count();
        assert_eq!(num_positives, 5);

        // negatives were drawn without replacement
        let negatives_drawn: Vec<_> = selected.iter().filter(|&&index| index >= 100).collect();
        assert_eq!(negatives_drawn.len(), 27);
        assert_eq!(negatives_drawn.iter().unique().count(), 27);
        Ok(())
    }

    #[test]
    fn abundant_positives_are_capped_at_half() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let positives = indices(0..50);
        let negatives = indices(100..150);

        let selected = sample_rois(&positives, &negatives, 32, &mut rng)?;
        assert_eq!(selected.len(), 32);
        assert_eq!(selected.iter().filter(|&&index| index < 100).count(), 16);
        Ok(())
    }

    #[test]
    fn scarce_negatives_repeat() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let positives = indices(0..5);
        let negatives = indices(100..102);

        let selected = sample_rois(&positives, &negatives, 32, &mut rng)?;
        assert_eq!(selected.len(), 32);
        // 27 slots filled from 2 distinct indices
        assert!(selected.iter().filter(|&&index| index >= 100).count() == 27);
        Ok(())
    }

    #[test]
    fn single_roi_batches_pick_one_side() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let positives = indices(0..3);
        let negatives = indices(100..103);

        for _ in 0..20 {
            let selected = sample_rois(&positives, &negatives, 1, &mut rng)?;
            assert_eq!(selected.len(), 1);
        }

        // with one side empty the other is used regardless of the coin
        for _ in 0..20 {
            let selected = sample_rois(&positives, &[], 1, &mut rng)?;
            assert!(selected[0] < 100);
        }
        Ok(())
    }

    #[test]
    fn empty_input_is_an_error() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sample_rois(&[], &[], 4, &mut rng).is_err());
        assert!(sample_rois(&indices(0..3), &[], 4, &mut rng).is_err());
    }
}
