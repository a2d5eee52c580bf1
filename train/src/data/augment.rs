use crate::common::*;

/// Randomly flip or quarter-rotate one image tensor and its boxes.
///
/// Applied before target generation so the anchor labels always describe
/// the image actually fed to the network.
pub fn augment_sample<R>(
    config: &Config,
    mut image: Tensor,
    mut boxes: Vec<LabeledBox>,
    rng: &mut R,
) -> Result<(Tensor, Vec<LabeledBox>)>
where
    R: Rng,
{
    let (_channels, height, width) = image.size3()?;

    if config.use_horizontal_flips && rng.gen_bool(0.5) {
        image = image.flip(&[2]);
        boxes = flip_boxes_x(&boxes, width as f64)?;
    }

    if config.use_vertical_flips && rng.gen_bool(0.5) {
        image = image.flip(&[1]);
        boxes = flip_boxes_y(&boxes, height as f64)?;
    }

    if config.rot_90 {
        let turns = rng.gen_range(0..4);
        for _ in 0..turns {
            let (rotated, rotated_boxes) = rotate_quarter(image, boxes)?;
            image = rotated;
            boxes = rotated_boxes;
        }
    }

    Ok((image, boxes))
}

fn flip_boxes_x(boxes: &[LabeledBox], width: f64) -> Result<Vec<LabeledBox>> {
    boxes
        .iter()
        .map(|labeled| {
            let bbox = &labeled.bbox;
            Ok(LabeledBox {
                class_index: labeled.class_index,
                bbox: Corners::try_new(
                    width - bbox.x2(),
                    bbox.y1(),
                    width - bbox.x1(),
                    bbox.y2(),
                )?,
            })
        })
        .try_collect()
}

fn flip_boxes_y(boxes: &[LabeledBox], height: f64) -> Result<Vec<LabeledBox>> {
    boxes
        .iter()
        .map(|labeled| {
            let bbox = &labeled.bbox;
            Ok(LabeledBox {
                class_index: labeled.class_index,
                bbox: Corners::try_new(
                    bbox.x1(),
                    height - bbox.y2(),
                    bbox.x2(),
                    height - bbox.y1(),
                )?,
            })
        })
        .try_collect()
}

/// One counter-clockwise quarter turn. A pixel at (x, y) moves to
/// (y, width - x) and the image dimensions swap.
fn rotate_quarter(image: Tensor, boxes: Vec<LabeledBox>) -> Result<(Tensor, Vec<LabeledBox>)> {
    let (_channels, _height, width) = image.size3()?;
    let width = width as f64;

    let rotated = image.rot90(1, &[1, 2]);
    let rotated_boxes: Vec<_> = boxes
        .iter()
        .map(|labeled| {
            let bbox = &labeled.bbox;
            Ok(LabeledBox {
                class_index: labeled.class_index,
                bbox: Corners::try_new(
                    bbox.y1(),
                    width - bbox.x2(),
                    bbox.y2(),
                    width - bbox.x1(),
                )?,
            })
        })
        .try_collect()?;

    Ok((rotated, rotated_boxes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(x1: f64, y1: f64, x2: f64, y2: f64) -> LabeledBox {
        LabeledBox {
            class_index: 0,
            bbox: Corners::try_new(x1, y1, x2, y2).unwrap(),
        }
    }

    #[test]
    fn horizontal_flip_mirrors_boxes() -> Result<()> {
        let boxes = flip_boxes_x(&[labeled(1.0, 2.0, 4.0, 6.0)], 10.0)?;
        assert_eq!(boxes[0].bbox, Corners::try_new(6.0, 2.0, 9.0, 6.0)?);
        Ok(())
    }

    #[test]
    fn four_quarter_turns_are_the_identity() -> Result<()> {
        let image = Tensor::rand(&[3, 6, 8], tch::kind::FLOAT_CPU);
        let boxes = vec![labeled(1.0, 2.0, 5.0, 4.0)];

        let mut rotated = image.shallow_clone();
        let mut rotated_boxes = boxes.clone();
        for _ in 0..4 {
            let (next_image, next_boxes) = rotate_quarter(rotated, rotated_boxes)?;
            rotated = next_image;
            rotated_boxes = next_boxes;
        }

        assert_eq!(rotated.size(), image.size());
        assert_eq!(rotated_boxes, boxes);
        let diff = f64::from(&(&rotated - &image).abs().sum(Kind::Float));
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
