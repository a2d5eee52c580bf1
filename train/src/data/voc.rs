use super::{Dataset, GtBox, ImageRecord, Split};
use crate::common::*;
use std::collections::HashSet;

/// Load a PASCAL VOC directory tree.
///
/// Records listed in `ImageSets/Main/test.txt` are tagged as the test
/// split; everything else belongs to trainval.
pub fn load_voc(dataset_dir: &Path) -> Result<Dataset> {
    let samples = voc_dataset::load(dataset_dir).with_context(|| {
        format!(
            "failed to load PASCAL VOC dataset from '{}'",
            dataset_dir.display()
        )
    })?;
    let test_set = load_image_set(dataset_dir, "test")?;

    let mut class_counts: IndexMap<String, usize> = IndexMap::new();
    let records: Vec<_> = samples
        .iter()
        .map(|sample| -> Result<_> {
            let voc_dataset::Sample {
                image_path,
                annotation,
            } = sample;

            let voc_dataset::Size { width, height, .. } = annotation.size;
            let stem = image_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    format_err!("invalid image file name '{}'", image_path.display())
                })?;
            let split = if test_set.contains(stem) {
                Split::Test
            } else {
                Split::Trainval
            };

            let boxes: Vec<_> = annotation
                .object
                .iter()
                .map(|object| -> Result<_> {
                    let voc_dataset::BndBox {
                        xmin,
                        ymin,
                        xmax,
                        ymax,
                    } = object.bndbox;
                    *class_counts.entry(object.name.clone()).or_insert(0) += 1;
                    Ok(GtBox {
                        class_name: object.name.clone(),
                        bbox: Corners::try_new(xmin as f64, ymin as f64, xmax as f64, ymax as f64)
                            .with_context(|| {
                                format!("invalid box for '{}'", image_path.display())
                            })?,
                    })
                })
                .try_collect()?;

            Ok(ImageRecord {
                path: image_path.clone(),
                width: width as u32,
                height: height as u32,
                split,
                boxes,
            })
        })
        .try_collect()?;

    Ok(Dataset {
        records,
        class_counts,
    })
}

fn load_image_set(dataset_dir: &Path, name: &str) -> Result<HashSet<String>> {
    let path = dataset_dir
        .join("ImageSets")
        .join("Main")
        .join(format!("{}.txt", name));
    if !path.is_file() {
        return Ok(HashSet::new());
    }

    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read image set '{}'", path.display()))?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(ToOwned::to_owned)
        .collect())
}
