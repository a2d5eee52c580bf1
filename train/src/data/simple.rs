use super::{Dataset, GtBox, ImageRecord, Split};
use crate::common::*;
use serde::Deserialize;

/// One `path,x1,y1,x2,y2,class[,split]` annotation row. The split column
/// is optional and defaults to trainval.
#[derive(Debug, Deserialize)]
struct Row {
    path: PathBuf,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    class_name: String,
    split: Option<String>,
}

/// Load the single-file annotation list format.
pub fn load_simple(list_file: &Path) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(list_file)
        .with_context(|| format!("failed to open annotation list '{}'", list_file.display()))?;

    let mut by_path: IndexMap<PathBuf, ImageRecord> = IndexMap::new();
    let mut class_counts: IndexMap<String, usize> = IndexMap::new();

    for (line, row) in reader.deserialize().enumerate() {
        let Row {
            path,
            x1,
            y1,
            x2,
            y2,
            class_name,
            split,
        } = row.with_context(|| {
            format!("malformed row {} in '{}'", line + 1, list_file.display())
        })?;

        let split = match split {
            Some(tag) => tag.parse()?,
            None => Split::Trainval,
        };

        if !by_path.contains_key(&path) {
            let (width, height) = image_size(&path)?;
            by_path.insert(
                path.clone(),
                ImageRecord {
                    path: path.clone(),
                    width,
                    height,
                    split,
                    boxes: Vec::new(),
                },
            );
        }

        *class_counts.entry(class_name.clone()).or_insert(0) += 1;
        let record = match by_path.get_mut(&path) {
            Some(record) => record,
            None => unreachable!(),
        };
        record.boxes.push(GtBox {
            class_name,
            bbox: Corners::try_new(x1, y1, x2, y2)
                .with_context(|| format!("invalid box on row {}", line + 1))?,
        });
    }

    ensure!(
        !by_path.is_empty(),
        "no annotations found in '{}'",
        list_file.display()
    );

    Ok(Dataset {
        records: by_path.into_iter().map(|(_path, record)| record).collect(),
        class_counts,
    })
}

fn image_size(path: &Path) -> Result<(u32, u32)> {
    let size = imagesize::size(path)
        .map_err(|err| format_err!("failed to read image size of '{}': {}", path.display(), err))?;
    Ok((size.width as u32, size.height as u32))
}
