//! Annotation parsing and sample preprocessing.

mod augment;
mod record;
mod simple;
mod stream;
mod voc;

pub use augment::*;
pub use record::*;
pub use simple::*;
pub use stream::*;
pub use voc::*;

use crate::common::*;

/// Supported annotation file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationFormat {
    PascalVoc,
    Simple,
}

impl std::str::FromStr for AnnotationFormat {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text {
            "pascal_voc" => Ok(Self::PascalVoc),
            "simple" => Ok(Self::Simple),
            _ => bail!(
                "annotation parser must be one of 'pascal_voc' or 'simple', got '{}'",
                text
            ),
        }
    }
}

/// Load all image records with the selected parser.
pub fn load_dataset(format: AnnotationFormat, path: &Path) -> Result<Dataset> {
    match format {
        AnnotationFormat::PascalVoc => load_voc(path),
        AnnotationFormat::Simple => load_simple(path),
    }
}
