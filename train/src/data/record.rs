use crate::common::*;

/// Dataset split tag assigned by the annotation parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Trainval,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trainval => "trainval",
            Self::Test => "test",
        }
    }
}

impl std::str::FromStr for Split {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text {
            "trainval" | "train" => Ok(Self::Trainval),
            "test" | "val" => Ok(Self::Test),
            _ => bail!("unknown split tag '{}'", text),
        }
    }
}

/// One ground-truth annotation in original-image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GtBox {
    pub class_name: String,
    pub bbox: Corners<f64>,
}

/// One annotated image as produced by the annotation parsers. Immutable
/// once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub split: Split,
    pub boxes: Vec<GtBox>,
}

/// A parsed dataset with per-class statistics.
#[derive(Debug)]
pub struct Dataset {
    pub records: Vec<ImageRecord>,
    pub class_counts: IndexMap<String, usize>,
}
