//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use bbox::{BoxDelta, CenterSize, Corners, Rect, RectFloat};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools};
pub use log::warn;
pub use noisy_float::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};
pub use tch::{nn, nn::ModuleT, Device, Kind, Tensor};
