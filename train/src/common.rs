//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use bbox::{Corners, Rect, RectFloat};
pub use frcnn::{
    anchors::{self, RpnTargets},
    assign::assign_rois,
    config::Config,
    label::LabeledBox,
    loss,
    model::{self, FasterRcnn},
    proposal::{ProposalDecoder, ProposalDecoderInit},
    sample::sample_rois,
};
pub use indexmap::IndexMap;
pub use itertools::Itertools;
pub use log::{error, info, warn};
pub use rand::{prelude::*, rngs::StdRng};
pub use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
pub use structopt::StructOpt;
pub use tch::{nn, nn::OptimizerConfig as _, Device, Kind, Tensor};
