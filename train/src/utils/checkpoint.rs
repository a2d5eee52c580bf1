use crate::common::*;

/// Persist the combined model weights, overwriting any previous file.
pub fn save_checkpoint(vs: &nn::VarStore, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    vs.save(path)
        .with_context(|| format!("failed to save weights to '{}'", path.display()))
}

/// Seed the model from pretrained weights when available.
///
/// Only variables whose names match are loaded, so weights exported from a
/// related architecture can seed this one. A failed load is not fatal:
/// training proceeds from random initialization.
pub fn try_load_pretrained(vs: &mut nn::VarStore, weights: Option<&Path>) {
    match weights {
        None => info!("no pretrained weights specified, training from scratch"),
        Some(path) => match vs.load_partial(path) {
            Ok(_) => info!("loaded pretrained weights from '{}'", path.display()),
            Err(err) => warn!(
                "could not load pretrained weights from '{}': {}; compatible weights can be \
                 obtained from https://download.pytorch.org/models/resnet50-0676ba61.pth",
                path.display(),
                err
            ),
        },
    }
}
