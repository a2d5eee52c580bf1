//! Epoch metric reporting.

use crate::{common::*, trainer::StreamTag};

/// Report one epoch's mean metrics for one stream.
///
/// Verbose mode logs a narrative block; otherwise a single comma-delimited
/// line goes to standard output for machine consumption.
pub fn epoch_report(
    config: &Config,
    tag: StreamTag,
    epoch: usize,
    means: &[f64; 5],
    mean_overlap: f64,
    elapsed: f64,
) {
    let [rpn_cls, rpn_regr, class_cls, class_regr, class_acc] = *means;

    if config.verbose {
        if tag == StreamTag::Train {
            info!("epoch {}/{}:", epoch + 1, config.num_epochs);
        }
        info!(
            "[{}] mean number of proposals overlapping ground truth: {:.2}",
            tag.as_str(),
            mean_overlap
        );
        info!(
            "[{}] classifier accuracy for proposals: {:.4}",
            tag.as_str(),
            class_acc
        );
        info!("[{}] rpn classifier loss: {:.4}", tag.as_str(), rpn_cls);
        info!("[{}] rpn regression loss: {:.4}", tag.as_str(), rpn_regr);
        info!(
            "[{}] detector classifier loss: {:.4}",
            tag.as_str(),
            class_cls
        );
        info!(
            "[{}] detector regression loss: {:.4}",
            tag.as_str(),
            class_regr
        );
        info!("[{}] elapsed time: {:.1}s", tag.as_str(), elapsed);
    } else {
        println!(
            "{},loss_rpn_cls,{},loss_rpn_regr,{},loss_class_cls,{},loss_class_regr,{},\
             class_acc,{},mean_overlapping_bboxes,{},elapsed_time,{}",
            tag.as_str(),
            rpn_cls,
            rpn_regr,
            class_cls,
            class_regr,
            class_acc,
            mean_overlap,
            elapsed
        );
    }
}
