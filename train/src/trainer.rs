//! The training loop controller.
//!
//! One iteration walks the fixed sequence fetch, proposal-network update,
//! proposal decoding, ground-truth assignment, sampling, classifier
//! update, and metric recording, once for the training stream and once for
//! the validation stream. All mutable training state lives on the
//! [`Trainer`] and is only touched between iteration boundaries.

use crate::{
    common::*,
    data::{ImageRecord, SampleStream, Split, TrainingSample},
    logging, utils,
};

/// Which data stream a pipeline pass runs on. Only the training stream
/// performs optimizer updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Train,
    Validation,
}

impl StreamTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
        }
    }
}

/// Control-flow signal from one loop step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopFlow {
    Continue,
    Finished,
}

/// Drive `step` until it reports completion or `cancel` is set. A failed
/// step is logged and the loop moves on to the next iteration, so a single
/// bad sample can never end a long training run.
pub fn run_resilient<F>(cancel: &AtomicBool, mut step: F) -> Result<()>
where
    F: FnMut() -> Result<LoopFlow>,
{
    loop {
        if cancel.load(Ordering::Relaxed) {
            info!("cancellation requested, stopping");
            return Ok(());
        }
        match step() {
            Ok(LoopFlow::Continue) => {}
            Ok(LoopFlow::Finished) => return Ok(()),
            Err(err) => error!("iteration failed: {:#}", err),
        }
    }
}

/// Fixed-length rolling window of per-iteration loss rows.
#[derive(Debug)]
pub struct LossWindow {
    rows: Vec<[f64; 5]>,
    capacity: usize,
}

impl LossWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, row: [f64; 5]) {
        self.rows.push(row);
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    pub fn column_means(&self) -> [f64; 5] {
        let mut means = [0.0; 5];
        if self.rows.is_empty() {
            return means;
        }
        for row in &self.rows {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value;
            }
        }
        for mean in &mut means {
            *mean /= self.rows.len() as f64;
        }
        means
    }

    pub fn reset(&mut self) {
        self.rows.clear();
    }
}

/// Running minimum of the combined epoch loss.
#[derive(Debug, Default)]
pub struct BestLoss {
    best: Option<f64>,
}

impl BestLoss {
    /// Whether `loss` improves on the best seen; updates the tracker when
    /// it does. The first observation always counts as an improvement.
    pub fn improves(&mut self, loss: f64) -> bool {
        match self.best {
            Some(best) if loss >= best => false,
            _ => {
                self.best = Some(loss);
                true
            }
        }
    }

    pub fn set(&mut self, loss: f64) {
        self.best = Some(loss);
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

/// Per-stream epoch accumulation state.
#[derive(Debug)]
struct StreamState {
    window: LossWindow,
    /// Positive-proposal counts, including the zero observations recorded
    /// when an iteration yields no usable samples.
    overlap_counts: Vec<usize>,
    best: BestLoss,
}

impl StreamState {
    fn new(epoch_length: usize) -> Self {
        Self {
            window: LossWindow::new(epoch_length),
            overlap_counts: Vec::new(),
            best: BestLoss::default(),
        }
    }

    fn mean_overlap(&self) -> f64 {
        if self.overlap_counts.is_empty() {
            return 0.0;
        }
        self.overlap_counts.iter().sum::<usize>() as f64 / self.overlap_counts.len() as f64
    }

    fn reset(&mut self) {
        self.window.reset();
        self.overlap_counts.clear();
    }
}

#[derive(Debug)]
enum SampleOutcome {
    /// No proposal survived decoding and assignment for this sample.
    NoUsable,
    Step {
        /// RPN class, RPN regression, classifier class, classifier
        /// regression, classifier accuracy.
        losses: [f64; 5],
        num_positives: usize,
    },
}

/// Owns the model, the optimizers and all rolling training state.
pub struct Trainer {
    config: Arc<Config>,
    vs: nn::VarStore,
    model: FasterRcnn,
    optimizer: nn::Optimizer<nn::Adam>,
    decoder: ProposalDecoder,
    train_stream: SampleStream,
    val_stream: SampleStream,
    train_state: StreamState,
    val_state: StreamState,
    iter_num: usize,
    epoch_num: usize,
    epoch_start: Instant,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: Arc<Config>, records: Vec<ImageRecord>) -> Result<Self> {
        config.validate()?;

        let (train_records, val_records): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| record.split == Split::Trainval);
        info!("num train samples {}", train_records.len());
        info!("num val samples {}", val_records.len());
        ensure!(!train_records.is_empty(), "the training split is empty");
        ensure!(!val_records.is_empty(), "the validation split is empty");

        let mut vs = nn::VarStore::new(config.device);
        let model = FasterRcnn::new(&vs.root(), config.num_classes(), config.num_anchors())?;
        utils::try_load_pretrained(&mut vs, config.base_net_weights.as_deref());

        let optimizer = nn::Adam::default().build(&vs, 1e-5)?;
        let decoder = ProposalDecoderInit::default().build()?;

        let train_stream = SampleStream::new(
            config.clone(),
            train_records,
            true,
            StdRng::from_entropy(),
        )?;
        let val_stream = SampleStream::new(
            config.clone(),
            val_records,
            false,
            StdRng::from_entropy(),
        )?;

        let epoch_length = config.epoch_length;
        Ok(Self {
            config,
            vs,
            model,
            optimizer,
            decoder,
            train_stream,
            val_stream,
            train_state: StreamState::new(epoch_length),
            val_state: StreamState::new(epoch_length),
            iter_num: 0,
            epoch_num: 0,
            epoch_start: Instant::now(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Run until the configured epoch count or external cancellation.
    pub fn run(&mut self, cancel: &AtomicBool) -> Result<()> {
        info!("starting training");
        run_resilient(cancel, || self.step())
    }

    /// One full iteration of the training state machine.
    fn step(&mut self) -> Result<LoopFlow> {
        let train_sample = self.train_stream.next_sample()?;
        let val_sample = self.val_stream.next_sample()?;

        let train_losses = match self.process_sample(&train_sample, StreamTag::Train)? {
            SampleOutcome::NoUsable => {
                self.train_state.overlap_counts.push(0);
                return Ok(LoopFlow::Continue);
            }
            SampleOutcome::Step {
                losses,
                num_positives,
            } => {
                self.train_state.overlap_counts.push(num_positives);
                losses
            }
        };

        let val_losses = match self.process_sample(&val_sample, StreamTag::Validation)? {
            SampleOutcome::NoUsable => {
                self.val_state.overlap_counts.push(0);
                return Ok(LoopFlow::Continue);
            }
            SampleOutcome::Step {
                losses,
                num_positives,
            } => {
                self.val_state.overlap_counts.push(num_positives);
                losses
            }
        };

        self.train_state.window.push(train_losses);
        self.val_state.window.push(val_losses);
        self.iter_num += 1;

        let total: f64 = train_losses[0..4].iter().sum();
        info!(
            "epoch: {}\tstep: {}/{}\tloss: {:.4}",
            self.epoch_num + 1,
            self.iter_num,
            self.config.epoch_length,
            total
        );

        if self.iter_num == self.config.epoch_length {
            return self.finish_epoch();
        }
        Ok(LoopFlow::Continue)
    }

    /// The shared train/validation pipeline. `tag` decides whether the
    /// optimizer steps; everything else is identical for both streams.
    fn process_sample(&mut self, sample: &TrainingSample, tag: StreamTag) -> Result<SampleOutcome> {
        let train = tag == StreamTag::Train;
        let device = self.config.device;

        let image = sample.image.to_device(device);
        let cls_target = sample.rpn_targets.cls.to_device(device);
        let regr_target = sample.rpn_targets.regr.to_device(device);

        // proposal network step
        let (rpn_cls_loss, rpn_regr_loss) = if train {
            let (_features, rpn_cls, rpn_regr) = self.model.rpn_forward(&image, true);
            let cls_loss = loss::rpn_loss_cls(&rpn_cls, &cls_target)?;
            let regr_loss = loss::rpn_loss_regr(&rpn_regr, &regr_target)?;
            self.optimizer.backward_step(&(&cls_loss + &regr_loss));
            (f64::from(&cls_loss), f64::from(&regr_loss))
        } else {
            tch::no_grad(|| -> Result<_> {
                let (_features, rpn_cls, rpn_regr) = self.model.rpn_forward(&image, false);
                Ok((
                    f64::from(&loss::rpn_loss_cls(&rpn_cls, &cls_target)?),
                    f64::from(&loss::rpn_loss_regr(&rpn_regr, &regr_target)?),
                ))
            })?
        };

        // decode proposals from the just-updated predictions
        let rois = tch::no_grad(|| -> Result<_> {
            let (_features, rpn_cls, rpn_regr) = self.model.rpn_forward(&image, false);
            self.decoder.forward(&self.config, &rpn_cls, &rpn_regr)
        })?;

        let assignment = match assign_rois(&self.config, &rois, &sample.boxes)? {
            Some(assignment) => assignment,
            None => return Ok(SampleOutcome::NoUsable),
        };
        let num_positives = assignment.positives.len();

        let selected = sample_rois(
            &assignment.positives,
            &assignment.negatives,
            self.config.num_rois,
            &mut self.rng,
        )?;
        let index = Tensor::of_slice(&selected).to_device(device);
        let roi_batch = assignment.rois.to_device(device).index_select(0, &index);
        let label_batch = assignment.labels.to_device(device).index_select(0, &index);
        let regr_batch = assignment.regr.to_device(device).index_select(0, &index);

        // classifier step
        let (class_cls_loss, class_regr_loss, accuracy) = if train {
            let features = self.model.features(&image, true);
            let (class_probs, offsets) = self.model.classifier_forward(&features, &roi_batch)?;
            let cls_loss = loss::class_loss_cls(&class_probs, &label_batch)?;
            let regr_loss = loss::class_loss_regr(&offsets, &regr_batch)?;
            self.optimizer.backward_step(&(&cls_loss + &regr_loss));
            (
                f64::from(&cls_loss),
                f64::from(&regr_loss),
                loss::class_accuracy(&class_probs, &label_batch),
            )
        } else {
            tch::no_grad(|| -> Result<_> {
                let features = self.model.features(&image, false);
                let (class_probs, offsets) =
                    self.model.classifier_forward(&features, &roi_batch)?;
                Ok((
                    f64::from(&loss::class_loss_cls(&class_probs, &label_batch)?),
                    f64::from(&loss::class_loss_regr(&offsets, &regr_batch)?),
                    loss::class_accuracy(&class_probs, &label_batch),
                ))
            })?
        };

        Ok(SampleOutcome::Step {
            losses: [
                rpn_cls_loss,
                rpn_regr_loss,
                class_cls_loss,
                class_regr_loss,
                accuracy,
            ],
            num_positives,
        })
    }

    /// Close the epoch: report means, decide on a checkpoint, reset the
    /// rolling state.
    fn finish_epoch(&mut self) -> Result<LoopFlow> {
        let elapsed = self.epoch_start.elapsed().as_secs_f64();
        let train_means = self.train_state.window.column_means();
        let val_means = self.val_state.window.column_means();
        let train_overlap = self.train_state.mean_overlap();
        let val_overlap = self.val_state.mean_overlap();

        logging::epoch_report(
            &self.config,
            StreamTag::Train,
            self.epoch_num,
            &train_means,
            train_overlap,
            elapsed,
        );
        logging::epoch_report(
            &self.config,
            StreamTag::Validation,
            self.epoch_num,
            &val_means,
            val_overlap,
            elapsed,
        );
        if train_overlap == 0.0 {
            warn!(
                "the proposal network produced no boxes overlapping the ground truth; \
                 results will not be satisfactory, keep training"
            );
        }

        let train_combined: f64 = train_means[0..4].iter().sum();
        let val_combined: f64 = val_means[0..4].iter().sum();

        self.epoch_num += 1;

        if self.train_state.best.improves(train_combined) {
            if self.config.verbose {
                info!(
                    "total loss decreased to {:.4}, saving weights to '{}'",
                    train_combined,
                    self.config.model_path.display()
                );
            }
            utils::save_checkpoint(&self.vs, &self.config.model_path)?;
            // the validation best is tracked for reporting only and never
            // gates the write
            self.val_state.best.set(val_combined);
        }

        self.train_state.reset();
        self.val_state.reset();
        self.iter_num = 0;
        self.epoch_start = Instant::now();

        if self.epoch_num == self.config.num_epochs {
            info!("training complete, exiting");
            return Ok(LoopFlow::Finished);
        }
        Ok(LoopFlow::Continue)
    }
}
