use candle_core::{DType, Device, Tensor};
use candle_nn::{ModuleT, VarBuilder, VarMap};
use metrics::EvaluationResult;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use unet::checkpoint::{self, StateDict};
use unet::config::Config;
use unet::dataset::{class_weights, PhantomDataset};
use unet::images;
use unet::network::{layer_sizes, Network};
use unet::optim::{OptimizerKind, TrainOptimizer};
use unet::report;
use unet::scheduler::ReduceLrOnPlateau;
use unet::stopping::{Action, EarlyStopping};
use unet::tracker::{JsonlTracker, LogTracker, Record, Tracker};

use crate::args::Args;
use crate::training::evaluation::{evaluate, save_masks, save_predictions, validation_loss};
use crate::training::progress::TrainingProgressBar;
use crate::utils::device::get_device;
use crate::utils::loss::weighted_cross_entropy;
use crate::utils::timestamp;

pub struct Trainer {
    network: Network,
    varmap: VarMap,
    optimizer: TrainOptimizer,
    scheduler: Option<ReduceLrOnPlateau>,
    stopping: Option<EarlyStopping>,
    class_weights: Option<Tensor>,
    device: Device,
    config: Config,
    workers: usize,
    rng: StdRng,
    run: String,
    tracker: Box<dyn Tracker>,
    batch_step: usize,
    stop_flag: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(
        args: &Args,
        config: Config,
        train: &PhantomDataset,
        stop_flag: Arc<AtomicBool>,
    ) -> Result<Self, Box<dyn Error>> {
        let device = get_device()?;
        let run = timestamp();
        let hp = &config.hyperparameters;

        let kind: OptimizerKind = hp.optimizer.parse()?;

        let class_weights = if hp.weights {
            let weights = class_weights(train, &hp.multiplier)?;
            Some(Tensor::from_slice(&weights, weights.len(), &device)?)
        } else {
            None
        };

        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let network = Network::new(
            &vs,
            config.image.image_channels,
            config.num_classes(),
            hp.min_layer_size,
            hp.max_layer_size,
        )?;
        log::info!(
            "Created U-Net with {} levels ({} to {} channels)",
            layer_sizes(hp.min_layer_size, hp.max_layer_size).len(),
            hp.min_layer_size,
            hp.max_layer_size
        );

        let mut optimizer = TrainOptimizer::from_varmap(kind, &varmap, hp.learning_rate)?;
        let mut scheduler = config
            .training
            .scheduler
            .then(|| ReduceLrOnPlateau::new(hp.learning_rate));
        let stopping = config
            .training
            .early_stop
            .then(|| EarlyStopping::new(config.training.patience, config.training.wait));

        if let Some(path) = &args.load {
            checkpoint::load(
                path,
                &varmap,
                Some(&mut optimizer as &mut dyn StateDict),
                scheduler.as_mut().map(|s| s as &mut dyn StateDict),
            )?;
        }

        let tracker: Box<dyn Tracker> = if args.no_tracker {
            Box::new(LogTracker)
        } else {
            let path = args.tracker.clone().unwrap_or_else(|| {
                config
                    .paths
                    .predictions_dir
                    .join(format!("{}_tracker.jsonl", run))
            });
            Box::new(JsonlTracker::create(&path)?)
        };

        Ok(Self {
            network,
            varmap,
            optimizer,
            scheduler,
            stopping,
            class_weights,
            device,
            config,
            workers: args.workers,
            rng: StdRng::seed_from_u64(args.seed),
            run,
            tracker,
            batch_step: 0,
            stop_flag,
        })
    }

    pub fn train(
        &mut self,
        train: &mut PhantomDataset,
        val: &PhantomDataset,
    ) -> Result<(), Box<dyn Error>> {
        let predictions_dir = self.config.paths.predictions_dir.clone();
        let csv = report::csv_path(&predictions_dir, &self.run, "preds");

        log::info!("Baseline evaluation");
        let baseline = self.evaluate(val)?;
        report::print_results(&baseline);

        let masks = save_masks(self.loader(val), self.config.num_classes(), |i| {
            images::validation_path(&predictions_dir, &self.run, i)
        })?;
        let mut record = Record::new(0);
        record.push_images("validation", &masks);
        self.tracker.log(&record)?;

        for epoch in 0..self.config.hyperparameters.num_epochs {
            if self.stop_flag.load(Ordering::Relaxed) {
                log::info!("Stopping before epoch {}", epoch);
                break;
            }
            log::info!("Beginning epoch {}:", epoch);

            let (train_loss, progress) = self.train_epoch(train)?;
            self.save_checkpoint(&checkpoint::periodic_checkpoint_path(
                &self.config.paths.checkpoint_dir,
            ))?;

            let mut result = self.evaluate(val)?;
            let val_loss = validation_loss(
                &self.network,
                self.loader(val),
                &self.device,
                self.class_weights.as_ref(),
            )?;
            progress.finish(val_loss, train_loss);

            if let Some(scheduler) = &mut self.scheduler {
                let lr = scheduler.step(val_loss as f64, self.optimizer.learning_rate());
                self.optimizer.set_learning_rate(lr);
            }

            result.insert("train_loss", train_loss as f64);
            result.insert("val_loss", val_loss as f64);
            report::print_results(&result);
            report::append_csv(&csv, &result)?;

            let now = timestamp();
            let written = save_predictions(&self.network, self.loader(val), &self.device, |i| {
                images::prediction_path(&predictions_dir, &now, epoch, i)
            })?;

            let record = self.epoch_record(epoch, train_loss, val_loss, &result, &written);
            self.tracker.log(&record)?;

            let action = match &mut self.stopping {
                Some(stopping) => stopping.step(val_loss, epoch),
                None => Action::Continue,
            };

            let stop = checkpoint::apply_action(
                action,
                &self.best_checkpoint(),
                &self.varmap,
                &self.optimizer,
                self.scheduler.as_ref().map(|s| s as &dyn StateDict),
            )?;
            if stop {
                log::info!("Early stopping after {} epochs", epoch + 1);
                let now = timestamp();
                save_predictions(&self.network, self.loader(val), &self.device, |i| {
                    images::prediction_path(&predictions_dir, &now, epoch, i)
                })?;
                break;
            }
        }

        self.tracker.finish()?;
        log::info!("Training finished");
        Ok(())
    }

    /// Scores the held-out test split with the best checkpoint, when one was saved.
    pub fn submit(&mut self, test: &PhantomDataset) -> Result<EvaluationResult, Box<dyn Error>> {
        let best = self.best_checkpoint();
        if best.exists() {
            checkpoint::load(&best, &self.varmap, None, None)?;
        } else {
            log::info!("No best checkpoint at {:?}, using current weights", best);
        }

        log::info!("Running test set evaluation...");
        let mut result = self.evaluate(test)?;
        let test_loss = validation_loss(
            &self.network,
            self.loader(test),
            &self.device,
            self.class_weights.as_ref(),
        )?;
        result.insert("test_loss", test_loss as f64);

        report::print_results(&result);
        let paths = &self.config.paths;
        report::append_csv(
            &report::csv_path(&paths.predictions_dir, &self.run, "submission"),
            &result,
        )?;

        let now = timestamp();
        save_predictions(&self.network, self.loader(test), &self.device, |i| {
            images::submission_path(&paths.submissions_dir, &now, i)
        })?;

        Ok(result)
    }

    /// Runs one pass over the shuffled training split. The bar is handed back
    /// open so it can be closed with the validation loss.
    fn train_epoch(
        &mut self,
        train: &mut PhantomDataset,
    ) -> Result<(f32, TrainingProgressBar), Box<dyn Error>> {
        let batch_size = self.config.hyperparameters.batch_size;
        let loader = train.shuffled_loader(batch_size, self.workers, &mut self.rng);
        let progress = TrainingProgressBar::new(loader.num_batches())?;

        let mut total_loss = 0.0;
        let mut batches_processed = 0;
        let mut train_loss = 0.0;

        for batch in loader {
            let (x, y) = batch?.to_tensors(&self.device)?;

            let logits = self.network.forward_t(&x, true)?;
            let loss = weighted_cross_entropy(&logits, &y, self.class_weights.as_ref())?;
            self.optimizer.backward_step(&loss)?;

            let batch_loss = loss.to_vec0::<f32>()?;
            self.batch_step += 1;
            self.tracker
                .log(&Record::new(self.batch_step).scalar("batch_loss", batch_loss as f64))?;

            total_loss += batch_loss;
            batches_processed += 1;

            train_loss = total_loss / batches_processed as f32;
            progress.update(train_loss);
        }

        Ok((train_loss, progress))
    }

    fn evaluate(&self, dataset: &PhantomDataset) -> Result<EvaluationResult, Box<dyn Error>> {
        evaluate(&self.network, self.loader(dataset), &self.device)
    }

    fn loader(&self, dataset: &PhantomDataset) -> unet::dataset::DataLoader {
        dataset.loader(self.config.hyperparameters.batch_size, self.workers)
    }

    fn best_checkpoint(&self) -> PathBuf {
        checkpoint::best_checkpoint_path(&self.config.paths.checkpoint_dir, &self.run)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        checkpoint::save(
            path,
            &self.varmap,
            &self.optimizer,
            self.scheduler.as_ref().map(|s| s as &dyn StateDict),
        )?;
        Ok(())
    }

    fn epoch_record(
        &self,
        epoch: usize,
        train_loss: f32,
        val_loss: f32,
        result: &EvaluationResult,
        predictions: &[PathBuf],
    ) -> Record {
        let mut record = Record::new(epoch)
            .scalar("epoch", epoch as f64)
            .scalar("train_loss", train_loss as f64)
            .scalar("val_loss", val_loss as f64)
            .scalar("accuracy", result.accuracy)
            .scalar("learning_rate", self.optimizer.learning_rate());

        for (i, accuracy) in result.label_accuracies().into_iter().enumerate() {
            record.push_scalar(&format!("label_{}_accuracy", i), accuracy);
        }
        for (i, recall) in result.label_recalls().into_iter().enumerate() {
            record.push_scalar(&format!("label_{}_recall", i), recall);
        }
        record.push_images("prediction", predictions);
        record
    }
}
