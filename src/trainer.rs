use super::*;

#[derive(Clone, Debug)]
pub(crate) struct TrainingConfig {
  pub(crate) epochs: usize,
  pub(crate) batch_size: usize,
  pub(crate) augmentation: Option<Augmentation>,
  pub(crate) class_weights: bool,
  pub(crate) early_stopping_patience: usize,
  pub(crate) plateau_patience: usize,
  pub(crate) plateau_factor: f32,
  pub(crate) min_learning_rate: f32,
  pub(crate) checkpoint: Option<PathBuf>,
}

impl Default for TrainingConfig {
  fn default() -> Self {
    Self {
      epochs: 10,
      batch_size: 32,
      augmentation: None,
      class_weights: false,
      early_stopping_patience: 7,
      plateau_patience: 5,
      plateau_factor: 0.2,
      min_learning_rate: 1e-5,
      checkpoint: None,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct EpochRecord {
  pub(crate) epoch: usize,
  pub(crate) loss: f32,
  pub(crate) accuracy: f32,
  pub(crate) validation: Option<(f32, f32)>,
  pub(crate) learning_rate: f32,
}

impl Display for EpochRecord {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(
      f,
      "Epoch {}: loss {:.4}, accuracy {:.2}%",
      self.epoch,
      self.loss,
      self.accuracy * 100.0
    )?;

    if let Some((loss, accuracy)) = self.validation {
      write!(
        f,
        ", val_loss {loss:.4}, val_accuracy {:.2}%",
        accuracy * 100.0
      )?;
    }

    write!(f, ", lr {:e}", self.learning_rate)
  }
}

#[derive(Debug, Default)]
pub(crate) struct TrainingHistory {
  pub(crate) epochs: Vec<EpochRecord>,
  pub(crate) best_validation_loss: Option<f32>,
  pub(crate) stopped_early: bool,
}

pub(crate) struct Trainer {
  network: Network,
  config: TrainingConfig,
  rng: StdRng,
}

impl Trainer {
  pub(crate) fn new(
    network: Network,
    config: TrainingConfig,
    rng: StdRng,
  ) -> Self {
    Self {
      network,
      config,
      rng,
    }
  }

  pub(crate) fn into_network(self) -> Network {
    self.network
  }

  /// Trains on `train`, monitoring the loss on `val` after every epoch. The
  /// weights of the best epoch are restored before returning.
  pub(crate) fn fit(
    &mut self,
    train: &Dataset,
    val: &Dataset,
  ) -> Result<TrainingHistory> {
    let TrainingConfig {
      epochs,
      batch_size,
      ..
    } = self.config;

    ensure!(!train.is_empty(), "training split has no samples");
    ensure!(batch_size > 0, "batch size must be positive");

    let class_weights =
      self.config.class_weights.then(|| train.class_weights());

    if let Some(weights) = &class_weights {
      info!("class weights: {weights:?}");
    }

    if val.is_empty() {
      warn!("validation split is empty, monitoring training loss instead");
    }

    let mut early_stopping =
      EarlyStopping::new(self.config.early_stopping_patience);

    let mut plateau = ReduceLrOnPlateau::new(
      self.config.plateau_factor,
      self.config.plateau_patience,
      self.config.min_learning_rate,
    );

    let mut best_weights = None;
    let mut history = TrainingHistory::default();
    let mut indices = (0..train.len()).collect::<Vec<usize>>();

    let batches = indices.chunks(batch_size).len();

    let progress_bar = ProgressBar::new((epochs * batches) as u64);

    progress_bar.set_style(
      ProgressStyle::default_bar()
        .template(
          "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} Batches {msg}",
        )?
        .progress_chars("=>-"),
    );

    for epoch in 1..=epochs {
      indices.shuffle(&mut self.rng);

      let (mut loss_sum, mut correct) = (0.0, 0);

      for batch in indices.chunks(batch_size) {
        let (inputs, labels) = train.load_batch(
          batch,
          self
            .config
            .augmentation
            .as_ref()
            .map(|augmentation| (augmentation, &mut self.rng)),
        )?;

        let (loss, hits) = self.network.train_batch(
          inputs,
          &labels,
          class_weights.as_deref(),
          &mut self.rng,
        )?;

        loss_sum += loss * batch.len() as f32;
        correct += hits;

        progress_bar
          .set_message(format!("epoch {epoch}/{epochs} loss {loss:.4}"));
        progress_bar.inc(1);
      }

      let validation = if val.is_empty() {
        None
      } else {
        Some(self.network.evaluate(val, batch_size)?)
      };

      let record = EpochRecord {
        epoch,
        loss: loss_sum / train.len() as f32,
        accuracy: correct as f32 / train.len() as f32,
        validation: validation
          .as_ref()
          .map(|evaluation| (evaluation.loss, evaluation.accuracy())),
        learning_rate: self.network.learning_rate(),
      };

      progress_bar.suspend(|| info!("{record}"));

      let monitored = record.validation.map_or(record.loss, |(loss, _)| loss);

      history.epochs.push(record);

      let progress = early_stopping.update(monitored);

      if progress == Progress::Improved {
        best_weights = Some(self.network.snapshot());

        if let Some(path) = &self.config.checkpoint {
          let best = Some(monitored).filter(|_| !val.is_empty());

          self.network.record_training(epoch, best);

          self.network.save(path).with_context(|| {
            format!("failed to save checkpoint `{}`", path.display())
          })?;

          debug!("loss improved to {monitored:.4}, saved {}", path.display());
        }
      }

      if let Some(learning_rate) =
        plateau.update(monitored, self.network.learning_rate())
      {
        progress_bar
          .suspend(|| info!("reducing learning rate to {learning_rate:e}"));

        self.network.set_learning_rate(learning_rate);
      }

      if progress == Progress::Stop {
        progress_bar.suspend(|| {
          info!(
            "no improvement for {} epochs, stopping",
            self.config.early_stopping_patience
          )
        });

        history.stopped_early = true;
        break;
      }
    }

    progress_bar.finish_and_clear();

    if let Some(weights) = best_weights {
      self.network.restore(weights)?;
    }

    history.best_validation_loss =
      early_stopping.best().filter(|_| !val.is_empty());

    self
      .network
      .record_training(history.epochs.len(), history.best_validation_loss);

    Ok(history)
  }

  pub(crate) fn test(&self, test: &Dataset) -> Result<Evaluation> {
    self.network.evaluate(test, self.config.batch_size)
  }
}
