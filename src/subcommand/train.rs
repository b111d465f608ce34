use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Train {
  #[clap(
    short,
    long,
    default_value = "preprocessed_data",
    help = "Directory holding train, val and test splits"
  )]
  data: PathBuf,
  #[clap(long, value_enum, default_value_t = SampleSource::Arrays)]
  source: SampleSource,
  #[clap(long, default_value_t = ImageSize::default())]
  size: ImageSize,
  #[clap(short, long, default_value = "10")]
  epochs: usize,
  #[clap(short, long, default_value = "32")]
  batch_size: usize,
  #[clap(short, long, default_value = "0.0001")]
  learning_rate: f32,
  #[clap(short, long, help = "Randomly augment training images")]
  augment: bool,
  #[clap(short = 'w', long, help = "Weight classes by inverse frequency")]
  class_weights: bool,
  #[clap(long, help = "Reuse the convolutional layers of a trained model")]
  backbone: Option<PathBuf>,
  #[clap(
    long,
    requires = "backbone",
    help = "Keep the reused backbone layers fixed"
  )]
  freeze_backbone: bool,
  #[clap(long, default_value = "best_model.json")]
  checkpoint: PathBuf,
  #[clap(short, long, default_value = "apple_disease_model.json")]
  output: PathBuf,
  #[clap(long, default_value = "7")]
  patience: usize,
  #[clap(long, default_value = "5")]
  plateau_patience: usize,
  #[clap(long, default_value = "0.2")]
  plateau_factor: f32,
  #[clap(long, default_value = "0.00001")]
  min_learning_rate: f32,
  #[clap(long)]
  seed: Option<u64>,
}

impl Train {
  pub(crate) fn run(self) -> Result {
    let labels = LabelMap::from_dir(&self.data.join("train"))?;

    let load = |split: &str| {
      Dataset::load(&self.data.join(split), self.source, &labels, self.size)
        .with_context(|| format!("failed to load {split} split"))
    };

    let (train, val, test) = (load("train")?, load("val")?, load("test")?);

    println!("Dataset loaded successfully:");
    println!("  Classes: {}", labels.names().join(", "));
    println!("  Training samples: {}", train.len());
    println!("  Validation samples: {}", val.len());
    println!("  Test samples: {}", test.len());

    let mut rng = rng_from_seed(self.seed);

    let network = match &self.backbone {
      Some(path) => {
        let backbone = Network::load(path).with_context(|| {
          format!("failed to load backbone `{}`", path.display())
        })?;

        ensure!(
          backbone.input_size() == self.size,
          "backbone expects {} images, but --size is {}",
          backbone.input_size(),
          self.size
        );

        Network::with_backbone(
          &backbone,
          labels.clone(),
          self.learning_rate,
          self.freeze_backbone,
          &mut rng,
        )?
      }
      None => Network::new(
        Architecture::scratch(self.size, labels.len()),
        labels.clone(),
        self.learning_rate,
        &mut rng,
      )?,
    };

    println!("{network}");

    let mut trainer = Trainer::new(
      network,
      TrainingConfig {
        epochs: self.epochs,
        batch_size: self.batch_size,
        augmentation: self.augment.then(Augmentation::default),
        class_weights: self.class_weights,
        early_stopping_patience: self.patience,
        plateau_patience: self.plateau_patience,
        plateau_factor: self.plateau_factor,
        min_learning_rate: self.min_learning_rate,
        checkpoint: Some(self.checkpoint.clone()),
      },
      rng,
    );

    let history = trainer.fit(&train, &val)?;

    if let Some(last) = history.epochs.last() {
      println!("{last}");
    }

    if history.stopped_early {
      println!("Stopped early after {} epochs", history.epochs.len());
    }

    if test.is_empty() {
      warn!("test split is empty, skipping evaluation");
    } else {
      let evaluation = trainer.test(&test)?;

      println!("Test loss: {:.4}", evaluation.loss);
      println!("Test accuracy: {:.2}%", evaluation.accuracy() * 100.0);
      println!("{}", evaluation.confusion);
    }

    trainer
      .into_network()
      .save(&self.output)
      .context("failed to save model")?;

    println!("Saved model to {}", self.output.display());

    Ok(())
  }
}
