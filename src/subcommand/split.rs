use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Split {
  #[clap(short, long, default_value = "cleaned_dataset")]
  source: PathBuf,
  #[clap(short, long, default_value = "split_dataset")]
  destination: PathBuf,
  #[clap(
    short,
    long,
    default_value_t = SplitRatio::default(),
    help = "Train, validation and test ratios"
  )]
  ratio: SplitRatio,
  #[clap(long, help = "Seed for a reproducible shuffle")]
  seed: Option<u64>,
  #[clap(short, long, value_enum, default_value_t = TransferMode::Move)]
  mode: TransferMode,
}

impl Split {
  pub(crate) fn run(self) -> Result {
    let report = split_dataset(
      &self.source,
      &self.destination,
      self.ratio,
      self.seed,
      self.mode,
    )?;

    println!("{report}");

    Ok(())
  }
}
