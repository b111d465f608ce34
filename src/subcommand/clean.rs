use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Clean {
  #[clap(short, long, help = "Directory of the raw dataset")]
  source: PathBuf,
  #[clap(short, long, default_value = "cleaned_dataset")]
  destination: PathBuf,
  #[clap(
    short,
    long,
    value_delimiter = ',',
    default_values = DEFAULT_CLASSES,
    help = "Class folders to copy"
  )]
  classes: Vec<String>,
}

impl Clean {
  pub(crate) fn run(self) -> Result {
    let report = clean_dataset(&self.source, &self.destination, &self.classes)?;

    println!("{report}");
    println!("Cleaned dataset written to {}", self.destination.display());

    Ok(())
  }
}
