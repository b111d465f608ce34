use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Preprocess {
  #[clap(short, long, default_value = "split_dataset")]
  source: PathBuf,
  #[clap(short, long, default_value = "preprocessed_data")]
  destination: PathBuf,
  #[clap(long, default_value_t = ImageSize::default())]
  size: ImageSize,
  #[clap(short, long, help = "Preprocess a single image instead")]
  image: Option<PathBuf>,
  #[clap(long, requires = "image", help = "Where to save the single image")]
  save_dir: Option<PathBuf>,
}

impl Preprocess {
  pub(crate) fn run(self) -> Result {
    match &self.image {
      Some(image) => {
        let (array, saved) =
          preprocess_single(image, self.size, self.save_dir.as_deref())?;

        println!("Preprocessed {}", image.display());
        println!("  Shape: {:?}", array.shape());

        if let Some(saved) = saved {
          println!("  Saved to {}", saved.display());
        }
      }
      None => {
        let report =
          preprocess_dataset(&self.source, &self.destination, self.size)?;

        println!("{report}");
      }
    }

    Ok(())
  }
}
