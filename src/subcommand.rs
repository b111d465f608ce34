use {
  super::*, clean::Clean, count::Count, inspect::Inspect, predict::Predict,
  preprocess::Preprocess, split::Split, train::Train,
};

mod clean;
mod count;
mod inspect;
mod predict;
mod preprocess;
mod split;
mod train;

#[derive(Debug, Parser)]
pub(crate) enum Subcommand {
  #[clap(name = "clean", about = "Copy the decodable images of a raw dataset")]
  Clean(Clean),
  #[clap(name = "split", about = "Split a dataset into train, val and test")]
  Split(Split),
  #[clap(name = "preprocess", about = "Resize and normalize images to arrays")]
  Preprocess(Preprocess),
  #[clap(name = "count", about = "Count the images of every class")]
  Count(Count),
  #[clap(name = "inspect", about = "Summarize an array or image file")]
  Inspect(Inspect),
  #[clap(name = "train", about = "Train the model")]
  Train(Train),
  #[clap(name = "predict", about = "Classify a leaf and suggest treatments")]
  Predict(Predict),
}

impl Subcommand {
  pub(crate) fn run(self) -> Result {
    match self {
      Self::Clean(clean) => clean.run(),
      Self::Split(split) => split.run(),
      Self::Preprocess(preprocess) => preprocess.run(),
      Self::Count(count) => count.run(),
      Self::Inspect(inspect) => inspect.run(),
      Self::Train(train) => train.run(),
      Self::Predict(predict) => predict.run(),
    }
  }
}
