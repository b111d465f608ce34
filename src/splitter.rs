use super::*;

pub(crate) const SPLITS: [&str; 3] = ["train", "val", "test"];

/// Train/validation/test proportions, applied independently per class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SplitRatio {
  pub(crate) train: f64,
  pub(crate) val: f64,
  pub(crate) test: f64,
}

impl Default for SplitRatio {
  fn default() -> Self {
    Self {
      train: 0.7,
      val: 0.15,
      test: 0.15,
    }
  }
}

impl SplitRatio {
  pub(crate) fn new(train: f64, val: f64, test: f64) -> Result<Self> {
    for (name, value) in [("train", train), ("val", val), ("test", test)] {
      ensure!(
        (0.0..=1.0).contains(&value),
        "{name} ratio must be between 0 and 1, got {value}"
      );
    }

    ensure!(
      (train + val + test - 1.0).abs() < 1e-6,
      "split ratios must sum to 1, got {}",
      train + val + test
    );

    Ok(Self { train, val, test })
  }

  /// Number of items assigned to the train and validation splits for a
  /// class of `total` items. The test split takes the remainder.
  pub(crate) fn counts(&self, total: usize) -> (usize, usize) {
    let train = (total as f64 * self.train) as usize;
    let train_and_val = ((total as f64 * (self.train + self.val)) as usize)
      .clamp(train, total);

    (train, train_and_val - train)
  }
}

impl FromStr for SplitRatio {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let values = s
      .split(',')
      .map(|value| {
        value
          .trim()
          .parse::<f64>()
          .map_err(|_| format!("invalid ratio `{value}`"))
      })
      .collect::<Result<Vec<f64>, String>>()?;

    match values.as_slice() {
      &[train, val, test] => {
        Self::new(train, val, test).map_err(|error| error.to_string())
      }
      _ => Err(format!(
        "expected three comma-separated ratios (train,val,test), got `{s}`"
      )),
    }
  }
}

impl Display for SplitRatio {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{},{},{}", self.train, self.val, self.test)
  }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SplitPlan<T> {
  pub(crate) train: Vec<T>,
  pub(crate) val: Vec<T>,
  pub(crate) test: Vec<T>,
}

impl<T> SplitPlan<T> {
  pub(crate) fn parts(&self) -> [(&'static str, &[T]); 3] {
    [
      (SPLITS[0], self.train.as_slice()),
      (SPLITS[1], self.val.as_slice()),
      (SPLITS[2], self.test.as_slice()),
    ]
  }
}

/// Shuffles `items` and slices them into train, validation and test parts.
pub(crate) fn plan_split<T, R: Rng>(
  mut items: Vec<T>,
  ratio: SplitRatio,
  rng: &mut R,
) -> SplitPlan<T> {
  items.shuffle(rng);

  let (train_count, val_count) = ratio.counts(items.len());

  let test = items.split_off(train_count + val_count);
  let val = items.split_off(train_count);

  SplitPlan {
    train: items,
    val,
    test,
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum TransferMode {
  /// Move files out of the source dataset
  #[default]
  Move,
  /// Leave the source dataset untouched
  Copy,
}

fn transfer(from: &Path, to: &Path, mode: TransferMode) -> Result {
  match mode {
    TransferMode::Copy => {
      fs::copy(from, to)?;
    }
    TransferMode::Move => {
      if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
      }
    }
  }

  Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SplitClass {
  pub(crate) class: String,
  pub(crate) train: usize,
  pub(crate) val: usize,
  pub(crate) test: usize,
}

#[derive(Debug, Default)]
pub(crate) struct SplitReport {
  pub(crate) classes: Vec<SplitClass>,
}

impl Display for SplitReport {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    for class in &self.classes {
      writeln!(
        f,
        "  {}: {} train, {} val, {} test",
        class.class, class.train, class.val, class.test
      )?;
    }

    write!(f, "Finished splitting the dataset.")
  }
}

/// Distributes the files of every class directory of `source` into
/// `destination/{train,val,test}/<class>`.
pub(crate) fn split_dataset(
  source: &Path,
  destination: &Path,
  ratio: SplitRatio,
  seed: Option<u64>,
  mode: TransferMode,
) -> Result<SplitReport> {
  let classes = list_class_dirs(source)?;

  for split in SPLITS {
    fs::create_dir_all(destination.join(split)).with_context(|| {
      format!("failed to create `{}`", destination.join(split).display())
    })?;
  }

  let mut rng = rng_from_seed(seed);

  let mut report = SplitReport::default();

  for class in classes {
    let class_source = source.join(&class);

    let plan = plan_split(list_files(&class_source)?, ratio, &mut rng);

    for (split, files) in plan.parts() {
      let class_destination = destination.join(split).join(&class);

      fs::create_dir_all(&class_destination).with_context(|| {
        format!("failed to create `{}`", class_destination.display())
      })?;

      for file in files {
        let name = file
          .file_name()
          .with_context(|| format!("`{}` has no file name", file.display()))?;

        transfer(file, &class_destination.join(name), mode).with_context(
          || {
            format!(
              "failed to transfer `{}` to `{}`",
              file.display(),
              class_destination.display()
            )
          },
        )?;
      }
    }

    info!(
      "{class}: {} train, {} val, {} test",
      plan.train.len(),
      plan.val.len(),
      plan.test.len()
    );

    report.classes.push(SplitClass {
      class,
      train: plan.train.len(),
      val: plan.val.len(),
      test: plan.test.len(),
    });
  }

  Ok(report)
}
