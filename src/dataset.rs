use super::*;

/// What the files of a dataset split contain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum SampleSource {
  /// Preprocessed `.npy` arrays
  #[default]
  Arrays,
  /// Images, preprocessed while loading
  Images,
}

impl SampleSource {
  fn list(self, dir: &Path) -> Result<Vec<PathBuf>> {
    match self {
      Self::Arrays => list_arrays(dir),
      Self::Images => list_images(dir),
    }
  }

  fn load(self, path: &Path, size: ImageSize) -> Result<Array3<f32>> {
    match self {
      Self::Arrays => load_array(path, size),
      Self::Images => preprocess_image(path, size),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Sample {
  pub(crate) path: PathBuf,
  pub(crate) label: usize,
}

/// One split of a dataset, laid out as `<root>/<class>/<file>`. Samples are
/// listed up front and only read when a batch is loaded.
#[derive(Debug)]
pub(crate) struct Dataset {
  samples: Vec<Sample>,
  source: SampleSource,
  size: ImageSize,
  classes: usize,
}

impl Dataset {
  pub(crate) fn load(
    root: &Path,
    source: SampleSource,
    labels: &LabelMap,
    size: ImageSize,
  ) -> Result<Self> {
    for class in list_class_dirs(root)? {
      ensure!(
        labels.index_of(&class).is_some(),
        "class directory `{class}` in `{}` is not one of the known classes \
         ({})",
        root.display(),
        labels.names().join(", ")
      );
    }

    let mut samples = Vec::new();

    for (label, class) in labels.names().iter().enumerate() {
      let dir = root.join(class);

      if !dir.is_dir() {
        warn!("no samples for class {class} in {}", root.display());
        continue;
      }

      samples.extend(
        source
          .list(&dir)?
          .into_iter()
          .map(|path| Sample { path, label }),
      );
    }

    debug!("listed {} samples in {}", samples.len(), root.display());

    Ok(Self {
      samples,
      source,
      size,
      classes: labels.len(),
    })
  }

  pub(crate) fn len(&self) -> usize {
    self.samples.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  #[cfg(test)]
  pub(crate) fn samples(&self) -> &[Sample] {
    &self.samples
  }

  pub(crate) fn class_counts(&self) -> Vec<usize> {
    let mut counts = vec![0; self.classes];

    for sample in &self.samples {
      counts[sample.label] += 1;
    }

    counts
  }

  /// Inverse-frequency weights, `total / (classes * count)`. Classes
  /// without samples get a weight of zero.
  pub(crate) fn class_weights(&self) -> Vec<f32> {
    let total = self.len() as f32;
    let classes = self.classes as f32;

    self
      .class_counts()
      .into_iter()
      .map(|count| {
        if count == 0 {
          0.0
        } else {
          total / (classes * count as f32)
        }
      })
      .collect()
  }

  /// Reads the samples at `indices` in parallel and stacks them into one
  /// `(batch, height, width, 3)` array. When `augmentation` is given every
  /// image gets its own random transform.
  pub(crate) fn load_batch(
    &self,
    indices: &[usize],
    augmentation: Option<(&Augmentation, &mut StdRng)>,
  ) -> Result<(Array4<f32>, Vec<usize>)> {
    ensure!(!indices.is_empty(), "cannot load an empty batch");

    let (augmentation, seeds): (Option<&Augmentation>, Vec<u64>) =
      match augmentation {
        Some((augmentation, rng)) => (
          Some(augmentation),
          indices.iter().map(|_| rng.gen()).collect(),
        ),
        None => (None, Vec::new()),
      };

    let loaded = indices
      .par_iter()
      .enumerate()
      .map(|(position, &index)| -> Result<(Array3<f32>, usize)> {
        let sample = self
          .samples
          .get(index)
          .with_context(|| format!("sample index {index} out of range"))?;

        let image =
          self.source.load(&sample.path, self.size).with_context(|| {
            format!("failed to load sample `{}`", sample.path.display())
          })?;

        let image = match (augmentation, seeds.get(position)) {
          (Some(augmentation), Some(&seed)) => {
            augmentation.apply(image.view(), &mut StdRng::seed_from_u64(seed))
          }
          _ => image,
        };

        Ok((image, sample.label))
      })
      .collect::<Result<Vec<_>>>()?;

    let (images, labels): (Vec<Array3<f32>>, Vec<usize>) =
      loaded.into_iter().unzip();

    let views = images.iter().map(Array3::view).collect::<Vec<_>>();

    Ok((ndarray::stack(Axis(0), &views)?, labels))
  }
}
