use super::*;

/// Target size every image is resized to before it reaches the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ImageSize {
  pub(crate) width: u32,
  pub(crate) height: u32,
}

impl Default for ImageSize {
  fn default() -> Self {
    Self {
      width: 224,
      height: 224,
    }
  }
}

impl ImageSize {
  pub(crate) fn shape(&self) -> (usize, usize, usize) {
    (self.height as usize, self.width as usize, 3)
  }
}

impl Display for ImageSize {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

impl FromStr for ImageSize {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parse = |value: &str| {
      value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|&value| value > 0)
        .ok_or_else(|| format!("invalid image dimension `{value}`"))
    };

    match s.split_once('x') {
      Some((width, height)) => Ok(Self {
        width: parse(width)?,
        height: parse(height)?,
      }),
      None => {
        let side = parse(s)?;

        Ok(Self {
          width: side,
          height: side,
        })
      }
    }
  }
}

/// Resizes a decoded image and scales its RGB channels to `[0, 1]`.
pub(crate) fn image_to_array(
  image: &DynamicImage,
  size: ImageSize,
) -> Result<Array3<f32>> {
  let resized = image
    .resize_exact(size.width, size.height, FilterType::Triangle)
    .to_rgb8();

  Ok(Array3::from_shape_vec(
    size.shape(),
    resized
      .into_raw()
      .into_iter()
      .map(|channel| channel as f32 / 255.0)
      .collect(),
  )?)
}

pub(crate) fn preprocess_image(
  path: &Path,
  size: ImageSize,
) -> Result<Array3<f32>> {
  let image = image::open(path)
    .with_context(|| format!("failed to load image `{}`", path.display()))?;

  image_to_array(&image, size)
}

pub(crate) fn save_array(array: &Array3<f32>, path: &Path) -> Result {
  write_npy(path, array)
    .with_context(|| format!("failed to write array `{}`", path.display()))
}

/// Reads a preprocessed array and checks it has the configured shape.
pub(crate) fn load_array(path: &Path, size: ImageSize) -> Result<Array3<f32>> {
  let array: Array3<f32> = read_npy(path)
    .with_context(|| format!("failed to read array `{}`", path.display()))?;

  let (height, width, channels) = size.shape();

  ensure!(
    array.dim() == (height, width, channels),
    "array `{}` has shape {:?}, expected {:?}",
    path.display(),
    array.shape(),
    [height, width, channels]
  );

  Ok(array)
}

/// Path of the array written for `image` inside `directory`.
pub(crate) fn array_path(directory: &Path, image: &Path) -> Result<PathBuf> {
  let stem = image
    .file_stem()
    .with_context(|| format!("`{}` has no file name", image.display()))?;

  let mut name = stem.to_os_string();
  name.push(".npy");

  Ok(directory.join(name))
}

/// Preprocesses one image, optionally persisting it to `save_dir`.
pub(crate) fn preprocess_single(
  path: &Path,
  size: ImageSize,
  save_dir: Option<&Path>,
) -> Result<(Array3<f32>, Option<PathBuf>)> {
  let array = preprocess_image(path, size)?;

  let Some(save_dir) = save_dir else {
    return Ok((array, None));
  };

  fs::create_dir_all(save_dir).with_context(|| {
    format!("failed to create directory `{}`", save_dir.display())
  })?;

  let destination = array_path(save_dir, path)?;

  save_array(&array, &destination)?;

  info!("preprocessed image saved at {}", destination.display());

  Ok((array, Some(destination)))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PreprocessedClass {
  pub(crate) split: String,
  pub(crate) class: String,
  pub(crate) processed: usize,
  pub(crate) failed: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PreprocessReport {
  pub(crate) classes: Vec<PreprocessedClass>,
}

impl PreprocessReport {
  pub(crate) fn processed(&self) -> usize {
    self.classes.iter().map(|class| class.processed).sum()
  }

  pub(crate) fn failed(&self) -> usize {
    self.classes.iter().map(|class| class.failed).sum()
  }
}

impl Display for PreprocessReport {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    for class in &self.classes {
      writeln!(
        f,
        "  {}/{}: {} preprocessed, {} failed",
        class.split, class.class, class.processed, class.failed
      )?;
    }

    write!(
      f,
      "Finished preprocessing: {} arrays written, {} images skipped",
      self.processed(),
      self.failed()
    )
  }
}

/// Preprocesses every split of `source` into `.npy` arrays under
/// `destination`, keeping the `<split>/<class>/` layout.
pub(crate) fn preprocess_dataset(
  source: &Path,
  destination: &Path,
  size: ImageSize,
) -> Result<PreprocessReport> {
  ensure!(
    source.is_dir(),
    "source directory `{}` does not exist",
    source.display()
  );

  let mut report = PreprocessReport::default();

  for split in SPLITS {
    let split_source = source.join(split);

    if !split_source.is_dir() {
      warn!("split directory {} does not exist", split_source.display());
      continue;
    }

    for class in list_class_dirs(&split_source)? {
      let class_source = split_source.join(&class);
      let class_destination = destination.join(split).join(&class);

      fs::create_dir_all(&class_destination).with_context(|| {
        format!(
          "failed to create directory `{}`",
          class_destination.display()
        )
      })?;

      let files = list_files(&class_source)?;

      let progress_bar = ProgressBar::new(files.len() as u64);

      progress_bar.set_style(
        ProgressStyle::default_bar()
          .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
          .progress_chars("=>-"),
      );

      progress_bar.set_message(format!("{split}/{class}"));

      let failed = files
        .par_iter()
        .map(|file| {
          let outcome = array_path(&class_destination, file).and_then(
            |target| save_array(&preprocess_image(file, size)?, &target),
          );

          progress_bar.inc(1);

          match outcome {
            Ok(()) => false,
            Err(error) => {
              warn!(
                "image {} could not be preprocessed, skipping: {error:#}",
                file.display()
              );
              true
            }
          }
        })
        .filter(|&failed| failed)
        .count();

      progress_bar.finish_and_clear();

      info!(
        "{split}/{class}: {} preprocessed, {failed} failed",
        files.len() - failed
      );

      report.classes.push(PreprocessedClass {
        split: split.to_string(),
        class,
        processed: files.len() - failed,
        failed,
      });
    }
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    approx::assert_relative_eq,
    image::{Rgb, RgbImage},
    tempdir::TempDir,
  };

  fn write_image(path: &Path, width: u32, height: u32, color: [u8; 3]) {
    RgbImage::from_pixel(width, height, Rgb(color)).save(path).unwrap();
  }

  #[test]
  fn array_path_keeps_dotted_stems() {
    assert_eq!(
      array_path(Path::new("out"), Path::new("in/leaf.v2.jpg")).unwrap(),
      Path::new("out").join("leaf.v2.npy")
    );
  }

  #[test]
  fn image_size_parsing() {
    assert_eq!(
      "224".parse::<ImageSize>().unwrap(),
      ImageSize {
        width: 224,
        height: 224
      }
    );

    assert_eq!(
      "64x32".parse::<ImageSize>().unwrap(),
      ImageSize {
        width: 64,
        height: 32
      }
    );

    assert!("0x32".parse::<ImageSize>().is_err());
    assert!("wide".parse::<ImageSize>().is_err());
    assert_eq!(ImageSize::default().to_string(), "224x224");
  }

  #[test]
  fn preprocessed_array_has_configured_shape_and_range() {
    let dir = TempDir::new("preprocess").unwrap();
    let path = dir.path().join("leaf.png");

    write_image(&path, 40, 30, [255, 0, 51]);

    let size = ImageSize {
      width: 16,
      height: 8,
    };

    let array = preprocess_image(&path, size).unwrap();

    assert_eq!(array.dim(), (8, 16, 3));
    assert!(array.iter().all(|&value| (0.0..=1.0).contains(&value)));
    assert_relative_eq!(array[[0, 0, 0]], 1.0, epsilon = 1e-6);
    assert_relative_eq!(array[[3, 7, 1]], 0.0, epsilon = 1e-6);
    assert_relative_eq!(array[[7, 15, 2]], 0.2, epsilon = 1e-6);
  }

  #[test]
  fn unreadable_image_is_an_error() {
    let dir = TempDir::new("preprocess").unwrap();
    let path = dir.path().join("broken.jpg");

    fs::write(&path, b"not an image").unwrap();

    assert!(preprocess_image(&path, ImageSize::default()).is_err());
  }

  #[test]
  fn single_image_is_saved_by_stem() {
    let dir = TempDir::new("preprocess").unwrap();
    let path = dir.path().join("scab 3417.jpg");

    write_image(&path, 10, 10, [10, 20, 30]);

    let size = ImageSize {
      width: 4,
      height: 4,
    };

    let save_dir = dir.path().join("out/apple_scab");

    let (array, saved) =
      preprocess_single(&path, size, Some(&save_dir)).unwrap();

    let saved = saved.unwrap();

    assert_eq!(saved, save_dir.join("scab 3417.npy"));

    let loaded = load_array(&saved, size).unwrap();

    assert_eq!(loaded, array);

    assert!(load_array(&saved, ImageSize::default()).is_err());
  }

  #[test]
  fn dataset_is_preprocessed_per_split_and_class() {
    let dir = TempDir::new("preprocess").unwrap();
    let source = dir.path().join("split");
    let destination = dir.path().join("arrays");

    for (split, class, count) in
      [("train", "healthy", 3), ("val", "healthy", 1), ("test", "black_rot", 2)]
    {
      let class_dir = source.join(split).join(class);
      fs::create_dir_all(&class_dir).unwrap();

      for index in 0..count {
        write_image(
          &class_dir.join(format!("{index}.png")),
          12,
          12,
          [0, 128, 0],
        );
      }
    }

    fs::write(source.join("train/healthy/corrupt.jpg"), b"garbage").unwrap();

    let size = ImageSize {
      width: 6,
      height: 6,
    };

    let report = preprocess_dataset(&source, &destination, size).unwrap();

    assert_eq!(report.processed(), 6);
    assert_eq!(report.failed(), 1);

    let arrays = list_arrays(&destination.join("train/healthy")).unwrap();

    assert_eq!(arrays.len(), 3);

    for path in arrays {
      assert_eq!(load_array(&path, size).unwrap().dim(), (6, 6, 3));
    }

    assert_eq!(
      list_arrays(&destination.join("test/black_rot"))
        .unwrap()
        .len(),
      2
    );
  }
}
