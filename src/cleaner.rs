use super::*;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CleanedClass {
  pub(crate) class: String,
  pub(crate) listed: usize,
  pub(crate) written: usize,
  pub(crate) failed: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CleanReport {
  pub(crate) classes: Vec<CleanedClass>,
  pub(crate) missing: Vec<String>,
}

impl Display for CleanReport {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    for class in &self.classes {
      writeln!(
        f,
        "  {}: {} of {} images copied, {} not copied",
        class.class, class.written, class.listed, class.failed
      )?;
    }

    for class in &self.missing {
      writeln!(f, "  {class}: folder does not exist in original dataset")?;
    }

    Ok(())
  }
}

/// Decodes `from` and writes it back out to `to`, in the format implied by
/// the extension of `to`.
fn reencode(from: &Path, to: &Path) -> Result {
  let image = image::open(from)
    .with_context(|| format!("failed to decode `{}`", from.display()))?;

  let format = ImageFormat::from_path(to)
    .with_context(|| format!("unsupported output format `{}`", to.display()))?;

  let image = match format {
    ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
    _ => image,
  };

  image
    .save_with_format(to, format)
    .with_context(|| format!("failed to encode `{}`", to.display()))
}

/// Copies every decodable image of the known `classes` from `source` into
/// `destination`, re-encoding each one so that only readable images survive.
pub(crate) fn clean_dataset(
  source: &Path,
  destination: &Path,
  classes: &[String],
) -> Result<CleanReport> {
  ensure!(
    source.is_dir(),
    "original dataset directory `{}` does not exist",
    source.display()
  );

  fs::create_dir_all(destination).with_context(|| {
    format!("failed to create directory `{}`", destination.display())
  })?;

  let mut report = CleanReport::default();

  for class in classes {
    let class_source = source.join(class);
    let class_destination = destination.join(class);

    if !class_source.is_dir() {
      warn!("folder {class} does not exist in original dataset");
      report.missing.push(class.clone());
      continue;
    }

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

    progress_bar.set_message(class.clone());

    let written = files
      .par_iter()
      .filter(|file| {
        let outcome = file
          .file_name()
          .context("file has no name")
          .and_then(|name| reencode(file, &class_destination.join(name)));

        progress_bar.inc(1);

        match outcome {
          Ok(()) => true,
          Err(error) => {
            warn!("image {} not copied: {error:#}", file.display());
            false
          }
        }
      })
      .count();

    progress_bar.finish_and_clear();

    info!("{class}: {written} of {} images copied", files.len());

    report.classes.push(CleanedClass {
      class: class.clone(),
      listed: files.len(),
      written,
      failed: files.len() - written,
    });
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage},
    tempdir::TempDir,
  };

  #[test]
  fn unreadable_images_are_skipped() {
    let dir = TempDir::new("cleaner").unwrap();
    let source = dir.path().join("raw");
    let destination = dir.path().join("cleaned");

    fs::create_dir_all(source.join("black_rot")).unwrap();

    RgbImage::from_pixel(8, 8, Rgb([120, 30, 30]))
      .save(source.join("black_rot/a.png"))
      .unwrap();

    RgbImage::from_pixel(8, 8, Rgb([120, 30, 30]))
      .save(source.join("black_rot/b.jpg"))
      .unwrap();

    fs::write(source.join("black_rot/c.jpg"), b"truncated").unwrap();

    let report = clean_dataset(
      &source,
      &destination,
      &["black_rot".to_string(), "healthy".to_string()],
    )
    .unwrap();

    assert_eq!(
      report.classes,
      vec![CleanedClass {
        class: "black_rot".into(),
        listed: 3,
        written: 2,
        failed: 1,
      }]
    );

    assert_eq!(report.missing, vec!["healthy".to_string()]);

    assert!(destination.join("black_rot/a.png").is_file());
    assert!(destination.join("black_rot/b.jpg").is_file());
    assert!(!destination.join("black_rot/c.jpg").exists());
    assert!(!destination.join("healthy").exists());

    image::open(destination.join("black_rot/b.jpg")).unwrap();
  }

  #[test]
  fn alpha_is_dropped_for_jpeg_output() {
    let dir = TempDir::new("cleaner").unwrap();
    let source = dir.path().join("leaf.png");
    let target = dir.path().join("leaf.jpg");

    RgbaImage::from_pixel(4, 4, Rgba([10, 200, 10, 128]))
      .save(&source)
      .unwrap();

    reencode(&source, &target).unwrap();

    assert_eq!(image::open(&target).unwrap().dimensions(), (4, 4));
  }

  #[test]
  fn missing_source_is_an_error() {
    let dir = TempDir::new("cleaner").unwrap();

    assert!(clean_dataset(
      &dir.path().join("missing"),
      &dir.path().join("cleaned"),
      &["healthy".to_string()],
    )
    .is_err());
  }
}
