use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Count {
  #[clap(help = "Dataset directory, with or without train/val/test splits")]
  directory: PathBuf,
}

impl Count {
  pub(crate) fn run(self) -> Result {
    let splits = SPLITS
      .iter()
      .filter(|split| self.directory.join(split).is_dir())
      .collect::<Vec<_>>();

    if splits.is_empty() {
      let total = Self::print_counts(&self.directory, "")?;
      println!("Total: {total} images");
      return Ok(());
    }

    for split in splits {
      println!("--- {} ---", split.to_uppercase());
      let total = Self::print_counts(&self.directory.join(split), "  ")?;
      println!("  Total: {total} images");
    }

    Ok(())
  }

  fn print_counts(directory: &Path, indent: &str) -> Result<usize> {
    let counts = count_files(directory)?;

    for (class, count) in &counts {
      println!("{indent}{class}: {count} images");
    }

    Ok(counts.iter().map(|(_, count)| count).sum())
  }
}

#[cfg(test)]
mod tests {
  use {super::*, tempdir::TempDir};

  fn touch(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();

    for name in names {
      fs::write(dir.join(name), "").unwrap();
    }
  }

  #[test]
  fn counts_a_flat_dataset_per_class() {
    let dir = TempDir::new("count").unwrap();

    touch(&dir.path().join("healthy"), &["a.jpg", "b.jpg", "c.jpg"]);
    touch(&dir.path().join("apple_scab"), &["a.jpg"]);

    assert_eq!(Count::print_counts(dir.path(), "").unwrap(), 4);

    Count {
      directory: dir.path().to_path_buf(),
    }
    .run()
    .unwrap();
  }

  #[test]
  fn counts_each_split_separately() {
    let dir = TempDir::new("count").unwrap();

    touch(&dir.path().join("train/healthy"), &["a.jpg", "b.jpg"]);
    touch(&dir.path().join("train/black_rot"), &["a.jpg"]);
    touch(&dir.path().join("test/healthy"), &["c.jpg"]);

    assert_eq!(
      Count::print_counts(&dir.path().join("train"), "  ").unwrap(),
      3
    );
    assert_eq!(
      Count::print_counts(&dir.path().join("test"), "  ").unwrap(),
      1
    );

    Count {
      directory: dir.path().to_path_buf(),
    }
    .run()
    .unwrap();
  }

  #[test]
  fn missing_directories_are_an_error() {
    let dir = TempDir::new("count").unwrap();

    assert!(Count::print_counts(&dir.path().join("missing"), "").is_err());
  }
}
