use super::*;

pub(crate) const DEFAULT_CLASSES: [&str; 4] =
  ["apple_scab", "black_rot", "cedar_apple_rust", "healthy"];

const IMAGE_EXTENSIONS: [&str; 8] =
  ["bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp"];

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
  path
    .extension()
    .and_then(|extension| extension.to_str())
    .map(|extension| extensions.contains(&extension.to_lowercase().as_str()))
    .unwrap_or(false)
}

pub(crate) fn is_image(path: &Path) -> bool {
  has_extension(path, &IMAGE_EXTENSIONS)
}

pub(crate) fn is_array(path: &Path) -> bool {
  has_extension(path, &["npy"])
}

/// Names of the directories directly below `root`, sorted.
pub(crate) fn list_class_dirs(root: &Path) -> Result<Vec<String>> {
  if !root.is_dir() {
    bail!("directory `{}` does not exist", root.display());
  }

  let mut classes = Vec::new();

  for entry in WalkDir::new(root)
    .min_depth(1)
    .max_depth(1)
    .sort_by_file_name()
  {
    let entry = entry.with_context(|| {
      format!("failed to read directory `{}`", root.display())
    })?;

    if !entry.file_type().is_dir() {
      debug!("skipping non-directory {}", entry.path().display());
      continue;
    }

    match entry.file_name().to_str() {
      Some(name) => classes.push(name.to_string()),
      None => warn!("skipping non-UTF-8 directory {}", entry.path().display()),
    }
  }

  Ok(classes)
}

/// Regular files directly inside `dir`, sorted by file name.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut files = Vec::new();

  for entry in WalkDir::new(dir)
    .min_depth(1)
    .max_depth(1)
    .sort_by_file_name()
  {
    let entry = entry.with_context(|| {
      format!("failed to read directory `{}`", dir.display())
    })?;

    if entry.file_type().is_file() {
      files.push(entry.into_path());
    }
  }

  Ok(files)
}

pub(crate) fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
  Ok(
    list_files(dir)?
      .into_iter()
      .filter(|path| is_image(path))
      .collect(),
  )
}

pub(crate) fn list_arrays(dir: &Path) -> Result<Vec<PathBuf>> {
  Ok(
    list_files(dir)?
      .into_iter()
      .filter(|path| is_array(path))
      .collect(),
  )
}

/// Number of files inside every class directory of `root`.
pub(crate) fn count_files(root: &Path) -> Result<Vec<(String, usize)>> {
  list_class_dirs(root)?
    .into_iter()
    .map(|class| {
      let count = list_files(&root.join(&class))?.len();
      Ok((class, count))
    })
    .collect()
}

/// Ordered class names. Index `i` in the list is the integer label `i`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub(crate) struct LabelMap {
  names: Vec<String>,
}

impl TryFrom<Vec<String>> for LabelMap {
  type Error = anyhow::Error;

  fn try_from(names: Vec<String>) -> Result<Self> {
    Self::new(names)
  }
}

impl From<LabelMap> for Vec<String> {
  fn from(labels: LabelMap) -> Self {
    labels.names
  }
}

impl LabelMap {
  pub(crate) fn new(names: Vec<String>) -> Result<Self> {
    ensure!(!names.is_empty(), "label map must contain at least one class");

    let mut seen = HashSet::new();

    for name in &names {
      ensure!(seen.insert(name), "duplicate class `{name}` in label map");
    }

    Ok(Self { names })
  }

  /// Builds the label map from the sorted class directories of `root`.
  pub(crate) fn from_dir(root: &Path) -> Result<Self> {
    Self::new(list_class_dirs(root)?).with_context(|| {
      format!("no class directories found in `{}`", root.display())
    })
  }

  pub(crate) fn len(&self) -> usize {
    self.names.len()
  }

  pub(crate) fn names(&self) -> &[String] {
    &self.names
  }

  pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
    self.names.iter().position(|candidate| candidate == name)
  }

  pub(crate) fn name_of(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  /// Fails when the class directories of `root` disagree with this map.
  pub(crate) fn verify_against(&self, root: &Path) -> Result {
    let listed = list_class_dirs(root)?;

    if listed != self.names {
      bail!(
        "class directories of `{}` ({}) do not match the model's label map \
         ({})",
        root.display(),
        listed.join(", "),
        self.names.join(", ")
      );
    }

    Ok(())
  }
}
