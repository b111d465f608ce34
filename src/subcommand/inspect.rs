use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Inspect {
  #[clap(help = "A `.npy` array or an image")]
  path: PathBuf,
}

#[derive(Debug, PartialEq)]
struct ArraySummary {
  dtype: &'static str,
  shape: Vec<usize>,
  range: Option<(f64, f64, f64)>,
}

impl Display for ArraySummary {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    writeln!(f, "Shape: {:?}", self.shape)?;
    write!(f, "Data type: {}", self.dtype)?;

    if let Some((min, max, mean)) = self.range {
      write!(f, "\nMin: {min:.4}\nMax: {max:.4}\nMean: {mean:.4}")?;
    }

    Ok(())
  }
}

fn read_as<T: ReadableElement + Clone>(
  path: &Path,
  convert: fn(T) -> f64,
) -> Option<ArrayD<f64>> {
  read_npy::<_, ArrayD<T>>(path)
    .ok()
    .map(|array| array.mapv(convert))
}

/// Reads an `.npy` file of any numeric dtype, widened to `f64`.
fn read_numeric(path: &Path) -> Result<(&'static str, ArrayD<f64>)> {
  let read = read_as::<f32>(path, f64::from)
    .map(|array| ("float32", array))
    .or_else(|| read_as::<f64>(path, |value| value).map(|a| ("float64", a)))
    .or_else(|| read_as::<u8>(path, f64::from).map(|a| ("uint8", a)))
    .or_else(|| read_as::<u16>(path, f64::from).map(|a| ("uint16", a)))
    .or_else(|| read_as::<u32>(path, f64::from).map(|a| ("uint32", a)))
    .or_else(|| {
      read_as::<u64>(path, |value| value as f64).map(|a| ("uint64", a))
    })
    .or_else(|| read_as::<i8>(path, f64::from).map(|a| ("int8", a)))
    .or_else(|| read_as::<i16>(path, f64::from).map(|a| ("int16", a)))
    .or_else(|| read_as::<i32>(path, f64::from).map(|a| ("int32", a)))
    .or_else(|| {
      read_as::<i64>(path, |value| value as f64).map(|a| ("int64", a))
    });

  match read {
    Some(read) => Ok(read),
    None => {
      read_npy::<_, ArrayD<f32>>(path).with_context(|| {
        format!("failed to read array `{}`", path.display())
      })?;

      bail!("array `{}` has an unsupported data type", path.display())
    }
  }
}

fn summarize(path: &Path) -> Result<ArraySummary> {
  let (dtype, array) = read_numeric(path)?;

  let range = array.mean().map(|mean| {
    let min = array.fold(f64::INFINITY, |min, &value| min.min(value));
    let max = array.fold(f64::NEG_INFINITY, |max, &value| max.max(value));
    (min, max, mean)
  });

  Ok(ArraySummary {
    dtype,
    shape: array.shape().to_vec(),
    range,
  })
}

impl Inspect {
  pub(crate) fn run(self) -> Result {
    if is_array(&self.path) {
      println!("{}", summarize(&self.path)?);
    } else {
      let image = image::open(&self.path).with_context(|| {
        format!("failed to load image `{}`", self.path.display())
      })?;

      println!("Dimensions: {}x{}", image.width(), image.height());
      println!("Color type: {:?}", image.color());

      if image.width() > 0 && image.height() > 0 {
        println!("First pixel (RGB): {:?}", image.to_rgb8().get_pixel(0, 0).0);
      }
    }

    Ok(())
  }
}
