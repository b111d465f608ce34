use super::*;

/// Random geometric augmentation applied to training images.
///
/// Every call draws one affine transform (rotation, shear, zoom and shift
/// around the image centre) and resamples the image through its inverse
/// with bilinear interpolation. Coordinates that fall outside the image are
/// clamped to the nearest edge pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Augmentation {
  /// Maximum rotation, in degrees.
  pub(crate) rotation: f32,
  /// Maximum horizontal shift, as a fraction of the width.
  pub(crate) width_shift: f32,
  /// Maximum vertical shift, as a fraction of the height.
  pub(crate) height_shift: f32,
  /// Maximum shear angle, in degrees.
  pub(crate) shear: f32,
  pub(crate) zoom: (f32, f32),
  pub(crate) horizontal_flip: bool,
}

impl Default for Augmentation {
  fn default() -> Self {
    Self {
      rotation: 20.0,
      width_shift: 0.2,
      height_shift: 0.2,
      shear: 0.2,
      zoom: (0.8, 1.2),
      horizontal_flip: true,
    }
  }
}

struct Transform {
  matrix: [[f32; 2]; 2],
  offset: (f32, f32),
  flip: bool,
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
  if range > 0.0 {
    rng.gen_range(-range..=range)
  } else {
    0.0
  }
}

impl Augmentation {
  #[cfg(test)]
  pub(crate) fn none() -> Self {
    Self {
      rotation: 0.0,
      width_shift: 0.0,
      height_shift: 0.0,
      shear: 0.0,
      zoom: (1.0, 1.0),
      horizontal_flip: false,
    }
  }

  fn sample<R: Rng>(
    &self,
    height: usize,
    width: usize,
    rng: &mut R,
  ) -> Transform {
    let theta = symmetric(rng, self.rotation).to_radians();
    let row_shift = symmetric(rng, self.height_shift) * height as f32;
    let col_shift = symmetric(rng, self.width_shift) * width as f32;
    let shear = symmetric(rng, self.shear).to_radians();

    let (low, high) = self.zoom;
    let (zoom_rows, zoom_cols) = if low < high {
      (rng.gen_range(low..=high), rng.gen_range(low..=high))
    } else {
      (low, low)
    };

    let flip = self.horizontal_flip && rng.gen_bool(0.5);

    let (sin, cos) = theta.sin_cos();
    let rotation = [[cos, -sin], [sin, cos]];
    let shearing = [[1.0, -shear.sin()], [0.0, shear.cos()]];
    let zooming = [[zoom_rows, 0.0], [0.0, zoom_cols]];

    Transform {
      matrix: multiply(multiply(rotation, shearing), zooming),
      offset: (row_shift, col_shift),
      flip,
    }
  }

  /// Returns a randomly transformed copy of an `(height, width, channels)`
  /// image.
  pub(crate) fn apply<R: Rng>(
    &self,
    image: ArrayView3<f32>,
    rng: &mut R,
  ) -> Array3<f32> {
    let (height, width, channels) = image.dim();

    if height == 0 || width == 0 {
      return image.to_owned();
    }

    let Transform {
      matrix,
      offset,
      flip,
    } = self.sample(height, width, rng);

    let center = ((height - 1) as f32 / 2.0, (width - 1) as f32 / 2.0);
    let (last_row, last_col) = ((height - 1) as f32, (width - 1) as f32);

    let mut output = Array3::zeros((height, width, channels));

    for row in 0..height {
      for col in 0..width {
        let y = row as f32 - center.0;
        let x = col as f32 - center.1;

        let source_row = (matrix[0][0] * y + matrix[0][1] * x + center.0
          + offset.0)
          .clamp(0.0, last_row);

        let source_col = (matrix[1][0] * y + matrix[1][1] * x + center.1
          + offset.1)
          .clamp(0.0, last_col);

        let top = source_row.floor() as usize;
        let left = source_col.floor() as usize;
        let bottom = (top + 1).min(height - 1);
        let right = (left + 1).min(width - 1);

        let (fy, fx) = (source_row - top as f32, source_col - left as f32);

        let target_col = if flip { width - 1 - col } else { col };

        for channel in 0..channels {
          let upper = image[[top, left, channel]] * (1.0 - fx)
            + image[[top, right, channel]] * fx;

          let lower = image[[bottom, left, channel]] * (1.0 - fx)
            + image[[bottom, right, channel]] * fx;

          output[[row, target_col, channel]] = upper * (1.0 - fy) + lower * fy;
        }
      }
    }

    output
  }
}

fn multiply(a: [[f32; 2]; 2], b: [[f32; 2]; 2]) -> [[f32; 2]; 2] {
  [
    [
      a[0][0] * b[0][0] + a[0][1] * b[1][0],
      a[0][0] * b[0][1] + a[0][1] * b[1][1],
    ],
    [
      a[1][0] * b[0][0] + a[1][1] * b[1][0],
      a[1][0] * b[0][1] + a[1][1] * b[1][1],
    ],
  ]
}

#[cfg(test)]
mod tests {
  use {super::*, approx::assert_relative_eq};

  fn gradient_image() -> Array3<f32> {
    Array3::from_shape_fn((6, 8, 3), |(row, col, channel)| {
      (row * 8 + col) as f32 / 48.0 + channel as f32 * 0.01
    })
  }

  #[test]
  fn no_augmentation_is_identity() {
    let image = gradient_image();

    let output =
      Augmentation::none().apply(image.view(), &mut rng_from_seed(Some(1)));

    assert_eq!(output, image);
  }

  #[test]
  fn flip_mirrors_columns() {
    let image = gradient_image();

    let mut mirrored = image.clone();
    mirrored.invert_axis(Axis(1));

    let augmentation = Augmentation {
      horizontal_flip: true,
      ..Augmentation::none()
    };

    let mut rng = rng_from_seed(Some(5));
    let (mut flipped, mut kept) = (0, 0);

    for _ in 0..32 {
      let output = augmentation.apply(image.view(), &mut rng);

      if output == mirrored {
        flipped += 1;
      } else {
        assert_eq!(output, image);
        kept += 1;
      }
    }

    assert!(flipped > 0 && kept > 0);
  }

  #[test]
  fn output_stays_within_input_range() {
    let image = gradient_image();
    let (min, max) = (0.0, image.fold(0.0f32, |max, &value| max.max(value)));

    let mut rng = rng_from_seed(Some(9));

    for _ in 0..10 {
      let output = Augmentation::default().apply(image.view(), &mut rng);

      assert_eq!(output.dim(), image.dim());
      assert!(output
        .iter()
        .all(|&value| value >= min - 1e-5 && value <= max + 1e-5));
    }
  }

  #[test]
  fn constant_images_stay_constant() {
    let image = Array3::from_elem((5, 5, 3), 0.4f32);

    let output =
      Augmentation::default().apply(image.view(), &mut rng_from_seed(Some(2)));

    for &value in output.iter() {
      assert_relative_eq!(value, 0.4, epsilon = 1e-5);
    }
  }

  #[test]
  fn seeded_augmentation_is_reproducible() {
    let image = gradient_image();
    let augmentation = Augmentation::default();

    assert_eq!(
      augmentation.apply(image.view(), &mut rng_from_seed(Some(3))),
      augmentation.apply(image.view(), &mut rng_from_seed(Some(3)))
    );
  }
}
