use super::*;

const PROBABILITY_FLOOR: f32 = 1e-7;

pub(crate) fn argmax<D>(x: &ArrayView<f32, D>) -> usize
where
  D: Dimension,
{
  x.iter()
    .enumerate()
    .max_by(|(_, a), (_, b)| a.total_cmp(b))
    .map(|(index, _)| index)
    .unwrap_or(0)
}

pub(crate) fn relu(x: f32) -> f32 {
  x.max(0.0)
}

pub(crate) fn relu_derivative(x: f32) -> f32 {
  if x > 0.0 {
    1.0
  } else {
    0.0
  }
}

/// Row-wise softmax over a `(batch, classes)` matrix.
pub(crate) fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
  let mut probabilities = logits.to_owned();

  for mut row in probabilities.rows_mut() {
    let max = row.fold(f32::NEG_INFINITY, |max, &value| max.max(value));
    row.mapv_inplace(|value| (value - max).exp());
    let sum = row.sum();
    row.mapv_inplace(|value| value / sum);
  }

  probabilities
}

/// Weighted sparse categorical cross-entropy.
///
/// Returns the mean loss over the batch and its gradient with respect to the
/// logits that produced `probabilities`. Each sample's term is scaled by the
/// weight of its class.
pub(crate) fn cross_entropy(
  probabilities: ArrayView2<f32>,
  labels: &[usize],
  class_weights: Option<&[f32]>,
) -> Result<(f32, Array2<f32>)> {
  let (batch_size, classes) = probabilities.dim();

  ensure!(
    batch_size == labels.len(),
    "batch has {batch_size} predictions but {} labels",
    labels.len()
  );

  ensure!(batch_size > 0, "cannot compute loss of an empty batch");

  let mut gradient = probabilities.to_owned();
  let mut loss = 0.0;

  for (row, &label) in labels.iter().enumerate() {
    ensure!(
      label < classes,
      "label {label} out of range for {classes} classes"
    );

    let weight = match class_weights {
      Some(weights) => weights.get(label).copied().with_context(|| {
        format!("missing class weight for label {label}")
      })?,
      None => 1.0,
    };

    loss -= weight * probabilities[[row, label]].max(PROBABILITY_FLOOR).ln();

    gradient[[row, label]] -= 1.0;
    gradient.row_mut(row).mapv_inplace(|value| value * weight);
  }

  let scale = 1.0 / batch_size as f32;

  gradient.mapv_inplace(|value| value * scale);

  Ok((loss * scale, gradient))
}

pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
  match seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_entropy(),
  }
}
