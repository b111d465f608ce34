use super::*;

/// Adam with the Keras defaults for `beta1`, `beta2` and `epsilon`.
#[derive(Clone, Debug)]
pub(crate) struct Adam {
  learning_rate: f32,
  beta1: f32,
  beta2: f32,
  epsilon: f32,
  step: i32,
  moments: Vec<(ArrayD<f32>, ArrayD<f32>)>,
}

impl Adam {
  pub(crate) fn new(learning_rate: f32) -> Self {
    Self {
      learning_rate,
      beta1: 0.9,
      beta2: 0.999,
      epsilon: 1e-7,
      step: 0,
      moments: Vec::new(),
    }
  }

  pub(crate) fn learning_rate(&self) -> f32 {
    self.learning_rate
  }

  pub(crate) fn set_learning_rate(&mut self, learning_rate: f32) {
    self.learning_rate = learning_rate;
  }

  /// Applies one update to `parameters` from their accumulated gradients.
  /// The same parameters must be passed, in the same order, on every step.
  pub(crate) fn step(&mut self, parameters: Vec<&mut Parameter>) -> Result {
    if self.moments.is_empty() {
      self.moments = parameters
        .iter()
        .map(|parameter| {
          (
            ArrayD::zeros(parameter.value.raw_dim()),
            ArrayD::zeros(parameter.value.raw_dim()),
          )
        })
        .collect();
    }

    ensure!(
      self.moments.len() == parameters.len(),
      "optimizer tracks {} parameters, got {}",
      self.moments.len(),
      parameters.len()
    );

    self.step += 1;

    let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

    let step_size = self.learning_rate * (1.0 - beta2.powi(self.step)).sqrt()
      / (1.0 - beta1.powi(self.step));

    for (parameter, (first, second)) in
      parameters.into_iter().zip(&mut self.moments)
    {
      ensure!(
        parameter.gradient.shape() == parameter.value.shape(),
        "gradient shape {:?} does not match parameter shape {:?}",
        parameter.gradient.shape(),
        parameter.value.shape()
      );

      Zip::from(&mut parameter.value)
        .and(&parameter.gradient)
        .and(first)
        .and(second)
        .for_each(|value, &gradient, first, second| {
          *first = beta1 * *first + (1.0 - beta1) * gradient;
          *second = beta2 * *second + (1.0 - beta2) * gradient * gradient;
          *value -= step_size * *first / (second.sqrt() + epsilon);
        });
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use {super::*, approx::assert_relative_eq, ndarray::array};

  fn parameter(value: ArrayD<f32>, gradient: ArrayD<f32>) -> Parameter {
    Parameter { value, gradient }
  }

  #[test]
  fn first_step_moves_by_the_learning_rate() {
    let mut adam = Adam::new(0.1);

    let mut weights = parameter(
      array![1.0f32, -1.0, 0.0].into_dyn(),
      array![3.0f32, -0.5, 0.0].into_dyn(),
    );

    adam.step(vec![&mut weights]).unwrap();

    assert_relative_eq!(weights.value[[0]], 0.9, epsilon = 1e-5);
    assert_relative_eq!(weights.value[[1]], -0.9, epsilon = 1e-5);
    assert_relative_eq!(weights.value[[2]], 0.0);
  }

  #[test]
  fn minimizes_a_quadratic() {
    let mut adam = Adam::new(0.05);

    let mut x = parameter(array![4.0f32].into_dyn(), array![0.0f32].into_dyn());

    for _ in 0..2000 {
      x.gradient = x.value.mapv(|value| 2.0 * (value - 1.5));
      adam.step(vec![&mut x]).unwrap();
    }

    assert_relative_eq!(x.value[[0]], 1.5, epsilon = 5e-2);
  }

  #[test]
  fn parameter_count_must_not_change() {
    let mut adam = Adam::new(0.1);

    let mut a = parameter(array![1.0f32].into_dyn(), array![1.0f32].into_dyn());
    let mut b = parameter(array![1.0f32].into_dyn(), array![1.0f32].into_dyn());

    adam.step(vec![&mut a]).unwrap();

    assert!(adam.step(vec![&mut a, &mut b]).is_err());
  }

  #[test]
  fn learning_rate_can_be_changed() {
    let mut adam = Adam::new(1e-4);
    adam.set_learning_rate(2e-5);
    assert_relative_eq!(adam.learning_rate(), 2e-5);
  }
}
