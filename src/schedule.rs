use super::*;

/// Tracks the best value of a loss and how many epochs have passed without
/// improving on it by more than `min_delta`.
#[derive(Clone, Debug)]
struct Monitor {
  min_delta: f32,
  best: Option<f32>,
  wait: usize,
}

impl Monitor {
  fn new(min_delta: f32) -> Self {
    Self {
      min_delta,
      best: None,
      wait: 0,
    }
  }

  fn observe(&mut self, loss: f32) -> bool {
    let improved = match self.best {
      Some(best) => loss < best - self.min_delta,
      None => loss.is_finite(),
    };

    if improved {
      self.best = Some(loss);
      self.wait = 0;
    } else {
      self.wait += 1;
    }

    improved
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Progress {
  Improved,
  Waiting,
  Stop,
}

/// Stops training once the monitored loss has not improved for `patience`
/// consecutive epochs.
#[derive(Clone, Debug)]
pub(crate) struct EarlyStopping {
  patience: usize,
  monitor: Monitor,
}

impl EarlyStopping {
  pub(crate) fn new(patience: usize) -> Self {
    Self {
      patience,
      monitor: Monitor::new(0.0),
    }
  }

  pub(crate) fn best(&self) -> Option<f32> {
    self.monitor.best
  }

  pub(crate) fn update(&mut self, loss: f32) -> Progress {
    if self.monitor.observe(loss) {
      Progress::Improved
    } else if self.monitor.wait >= self.patience {
      Progress::Stop
    } else {
      Progress::Waiting
    }
  }
}

/// Multiplies the learning rate by `factor` once the monitored loss has not
/// improved for `patience` consecutive epochs, never going below `min_lr`.
#[derive(Clone, Debug)]
pub(crate) struct ReduceLrOnPlateau {
  factor: f32,
  patience: usize,
  min_lr: f32,
  monitor: Monitor,
}

impl ReduceLrOnPlateau {
  pub(crate) fn new(factor: f32, patience: usize, min_lr: f32) -> Self {
    Self {
      factor,
      patience,
      min_lr,
      monitor: Monitor::new(1e-4),
    }
  }

  /// Returns the reduced learning rate when `loss` ends a plateau.
  pub(crate) fn update(
    &mut self,
    loss: f32,
    learning_rate: f32,
  ) -> Option<f32> {
    if self.monitor.observe(loss) || self.monitor.wait < self.patience {
      return None;
    }

    self.monitor.wait = 0;

    if learning_rate > self.min_lr {
      Some((learning_rate * self.factor).max(self.min_lr))
    } else {
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, approx::assert_relative_eq};

  #[test]
  fn early_stopping_waits_for_patience() {
    let mut early = EarlyStopping::new(2);

    assert_eq!(early.update(1.0), Progress::Improved);
    assert_eq!(early.update(0.8), Progress::Improved);
    assert_eq!(early.update(0.8), Progress::Waiting);
    assert_eq!(early.update(0.7), Progress::Improved);
    assert_eq!(early.update(0.9), Progress::Waiting);
    assert_eq!(early.update(0.75), Progress::Stop);
    assert_eq!(early.best(), Some(0.7));
  }

  #[test]
  fn non_finite_losses_never_improve() {
    let mut early = EarlyStopping::new(1);

    assert_eq!(early.update(f32::NAN), Progress::Stop);
    assert_eq!(early.best(), None);
  }

  #[test]
  fn plateau_reduces_learning_rate_down_to_the_floor() {
    let mut plateau = ReduceLrOnPlateau::new(0.2, 2, 1e-5);

    assert_eq!(plateau.update(1.0, 1e-4), None);
    assert_eq!(plateau.update(1.0, 1e-4), None);

    let reduced = plateau.update(1.0, 1e-4).unwrap();
    assert_relative_eq!(reduced, 2e-5);

    assert_eq!(plateau.update(1.0, reduced), None);

    let floor = plateau.update(1.0, reduced).unwrap();
    assert_relative_eq!(floor, 1e-5);

    plateau.update(1.0, floor);
    assert_eq!(plateau.update(1.0, floor), None);
  }

  #[test]
  fn tiny_improvements_count_as_a_plateau() {
    let mut plateau = ReduceLrOnPlateau::new(0.5, 1, 0.0);

    assert_eq!(plateau.update(1.0, 0.1), None);
    assert_eq!(plateau.update(0.99995, 0.1), Some(0.05));
    assert_eq!(plateau.update(0.5, 0.05), None);
  }
}
