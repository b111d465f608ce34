use super::*;

/// Counts of `(actual, predicted)` class pairs.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ConfusionMatrix {
  names: Vec<String>,
  counts: Array2<usize>,
}

impl ConfusionMatrix {
  pub(crate) fn new(labels: &LabelMap) -> Self {
    Self {
      names: labels.names().to_vec(),
      counts: Array2::zeros((labels.len(), labels.len())),
    }
  }

  pub(crate) fn record(&mut self, actual: usize, predicted: usize) -> Result {
    let classes = self.names.len();

    ensure!(
      actual < classes && predicted < classes,
      "class pair ({actual}, {predicted}) out of range for {classes} classes"
    );

    self.counts[[actual, predicted]] += 1;

    Ok(())
  }

  pub(crate) fn total(&self) -> usize {
    self.counts.sum()
  }

  pub(crate) fn correct(&self) -> usize {
    self.counts.diag().sum()
  }

  pub(crate) fn accuracy(&self) -> f32 {
    ratio(self.correct(), self.total())
  }

  pub(crate) fn support(&self, class: usize) -> usize {
    self.counts.row(class).sum()
  }

  pub(crate) fn precision(&self, class: usize) -> f32 {
    ratio(self.counts[[class, class]], self.counts.column(class).sum())
  }

  pub(crate) fn recall(&self, class: usize) -> f32 {
    ratio(self.counts[[class, class]], self.support(class))
  }

  pub(crate) fn f1(&self, class: usize) -> f32 {
    let (precision, recall) = (self.precision(class), self.recall(class));

    if precision + recall == 0.0 {
      0.0
    } else {
      2.0 * precision * recall / (precision + recall)
    }
  }

  fn averages(&self) -> ([f32; 3], [f32; 3]) {
    let classes = self.names.len();
    let total = self.total();

    let mut macro_average = [0.0; 3];
    let mut weighted_average = [0.0; 3];

    for class in 0..classes {
      let scores = [self.precision(class), self.recall(class), self.f1(class)];
      let weight = ratio(self.support(class), total);

      for (index, score) in scores.into_iter().enumerate() {
        macro_average[index] += score / classes as f32;
        weighted_average[index] += score * weight;
      }
    }

    (macro_average, weighted_average)
  }
}

fn ratio(numerator: usize, denominator: usize) -> f32 {
  if denominator == 0 {
    0.0
  } else {
    numerator as f32 / denominator as f32
  }
}

impl Display for ConfusionMatrix {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    let width = self
      .names
      .iter()
      .map(String::len)
      .chain(["weighted avg".len()])
      .max()
      .unwrap_or(0);

    writeln!(f, "Confusion matrix (rows: actual, columns: predicted):")?;

    for (name, row) in self.names.iter().zip(self.counts.rows()) {
      write!(f, "{name:>width$}")?;

      for count in row {
        write!(f, " {count:>6}")?;
      }

      writeln!(f)?;
    }

    writeln!(f)?;

    writeln!(
      f,
      "{:>width$} {:>10} {:>10} {:>10} {:>10}",
      "", "precision", "recall", "f1-score", "support"
    )?;

    for (class, name) in self.names.iter().enumerate() {
      writeln!(
        f,
        "{name:>width$} {:>10.2} {:>10.2} {:>10.2} {:>10}",
        self.precision(class),
        self.recall(class),
        self.f1(class),
        self.support(class)
      )?;
    }

    writeln!(f)?;

    let total = self.total();

    writeln!(
      f,
      "{:>width$} {:>10} {:>10} {:>10.2} {total:>10}",
      "accuracy",
      "",
      "",
      self.accuracy()
    )?;

    let (macro_average, weighted_average) = self.averages();

    for (label, [precision, recall, f1]) in
      [("macro avg", macro_average), ("weighted avg", weighted_average)]
    {
      writeln!(
        f,
        "{label:>width$} {precision:>10.2} {recall:>10.2} {f1:>10.2} \
         {total:>10}"
      )?;
    }

    Ok(())
  }
}

/// Result of running a network over a whole dataset.
#[derive(Clone, Debug)]
pub(crate) struct Evaluation {
  pub(crate) loss: f32,
  pub(crate) confusion: ConfusionMatrix,
}

impl Evaluation {
  pub(crate) fn accuracy(&self) -> f32 {
    self.confusion.accuracy()
  }
}

#[cfg(test)]
mod tests {
  use {super::*, approx::assert_relative_eq};

  fn matrix() -> ConfusionMatrix {
    let labels =
      LabelMap::new(vec!["black_rot".into(), "healthy".into()]).unwrap();

    let mut matrix = ConfusionMatrix::new(&labels);

    for (actual, predicted, times) in [(0, 0, 3), (0, 1, 1), (1, 1, 4)] {
      for _ in 0..times {
        matrix.record(actual, predicted).unwrap();
      }
    }

    matrix
  }

  #[test]
  fn per_class_scores() {
    let matrix = matrix();

    assert_eq!(matrix.total(), 8);
    assert_relative_eq!(matrix.accuracy(), 7.0 / 8.0);

    assert_relative_eq!(matrix.precision(0), 1.0);
    assert_relative_eq!(matrix.recall(0), 0.75);
    assert_relative_eq!(matrix.precision(1), 0.8);
    assert_relative_eq!(matrix.recall(1), 1.0);
    assert_relative_eq!(matrix.f1(1), 2.0 * 0.8 / 1.8, epsilon = 1e-6);

    assert_eq!(matrix.support(0), 4);
  }

  #[test]
  fn empty_classes_score_zero() {
    let labels = LabelMap::new(vec!["a".into(), "b".into()]).unwrap();
    let mut matrix = ConfusionMatrix::new(&labels);

    matrix.record(0, 0).unwrap();

    assert_relative_eq!(matrix.precision(1), 0.0);
    assert_relative_eq!(matrix.recall(1), 0.0);
    assert_relative_eq!(matrix.f1(1), 0.0);
    assert!(matrix.record(2, 0).is_err());
  }

  #[test]
  fn report_lists_every_class() {
    let report = matrix().to_string();

    assert!(report.contains("precision"));
    assert!(report.contains("black_rot"));
    assert!(report.contains("weighted avg"));
    assert!(report.contains("0.89"));
  }
}
