use super::*;

/// A convolutional classifier together with the class names its outputs
/// stand for.
#[derive(Clone, Debug)]
pub(crate) struct Network {
  architecture: Architecture,
  shapes: Vec<Shape>,
  layers: Vec<Layer>,
  labels: LabelMap,
  optimizer: Adam,
  frozen: usize,
  metadata: TrainingMetadata,
}

impl Network {
  pub(crate) fn new(
    architecture: Architecture,
    labels: LabelMap,
    learning_rate: f32,
    rng: &mut StdRng,
  ) -> Result<Self> {
    let shapes = architecture.shapes()?;

    let output = shapes.last().copied().unwrap_or(architecture.input_shape());

    ensure!(
      output
        == Shape::Flat {
          features: labels.len()
        },
      "network output {output} does not match {} classes",
      labels.len()
    );

    let layers = architecture
      .layers
      .iter()
      .zip(&shapes)
      .map(|(spec, &input)| Layer::new(spec, input, rng))
      .collect::<Result<Vec<Layer>>>()?;

    Ok(Self {
      architecture,
      shapes,
      layers,
      labels,
      optimizer: Adam::new(learning_rate),
      frozen: 0,
      metadata: TrainingMetadata {
        learning_rate,
        ..TrainingMetadata::default()
      },
    })
  }

  /// Builds a network whose convolutional layers are copied from `backbone`,
  /// with a fresh classification head for `labels`. The copied layers keep
  /// training unless `freeze` is set.
  pub(crate) fn with_backbone(
    backbone: &Network,
    labels: LabelMap,
    learning_rate: f32,
    freeze: bool,
    rng: &mut StdRng,
  ) -> Result<Self> {
    let (architecture, copied) =
      Architecture::transfer(&backbone.architecture, labels.len())?;

    let mut network = Self::new(architecture, labels, learning_rate, rng)?;

    for (target, source) in network.layers[..copied]
      .iter_mut()
      .zip(&backbone.layers[..copied])
    {
      for (parameter, value) in
        target.parameters_mut().into_iter().zip(source.parameters())
      {
        parameter.load(value.value.clone())?;
      }
    }

    if freeze {
      network.frozen = copied;
      network.metadata.frozen_layers = copied;
    }

    Ok(network)
  }

  pub(crate) fn labels(&self) -> &LabelMap {
    &self.labels
  }

  pub(crate) fn input_size(&self) -> ImageSize {
    self.architecture.input
  }

  pub(crate) fn metadata(&self) -> &TrainingMetadata {
    &self.metadata
  }

  pub(crate) fn learning_rate(&self) -> f32 {
    self.optimizer.learning_rate()
  }

  pub(crate) fn set_learning_rate(&mut self, learning_rate: f32) {
    self.optimizer.set_learning_rate(learning_rate);
  }

  /// Records the outcome of a training run in the saved metadata.
  pub(crate) fn record_training(
    &mut self,
    epochs: usize,
    best_validation_loss: Option<f32>,
  ) {
    self.metadata.epochs = epochs;
    self.metadata.best_validation_loss = best_validation_loss;
    self.metadata.learning_rate = self.optimizer.learning_rate();
  }

  pub(crate) fn parameter_count(&self) -> usize {
    self
      .layers
      .iter()
      .flat_map(Layer::parameters)
      .map(|parameter| parameter.value.len())
      .sum()
  }

  fn trainable_parameter_count(&self) -> usize {
    self.layers[self.frozen..]
      .iter()
      .flat_map(Layer::parameters)
      .map(|parameter| parameter.value.len())
      .sum()
  }

  fn check_input(&self, inputs: &Array4<f32>) -> Result {
    let (_, height, width, channels) = inputs.dim();

    ensure!(
      (height, width, channels) == self.architecture.input.shape(),
      "input of shape ({height}, {width}, {channels}) does not match the \
       network input {}",
      self.architecture.input_shape()
    );

    Ok(())
  }

  fn logits(&self, inputs: Array4<f32>) -> Result<Array2<f32>> {
    self.check_input(&inputs)?;

    let mut activation = inputs.into_dyn();

    for layer in &self.layers {
      activation = layer.infer(activation)?;
    }

    Ok(activation.into_dimensionality::<Ix2>()?)
  }

  /// Class probabilities for a batch of `(batch, height, width, 3)` images.
  pub(crate) fn predict(&self, inputs: Array4<f32>) -> Result<Array2<f32>> {
    Ok(softmax(self.logits(inputs)?.view()))
  }

  /// Runs one optimization step and returns the batch loss and the number
  /// of correctly classified samples.
  pub(crate) fn train_batch(
    &mut self,
    inputs: Array4<f32>,
    labels: &[usize],
    class_weights: Option<&[f32]>,
    rng: &mut StdRng,
  ) -> Result<(f32, usize)> {
    self.check_input(&inputs)?;

    let mut activation = inputs.into_dyn();

    for (index, layer) in self.layers.iter_mut().enumerate() {
      activation = if index < self.frozen {
        layer.infer(activation)?
      } else {
        layer.forward(activation, rng)?
      };
    }

    let probabilities =
      softmax(activation.into_dimensionality::<Ix2>()?.view());

    let (loss, gradient) =
      cross_entropy(probabilities.view(), labels, class_weights)?;

    let correct = probabilities
      .rows()
      .into_iter()
      .zip(labels)
      .filter(|(row, label)| argmax(row) == **label)
      .count();

    let mut gradient = gradient.into_dyn();

    for layer in self.layers[self.frozen..].iter_mut().rev() {
      gradient = layer.backward(gradient)?;
    }

    self.optimizer.step(
      self.layers[self.frozen..]
        .iter_mut()
        .flat_map(Layer::parameters_mut)
        .collect(),
    )?;

    Ok((loss, correct))
  }

  /// Mean loss and confusion matrix over a whole dataset, in batches.
  pub(crate) fn evaluate(
    &self,
    dataset: &Dataset,
    batch_size: usize,
  ) -> Result<Evaluation> {
    ensure!(batch_size > 0, "batch size must be positive");

    let mut confusion = ConfusionMatrix::new(&self.labels);
    let mut total_loss = 0.0;

    let indices = (0..dataset.len()).collect::<Vec<usize>>();

    for batch in indices.chunks(batch_size) {
      let (inputs, labels) = dataset.load_batch(batch, None)?;

      let probabilities = self.predict(inputs)?;

      let (loss, _) = cross_entropy(probabilities.view(), &labels, None)?;

      total_loss += loss * batch.len() as f32;

      for (row, &label) in probabilities.rows().into_iter().zip(&labels) {
        confusion.record(label, argmax(&row))?;
      }
    }

    Ok(Evaluation {
      loss: if dataset.is_empty() {
        0.0
      } else {
        total_loss / dataset.len() as f32
      },
      confusion,
    })
  }

  /// Current values of every parameter, in layer order.
  pub(crate) fn snapshot(&self) -> Vec<ArrayD<f32>> {
    self
      .layers
      .iter()
      .flat_map(Layer::parameters)
      .map(|parameter| parameter.value.clone())
      .collect()
  }

  pub(crate) fn restore(&mut self, values: Vec<ArrayD<f32>>) -> Result {
    let mut parameters = self
      .layers
      .iter_mut()
      .flat_map(Layer::parameters_mut)
      .collect::<Vec<&mut Parameter>>();

    ensure!(
      parameters.len() == values.len(),
      "expected {} parameters, got {}",
      parameters.len(),
      values.len()
    );

    for (parameter, value) in parameters.iter_mut().zip(values) {
      parameter.load(value)?;
    }

    Ok(())
  }

  pub(crate) fn save(&self, path: &Path) -> Result {
    let artifact = ModelArtifact {
      architecture: self.architecture.clone(),
      class_names: self.labels.clone(),
      parameters: self
        .layers
        .iter()
        .flat_map(Layer::parameters)
        .map(|parameter| SerializableParameter::from(&parameter.value))
        .collect(),
      metadata: self.metadata.clone(),
    };

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).with_context(|| {
        format!("failed to create directory `{}`", parent.display())
      })?;
    }

    let file = File::create(path).with_context(|| {
      format!("failed to create model file `{}`", path.display())
    })?;

    serde_json::to_writer(BufWriter::new(file), &artifact)
      .context("failed to serialize model")?;

    Ok(())
  }

  pub(crate) fn load(path: &Path) -> Result<Self> {
    let file = File::open(path).with_context(|| {
      format!("failed to open model file `{}`", path.display())
    })?;

    let artifact: ModelArtifact =
      serde_json::from_reader(BufReader::new(file)).with_context(|| {
        format!("failed to deserialize model `{}`", path.display())
      })?;

    let ModelArtifact {
      architecture,
      class_names,
      parameters,
      metadata,
    } = artifact;

    let mut network = Self::new(
      architecture,
      class_names,
      metadata.learning_rate,
      &mut rng_from_seed(Some(0)),
    )?;

    network
      .restore(
        parameters
          .into_iter()
          .map(ArrayD::<f32>::try_from)
          .collect::<Result<Vec<ArrayD<f32>>>>()?,
      )
      .with_context(|| format!("model `{}` is corrupt", path.display()))?;

    network.frozen = metadata.frozen_layers.min(network.layers.len());
    network.metadata = metadata;

    Ok(network)
  }
}

impl Display for Network {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    writeln!(
      f,
      "{:<4} {:<16} {:<18} {:>10}",
      "#", "layer", "output", "params"
    )?;

    for (index, (spec, layer)) in
      self.architecture.layers.iter().zip(&self.layers).enumerate()
    {
      let name = match spec {
        LayerSpec::Conv2d { filters, kernel } => {
          format!("conv2d {filters}@{kernel}x{kernel}")
        }
        LayerSpec::Relu => "relu".into(),
        LayerSpec::MaxPool2d => "max_pool2d".into(),
        LayerSpec::Flatten => "flatten".into(),
        LayerSpec::GlobalAvgPool => "global_avg_pool".into(),
        LayerSpec::Dense { units } => format!("dense {units}"),
        LayerSpec::Dropout { rate } => format!("dropout {rate}"),
      };

      let parameters = layer
        .parameters()
        .iter()
        .map(|parameter| parameter.value.len())
        .sum::<usize>();

      writeln!(
        f,
        "{index:<4} {name:<16} {:<18} {parameters:>10}{}",
        self.shapes[index + 1].to_string(),
        if index < self.frozen { " (frozen)" } else { "" }
      )?;
    }

    write!(
      f,
      "Total parameters: {}, trainable: {}",
      self.parameter_count(),
      self.trainable_parameter_count()
    )
  }
}

#[cfg(test)]
mod tests {
  use {super::*, approx::assert_relative_eq, tempdir::TempDir};

  const SIZE: ImageSize = ImageSize {
    width: 4,
    height: 4,
  };

  fn labels() -> LabelMap {
    LabelMap::new(vec!["left".into(), "right".into()]).unwrap()
  }

  fn tiny() -> Architecture {
    Architecture {
      input: SIZE,
      layers: vec![
        LayerSpec::Conv2d {
          filters: 8,
          kernel: 3,
        },
        LayerSpec::Relu,
        LayerSpec::Flatten,
        LayerSpec::Dense { units: 2 },
      ],
    }
  }

  /// Images lit on the left half belong to class 0, on the right to class 1.
  fn halves() -> (Array4<f32>, Vec<usize>) {
    let mut inputs = Array4::zeros((8, 4, 4, 3));
    let mut labels = Vec::new();

    for sample in 0..8 {
      let label = sample % 2;
      let columns = if label == 0 { 0..2 } else { 2..4 };
      let brightness = 0.6 + sample as f32 * 0.05;

      inputs
        .slice_mut(s![sample, .., columns, ..])
        .fill(brightness);

      labels.push(label);
    }

    (inputs, labels)
  }

  #[test]
  fn output_must_match_the_label_map() {
    let labels =
      LabelMap::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();

    assert!(
      Network::new(tiny(), labels, 1e-3, &mut rng_from_seed(Some(1))).is_err()
    );
  }

  #[test]
  fn overfits_a_separable_dataset() {
    let mut rng = rng_from_seed(Some(1));
    let mut network = Network::new(tiny(), labels(), 1e-2, &mut rng).unwrap();

    let (inputs, targets) = halves();

    let (first_loss, _) = network
      .train_batch(inputs.clone(), &targets, None, &mut rng)
      .unwrap();

    let mut last = (first_loss, 0);

    for _ in 0..300 {
      last = network
        .train_batch(inputs.clone(), &targets, None, &mut rng)
        .unwrap();
    }

    assert!(last.0 < first_loss);
    assert!(last.0 < 0.1);
    assert_eq!(last.1, 8);

    let probabilities = network.predict(inputs).unwrap();

    for (row, &label) in probabilities.rows().into_iter().zip(&targets) {
      assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-5);
      assert_eq!(argmax(&row), label);
    }
  }

  #[test]
  fn predict_rejects_wrong_input_shapes() {
    let network =
      Network::new(tiny(), labels(), 1e-3, &mut rng_from_seed(Some(1)))
        .unwrap();

    assert!(network.predict(Array4::zeros((1, 5, 4, 3))).is_err());
    assert!(network.predict(Array4::zeros((1, 4, 4, 1))).is_err());
  }

  #[test]
  fn save_and_load_round_trip() {
    let dir = TempDir::new("network").unwrap();
    let path = dir.path().join("models/model.json");

    let mut rng = rng_from_seed(Some(2));
    let mut network = Network::new(tiny(), labels(), 1e-3, &mut rng).unwrap();

    let (inputs, targets) = halves();

    network
      .train_batch(inputs.clone(), &targets, None, &mut rng)
      .unwrap();

    network.record_training(1, Some(0.5));
    network.save(&path).unwrap();

    let loaded = Network::load(&path).unwrap();

    assert_eq!(loaded.labels(), network.labels());
    assert_eq!(loaded.input_size(), SIZE);
    assert_eq!(loaded.metadata(), network.metadata());
    assert_eq!(loaded.parameter_count(), network.parameter_count());

    let expected = network.predict(inputs.clone()).unwrap();
    let actual = loaded.predict(inputs).unwrap();

    for (&a, &b) in expected.iter().zip(actual.iter()) {
      assert_relative_eq!(a, b, epsilon = 1e-6);
    }
  }

  #[test]
  fn corrupt_models_are_rejected() {
    let dir = TempDir::new("network").unwrap();
    let path = dir.path().join("model.json");

    fs::write(&path, "{\"architecture\": 3}").unwrap();

    assert!(Network::load(&path).is_err());
    assert!(Network::load(&dir.path().join("missing.json")).is_err());
  }

  fn backbone(rng: &mut StdRng) -> Network {
    Network::new(
      Architecture::scratch(
        ImageSize {
          width: 32,
          height: 32,
        },
        2,
      ),
      labels(),
      1e-3,
      rng,
    )
    .unwrap()
  }

  fn three() -> LabelMap {
    LabelMap::new(vec!["a".into(), "b".into(), "c".into()]).unwrap()
  }

  const BACKBONE_PARAMETERS: usize = 6;

  #[test]
  fn transfer_can_freeze_the_backbone() {
    let mut rng = rng_from_seed(Some(3));
    let backbone = backbone(&mut rng);

    let mut network =
      Network::with_backbone(&backbone, three(), 1e-2, true, &mut rng)
        .unwrap();

    assert_eq!(network.frozen, 9);
    assert_eq!(network.metadata().frozen_layers, 9);

    let before = network.snapshot();

    assert_eq!(before[0], backbone.snapshot()[0]);

    let inputs = Array4::from_elem((3, 32, 32, 3), 0.5);

    network
      .train_batch(inputs, &[0, 1, 2], Some(&[1.0, 1.0, 1.0]), &mut rng)
      .unwrap();

    let after = network.snapshot();

    for index in 0..BACKBONE_PARAMETERS {
      assert_eq!(before[index], after[index]);
    }

    assert!(before[BACKBONE_PARAMETERS..]
      .iter()
      .zip(&after[BACKBONE_PARAMETERS..])
      .any(|(a, b)| a != b));

    assert!(network.to_string().contains("(frozen)"));
  }

  #[test]
  fn transfer_fine_tunes_the_backbone_by_default() {
    let mut rng = rng_from_seed(Some(5));
    let backbone = backbone(&mut rng);

    let mut network =
      Network::with_backbone(&backbone, three(), 1e-2, false, &mut rng)
        .unwrap();

    assert_eq!(network.frozen, 0);
    assert_eq!(network.metadata().frozen_layers, 0);

    let before = network.snapshot();

    assert_eq!(
      before[..BACKBONE_PARAMETERS],
      backbone.snapshot()[..BACKBONE_PARAMETERS]
    );

    let inputs = Array4::from_shape_fn((3, 32, 32, 3), |(n, y, x, c)| {
      ((n * 7 + y * 3 + x * 5 + c) % 11) as f32 / 10.0
    });

    network
      .train_batch(inputs, &[0, 1, 2], None, &mut rng)
      .unwrap();

    let after = network.snapshot();

    assert!(before[..BACKBONE_PARAMETERS]
      .iter()
      .zip(&after[..BACKBONE_PARAMETERS])
      .any(|(a, b)| a != b));

    assert!(!network.to_string().contains("(frozen)"));
  }

  #[test]
  fn restore_rewinds_parameters() {
    let mut rng = rng_from_seed(Some(4));
    let mut network = Network::new(tiny(), labels(), 1e-2, &mut rng).unwrap();

    let saved = network.snapshot();
    let (inputs, targets) = halves();

    network.train_batch(inputs, &targets, None, &mut rng).unwrap();

    assert_ne!(network.snapshot(), saved);

    network.restore(saved.clone()).unwrap();

    assert_eq!(network.snapshot(), saved);
    assert!(network.restore(Vec::new()).is_err());
  }
}
