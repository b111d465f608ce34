use super::*;

/// Shape of the activation flowing between two layers, without the batch
/// dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Shape {
  Spatial {
    height: usize,
    width: usize,
    channels: usize,
  },
  Flat {
    features: usize,
  },
}

impl Shape {
  pub(crate) fn features(&self) -> usize {
    match *self {
      Self::Spatial {
        height,
        width,
        channels,
      } => height * width * channels,
      Self::Flat { features } => features,
    }
  }
}

impl Display for Shape {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match self {
      Self::Spatial {
        height,
        width,
        channels,
      } => write!(f, "({height}, {width}, {channels})"),
      Self::Flat { features } => write!(f, "({features})"),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum LayerSpec {
  Conv2d { filters: usize, kernel: usize },
  Relu,
  MaxPool2d,
  Flatten,
  GlobalAvgPool,
  Dense { units: usize },
  Dropout { rate: f32 },
}

impl LayerSpec {
  /// Output shape of this layer for an input of shape `input`.
  pub(crate) fn output_shape(&self, input: Shape) -> Result<Shape> {
    match (self, input) {
      (
        Self::Conv2d { filters, kernel },
        Shape::Spatial { height, width, .. },
      ) => {
        ensure!(*kernel > 0 && *filters > 0, "empty convolution");

        ensure!(
          height >= *kernel && width >= *kernel,
          "convolution kernel {kernel} does not fit input {input}"
        );

        Ok(Shape::Spatial {
          height: height - kernel + 1,
          width: width - kernel + 1,
          channels: *filters,
        })
      }
      (
        Self::MaxPool2d,
        Shape::Spatial {
          height,
          width,
          channels,
        },
      ) => {
        ensure!(
          height >= 2 && width >= 2,
          "max pooling needs at least a 2x2 input, got {input}"
        );

        Ok(Shape::Spatial {
          height: height / 2,
          width: width / 2,
          channels,
        })
      }
      (Self::Flatten, Shape::Spatial { .. }) => Ok(Shape::Flat {
        features: input.features(),
      }),
      (Self::GlobalAvgPool, Shape::Spatial { channels, .. }) => {
        Ok(Shape::Flat { features: channels })
      }
      (Self::Dense { units }, Shape::Flat { .. }) => {
        ensure!(*units > 0, "dense layer needs at least one unit");
        Ok(Shape::Flat { features: *units })
      }
      (Self::Relu, _) => Ok(input),
      (Self::Dropout { rate }, _) => {
        ensure!(
          (0.0..1.0).contains(rate),
          "dropout rate must be in [0, 1), got {rate}"
        );
        Ok(input)
      }
      (spec, input) => bail!("layer {spec:?} cannot take input {input}"),
    }
  }

  /// Whether this layer ends the convolutional backbone.
  pub(crate) fn is_backbone_boundary(&self) -> bool {
    matches!(self, Self::Flatten | Self::GlobalAvgPool)
  }
}

/// Architecture description stored next to the parameters of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Architecture {
  pub(crate) input: ImageSize,
  pub(crate) layers: Vec<LayerSpec>,
}

impl Architecture {
  /// Three convolution blocks followed by a dense classifier.
  pub(crate) fn scratch(input: ImageSize, classes: usize) -> Self {
    Self {
      input,
      layers: vec![
        LayerSpec::Conv2d {
          filters: 32,
          kernel: 3,
        },
        LayerSpec::Relu,
        LayerSpec::MaxPool2d,
        LayerSpec::Conv2d {
          filters: 64,
          kernel: 3,
        },
        LayerSpec::Relu,
        LayerSpec::MaxPool2d,
        LayerSpec::Conv2d {
          filters: 128,
          kernel: 3,
        },
        LayerSpec::Relu,
        LayerSpec::MaxPool2d,
        LayerSpec::Flatten,
        LayerSpec::Dense { units: 512 },
        LayerSpec::Relu,
        LayerSpec::Dropout { rate: 0.5 },
        LayerSpec::Dense { units: classes },
      ],
    }
  }

  /// Reuses the convolutional prefix of `backbone` and puts a pooled
  /// classification head on top of it. Returns the new architecture and the
  /// number of leading layers taken from the backbone.
  pub(crate) fn transfer(
    backbone: &Architecture,
    classes: usize,
  ) -> Result<(Self, usize)> {
    let frozen = backbone.backbone_len();

    ensure!(frozen > 0, "backbone has no convolutional layers to reuse");

    let mut layers = backbone.layers[..frozen].to_vec();

    layers.extend([
      LayerSpec::GlobalAvgPool,
      LayerSpec::Dropout { rate: 0.5 },
      LayerSpec::Dense { units: 1024 },
      LayerSpec::Relu,
      LayerSpec::Dropout { rate: 0.5 },
      LayerSpec::Dense { units: classes },
    ]);

    Ok((
      Self {
        input: backbone.input,
        layers,
      },
      frozen,
    ))
  }

  /// Number of leading layers before the first flatten or pooling head.
  pub(crate) fn backbone_len(&self) -> usize {
    self
      .layers
      .iter()
      .position(LayerSpec::is_backbone_boundary)
      .unwrap_or(0)
  }

  pub(crate) fn input_shape(&self) -> Shape {
    let (height, width, channels) = self.input.shape();

    Shape::Spatial {
      height,
      width,
      channels,
    }
  }

  /// Input shape of every layer followed by the final output shape.
  pub(crate) fn shapes(&self) -> Result<Vec<Shape>> {
    let mut shapes = vec![self.input_shape()];

    for (index, layer) in self.layers.iter().enumerate() {
      let input = shapes[index];

      shapes.push(
        layer
          .output_shape(input)
          .with_context(|| format!("invalid layer {index}"))?,
      );
    }

    Ok(shapes)
  }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct SerializableParameter {
  shape: Vec<usize>,
  values: Vec<f32>,
}

impl From<&ArrayD<f32>> for SerializableParameter {
  fn from(value: &ArrayD<f32>) -> Self {
    Self {
      shape: value.shape().to_vec(),
      values: value.iter().copied().collect(),
    }
  }
}

impl TryFrom<SerializableParameter> for ArrayD<f32> {
  type Error = anyhow::Error;

  fn try_from(parameter: SerializableParameter) -> Result<Self> {
    Ok(ArrayD::from_shape_vec(
      IxDyn(&parameter.shape),
      parameter.values,
    )?)
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct TrainingMetadata {
  pub(crate) epochs: usize,
  pub(crate) learning_rate: f32,
  pub(crate) best_validation_loss: Option<f32>,
  pub(crate) frozen_layers: usize,
}

/// Everything persisted for a trained model.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ModelArtifact {
  pub(crate) architecture: Architecture,
  pub(crate) class_names: LabelMap,
  pub(crate) parameters: Vec<SerializableParameter>,
  pub(crate) metadata: TrainingMetadata,
}
