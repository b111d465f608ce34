use super::*;

/// A trainable tensor and the gradient accumulated for it by the last
/// backward pass.
#[derive(Clone, Debug)]
pub(crate) struct Parameter {
  pub(crate) value: ArrayD<f32>,
  pub(crate) gradient: ArrayD<f32>,
}

impl Parameter {
  fn new(value: ArrayD<f32>) -> Self {
    Self {
      gradient: ArrayD::zeros(value.raw_dim()),
      value,
    }
  }

  fn uniform(shape: &[usize], fan_in: usize, rng: &mut StdRng) -> Self {
    let limit = (6.0 / fan_in as f32).sqrt();

    Self::new(ArrayD::random_using(
      IxDyn(shape),
      Uniform::new(-limit, limit),
      rng,
    ))
  }

  fn zeros(shape: &[usize]) -> Self {
    Self::new(ArrayD::zeros(IxDyn(shape)))
  }

  pub(crate) fn load(&mut self, value: ArrayD<f32>) -> Result {
    ensure!(
      value.shape() == self.value.shape(),
      "parameter has shape {:?}, expected {:?}",
      value.shape(),
      self.value.shape()
    );

    self.value = value;

    Ok(())
  }
}

fn standard(array: ArrayD<f32>) -> ArrayD<f32> {
  if array.is_standard_layout() {
    array
  } else {
    array.as_standard_layout().into_owned()
  }
}

#[derive(Clone, Debug)]
pub(crate) struct Conv2d {
  kernel: usize,
  weights: Parameter,
  bias: Parameter,
  cache: Option<(Array2<f32>, (usize, usize, usize, usize))>,
}

impl Conv2d {
  fn new(
    channels: usize,
    filters: usize,
    kernel: usize,
    rng: &mut StdRng,
  ) -> Self {
    let fan_in = kernel * kernel * channels;

    Self {
      kernel,
      weights: Parameter::uniform(&[fan_in, filters], fan_in, rng),
      bias: Parameter::zeros(&[filters]),
      cache: None,
    }
  }

  /// Unrolls every `kernel x kernel` patch of `input` into one row.
  fn columns(&self, input: ArrayView4<f32>) -> Result<Array2<f32>> {
    let (batch, height, width, channels) = input.dim();
    let kernel = self.kernel;

    ensure!(
      height >= kernel && width >= kernel,
      "input {height}x{width} is smaller than the {kernel}x{kernel} kernel"
    );

    let (out_height, out_width) = (height - kernel + 1, width - kernel + 1);

    let mut columns = Array5::<f32>::zeros((
      batch,
      out_height,
      out_width,
      kernel * kernel,
      channels,
    ));

    for ky in 0..kernel {
      for kx in 0..kernel {
        columns
          .slice_mut(s![.., .., .., ky * kernel + kx, ..])
          .assign(&input.slice(s![
            ..,
            ky..ky + out_height,
            kx..kx + out_width,
            ..
          ]));
      }
    }

    Ok(columns.into_shape_with_order((
      batch * out_height * out_width,
      kernel * kernel * channels,
    ))?)
  }

  fn convolve(
    &self,
    columns: &Array2<f32>,
    (batch, height, width): (usize, usize, usize),
  ) -> Result<ArrayD<f32>> {
    let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;
    let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;

    let output = columns.dot(&weights) + bias;

    let out_height = height - self.kernel + 1;
    let out_width = width - self.kernel + 1;

    Ok(
      output
        .into_shape_with_order((batch, out_height, out_width, weights.ncols()))?
        .into_dyn(),
    )
  }

  fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = input.into_dimensionality::<Ix4>()?;
    let (batch, height, width, _) = input.dim();
    let columns = self.columns(input.view())?;
    self.convolve(&columns, (batch, height, width))
  }

  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = input.into_dimensionality::<Ix4>()?;
    let (batch, height, width, channels) = input.dim();
    let columns = self.columns(input.view())?;
    let output = self.convolve(&columns, (batch, height, width))?;
    self.cache = Some((columns, (batch, height, width, channels)));
    Ok(output)
  }

  fn backward(&mut self, gradient: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let (columns, (batch, height, width, channels)) = self
      .cache
      .take()
      .context("convolution backward pass without a forward pass")?;

    let kernel = self.kernel;
    let (out_height, out_width) = (height - kernel + 1, width - kernel + 1);
    let filters = self.bias.value.len();

    let gradient = standard(gradient)
      .into_shape_with_order((batch * out_height * out_width, filters))?;

    let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;

    let column_gradient = gradient.dot(&weights.t()).into_shape_with_order((
      batch,
      out_height,
      out_width,
      kernel * kernel,
      channels,
    ))?;

    self.weights.gradient = columns.t().dot(&gradient).into_dyn();
    self.bias.gradient = gradient.sum_axis(Axis(0)).into_dyn();

    let mut input_gradient =
      Array4::<f32>::zeros((batch, height, width, channels));

    for ky in 0..kernel {
      for kx in 0..kernel {
        let mut region = input_gradient.slice_mut(s![
          ..,
          ky..ky + out_height,
          kx..kx + out_width,
          ..
        ]);

        region += &column_gradient.slice(s![.., .., .., ky * kernel + kx, ..]);
      }
    }

    Ok(input_gradient.into_dyn())
  }
}

const POOL_OFFSETS: [(usize, usize); 4] = [(0, 0), (0, 1), (1, 0), (1, 1)];

#[derive(Clone, Debug, Default)]
pub(crate) struct MaxPool2d {
  cache: Option<(Array4<u8>, (usize, usize, usize, usize))>,
}

impl MaxPool2d {
  fn pool(input: ArrayView4<f32>) -> Result<(Array4<f32>, Array4<u8>)> {
    let (batch, height, width, channels) = input.dim();
    let (out_height, out_width) = (height / 2, width / 2);

    ensure!(
      out_height > 0 && out_width > 0,
      "max pooling needs at least a 2x2 input, got {height}x{width}"
    );

    let mut output = Array4::from_elem(
      (batch, out_height, out_width, channels),
      f32::NEG_INFINITY,
    );

    let mut choice =
      Array4::<u8>::zeros((batch, out_height, out_width, channels));

    for (offset, &(dy, dx)) in POOL_OFFSETS.iter().enumerate() {
      let window = input.slice(s![
        ..,
        dy..dy + 2 * out_height;2,
        dx..dx + 2 * out_width;2,
        ..
      ]);

      Zip::from(&mut output)
        .and(&mut choice)
        .and(&window)
        .for_each(|max, chosen, &value| {
          if value > *max {
            *max = value;
            *chosen = offset as u8;
          }
        });
    }

    Ok((output, choice))
  }

  fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = input.into_dimensionality::<Ix4>()?;
    Ok(Self::pool(input.view())?.0.into_dyn())
  }

  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = input.into_dimensionality::<Ix4>()?;
    let (output, choice) = Self::pool(input.view())?;
    self.cache = Some((choice, input.dim()));
    Ok(output.into_dyn())
  }

  fn backward(&mut self, gradient: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let (choice, dimensions) = self
      .cache
      .take()
      .context("max pooling backward pass without a forward pass")?;

    let gradient = gradient.into_dimensionality::<Ix4>()?;
    let (_, out_height, out_width, _) = choice.dim();

    let mut input_gradient = Array4::<f32>::zeros(dimensions);

    for (offset, &(dy, dx)) in POOL_OFFSETS.iter().enumerate() {
      let mut window = input_gradient.slice_mut(s![
        ..,
        dy..dy + 2 * out_height;2,
        dx..dx + 2 * out_width;2,
        ..
      ]);

      Zip::from(&mut window)
        .and(&gradient)
        .and(&choice)
        .for_each(|target, &upstream, &chosen| {
          if chosen as usize == offset {
            *target = upstream;
          }
        });
    }

    Ok(input_gradient.into_dyn())
  }
}

#[derive(Clone, Debug)]
pub(crate) struct Dense {
  weights: Parameter,
  bias: Parameter,
  cache: Option<Array2<f32>>,
}

impl Dense {
  fn new(inputs: usize, units: usize, rng: &mut StdRng) -> Self {
    Self {
      weights: Parameter::uniform(&[inputs, units], inputs, rng),
      bias: Parameter::zeros(&[units]),
      cache: None,
    }
  }

  fn apply(&self, input: &Array2<f32>) -> Result<ArrayD<f32>> {
    let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;
    let bias = self.bias.value.view().into_dimensionality::<Ix1>()?;
    Ok((input.dot(&weights) + bias).into_dyn())
  }

  fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    self.apply(&input.into_dimensionality::<Ix2>()?)
  }

  fn forward(&mut self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = input.into_dimensionality::<Ix2>()?;
    let output = self.apply(&input)?;
    self.cache = Some(input);
    Ok(output)
  }

  fn backward(&mut self, gradient: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = self
      .cache
      .take()
      .context("dense backward pass without a forward pass")?;

    let gradient = gradient.into_dimensionality::<Ix2>()?;
    let weights = self.weights.value.view().into_dimensionality::<Ix2>()?;

    let input_gradient = gradient.dot(&weights.t());

    self.weights.gradient = input.t().dot(&gradient).into_dyn();
    self.bias.gradient = gradient.sum_axis(Axis(0)).into_dyn();

    Ok(input_gradient.into_dyn())
  }
}

#[derive(Clone, Debug)]
pub(crate) enum Layer {
  Conv2d(Conv2d),
  Relu(Option<ArrayD<f32>>),
  MaxPool2d(MaxPool2d),
  Flatten(Option<Vec<usize>>),
  GlobalAvgPool(Option<(usize, usize, usize, usize)>),
  Dense(Dense),
  Dropout {
    rate: f32,
    mask: Option<ArrayD<f32>>,
  },
}

impl Layer {
  /// Builds a freshly initialized layer for an input of shape `input`.
  pub(crate) fn new(
    spec: &LayerSpec,
    input: Shape,
    rng: &mut StdRng,
  ) -> Result<Self> {
    spec.output_shape(input)?;

    Ok(match (spec, input) {
      (
        LayerSpec::Conv2d { filters, kernel },
        Shape::Spatial { channels, .. },
      ) => Self::Conv2d(Conv2d::new(channels, *filters, *kernel, rng)),
      (LayerSpec::Dense { units }, Shape::Flat { features }) => {
        Self::Dense(Dense::new(features, *units, rng))
      }
      (LayerSpec::Relu, _) => Self::Relu(None),
      (LayerSpec::MaxPool2d, _) => Self::MaxPool2d(MaxPool2d::default()),
      (LayerSpec::Flatten, _) => Self::Flatten(None),
      (LayerSpec::GlobalAvgPool, _) => Self::GlobalAvgPool(None),
      (LayerSpec::Dropout { rate }, _) => Self::Dropout {
        rate: *rate,
        mask: None,
      },
      (spec, input) => bail!("layer {spec:?} cannot take input {input}"),
    })
  }

  fn flatten(input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let batch = input.shape().first().copied().unwrap_or(0);
    let features = input.len() / batch.max(1);

    Ok(
      standard(input)
        .into_shape_with_order((batch, features))?
        .into_dyn(),
    )
  }

  fn average(input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    let input = input.into_dimensionality::<Ix4>()?;
    let (_, height, width, _) = input.dim();

    Ok(
      (input.sum_axis(Axis(1)).sum_axis(Axis(1)) / (height * width) as f32)
        .into_dyn(),
    )
  }

  /// Forward pass without caching anything for a backward pass. Dropout is
  /// the identity here.
  pub(crate) fn infer(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
    match self {
      Self::Conv2d(conv) => conv.infer(input),
      Self::Relu(_) => Ok(input.mapv_into(relu)),
      Self::MaxPool2d(pool) => pool.infer(input),
      Self::Flatten(_) => Self::flatten(input),
      Self::GlobalAvgPool(_) => Self::average(input),
      Self::Dense(dense) => dense.infer(input),
      Self::Dropout { .. } => Ok(input),
    }
  }

  pub(crate) fn forward(
    &mut self,
    input: ArrayD<f32>,
    rng: &mut StdRng,
  ) -> Result<ArrayD<f32>> {
    match self {
      Self::Conv2d(conv) => conv.forward(input),
      Self::Relu(cache) => {
        let output = input.mapv(relu);
        *cache = Some(input);
        Ok(output)
      }
      Self::MaxPool2d(pool) => pool.forward(input),
      Self::Flatten(cache) => {
        *cache = Some(input.shape().to_vec());
        Self::flatten(input)
      }
      Self::GlobalAvgPool(cache) => {
        let input = input.into_dimensionality::<Ix4>()?;
        *cache = Some(input.dim());
        Self::average(input.into_dyn())
      }
      Self::Dense(dense) => dense.forward(input),
      Self::Dropout { rate, mask } => {
        let keep = 1.0 - *rate;

        let sampled =
          ArrayD::random_using(input.raw_dim(), Uniform::new(0.0f32, 1.0), rng)
            .mapv_into(|draw| if draw < *rate { 0.0 } else { 1.0 / keep });

        let output = &input * &sampled;
        *mask = Some(sampled);
        Ok(output)
      }
    }
  }

  pub(crate) fn backward(
    &mut self,
    gradient: ArrayD<f32>,
  ) -> Result<ArrayD<f32>> {
    match self {
      Self::Conv2d(conv) => conv.backward(gradient),
      Self::Relu(cache) => {
        let input = cache
          .take()
          .context("relu backward pass without a forward pass")?;

        Ok(gradient * input.mapv_into(relu_derivative))
      }
      Self::MaxPool2d(pool) => pool.backward(gradient),
      Self::Flatten(cache) => {
        let shape = cache
          .take()
          .context("flatten backward pass without a forward pass")?;

        Ok(standard(gradient).into_shape_with_order(shape.as_slice())?)
      }
      Self::GlobalAvgPool(cache) => {
        let (batch, height, width, channels) = cache
          .take()
          .context("pooling backward pass without a forward pass")?;

        let spread =
          gradient.into_dimensionality::<Ix2>()? / (height * width) as f32;

        Ok(
          spread
            .insert_axis(Axis(1))
            .insert_axis(Axis(1))
            .broadcast((batch, height, width, channels))
            .context("pooling gradient has the wrong shape")?
            .to_owned()
            .into_dyn(),
        )
      }
      Self::Dense(dense) => dense.backward(gradient),
      Self::Dropout { mask, .. } => Ok(match mask.take() {
        Some(mask) => gradient * mask,
        None => gradient,
      }),
    }
  }

  pub(crate) fn parameters(&self) -> Vec<&Parameter> {
    match self {
      Self::Conv2d(conv) => vec![&conv.weights, &conv.bias],
      Self::Dense(dense) => vec![&dense.weights, &dense.bias],
      _ => Vec::new(),
    }
  }

  pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
    match self {
      Self::Conv2d(conv) => vec![&mut conv.weights, &mut conv.bias],
      Self::Dense(dense) => vec![&mut dense.weights, &mut dense.bias],
      _ => Vec::new(),
    }
  }
}
