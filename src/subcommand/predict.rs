use super::*;

#[derive(Debug, Parser)]
pub(crate) struct Predict {
  #[clap(short, long, default_value = "apple_disease_model.json")]
  model: PathBuf,
  #[clap(short, long, default_value = "treatments.json")]
  treatments: PathBuf,
  #[clap(short, long, help = "Image or preprocessed .npy array to classify")]
  image: PathBuf,
  #[clap(
    short,
    long,
    help = "Check the model's classes against this dataset directory"
  )]
  classes_dir: Option<PathBuf>,
}

#[derive(Debug)]
struct Prediction {
  class: String,
  confidence: f32,
  probabilities: Vec<(String, f32)>,
}

impl Predict {
  pub(crate) fn run(self) -> Result {
    let network = Network::load(&self.model)?;

    debug!(
      "loaded model trained for {} epochs, best validation loss {:?}",
      network.metadata().epochs,
      network.metadata().best_validation_loss
    );

    if let Some(dir) = &self.classes_dir {
      network.labels().verify_against(dir)?;
    }

    let catalog = TreatmentCatalog::load(&self.treatments)?;

    let missing = catalog.missing(network.labels());

    if !missing.is_empty() {
      debug!("no treatment records for: {}", missing.join(", "));
    }

    let image = if is_array(&self.image) {
      load_array(&self.image, network.input_size())?
    } else {
      preprocess_image(&self.image, network.input_size())?
    };

    let prediction = classify(&network, image)?;

    println!("Predicted class: {}", prediction.class);
    println!("Confidence: {:.2}%", prediction.confidence * 100.0);

    for (class, probability) in &prediction.probabilities {
      println!("  {class}: {:.2}%", probability * 100.0);
    }

    println!();
    print!("{}", catalog.render(&prediction.class));

    Ok(())
  }
}

fn classify(network: &Network, image: Array3<f32>) -> Result<Prediction> {
  let probabilities = network.predict(image.insert_axis(Axis(0)))?;
  let row = probabilities.row(0);

  let index = argmax(&row);

  let class = network
    .labels()
    .name_of(index)
    .ok_or_else(|| anyhow!("model produced unknown class index {index}"))?
    .to_owned();

  Ok(Prediction {
    class,
    confidence: row[index],
    probabilities: network
      .labels()
      .names()
      .iter()
      .cloned()
      .zip(row.iter().copied())
      .collect(),
  })
}

#[cfg(test)]
mod tests {
  use {super::*, approx::assert_relative_eq};

  #[test]
  fn classify_reports_a_distribution_over_the_label_map() {
    let size = ImageSize {
      width: 4,
      height: 4,
    };

    let labels = LabelMap::new(
      DEFAULT_CLASSES.iter().map(|class| class.to_string()).collect(),
    )
    .unwrap();

    let architecture = Architecture {
      input: size,
      layers: vec![LayerSpec::Flatten, LayerSpec::Dense { units: 4 }],
    };

    let network = Network::new(
      architecture,
      labels.clone(),
      1e-3,
      &mut rng_from_seed(Some(3)),
    )
    .unwrap();

    let prediction =
      classify(&network, Array3::from_elem(size.shape(), 0.5)).unwrap();

    assert_eq!(prediction.probabilities.len(), 4);
    assert_relative_eq!(
      prediction
        .probabilities
        .iter()
        .map(|(_, probability)| probability)
        .sum::<f32>(),
      1.0,
      epsilon = 1e-5
    );

    assert!(labels.index_of(&prediction.class).is_some());
    assert!(prediction
      .probabilities
      .iter()
      .all(|(_, probability)| *probability <= prediction.confidence));
  }
}
