use super::*;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub(crate) struct Treatment {
  pub(crate) name: String,
  pub(crate) description: String,
  #[serde(alias = "effectiveness")]
  pub(crate) long_term_effectiveness: String,
  #[serde(default)]
  pub(crate) sources: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub(crate) struct Advice {
  pub(crate) advice: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub(crate) links: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub(crate) struct TreatmentRecord {
  pub(crate) treatments: Vec<Treatment>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub(crate) general_advice: Vec<Advice>,
}

impl Display for TreatmentRecord {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    writeln!(f, "Treatment Suggestions:")?;

    for treatment in &self.treatments {
      writeln!(f, "- {}: {}", treatment.name, treatment.description)?;
      writeln!(
        f,
        "  Long-term Effectiveness: {}",
        treatment.long_term_effectiveness
      )?;
      writeln!(f, "  Sources:")?;

      for source in &treatment.sources {
        writeln!(f, "    - {source}")?;
      }

      writeln!(f)?;
    }

    if !self.general_advice.is_empty() {
      writeln!(f, "General Advice:")?;

      for advice in &self.general_advice {
        writeln!(f, "- {}", advice.advice)?;

        for link in &advice.links {
          writeln!(f, "  - Learn more: {link}")?;
        }

        writeln!(f)?;
      }
    }

    Ok(())
  }
}

/// Treatment records keyed by class name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub(crate) struct TreatmentCatalog {
  records: BTreeMap<String, TreatmentRecord>,
}

impl TreatmentCatalog {
  pub(crate) fn load(path: &Path) -> Result<Self> {
    let json = fs::read_to_string(path).with_context(|| {
      format!("failed to read treatments file `{}`", path.display())
    })?;

    serde_json::from_str(&json).with_context(|| {
      format!("failed to parse treatments file `{}`", path.display())
    })
  }

  pub(crate) fn advise(&self, class: &str) -> Option<&TreatmentRecord> {
    self.records.get(class)
  }

  /// Classes of `labels` that have no treatment record.
  pub(crate) fn missing<'a>(&self, labels: &'a LabelMap) -> Vec<&'a str> {
    labels
      .names()
      .iter()
      .map(String::as_str)
      .filter(|class| !self.records.contains_key(*class))
      .collect()
  }

  /// Advice text for `class`, or a notice when the catalog has none.
  pub(crate) fn render(&self, class: &str) -> String {
    match self.advise(class) {
      Some(record) => record.to_string(),
      None => format!("No treatment information found for {class}\n"),
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, tempdir::TempDir};

  const CATALOG: &str = r#"{
    "apple_scab": {
      "treatments": [
        {
          "name": "Fungicide",
          "description": "Apply captan at green tip.",
          "long_term_effectiveness": "High when timed with rain events.",
          "sources": ["extension.org/scab", "fruit.cornell.edu"]
        }
      ],
      "general_advice": [
        {
          "advice": "Rake and destroy fallen leaves.",
          "links": ["example.org/sanitation"]
        },
        { "advice": "Plant resistant cultivars." }
      ]
    },
    "healthy": {
      "treatments": [
        {
          "name": "Monitoring",
          "description": "Keep scouting weekly.",
          "effectiveness": "Ongoing"
        }
      ]
    }
  }"#;

  fn catalog() -> TreatmentCatalog {
    serde_json::from_str(CATALOG).unwrap()
  }

  #[test]
  fn rendering_matches_the_advice_layout() {
    assert_eq!(
      catalog().render("apple_scab"),
      "Treatment Suggestions:
- Fungicide: Apply captan at green tip.
  Long-term Effectiveness: High when timed with rain events.
  Sources:
    - extension.org/scab
    - fruit.cornell.edu

General Advice:
- Rake and destroy fallen leaves.
  - Learn more: example.org/sanitation

- Plant resistant cultivars.

"
    );
  }

  #[test]
  fn effectiveness_alias_and_optional_fields() {
    let catalog = catalog();
    let healthy = catalog.advise("healthy").unwrap();

    assert_eq!(healthy.treatments[0].long_term_effectiveness, "Ongoing");
    assert!(healthy.treatments[0].sources.is_empty());
    assert!(healthy.general_advice.is_empty());

    assert!(!catalog.render("healthy").contains("General Advice"));
  }

  #[test]
  fn unknown_classes_get_a_notice() {
    assert_eq!(
      catalog().render("black_rot"),
      "No treatment information found for black_rot\n"
    );

    let labels = LabelMap::new(
      DEFAULT_CLASSES.iter().map(|class| class.to_string()).collect(),
    )
    .unwrap();

    assert_eq!(
      catalog().missing(&labels),
      vec!["black_rot", "cedar_apple_rust"]
    );
  }

  #[test]
  fn loading_reports_the_path() {
    let dir = TempDir::new("treatment").unwrap();
    let path = dir.path().join("treatments.json");

    fs::write(&path, "{\"apple_scab\": {}}").unwrap();

    let error = TreatmentCatalog::load(&path).unwrap_err();

    assert!(error.to_string().contains("treatments.json"));

    fs::write(&path, CATALOG).unwrap();

    assert_eq!(TreatmentCatalog::load(&path).unwrap(), catalog());
  }
}
