use super::*;

#[derive(Debug, Parser)]
#[clap(about = "Apple leaf disease classification pipeline")]
pub(crate) struct Arguments {
  #[clap(short, long, global = true, help = "Enable debug logging")]
  verbose: bool,
  #[clap(subcommand)]
  subcommand: Subcommand,
}

impl Arguments {
  pub(crate) fn run(self) -> Result {
    self.init_logging()?;
    self.subcommand.run()
  }

  fn init_logging(&self) -> Result {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      EnvFilter::new(if self.verbose { "debug" } else { "info" })
    });

    tracing_subscriber::registry()
      .with(
        tracing_subscriber::fmt::layer()
          .with_writer(io::stderr)
          .with_target(false),
      )
      .with(filter)
      .try_init()
      .map_err(|error| anyhow!("failed to initialize logging: {error}"))
  }
}
