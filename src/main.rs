use {
  crate::{
    arguments::Arguments, augment::*, classes::*, cleaner::*, config::*,
    dataset::*, layer::*, math::*, metrics::*, network::*, optimizer::*,
    preprocess::*, schedule::*, splitter::*, subcommand::Subcommand,
    trainer::*, treatment::*,
  },
  anyhow::{anyhow, bail, ensure, Context},
  clap::{Parser, ValueEnum},
  image::{imageops::FilterType, DynamicImage, ImageFormat},
  indicatif::{ProgressBar, ProgressStyle},
  ndarray::{
    s, Array2, Array3, Array4, Array5, ArrayD, ArrayView, ArrayView2,
    ArrayView3, ArrayView4, Axis, Dimension, Ix1, Ix2, Ix4, IxDyn, Zip,
  },
  ndarray_npy::{read_npy, write_npy, ReadableElement},
  ndarray_rand::{rand_distr::Uniform, RandomExt},
  rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng},
  rayon::prelude::*,
  serde::{Deserialize, Serialize},
  std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Display, Formatter},
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
    process,
    str::FromStr,
  },
  tracing::{debug, info, warn},
  tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
  },
  walkdir::WalkDir,
};

mod arguments;
mod augment;
mod classes;
mod cleaner;
mod config;
mod dataset;
mod layer;
mod math;
mod metrics;
mod network;
mod optimizer;
mod preprocess;
mod schedule;
mod splitter;
mod subcommand;
mod trainer;
mod treatment;

type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

fn main() {
  if let Err(error) = Arguments::parse().run() {
    eprintln!("error: {error:#}");
    process::exit(1);
  }
}
