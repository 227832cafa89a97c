use std::io::BufReader;
use std::path::PathBuf;

use burn::config::Config;
use clap::Parser;
use fashion_mnist_demo::{
    app,
    control::{spawn_listener, DelayControl, DEFAULT_DELAY_MS},
    data::{self, DataSource},
    demo::{DemoView, PngView, TerminalView},
    logging::install_logger,
    training::{LogProgress, TrainingConfig},
};
use rand::{rngs::StdRng, SeedableRng};

#[cfg(not(feature = "wgpu"))]
mod backend {
    use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};

    pub type Backend = Autodiff<NdArray<f32>>;
    pub type Inference = NdArray<f32>;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

#[cfg(feature = "wgpu")]
mod backend {
    use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};

    pub type Backend = Autodiff<Wgpu>;
    pub type Inference = Wgpu;

    pub fn device() -> WgpuDevice {
        WgpuDevice::default()
    }
}

/// Trains a CNN on Fashion-MNIST, then classifies random samples forever.
///
/// While the demo runs, type a number of milliseconds and press enter to change the delay
/// between two samples.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding the Fashion-MNIST training IDX files (raw or .gz) instead of
    /// downloading them.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Only keep the first N samples.
    #[arg(long)]
    limit: Option<usize>,
    /// Training configuration file (JSON); the flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Delay between two classified samples, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    delay_ms: u64,
    /// Stop after this many samples instead of running forever.
    #[arg(long)]
    cycles: Option<usize>,
    /// Also write every rendered sample as a PNG into this directory.
    #[arg(long)]
    save_images: Option<PathBuf>,
    /// Disable ANSI colors in the prediction line.
    #[arg(long)]
    no_color: bool,
    /// Log filter, e.g. `info` or `fashion_mnist_demo=debug`. `RUST_LOG` takes precedence.
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn training_config(&self) -> Result<TrainingConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|err| format!("failed to load {}: {err:?}", path.display()))?,
            None => TrainingConfig::new(),
        };

        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    install_logger(args.log_filter.as_deref());

    let config = args.training_config()?;
    config.validate()?;

    let source = match &args.data_dir {
        Some(dir) => DataSource::Local(dir.clone()),
        None => DataSource::remote()?,
    };
    let mut dataset = data::load(&source)?;
    if let Some(limit) = args.limit {
        dataset.truncate(limit);
        log::info!("Keeping the first {} samples", dataset.len());
    }

    let device = backend::device();
    let delay = DelayControl::new(args.delay_ms);
    let (context, _history) = app::initialize::<backend::Backend, _>(
        dataset,
        &config,
        delay.clone(),
        &device,
        &mut LogProgress,
    )?;

    log::info!("{}", delay.status_label());
    spawn_listener(delay, BufReader::new(std::io::stdin()))?;

    let terminal = TerminalView::new(std::io::stdout(), !args.no_color);
    let rng = StdRng::from_os_rng();
    let completed = match &args.save_images {
        Some(dir) => run(&context, PngView::new(terminal, dir, 10), rng, args.cycles)?,
        None => run(&context, terminal, rng, args.cycles)?,
    };
    log::info!("Demo finished after {completed} samples");

    Ok(())
}

fn run<V: DemoView>(
    context: &app::AppContext<backend::Inference>,
    view: V,
    rng: StdRng,
    cycles: Option<usize>,
) -> Result<usize, fashion_mnist_demo::DemoError> {
    context.demo(view, rng).run(cycles)
}
