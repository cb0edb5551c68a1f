//! 署名真贋判定モデルの学習から判定までを1回実行する

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use signature_verifier_lib::logging::init_logging;
use signature_verifier_lib::ml::CpuTrainBackend;
use signature_verifier_lib::model::{AppConfig, ConfigOrigin, DeviceType};
use signature_verifier_lib::pipeline;

#[derive(Parser, Debug)]
#[command(name = "signature_verifier", about = "Train and evaluate a genuine/forged signature classifier")]
struct Args {
    /// Path to the JSON config (defaults are used when missing).
    #[arg(long, default_value_os_t = AppConfig::default_path())]
    config: PathBuf,
    /// Training data root containing genuine/ and forged/.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Directory of new images to classify after training.
    #[arg(long)]
    image_dir: Option<PathBuf>,
    /// Output path of the model archive (.tar.gz).
    #[arg(long)]
    model_out: Option<PathBuf>,
    /// Maximum number of epochs.
    #[arg(long)]
    epochs: Option<usize>,
    /// Force the CPU (NdArray) backend.
    #[arg(long, default_value_t = false)]
    cpu: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.data_dir {
            config.paths.data_dir = dir.clone();
        }
        if let Some(dir) = &self.image_dir {
            config.paths.image_dir = dir.clone();
        }
        if let Some(path) = &self.model_out {
            config.paths.model_path = path.clone();
        }
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if self.cpu {
            config.device_type = DeviceType::Cpu;
        }
    }
}

fn run_cpu(config: &AppConfig) -> Result<pipeline::PipelineOutcome> {
    let device = burn_ndarray::NdArrayDevice::default();
    info!("使用デバイス: {:?}", device);
    pipeline::run::<CpuTrainBackend>(config, &device)
}

#[cfg(feature = "wgpu")]
fn run_on_device(config: &AppConfig) -> Result<pipeline::PipelineOutcome> {
    use signature_verifier_lib::ml::GpuTrainBackend;

    match config.device_type {
        DeviceType::Wgpu => {
            let device = burn_wgpu::WgpuDevice::default();
            info!("使用デバイス: {:?}", device);
            pipeline::run::<GpuTrainBackend>(config, &device)
        }
        DeviceType::Cpu => run_cpu(config),
    }
}

#[cfg(not(feature = "wgpu"))]
fn run_on_device(config: &AppConfig) -> Result<pipeline::PipelineOutcome> {
    if config.device_type == DeviceType::Wgpu {
        warn!("wgpu フィーチャーが無効のため CPU (NdArray) で実行します");
    }
    run_cpu(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, origin) = AppConfig::load_or_default(&args.config);
    args.apply(&mut config);

    init_logging(&config.paths.log_file)?;
    match &origin {
        ConfigOrigin::Loaded(path) => info!("設定を読み込みました: {}", path.display()),
        ConfigOrigin::Missing(path) => info!("設定ファイルが無いため既定値を使用します: {}", path.display()),
        ConfigOrigin::Invalid(path, reason) => {
            warn!("設定ファイルを読み込めないため既定値を使用します: {} ({})", path.display(), reason)
        }
    }
    config.log_summary();

    let outcome = run_on_device(&config)?;
    info!(
        "完了: {} エポック（最良 {}）, テスト正解率 {:.4}, モデル {}",
        outcome.history.epochs_run(),
        outcome.history.best_epoch,
        outcome.test.metrics.accuracy,
        outcome.model_path.display()
    );

    Ok(())
}
