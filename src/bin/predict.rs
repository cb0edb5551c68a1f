//! 保存済みモデルでディレクトリ内の署名画像を判定する

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

#[cfg(feature = "wgpu")]
use signature_verifier_lib::ml::GpuBackend;
use signature_verifier_lib::ml::{CpuBackend, InferenceEngine};
use signature_verifier_lib::model::print_metadata_info;

#[derive(Parser, Debug)]
#[command(name = "predict", about = "Classify signature images with a saved model archive")]
struct Args {
    /// Model archive written by the training run.
    #[arg(long, default_value = "models/signature_classifier.tar.gz")]
    model: PathBuf,
    /// Directory of images (.jpg / .jpeg / .png) to classify.
    image_dir: PathBuf,
    /// Force the CPU (NdArray) backend.
    #[arg(long, default_value_t = false)]
    cpu: bool,
}

fn report<B: burn::tensor::backend::Backend>(engine: InferenceEngine<B>, args: &Args) -> Result<()> {
    print_metadata_info(engine.metadata());

    let results = engine.predict_directory(&args.image_dir)?;
    info!("{} 枚を判定しました: {}", results.len(), args.image_dir.display());
    for (path, verdict) in &results {
        println!("{}: {}", path.display(), verdict);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("モデルを読み込みます: {}", args.model.display());

    #[cfg(feature = "wgpu")]
    {
        if !args.cpu {
            let engine = InferenceEngine::<GpuBackend>::load(&args.model, burn_wgpu::WgpuDevice::default())?;
            return report(engine, &args);
        }
    }
    #[cfg(not(feature = "wgpu"))]
    {
        if !args.cpu {
            tracing::warn!("wgpu フィーチャーが無効のため CPU (NdArray) で実行します");
        }
    }

    let engine = InferenceEngine::<CpuBackend>::load(&args.model, Default::default())?;
    report(engine, &args)
}
