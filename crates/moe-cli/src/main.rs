//!
//! CLI для модели GPT-MoE: прогон forward на синтетическом входе и проверка файлов модели.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{Device, Tensor};
use gpt_moe::GptMoe;
use moe_core::{MoeConfig, model_files};
use tracing::info;

#[derive(Parser)]
#[command(name = "gptmoe")]
#[command(author, version, about = "GPT encoder with a mixture-of-experts head", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a model and run one forward pass on random input
    Run {
        /// Number of experts (ignored with --config / --model)
        #[arg(long, default_value_t = 4)]
        num_experts: usize,

        /// Hidden size, must be divisible by 4 (ignored with --config / --model)
        #[arg(long, default_value_t = 64)]
        hidden_size: usize,

        /// Number of output classes (ignored with --config / --model)
        #[arg(long, default_value_t = 10)]
        num_classes: usize,

        /// JSON config file; parameters are freshly initialized
        #[arg(long, conflicts_with = "model")]
        config: Option<PathBuf>,

        /// Model directory with config.json and safetensors weights
        #[arg(long)]
        model: Option<PathBuf>,

        /// Sequence length of the synthetic input
        #[arg(long, default_value_t = 16)]
        seq_len: usize,

        /// Batch size of the synthetic input
        #[arg(long, default_value_t = 1)]
        batch_size: usize,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,
    },

    /// Run a simple test to verify the setup
    Test {
        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,
    },

    /// Проверить директорию модели и вывести, какие файлы найдены
    Check {
        /// Путь к директории модели
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            num_experts,
            hidden_size,
            num_classes,
            config,
            model,
            seq_len,
            batch_size,
            device,
        } => {
            let device = create_device(&device)?;
            let model = match (model, config) {
                (Some(dir), _) => GptMoe::from_model_dir(&dir, &device)?,
                (None, Some(path)) => GptMoe::create(MoeConfig::from_json_file(&path)?, &device)?,
                (None, None) => {
                    GptMoe::create(MoeConfig::new(num_experts, hidden_size, num_classes), &device)?
                }
            };
            run_forward(&model, seq_len, batch_size)
        }

        Commands::Test { device } => {
            println!("🧪 GPT-MoE - Setup Test");
            println!("=======================");

            let device = create_device(&device)?;
            println!("Device: {:?}", device);

            let a = Tensor::randn(0f32, 1f32, (2, 3), &device)?;
            let b = Tensor::randn(0f32, 1f32, (3, 4), &device)?;
            let c = a.matmul(&b)?;
            println!("✅ Test passed. Output shape: {:?}", c.dims());
            Ok(())
        }

        Commands::Check { model } => run_check(&model),
    }
}

fn run_forward(model: &GptMoe, seq_len: usize, batch_size: usize) -> Result<()> {
    let config = model.config();

    println!("🧠 GPT-MoE - Forward Pass");
    println!("=========================");
    println!(
        "Experts: {}, hidden: {}, classes: {}",
        config.num_experts, config.hidden_size, config.num_classes
    );
    println!("Parameters: {}", config.num_parameters());
    println!("Device: {:?}, dtype: {:?}", model.device(), model.dtype());
    println!();

    let input = Tensor::randn(
        0f32,
        1f32,
        (seq_len, batch_size, config.hidden_size),
        model.device(),
    )?;

    info!(seq_len, batch_size, "Running forward pass");
    let start = Instant::now();
    let output = model.forward_with_gates(&input)?;
    let elapsed = start.elapsed();

    println!("Input shape:  {:?}", input.dims());
    println!("Output shape: {:?}", output.logits.dims());
    println!("Expert load:");
    for (i, load) in output.expert_load()?.iter().enumerate() {
        println!("   expert {:>2}: {:.4}", i, load);
    }
    println!();
    println!("⏱️  Forward: {:.2?}", elapsed);
    Ok(())
}

fn run_check(model_dir: &Path) -> Result<()> {
    println!("🔍 Model directory: {}", model_dir.display());

    match model_files::find_config(model_dir) {
        Some(path) => {
            let config = MoeConfig::from_json_file(&path)?;
            println!("✅ {}: {:?}", path.display(), config);
            println!("   parameters: {}", config.num_parameters());
        }
        None => println!("❌ {} not found", model_files::CONFIG_FILE),
    }

    match model_files::find_weights(model_dir) {
        Some(path) => println!("✅ {}", path.display()),
        None => println!("❌ {} not found", model_files::WEIGHTS_FILE),
    }
    Ok(())
}

fn create_device(device: &str) -> Result<Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal, если устройство недоступно.
            // Панику ловим, а hook временно глушим, чтобы не засорять stderr.
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Metal is not available in this environment. Try --device cpu."
                )),
            }
        }
        "cuda" => Ok(Device::new_cuda(0)?),
        "cpu" => Ok(Device::Cpu),
        other => anyhow::bail!("Unknown device: {other} (expected: cpu, metal, cuda)"),
    }
}
