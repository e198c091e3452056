use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use brand_video::api::{ImageSynthesizer, QwenClient, QwenConfig};
use brand_video::storage::{FsStore, ObjectStore, S3Config, S3Store};
use brand_video::{ArtifactLedger, BrandDescriptor, GeneratorConfig, VideoAdConcept, VideoGenerator};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brand-video")]
#[command(about = "Generate a brand video ad from a campaign's video concept", long_about = None)]
struct Args {
    /// JSON file holding a `video_ad_concept` (or a campaign wrapping one)
    #[arg(short, long)]
    concept: PathBuf,

    /// Brand name (overrides the concept file)
    #[arg(long)]
    brand_name: Option<String>,

    /// Brand industry
    #[arg(long)]
    industry: Option<String>,

    /// Brand tone
    #[arg(long)]
    tone: Option<String>,

    /// Target duration in seconds
    #[arg(short, long, default_value_t = 20.0)]
    duration: f64,

    /// Call-to-action text (defaults to the concept's, then "Learn More")
    #[arg(long)]
    cta: Option<String>,

    /// Output directory used when no S3 endpoint is configured
    #[arg(short, long, default_value = "./output")]
    out_dir: PathBuf,

    /// Append the published artifact to this JSON-lines ledger
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Working directory for per-run scratch files
    #[arg(short = 'w', long)]
    work_dir: Option<PathBuf>,

    /// Font file for captions and placeholders
    #[arg(long)]
    font: Option<PathBuf>,

    /// DashScope API key
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Video generation failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let concept = load_concept(&args.concept).await?;
    let brand = resolve_brand(&args, concept.brand.as_ref())?;

    if !args.duration.is_finite() || args.duration <= 0.0 {
        bail!("--duration must be a positive number of seconds");
    }
    let target = Duration::from_secs_f64(args.duration);

    let mut config = GeneratorConfig::from_env();
    if let Some(work_dir) = args.work_dir.clone() {
        config.work_dir = work_dir;
    }
    if let Some(font) = args.font.clone() {
        config.font_path = Some(font);
    }

    let synthesizer = build_synthesizer(args.api_key.clone())?;
    let store = build_store(&args.out_dir)?;
    let generator = VideoGenerator::new(&config, synthesizer, store);

    let cta = args.cta.as_deref().or(concept.call_to_action.as_deref());
    info!(
        brand = %brand.name,
        scenes = concept.scenes.len(),
        duration = args.duration,
        "Starting brand video generation..."
    );

    let artifact = generator.generate(&concept.scenes, &brand, target, cta).await?;

    if let Some(path) = &args.ledger {
        let entry = ArtifactLedger::new(path)
            .append(&brand, &artifact)
            .await
            .with_context(|| format!("Failed to record artifact in {}", path.display()))?;
        info!(id = %entry.id, ledger = %path.display(), "artifact recorded");
    }

    println!("{}", serde_json::to_string_pretty(&artifact)?);
    info!("Video generation completed: {}", artifact.remote_locator);
    Ok(())
}

async fn load_concept(path: &Path) -> anyhow::Result<VideoAdConcept> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read concept file: {}", path.display()))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    // Accept a whole campaign and pick out its video concept.
    if let Some(inner) = value.get_mut("video_ad_concept").map(serde_json::Value::take) {
        let brand = value.get("brand").cloned();
        value = inner;
        if let (Some(brand), Some(obj)) = (brand, value.as_object_mut()) {
            obj.entry("brand").or_insert(brand);
        }
    }

    serde_json::from_value(value).with_context(|| format!("No usable video concept in {}", path.display()))
}

fn resolve_brand(args: &Args, from_file: Option<&BrandDescriptor>) -> anyhow::Result<BrandDescriptor> {
    let mut brand = match (from_file.cloned(), &args.brand_name) {
        (Some(mut brand), Some(name)) => {
            brand.name = name.clone();
            brand
        }
        (Some(brand), None) => brand,
        (None, Some(name)) => BrandDescriptor::new(name.clone(), "business", "professional"),
        (None, None) => bail!("a brand name is required: pass --brand-name or add `brand` to the concept file"),
    };
    if let Some(industry) = &args.industry {
        brand.industry = industry.clone();
    }
    if let Some(tone) = &args.tone {
        brand.tone = tone.clone();
    }
    Ok(brand)
}

fn build_synthesizer(api_key: Option<String>) -> anyhow::Result<Option<Arc<dyn ImageSynthesizer>>> {
    let config = match api_key {
        Some(key) => {
            let mut config = QwenConfig::new(key);
            if let Some(env) = QwenConfig::from_env() {
                config.base_url = env.base_url;
            }
            Some(config)
        }
        None => QwenConfig::from_env(),
    };

    match config {
        Some(config) => {
            let client: Arc<dyn ImageSynthesizer> =
                Arc::new(QwenClient::new(config).context("Failed to build DashScope client")?);
            Ok(Some(client))
        }
        None => {
            warn!("DASHSCOPE_API_KEY not set, every scene will use a placeholder image");
            Ok(None)
        }
    }
}

fn build_store(out_dir: &Path) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match S3Config::from_env().context("Invalid S3 configuration")? {
        Some(config) => {
            info!(bucket = %config.bucket, "publishing to S3-compatible storage");
            Ok(Arc::new(S3Store::new(config)?))
        }
        None => {
            info!(dir = %out_dir.display(), "S3_ENDPOINT_URL not set, publishing to a local directory");
            Ok(Arc::new(FsStore::new(out_dir)))
        }
    }
}
