//! Augforge CLI - reproducible image/mask augmentation.

use anyhow::{bail, Context, Result};
use augforge::catalog::TransformCatalog;
use augforge::codec::{ImageCodec, ImageCrateCodec};
use augforge::config::{PipelineConfig, RunSettings, SettingsOverrides};
use augforge::core::types::Category;
use augforge::execution::run::{MANIFEST_FILE, PROGRESS_FILE};
use augforge::execution::{
    augment_sample, find_active_run, latest_progress, request_cancel, variant_rng, BatchExecutor,
    ExecutorOptions, Progress, ProgressUpdate, RunManifest, RunRequest,
};
use augforge::pairing::{convert_masks, load_mask, overlay, validate_dimensions};
use augforge::provider::{CapabilityProvider, ProviderRegistry, Sample};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reproducible image/mask augmentation
#[derive(Debug, Parser)]
#[command(name = "augforge", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog transforms
    List {
        /// Only show one category
        #[arg(long)]
        category: Option<Category>,
        /// Case-insensitive name filter
        #[arg(long)]
        search: Option<String>,
    },

    /// Show a transform's category and parameters
    Info {
        transform: String,
    },

    /// Validate a pipeline file
    Validate {
        pipeline: PathBuf,
    },

    /// Convert a pipeline file between formats
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Portable)]
        to: Format,
    },

    /// Run a batch augmentation
    Run(RunArgs),

    /// Request cancellation of a run
    Cancel {
        /// Run directory; defaults to the active run under --output
        run_dir: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show progress of the active or latest run
    Status {
        #[arg(long)]
        output: PathBuf,
    },

    /// Render a few variants of one image without creating a run
    Preview(PreviewArgs),

    /// Convert .npy masks to PNG
    ConvertMasks {
        src: PathBuf,
        dst: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Native,
    Portable,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    pipeline: PathBuf,
    #[arg(long)]
    images: Option<PathBuf>,
    #[arg(long)]
    masks: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    variants: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, clap::Args)]
struct PreviewArgs {
    #[arg(long)]
    pipeline: PathBuf,
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    mask: Option<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = 3)]
    variants: u32,
    #[arg(long)]
    seed: Option<u64>,
    /// Draw the mask over the image instead of writing it separately
    #[arg(long)]
    overlay: bool,
}

fn init_logging(verbose: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.command {
        Command::Run(RunArgs {
            config: Some(path), ..
        }) => RunSettings::from_file(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        _ => RunSettings::default(),
    };
    init_logging(cli.verbose, &settings.logging.level);

    match cli.command {
        Command::List { category, search } => list_transforms(category, search.as_deref()),
        Command::Info { transform } => transform_info(&transform),
        Command::Validate { pipeline } => validate_pipeline(&pipeline),
        Command::Convert { input, output, to } => convert_pipeline(&input, &output, to),
        Command::Run(args) => run_batch(args, settings),
        Command::Cancel { run_dir, output } => cancel_run(run_dir, output),
        Command::Status { output } => show_status(&output),
        Command::Preview(args) => preview(args),
        Command::ConvertMasks { src, dst } => {
            let summary = convert_masks(&src, &dst)
                .with_context(|| format!("converting masks in {}", src.display()))?;
            println!(
                "Converted {} mask(s), skipped {}",
                summary.converted.len(),
                summary.skipped.len()
            );
            for (path, reason) in &summary.skipped {
                println!("  ✗ {}: {}", path.display(), reason);
            }
            Ok(())
        }
    }
}

fn list_transforms(category: Option<Category>, search: Option<&str>) -> Result<()> {
    let catalog = TransformCatalog::standard();
    let provider = ProviderRegistry::with_builtins();

    let categories: Vec<Category> = match category {
        Some(c) => vec![c],
        None => Category::all().to_vec(),
    };
    let matches: Option<Vec<&str>> = search.map(|q| catalog.search(q));

    for category in categories {
        let names: Vec<&str> = catalog
            .by_category(category)
            .into_iter()
            .filter(|name| matches.as_ref().map_or(true, |m| m.contains(name)))
            .collect();
        println!("{} ({}):", category.display_name(), names.len());
        for name in names {
            let marker = if provider.supports(name) { "•" } else { " " };
            let description = catalog.info(name).map(|i| i.description.as_str()).unwrap_or("");
            println!("  {} {:<28} {}", marker, name, description);
        }
        println!();
    }
    println!("• = available in the built-in provider");
    Ok(())
}

fn transform_info(name: &str) -> Result<()> {
    let catalog = TransformCatalog::standard();
    let Some(info) = catalog.info(name) else {
        bail!("Transform not found: {} (use 'list' to see available transforms)", name);
    };
    let provider = ProviderRegistry::with_builtins();

    println!("Transform: {}", info.name);
    println!("Category: {}", info.category);
    println!("Built-in: {}", if provider.supports(name) { "yes" } else { "no" });
    if info.normalizes_values {
        println!("Note: output values are not directly storable as 8-bit images");
    }
    println!();
    println!("Description:");
    println!("  {}", info.description);

    if !info.params.is_empty() {
        println!();
        println!("Parameters:");
        for param in &info.params {
            println!("  • {} [{}] = {}", param.name, param.param_type, param.default_value);
            if !param.description.is_empty() {
                println!("    {}", param.description);
            }
        }
    }
    Ok(())
}

fn load_pipeline(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_file(path).with_context(|| format!("loading pipeline {}", path.display()))
}

fn validate_pipeline(path: &Path) -> Result<()> {
    let config = load_pipeline(path)?;
    let report = config.validate(&ProviderRegistry::with_builtins());

    println!("{}", report.summary());
    for line in report.detailed_errors() {
        println!("{}", line);
    }
    for warning in &report.warnings {
        println!("⚠ {}", warning.message);
        if let Some(suggestion) = &warning.suggestion {
            println!("   → {}", suggestion);
        }
    }

    if !report.can_execute() {
        bail!("{} is not a valid pipeline", path.display());
    }
    Ok(())
}

fn convert_pipeline(input: &Path, output: &Path, to: Format) -> Result<()> {
    let config = load_pipeline(input)?;
    match to {
        Format::Native => config.save_native(output)?,
        Format::Portable => config.save(output)?,
    }
    println!(
        "Wrote {} transform(s) to {} ({:?})",
        config.len(),
        output.display(),
        to
    );
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn run_batch(args: RunArgs, settings: RunSettings) -> Result<()> {
    let settings = settings.merge(SettingsOverrides {
        images: args.images,
        masks: args.masks,
        output: args.output,
        variants: args.variants,
        seed: args.seed,
        workers: args.workers,
    });
    let request = RunRequest::from_settings(&settings)?.with_pipeline_path(&args.pipeline);

    let config = load_pipeline(&args.pipeline)?;
    let report = config.validate(&ProviderRegistry::with_builtins());
    for warning in &report.warnings {
        log::warn!("{}", warning.message);
    }
    if !report.can_execute() {
        for line in report.detailed_errors() {
            eprintln!("{}", line);
        }
        bail!("{}", report.summary());
    }

    let bar = progress_bar()?;
    let callback_bar = bar.clone();
    let options = ExecutorOptions::new()
        .with_workers(settings.run.workers)
        .with_progress(move |update| match update {
            ProgressUpdate::Started { total } => callback_bar.set_length(total as u64),
            ProgressUpdate::PairCompleted { current, image, .. } => {
                callback_bar.set_position(current as u64);
                if let Some(name) = image.file_name() {
                    callback_bar.set_message(name.to_string_lossy().into_owned());
                }
            }
            ProgressUpdate::Cancelled { .. } => callback_bar.set_message("canceled"),
            ProgressUpdate::Completed { .. } => callback_bar.set_message("done"),
        });

    let outcome = BatchExecutor::new(config).with_options(options).run(&request);
    bar.finish_and_clear();
    let outcome = outcome?;

    let stats = &outcome.manifest.statistics;
    println!("Run {} {}", outcome.manifest.run_id, outcome.manifest.state);
    println!(
        "  {} image(s): {} successful, {} failed, {} output(s) in {:.2}s",
        stats.total_images, stats.successful, stats.failed, stats.total_outputs, stats.duration_seconds
    );
    for error in &outcome.manifest.errors {
        println!("  ✗ {}: {}", error.image.display(), error.error);
    }
    println!("  Manifest: {}", outcome.run_dir.join(MANIFEST_FILE).display());
    Ok(())
}

fn cancel_run(run_dir: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let run_dir = match (run_dir, output) {
        (Some(dir), _) => dir,
        (None, Some(output)) => match find_active_run(&output) {
            Some(dir) => dir,
            None => bail!("No active run under {}", output.display()),
        },
        (None, None) => bail!("Specify a run directory or --output"),
    };
    let flag = request_cancel(&run_dir)
        .with_context(|| format!("creating stop flag in {}", run_dir.display()))?;
    println!("Created {}", flag.display());
    Ok(())
}

fn show_status(output: &Path) -> Result<()> {
    if let Some(active) = find_active_run(output) {
        let progress = Progress::read(&active.join(PROGRESS_FILE))?;
        println!(
            "Active run {}: {}/{} ({:.0}%)",
            active.display(),
            progress.current,
            progress.total,
            progress.percent()
        );
        return Ok(());
    }

    match latest_progress(output) {
        Some((dir, progress)) => {
            println!(
                "No active run. Latest: {} ({}/{})",
                dir.display(),
                progress.current,
                progress.total
            );
            if let Ok(manifest) = RunManifest::load(&dir.join(MANIFEST_FILE)) {
                println!(
                    "  {}: {} successful, {} failed",
                    manifest.state, manifest.statistics.successful, manifest.statistics.failed
                );
            }
        }
        None => println!("No runs under {}", output.display()),
    }
    Ok(())
}

fn preview(args: PreviewArgs) -> Result<()> {
    let config = load_pipeline(&args.pipeline)?;
    let pipelines = config.build(&ProviderRegistry::with_builtins())?;
    let codec = ImageCrateCodec;

    let image = codec.decode_image(&args.image)?;
    let mask = args.mask.as_deref().and_then(load_mask).filter(|mask| {
        match validate_dimensions(&image, mask) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Ignoring mask: {}", e);
                false
            }
        }
    });

    std::fs::create_dir_all(&args.out)?;
    let stem = args
        .image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preview".to_string());

    for index in 0..args.variants {
        let mut rng = variant_rng(args.seed, index);
        let sample = augment_sample(&pipelines, Sample::new(image.clone(), mask.clone()), &mut rng)?;

        let image_path = args.out.join(format!("{}_v{}.png", stem, index + 1));
        match (&sample.mask, args.overlay) {
            (Some(out_mask), true) => {
                codec.encode_image(&overlay(&sample.image, out_mask, 0.6), &image_path)?
            }
            (Some(out_mask), false) => {
                codec.encode_image(&sample.image, &image_path)?;
                let mask_path = args.out.join(format!("{}_v{}_mask.png", stem, index + 1));
                codec.encode_mask(out_mask, &mask_path)?;
            }
            (None, _) => codec.encode_image(&sample.image, &image_path)?,
        }
        println!("Wrote {}", image_path.display());
    }
    Ok(())
}
