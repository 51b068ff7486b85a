use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

// Import from examops-core
use examops_core::preprocessors::{DocxPreprocessor, Preprocessor};
use examops_core::{extract_template_rules, ExamOpsConfig, JobProcessor, JobRequest, JobResult};

// Import CLI utilities
use examops::{logging, settings};

#[derive(Parser)]
#[command(name = "examops")]
#[command(about = "Format exam papers against an institution's template and report what changed")]
struct Args {
    /// Path to config file (YAML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format a .docx exam paper
    Format {
        /// Path to the .docx file to format
        #[arg(short, long)]
        input: PathBuf,

        /// Directory of template rule files (overrides config)
        #[arg(long)]
        template_dir: Option<PathBuf>,

        /// Where the formatted document and diff report are written (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Template search query (overrides config)
        #[arg(short, long)]
        query: Option<String>,

        /// Requesting user, recorded in logs
        #[arg(short, long)]
        user: Option<String>,

        /// Print per-stage timings
        #[arg(long)]
        profile: bool,
    },

    /// Derive template rules from a guideline .docx
    ExtractTemplate {
        /// Guideline document
        #[arg(short, long)]
        input: PathBuf,

        /// Template title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Directory to write the YAML into (defaults to the configured template dir)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Print the rules instead of writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    println!("🦀 ExamOps Formatter");

    let config_path = settings::resolve_config_path(args.config.as_deref());
    let config = ExamOpsConfig::load_with_fallback(config_path.as_deref());
    match &config_path {
        Some(path) => println!("📋 Loaded config from: {}", path.display()),
        None => println!("📋 Using default config"),
    }

    match args.command {
        Command::Format {
            input,
            template_dir,
            output_dir,
            query,
            user,
            profile,
        } => {
            let mut config = config;
            if let Some(dir) = template_dir {
                config.storage.template_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.storage.output_dir = dir;
            }
            let query = query.unwrap_or_else(|| config.job.template_query.clone());

            let result = format_document(&config, &input, query, user).await?;
            report(&result, profile)?;
            if result.is_failed() {
                std::process::exit(1);
            }
        }
        Command::ExtractTemplate {
            input,
            title,
            out_dir,
            dry_run,
        } => {
            let out_dir = out_dir.unwrap_or_else(|| config.storage.template_dir.clone());
            extract_template(&input, title, &out_dir, dry_run)?;
        }
        Command::ShowConfig => {
            println!("\n{}", config.to_yaml()?);
        }
    }

    Ok(())
}

async fn format_document(
    config: &ExamOpsConfig,
    input: &Path,
    query: String,
    user: Option<String>,
) -> Result<JobResult> {
    if !input.exists() {
        println!("⚠️  Input document not found at: {}", input.display());
    }

    let processor = JobProcessor::from_config(config).context("Invalid formatting pipeline in config")?;

    let mut request = JobRequest::new(input.display().to_string(), query);
    if let Some(user) = user {
        request = request.with_user(user);
    }

    println!("📄 Processing: {}", input.display());
    println!("🔎 Template query: {}", request.template_query);
    Ok(processor.run(request).await)
}

fn report(result: &JobResult, profile: bool) -> Result<()> {
    if profile && !result.stage_timings.is_empty() {
        println!("\n📊 Performance Summary:");
        let total: u64 = result.stage_timings.iter().map(|t| t.elapsed_ms).sum();
        for timing in &result.stage_timings {
            println!("   {:.<35} {}ms", timing.stage.as_str(), timing.elapsed_ms);
        }
        println!("   {:.<35} {}ms", "Total", total);
    }

    if result.is_failed() {
        eprintln!("❌ {}", result.error.as_deref().unwrap_or(&result.summary));
    } else {
        println!("✅ {}", result.summary);
        if let Some(location) = &result.formatted_location {
            println!("💾 Formatted document: {location}");
        }
        if let Some(location) = &result.diff_location {
            println!("💾 Diff report: {location}");
        }
        if let Some(link) = &result.share_link {
            println!("🔗 Share link: {link}");
        }
    }

    println!("\n{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

fn extract_template(input: &Path, title: Option<String>, out_dir: &Path, dry_run: bool) -> Result<()> {
    println!("📄 Reading guideline: {}", input.display());
    let document = DocxPreprocessor
        .process_file(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let title = title.unwrap_or_else(|| {
        input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string())
    });
    let rules = extract_template_rules(&document, &title);
    let yaml = serde_yaml::to_string(&rules)?;

    println!("   Title    : {}", rules.title);
    println!("   Header   : {}", rules.header_text);
    println!("   Numbering: {:?}", rules.numbering_scheme);
    println!("   Marks    : {}", rules.marks_pattern);

    if dry_run {
        println!("\n{yaml}");
        return Ok(());
    }

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let stem = if rules.id.is_empty() { "template" } else { rules.id.as_str() };
    let path = out_dir.join(format!("{stem}.yaml"));
    std::fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✅ Template saved to: {}", path.display());
    Ok(())
}
