//! CLI binary for voterlist-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, runs the job and writes the CSV.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voterlist_extract::document::default_output_path;
use voterlist_extract::{
    extract_file, inspect, write_csv, write_csv_file, ExtractionConfig, JobStage,
    ProgressCallback, ProgressListener,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress listener using indicatif ────────────────────────────────────

/// Percentage bar plus one log line per extracted or failed page.
struct CliProgress {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Reading PDF");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressListener for CliProgress {
    fn on_stage(&self, stage: JobStage) {
        match stage {
            JobStage::ReadingPdf => self.bar.set_prefix("Reading PDF"),
            JobStage::Extracting => self.bar.set_prefix("Extracting "),
        }
    }

    fn on_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        self.bar
            .set_message(format!("rendered {page_num}/{total_pages}"));
    }

    fn on_page_extracted(&self, page_num: usize, total_pages: usize, records: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{records:>3} records")),
        ));
    }

    fn on_page_failed(&self, page_num: usize, total_pages: usize, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to ward-12_extracted.csv next to the input
  voterlist ward-12.pdf

  # Choose the output file
  voterlist ward-12.pdf -o voters.csv

  # CSV on stdout
  voterlist ward-12.pdf -o -

  # Use a specific model
  voterlist --provider gemini --model gemini-2.0-flash ward-12.pdf

  # Add a BOM so spreadsheet apps detect UTF-8 Devanagari
  voterlist --bom ward-12.pdf

  # Fail (exit code 1) if any page produced no records
  voterlist --strict ward-12.pdf

  # Page count only (no API key needed)
  voterlist --inspect-only ward-12.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (default: ./ then system paths)
  VOTERLIST_*             Any flag below, e.g. VOTERLIST_DPI=300
"#;

/// Extract voter records from scanned Marathi voter-list PDFs into CSV.
#[derive(Parser, Debug)]
#[command(
    name = "voterlist",
    version,
    about = "Extract voter records from Marathi voter-list PDFs into CSV using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Voter-list PDF file.
    input: PathBuf,

    /// CSV output path ("-" for stdout). Default: <input>_extracted.csv.
    #[arg(short, long, env = "VOTERLIST_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-mini, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (150–400).
    #[arg(long, env = "VOTERLIST_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(150..=400))]
    dpi: u32,

    /// Number of concurrent VLM API calls.
    #[arg(short, long, env = "VOTERLIST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per page on transient LLM failure.
    #[arg(long, env = "VOTERLIST_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "VOTERLIST_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Max LLM output tokens per page.
    #[arg(long, env = "VOTERLIST_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "VOTERLIST_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "VOTERLIST_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the full outcome (records + per-page reports) as JSON on stdout.
    #[arg(long, env = "VOTERLIST_JSON")]
    json: bool,

    /// Prefix the CSV with a UTF-8 byte-order mark.
    #[arg(long, env = "VOTERLIST_BOM")]
    bom: bool,

    /// Exit with an error if any page produced no records.
    #[arg(long, env = "VOTERLIST_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "VOTERLIST_NO_PROGRESS")]
    no_progress: bool,

    /// Print the page count only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VOTERLIST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VOTERLIST_QUIET")]
    quiet: bool,
}

impl Cli {
    fn csv_to_stdout(&self) -> bool {
        self.output.as_deref() == Some(Path::new("-"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters; keep INFO logs
    // out of its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.csv_to_stdout();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let pages = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!("{}", serde_json::json!({ "file": cli.input, "pages": pages }));
        } else {
            println!("File:   {}", cli.input.display());
            println!("Pages:  {}", pages);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgress::new);
    let config = build_config(
        &cli,
        progress.clone().map(|p| p as ProgressCallback),
    )
    .await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let result = extract_file(&cli.input, &config).await;
    if let Some(ref p) = progress {
        p.finish();
    }
    let outcome = result.context("Extraction failed")?;

    if let Some(loss) = outcome.partial_loss() {
        if !cli.quiet {
            eprintln!("{} {}", yellow("⚠"), loss);
        }
    }
    let outcome = if cli.strict {
        outcome.into_strict().context("Strict mode")?
    } else {
        outcome
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?;
        println!("{json}");
    }

    // ── Write CSV ────────────────────────────────────────────────────────
    if cli.csv_to_stdout() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        write_csv(&mut handle, &outcome.records, cli.bom).context("Failed to write CSV")?;
        handle.flush().context("Failed to write to stdout")?;
    } else if !cli.json || cli.output.is_some() {
        let path = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.input));
        write_csv_file(&path, &outcome.records, cli.bom)
            .await
            .context("Failed to write CSV")?;

        if !cli.quiet {
            let total = outcome.pages.len();
            let ok = total - outcome.failed_pages().len();
            eprintln!(
                "{}  {} records  {}/{} pages  →  {}",
                if ok == total { green("✔") } else { yellow("⚠") },
                bold(&outcome.len().to_string()),
                ok,
                total,
                bold(&path.display().to_string()),
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .max_tokens(cli.max_tokens);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
