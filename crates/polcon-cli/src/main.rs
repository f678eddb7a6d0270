//! Polcon CLI
//!
//! - `polcon run`: compare a first-party and a third-party policy and write
//!   the graph, reports and summary
//! - `polcon segment`: show how one policy is split into sections and chunks
//! - `polcon vocab`: list the controlled vocabulary in use

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use polcon_extract::ConjunctionPolicy;
use polcon_ingest::{HintedHeading, PartyType, PolicyInput};
use polcon_ontology::{FieldKind, Ontology};
use polcon_pipeline::{
    segment_policy, write_artifacts, CancelToken, ExtractorKind, Pipeline, PipelineConfig, PipelineOutput,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polcon")]
#[command(author, version, about = "Privacy-policy consistency checking")]
struct Cli {
    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a first-party policy against a third-party policy.
    ///
    /// Writes graph.triples.jsonl, report.machine.json, report.human.txt and
    /// summary.json into the output directory.
    Run(RunArgs),

    /// Segment and chunk one policy without extracting anything.
    Segment {
        /// Policy text file
        input: PathBuf,
        /// Which side the policy is on
        #[arg(long, value_enum, default_value = "first")]
        party: PartyArg,
        /// Policy id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,
        /// JSON list of known headings (`[{"title": "...", "level": 1}]`)
        #[arg(long)]
        hints: Option<PathBuf>,
        /// Pipeline config, for chunk sizes
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the segmented document and chunks as JSON
        #[arg(long)]
        json: bool,
    },

    /// List vocabulary terms.
    Vocab {
        /// Vocabulary file or directory (defaults to the embedded one)
        #[arg(long)]
        vocab: Option<PathBuf>,
        /// Only this field (`action`, `purpose`, `recipient`, ...)
        #[arg(long)]
        field: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// First-party policy text file
    #[arg(long)]
    first: PathBuf,
    /// Third-party policy text file
    #[arg(long)]
    third: PathBuf,
    #[arg(long)]
    first_id: Option<String>,
    #[arg(long)]
    third_id: Option<String>,
    /// Pipeline config (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output directory
    #[arg(short, long, default_value = "polcon-out")]
    out: PathBuf,
    /// Escalate omissions and granularity mismatches to violations
    #[arg(long)]
    strict: bool,
    /// Refuse to align operations whose context facets conflict
    #[arg(long)]
    strict_context: bool,
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    #[arg(long, value_enum)]
    conjunction: Option<ConjunctionArg>,
    /// Model name for the LLM backend and verifier
    #[arg(long)]
    model: Option<String>,
    /// Check findings with the LLM verifier
    #[arg(long)]
    verify: bool,
    #[arg(long)]
    min_confidence: Option<f64>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    vocab: Option<PathBuf>,
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Exit with status 1 when any finding is reported
    #[arg(long)]
    fail_on_findings: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PartyArg {
    First,
    Third,
}

impl From<PartyArg> for PartyType {
    fn from(arg: PartyArg) -> Self {
        match arg {
            PartyArg::First => PartyType::FirstParty,
            PartyArg::Third => PartyType::ThirdParty,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Deterministic,
    Llm,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConjunctionArg {
    Merge,
    Split,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Runtime::new().context("cannot start async runtime")?;
            let status = runtime.block_on(cmd_run(args))?;
            if status != 0 {
                std::process::exit(status);
            }
        }
        Commands::Segment {
            input,
            party,
            id,
            hints,
            config,
            json,
        } => cmd_segment(&input, party.into(), id, hints.as_deref(), config.as_deref(), json)?,
        Commands::Vocab { vocab, field, json } => cmd_vocab(vocab.as_deref(), field.as_deref(), json)?,
    }
    Ok(())
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ============================================================================
// Helpers
// ============================================================================

fn read_policy(path: &Path, id: Option<String>, party: PartyType) -> Result<PolicyInput> {
    let bytes = fs::read(path).with_context(|| format!("cannot read policy {}", path.display()))?;
    let id = id.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| party.tag().to_string())
    });
    Ok(PolicyInput::from_bytes(id, party, &bytes)?)
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    Ok(match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    })
}

fn apply_overrides(config: &mut PipelineConfig, args: &RunArgs) {
    config.strict_mode |= args.strict;
    config.strict_context |= args.strict_context;
    if let Some(backend) = args.backend {
        config.extractor_backend = match backend {
            BackendArg::Deterministic => ExtractorKind::Deterministic,
            BackendArg::Llm => ExtractorKind::Llm,
        };
    }
    if let Some(conjunction) = args.conjunction {
        config.conjunction = match conjunction {
            ConjunctionArg::Merge => ConjunctionPolicy::Merge,
            ConjunctionArg::Split => ConjunctionPolicy::Split,
        };
    }
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    if args.verify {
        config.verifier.enabled = true;
        config.verifier.use_llm = true;
    }
    if let Some(min) = args.min_confidence {
        config.verifier.min_confidence = min;
    }
    if let Some(limit) = args.concurrency {
        config.concurrency_limit = limit;
    }
    if args.vocab.is_some() {
        config.vocab_path = args.vocab.clone();
    }
    if args.rules.is_some() {
        config.rules_path = args.rules.clone();
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let first = read_policy(&args.first, args.first_id.clone(), PartyType::FirstParty)?;
    let third = read_policy(&args.third, args.third_id.clone(), PartyType::ThirdParty)?;
    println!(
        "{} {} against {}",
        "Comparing".green().bold(),
        first.policy_id,
        third.policy_id
    );

    let pipeline = Pipeline::new(config).context("invalid pipeline configuration")?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing with what was extracted");
            on_signal.cancel();
        }
    });

    let output = pipeline.run(&first, &third, &cancel).await?;
    let paths = write_artifacts(&output, &args.out)
        .with_context(|| format!("cannot write artifacts to {}", args.out.display()))?;

    print_run_summary(&output);
    for path in paths.iter() {
        println!("  {} {}", "→".cyan(), path.display());
    }

    if args.fail_on_findings && !output.report.findings.is_empty() {
        return Ok(1);
    }
    Ok(0)
}

fn print_run_summary(output: &PipelineOutput) {
    let summary = &output.summary;
    println!(
        "  {} {} chunks, {} operations ({} valid)",
        "→".yellow(),
        summary.chunks,
        summary.operations,
        summary.valid_operations
    );
    if summary.partial {
        println!(
            "  {} partial run: {} chunk(s) skipped, {} degraded",
            "!".red().bold(),
            summary.chunks_skipped,
            summary.chunks_degraded
        );
    }
    if summary.findings == 0 {
        println!("  {} no findings", "✓".green());
    } else {
        for (kind, count) in &summary.findings_by_type {
            println!("  {} {}: {}", "•".yellow(), kind, count);
        }
    }
    if summary.findings_dropped > 0 {
        println!("  {} {} dropped by verifier", "→".yellow(), summary.findings_dropped);
    }
}

fn cmd_segment(
    input: &Path,
    party: PartyType,
    id: Option<String>,
    hints: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<()> {
    let mut policy = read_policy(input, id, party)?;
    if let Some(hints) = hints {
        let raw = fs::read_to_string(hints).with_context(|| format!("cannot read hints {}", hints.display()))?;
        let hint: Vec<HintedHeading> = serde_json::from_str(&raw).context("hints must be a JSON list of headings")?;
        policy = policy.with_section_hint(hint);
    }
    let config = load_config(config)?;
    config.validate()?;
    let (doc, chunks) = segment_policy(&policy, &config.chunker_config())?;

    if json {
        let value = serde_json::json!({ "document": doc, "chunks": chunks });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let stats = doc.stats();
    println!(
        "{} {} ({}): {} sections, {} clauses, {} definitions",
        "Segmented".green().bold(),
        doc.policy_id,
        doc.party_type,
        stats.sections,
        stats.clauses,
        stats.definitions
    );
    for section in &doc.sections {
        let clauses = doc.clauses.iter().filter(|c| c.section_id == section.section_id).count();
        println!(
            "{}{} {} ({} clauses)",
            "  ".repeat(section.level + 1),
            section.section_id.dimmed(),
            section.title,
            clauses
        );
    }
    println!("{} {}", "Chunks".green().bold(), chunks.len());
    for chunk in &chunks {
        println!(
            "  {} {} words, bytes {}..{}, {}",
            chunk.chunk_id.cyan(),
            chunk.units,
            chunk.char_start,
            chunk.char_end,
            chunk.section_path
        );
    }
    Ok(())
}

fn cmd_vocab(vocab: Option<&Path>, field: Option<&str>, json: bool) -> Result<()> {
    let ontology = Ontology::load(vocab, None)?;
    let fields: Vec<FieldKind> = match field {
        Some(name) => match FieldKind::ALL.iter().copied().find(|f| f.as_str() == name) {
            Some(kind) => vec![kind],
            None => bail!(
                "unknown field `{name}`; expected one of {}",
                FieldKind::ALL.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
            ),
        },
        None => FieldKind::ALL.to_vec(),
    };

    if json {
        let value: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|kind| {
                let terms = serde_json::to_value(ontology.vocabulary.terms(*kind))?;
                Ok((kind.as_str().to_string(), terms))
            })
            .collect::<Result<_, serde_json::Error>>()?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for kind in fields {
        let terms = ontology.vocabulary.terms(kind);
        println!("{} ({})", kind.as_str().green().bold(), terms.len());
        for term in terms {
            let depth = ontology.hierarchy.depth(term.uri.as_str()).unwrap_or(0);
            print!("{}{}  {}", "  ".repeat(depth + 1), term.uri.as_str(), term.label.dimmed());
            if !term.alt_labels.is_empty() {
                print!(" [{}]", term.alt_labels.join(", "));
            }
            println!();
        }
    }
    Ok(())
}
