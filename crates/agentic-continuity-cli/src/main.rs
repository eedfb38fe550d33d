//! AgenticContinuity CLI — `acont` command.
//!
//! Create and inspect identity snapshots, track instance lineage and drift,
//! resurrect snapshots through their recovery routine, import message
//! corpora, and inspect the audit log.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use agentic_continuity::config::resolve_root;
use agentic_continuity::lineage::InstanceId;
use agentic_continuity::snapshot::SnapshotFilter;
use agentic_continuity::{
    CancellationToken, Continuity, IngestMessage, IngestReport, ResurrectionRequest, SignerAnchor,
    SignerId, SnapshotDraft, SnapshotId,
};

/// Environment variable holding the key file passphrase.
const PASSPHRASE_ENV: &str = "ACONT_PASSPHRASE";

// ── CLI structure ─────────────────────────────────────────────────────────────

/// AgenticContinuity CLI — versioned identity snapshots, lineage drift,
/// gated resurrection, and an append-only audit trail for AI agents.
#[derive(Parser, Debug)]
#[command(
    name = "acont",
    about = "AgenticContinuity CLI",
    version,
    long_about = "acont — AgenticContinuity CLI\n\nCreate fingerprinted identity snapshots, track lineage drift,\nresurrect snapshots, and import message corpora."
)]
struct Cli {
    /// Storage root (default: $AGENTIC_CONTINUITY_HOME or ~/.agentic/continuity)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Actor recorded in audit entries
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a snapshot from a draft JSON file
    Create {
        /// Draft document (instance_name, traits, memory, personality_type, ...)
        #[arg(long)]
        file: PathBuf,

        /// Sign the snapshot with this key file
        #[arg(long)]
        signer: Option<PathBuf>,
    },

    /// Create a new version of an existing snapshot
    Version {
        /// Previous snapshot (id, path, or name@latest)
        previous: String,

        /// Draft document for the new version
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        signer: Option<PathBuf>,
    },

    /// Print a snapshot
    Get {
        /// Snapshot id, path, or name@latest
        snapshot: String,
    },

    /// List snapshot summaries
    List {
        #[arg(long)]
        instance: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        /// Include deactivated snapshots
        #[arg(long)]
        all: bool,
    },

    /// Validate a stored snapshot or a snapshot file
    Validate {
        snapshot: String,
    },

    /// Mark a snapshot inactive
    Deactivate {
        snapshot_id: String,

        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Generate a passphrase-sealed signer key file ($ACONT_PASSPHRASE or stdin)
    Keygen {
        /// Output key file
        #[arg(long, short)]
        out: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },

    /// Register a new instance under an anchor key
    Spawn {
        anchor: String,

        /// Copy this snapshot into the new instance
        #[arg(long)]
        from: Option<String>,
    },

    /// Compute drift between two snapshots or instances
    Drift {
        parent: String,
        child: String,

        /// Record the result on an instance of this anchor
        #[arg(long, requires = "instance")]
        anchor: Option<String>,

        #[arg(long, requires = "anchor")]
        instance: Option<String>,
    },

    /// Report instances of an anchor that exceed the drift threshold
    Reconcile {
        anchor: String,
    },

    /// Resurrect a snapshot
    Resurrect {
        snapshot: String,

        /// Steward identity performing the resurrection
        #[arg(long)]
        steward: String,

        /// Trigger phrase
        #[arg(long)]
        phrase: Option<String>,

        /// Require this signer id (asig_...)
        #[arg(long)]
        expected_signer: Option<String>,
    },

    /// Inspect the audit log
    Audit {
        #[command(subcommand)]
        subcommand: AuditCommands,
    },

    /// Import a message corpus (JSON lines or plain text lines)
    Ingest {
        source: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Resume an interrupted import
    Resume {
        source: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Cross-check an import against its checkpoint
    VerifyImport {
        source: String,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// List entries, optionally for one subject
    List {
        #[arg(long)]
        subject: Option<String>,

        /// Only the most recent N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Verify the hash chain
    Verify {
        #[arg(long)]
        subject: Option<String>,
    },
    /// Move older entries to an archive segment
    Archive {
        /// Entries to keep in the active file
        #[arg(long, default_value_t = 1000)]
        keep: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns `false` when the command ran but reported a negative result.
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        // Key generation does not touch the storage root.
        Commands::Keygen { out, name } => cmd_keygen(&out, name),
        command => {
            let root =
                resolve_root(cli.root.as_deref()).context("failed to resolve storage root")?;
            let engine = Continuity::load(&root)
                .with_context(|| format!("failed to open continuity root {}", root.display()))?;
            dispatch(&engine, command, &cli.actor)
        }
    }
}

fn dispatch(engine: &Continuity, command: Commands, actor: &str) -> Result<bool> {
    match command {
        Commands::Create { file, signer } => cmd_create(engine, &file, signer.as_deref(), actor),
        Commands::Version {
            previous,
            file,
            signer,
        } => cmd_version(engine, &previous, &file, signer.as_deref(), actor),
        Commands::Get { snapshot } => print_json(&engine.snapshots().get(&snapshot)?),
        Commands::List { instance, tag, all } => cmd_list(engine, instance, tag, all),
        Commands::Validate { snapshot } => cmd_validate(engine, &snapshot),
        Commands::Deactivate {
            snapshot_id,
            reason,
        } => {
            let event_id =
                engine
                    .snapshots()
                    .deactivate(&SnapshotId(snapshot_id.clone()), actor, &reason)?;
            print_json(&serde_json::json!({
                "snapshot_id": snapshot_id,
                "event_id": event_id,
            }))
        }
        Commands::Keygen { out, name } => cmd_keygen(&out, name),
        Commands::Spawn { anchor, from } => cmd_spawn(engine, &anchor, from.as_deref(), actor),
        Commands::Drift {
            parent,
            child,
            anchor,
            instance,
        } => cmd_drift(engine, &parent, &child, anchor.zip(instance), actor),
        Commands::Reconcile { anchor } => {
            print_json(&engine.lineage().reconciliation_check(&anchor)?)
        }
        Commands::Resurrect {
            snapshot,
            steward,
            phrase,
            expected_signer,
        } => cmd_resurrect(engine, snapshot, steward, phrase, expected_signer),
        Commands::Audit { subcommand } => match subcommand {
            AuditCommands::List { subject, limit } => {
                let mut entries = engine.audit().entries(subject.as_deref())?;
                if let Some(limit) = limit {
                    let skip = entries.len().saturating_sub(limit);
                    entries.drain(..skip);
                }
                print_json(&entries)
            }
            AuditCommands::Verify { subject } => {
                let verification = engine.audit().verify_chain(subject.as_deref())?;
                let ok = verification.ok;
                print_json(&verification)?;
                Ok(ok)
            }
            AuditCommands::Archive { keep } => print_json(&engine.audit().archive(keep)?),
        },
        Commands::Ingest { source, file } => {
            let cancel = CancellationToken::new();
            let messages = read_messages(&file, &cancel)?;
            finish_ingest(&engine.ingest().ingest(&source, messages, Some(&cancel))?)
        }
        Commands::Resume { source, file } => {
            let cancel = CancellationToken::new();
            let messages = read_messages(&file, &cancel)?;
            finish_ingest(&engine.ingest().resume(&source, messages, Some(&cancel))?)
        }
        Commands::VerifyImport { source } => print_json(&engine.ingest().verify(&source)?),
    }
}

// ── Command implementations ───────────────────────────────────────────────────

/// `acont keygen --out FILE [--name NAME]`
fn cmd_keygen(out: &Path, name: Option<String>) -> Result<bool> {
    if out.exists() {
        bail!("key file {} already exists", out.display());
    }
    let passphrase = read_passphrase("Passphrase for new key file: ")?;
    if passphrase.is_empty() {
        bail!("passphrase cannot be empty");
    }
    let signer = SignerAnchor::generate(name);
    signer
        .save(out, &passphrase)
        .with_context(|| format!("failed to write key file {}", out.display()))?;
    print_json(&serde_json::json!({
        "signer_id": signer.id(),
        "public_key": signer.public_key_base64(),
        "file": out.display().to_string(),
    }))
}

/// `acont create --file DRAFT [--signer KEY]`
fn cmd_create(
    engine: &Continuity,
    file: &Path,
    signer: Option<&Path>,
    actor: &str,
) -> Result<bool> {
    let draft = read_draft(file)?;
    let signer = load_signer(signer)?;
    let id = engine.snapshots().create(draft, actor, signer.as_ref())?;
    print_json(&serde_json::json!({ "snapshot_id": id }))
}

/// `acont version PREVIOUS --file DRAFT [--signer KEY]`
fn cmd_version(
    engine: &Continuity,
    previous: &str,
    file: &Path,
    signer: Option<&Path>,
    actor: &str,
) -> Result<bool> {
    let previous = engine.snapshots().get(previous)?;
    let draft = read_draft(file)?;
    let signer = load_signer(signer)?;
    let id = engine
        .snapshots()
        .create_version(&previous.metadata.id, draft, actor, signer.as_ref())?;
    print_json(&serde_json::json!({
        "snapshot_id": id,
        "previous_version": previous.metadata.id,
    }))
}

/// `acont list [--instance NAME] [--tag TAG] [--all]`
fn cmd_list(
    engine: &Continuity,
    instance: Option<String>,
    tag: Option<String>,
    all: bool,
) -> Result<bool> {
    let filter = SnapshotFilter {
        instance_name: instance,
        tag,
        include_inactive: all,
    };
    let summaries = engine
        .snapshots()
        .list(filter)?
        .collect::<agentic_continuity::Result<Vec<_>>>()?;
    print_json(&summaries)
}

/// `acont validate SNAPSHOT`
fn cmd_validate(engine: &Continuity, locator: &str) -> Result<bool> {
    let snapshot = engine.snapshots().get(locator)?;
    let report = engine.snapshots().validate(&snapshot);
    let ok = report.ok;
    print_json(&report)?;
    Ok(ok)
}

/// `acont spawn ANCHOR [--from SNAPSHOT]`
fn cmd_spawn(engine: &Continuity, anchor: &str, from: Option<&str>, actor: &str) -> Result<bool> {
    match from {
        Some(source) => print_json(&engine.lineage().spawn_from(anchor, source, actor)?),
        None => {
            let instance_id = engine.lineage().spawn_instance(anchor, actor)?;
            print_json(&serde_json::json!({ "instance_id": instance_id }))
        }
    }
}

/// `acont drift PARENT CHILD [--anchor KEY --instance ID]`
fn cmd_drift(
    engine: &Continuity,
    parent: &str,
    child: &str,
    record: Option<(String, String)>,
    actor: &str,
) -> Result<bool> {
    let report = match record {
        Some((anchor, instance)) => {
            engine
                .lineage()
                .record_drift(&anchor, &InstanceId(instance), parent, child, actor)?
        }
        None => engine.lineage().compute_drift(parent, child)?,
    };
    print_json(&serde_json::json!({
        "score": report.score,
        "drift_index": report.drift_index(),
        "trait_drift": report.trait_drift,
        "memory_drift": report.memory_drift,
        "personality_drift": report.personality_drift,
        "warnings": report.warnings,
    }))
}

/// `acont resurrect SNAPSHOT --steward ID [--phrase P] [--expected-signer ID]`
fn cmd_resurrect(
    engine: &Continuity,
    snapshot: String,
    steward: String,
    phrase: Option<String>,
    expected_signer: Option<String>,
) -> Result<bool> {
    let mut request = ResurrectionRequest::new(snapshot, steward);
    request.trigger_phrase = phrase;
    request.expected_signer = expected_signer.map(SignerId);
    let outcome = engine.resurrection().resurrect(&request);
    print_json(&outcome)?;
    Ok(outcome.success)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<bool> {
    let json = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{json}");
    Ok(true)
}

fn read_draft(path: &Path) -> Result<SnapshotDraft> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read draft {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| anyhow!("invalid draft {}: {e}", path.display()))
}

fn load_signer(path: Option<&Path>) -> Result<Option<SignerAnchor>> {
    path.map(|p| {
        let passphrase = read_passphrase(&format!("Passphrase for {}: ", p.display()))?;
        SignerAnchor::load(p, &passphrase).with_context(|| {
            format!("failed to load key file {} (wrong passphrase?)", p.display())
        })
    })
    .transpose()
}

/// Key file passphrase from `ACONT_PASSPHRASE`, or one line of stdin.
fn read_passphrase(prompt: &str) -> Result<String> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        return Ok(passphrase);
    }
    eprint!("{prompt}");
    let mut passphrase = String::new();
    std::io::stdin()
        .read_line(&mut passphrase)
        .context("failed to read passphrase")?;
    Ok(passphrase.trim_end_matches(['\r', '\n']).to_string())
}

/// Lazily read a corpus file. Lines starting with `{` are parsed as
/// message objects; unparsable objects and lines that are not UTF-8 become
/// empty messages and are counted as malformed. Other non-blank lines are
/// plain message text. A read error cancels `cancel` so the import stays
/// resumable instead of completing short.
fn read_messages(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<impl Iterator<Item = IngestMessage>> {
    let file =
        File::open(path).with_context(|| format!("failed to open corpus {}", path.display()))?;
    let cancel = cancel.clone();
    Ok(BufReader::new(file)
        .split(b'\n')
        .enumerate()
        .map_while(move |(number, raw)| match raw {
            Ok(raw) => Some((number + 1, raw)),
            Err(e) => {
                log::error!("corpus read failed at line {}: {e}", number + 1);
                cancel.cancel();
                None
            }
        })
        .filter_map(|(number, raw)| match String::from_utf8(raw) {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(line.trim_end_matches('\r').to_string()),
            Err(e) => {
                log::warn!("corpus line {number} is not UTF-8: {e}");
                Some(String::new())
            }
        })
        .map(|line| {
            if line.trim_start().starts_with('{') {
                serde_json::from_str(&line).unwrap_or_else(|e| {
                    log::warn!("malformed message line: {e}");
                    IngestMessage::new("")
                })
            } else {
                IngestMessage::new(line)
            }
        }))
}

/// Print an ingest report; an import cut short by a read error fails the
/// command so the caller knows to resume.
fn finish_ingest(report: &IngestReport) -> Result<bool> {
    print_json(report)?;
    if report.cancelled {
        log::error!("import stopped early; run `acont resume` once the corpus is readable");
        return Ok(false);
    }
    Ok(true)
}
