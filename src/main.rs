use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use lask::client::HttpClient;
use lask::composer::PromptComposer;
use lask::config::{self, ConfigFile, ResolvedConfig};
use lask::document::{shared, Buffer, Document, Position, Range};
use lask::generation::GenerationMode;
use lask::inserter::StreamInserter;
use lask::session::{CycleOutcome, SessionController, SubmitError};
use lask::terminal::{Echo, HostAction, TerminalGate, TerminalNotifier};
use lask::{actions, logging, ui};

#[derive(Parser, Debug)]
#[command(
    name = "lask",
    about = "Type AI-generated code straight into your files, then accept, reject or rephrase it",
    long_about = None,
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Profile to use from config file
    #[arg(short, long, env = "LASK_PROFILE", global = true)]
    profile: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "LASK_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Override model name
    #[arg(short, long, env = "LASK_MODEL", global = true)]
    model: Option<String>,

    /// Override API key
    #[arg(long, env = "LASK_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Write a default config file to ~/.config/lask/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate code at a position and type it into FILE
    Generate {
        file: PathBuf,

        /// Prompt (omit to be asked)
        prompt: Option<String>,

        /// 1-based line to insert at (default: end of file)
        #[arg(long)]
        line: Option<usize>,

        /// 1-based column to insert at (default: end of the line)
        #[arg(long)]
        column: Option<usize>,

        /// fix | generate | comment | chat
        #[arg(long)]
        mode: Option<GenerationMode>,

        /// Files to list as context in the prompt
        #[arg(long, num_args = 1..)]
        context: Vec<String>,

        /// Pause between typed characters in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Print the resulting buffer instead of writing FILE
        #[arg(long)]
        dry_run: bool,
    },

    /// Replace a selection with a corrected version
    Fix {
        file: PathBuf,

        /// Selection start, LINE:COLUMN (1-based)
        #[arg(long)]
        from: Position,

        /// Selection end, LINE:COLUMN (1-based, exclusive)
        #[arg(long)]
        to: Position,

        #[arg(long)]
        dry_run: bool,
    },

    /// Replace a selection with a commented version
    Comment {
        file: PathBuf,

        /// Selection start, LINE:COLUMN (1-based)
        #[arg(long)]
        from: Position,

        /// Selection end, LINE:COLUMN (1-based, exclusive)
        #[arg(long)]
        to: Position,

        #[arg(long)]
        dry_run: bool,
    },

    /// Insert TEXT as one block at a position
    Insert {
        file: PathBuf,

        #[arg(long)]
        line: usize,

        #[arg(long)]
        column: usize,

        text: String,

        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: lask generate <FILE>");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.model.as_deref(),
        args.api_key.as_deref(),
    );

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Generate { file, prompt, line, column, mode, context, delay_ms, dry_run } => {
            let mode = mode.unwrap_or(resolved.mode);
            let delay = delay_ms.map(Duration::from_millis).unwrap_or(resolved.typing_delay);
            let opts = GenerateOpts { line, column, mode, context, delay, dry_run };
            run_generate(&file, prompt, opts, &resolved).await
        }
        Command::Fix { file, from, to, dry_run } => {
            run_rewrite(&file, Range::new(from, to), GenerationMode::Fix, dry_run, &resolved).await
        }
        Command::Comment { file, from, to, dry_run } => {
            run_rewrite(&file, Range::new(from, to), GenerationMode::Comment, dry_run, &resolved).await
        }
        Command::Insert { file, line, column, text, dry_run } => {
            run_insert(&file, line, column, &text, dry_run).await
        }
    }
}

fn build_client(resolved: &ResolvedConfig) -> Result<HttpClient> {
    let mut client = HttpClient::with_timeout(resolved.endpoint.clone(), resolved.model.clone(), resolved.timeout)
        .context("Failed to set up the HTTP client")?;
    if let Some(key) = &resolved.api_key {
        client.set_api_key(key.clone());
    }
    client.set_sampling(resolved.max_tokens, resolved.temperature);
    Ok(client)
}

fn finish(buffer: &mut Buffer, dry_run: bool) -> Result<()> {
    if dry_run {
        print!("{}", buffer.text());
        return Ok(());
    }
    if buffer.is_modified() {
        buffer.save()?;
        if let Some(path) = buffer.path() {
            eprintln!("  ✓ wrote {}", path.display());
        }
    }
    Ok(())
}

/// 1-based line/column from the CLI into a cursor inside `buffer`. Missing
/// parts default to the end of the file / end of the line.
fn place_cursor(buffer: &mut Buffer, line: Option<usize>, column: Option<usize>) -> Result<Position> {
    let end = buffer.end();
    let line = match line {
        Some(0) => anyhow::bail!("--line is 1-based"),
        Some(n) => n - 1,
        None => end.line,
    };
    let column = match column {
        Some(0) => anyhow::bail!("--column is 1-based"),
        Some(n) => n - 1,
        None => line_end(buffer, line)?,
    };
    let at = Position::new(line, column);
    buffer
        .set_cursor(at)
        .with_context(|| format!("{at} is outside {}", display_path(buffer)))?;
    Ok(at)
}

fn line_end(buffer: &Buffer, line: usize) -> Result<usize> {
    let text = buffer.text();
    text.split('\n')
        .nth(line)
        .map(|l| l.trim_end_matches('\r').chars().count())
        .with_context(|| format!("line {} is outside {}", line + 1, display_path(buffer)))
}

fn display_path(buffer: &Buffer) -> String {
    buffer.path().map(|p| p.display().to_string()).unwrap_or_else(|| "the buffer".into())
}

// ── generate ──────────────────────────────────────────────────────────────────

struct GenerateOpts {
    line: Option<usize>,
    column: Option<usize>,
    mode: GenerationMode,
    context: Vec<String>,
    delay: Duration,
    dry_run: bool,
}

async fn run_generate(path: &Path, prompt: Option<String>, opts: GenerateOpts, resolved: &ResolvedConfig) -> Result<()> {
    let mut buffer = Buffer::from_file(path)?;
    let at = place_cursor(&mut buffer, opts.line, opts.column)?;

    eprintln!();
    eprintln!("  ▲ lask  {}  ·  {}  ·  {}", resolved.profile_name, resolved.model, opts.mode);
    eprintln!("  {} @ {at}", path.display());
    eprintln!();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut controller = SessionController::new(
        build_client(resolved)?,
        TerminalGate::new(cancel.clone()),
        TerminalNotifier,
        shared(Echo::new(buffer)),
    )
    .with_composer(PromptComposer::with_context(&opts.context))
    .with_inserter(StreamInserter::new(opts.delay))
    .with_mode(opts.mode)
    .with_cancel_token(cancel);

    let mut result = controller.submit(&prompt.unwrap_or_default()).await;
    loop {
        match &result {
            Ok(outcome) => {
                eprintln!("\n  {}", ui::outcome_line(outcome));
                if matches!(outcome, CycleOutcome::Canceled { .. }) {
                    break;
                }
            }
            Err(SubmitError::Closed) => break,
            Err(e) => eprintln!("  ✗ {e}"),
        }

        result = match controller.gate_mut().next_action().await {
            HostAction::NewPrompt => controller.submit("").await,
            HostAction::Rephrase => controller.rephrase(None).await,
            HostAction::Reject => controller.reject().await,
            HostAction::Quit => break,
        };
    }

    info!(
        session = controller.session().id(),
        depth = controller.session().chain_depth(),
        "session finished"
    );
    let mut document = controller.document().lock().await;
    finish(document.inner_mut(), opts.dry_run)
}

// ── fix / comment ─────────────────────────────────────────────────────────────

async fn run_rewrite(
    path: &Path,
    selection: Range,
    mode: GenerationMode,
    dry_run: bool,
    resolved: &ResolvedConfig,
) -> Result<()> {
    let document = tokio::sync::Mutex::new(Buffer::from_file(path)?);
    let client = build_client(resolved)?;

    let replaced = if mode == GenerationMode::Comment {
        eprintln!("  ⟳ commenting {} {selection}", path.display());
        actions::comment_selection(&client, &document, selection).await?
    } else {
        eprintln!("  ⟳ fixing {} {selection}", path.display());
        actions::fix_selection(&client, &document, selection).await?
    };
    eprintln!("  ✓ replaced with {replaced}");

    finish(&mut *document.lock().await, dry_run)
}

// ── insert ────────────────────────────────────────────────────────────────────

async fn run_insert(path: &Path, line: usize, column: usize, text: &str, dry_run: bool) -> Result<()> {
    let mut buffer = Buffer::from_file(path)?;
    place_cursor(&mut buffer, Some(line), Some(column))?;
    let document = tokio::sync::Mutex::new(buffer);

    let range = actions::insert_block(&document, text).await?;
    eprintln!("  ✓ inserted {range}");

    finish(&mut *document.lock().await, dry_run)
}

// ── Profiles listing ──────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    println!();
    println!("  Profiles  ({})", config::config_path().display());
    for name in file.profile_names() {
        let Some(p) = file.profiles.get(name) else { continue };
        let marker = if name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    model     {}", p.model);
        println!("    typing    {}ms", p.typing_delay_ms);
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => anyhow::bail!("Unknown shell: {shell_name} (supported: bash, zsh, fish, elvish)"),
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "lask", &mut std::io::stdout());
    Ok(())
}
