use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use shelf_async_runtime::{
    AuthContext, BookFormat, BookRecord, EngineLoader, HttpLibrary, LibraryApi, LocalLibrary, LocationToken,
    NavTarget, OpenRequest, ReaderCommand, ReaderConfig, ReaderUpdate, ResolvedEntry,
    reader_task,
};
use shelf_reader::translator::{pdf_progress, pdf_snapshot};
use shelf_reader::{AppLogger, DocumentEngine, DocumentSession, DocumentSource, OutlineResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "shelf", about = "Reading progress tools", version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a PDF page position is reported and persisted
    Progress {
        /// Current page (1-based)
        page: u32,

        /// Total pages
        total: u32,
    },

    /// Print the resolved table of contents of a PDF or EPUB file
    Outline {
        /// Book file
        file: PathBuf,
    },

    /// Read a book from the library backend
    Read {
        /// Book id
        #[arg(long)]
        book_id: u64,

        /// Reader's user id, sent as the identity header
        #[arg(long)]
        user_id: u64,

        /// Backend base URL (overrides the config file)
        #[arg(long)]
        api_url: Option<String>,

        /// Saved EPUB location to resume at
        #[arg(long)]
        location: Option<String>,
    },

    /// Read a local file, keeping progress in a sidecar file
    ReadLocal {
        /// Book file
        file: PathBuf,

        /// Resume an EPUB at this percentage instead of the saved one
        #[arg(long, conflicts_with = "initial_page")]
        initial_progress: Option<f64>,

        /// Resume a PDF at this page instead of the saved one
        #[arg(long)]
        initial_page: Option<u32>,

        /// Saved EPUB location to resume at
        #[arg(long)]
        location: Option<String>,
    },
}

async fn load_config(path: Option<&Path>) -> Result<ReaderConfig> {
    let config = match path {
        Some(path) => ReaderConfig::load(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ReaderConfig::default(),
    };
    Ok(config)
}

/// Apply a resume point given on the command line over the saved one
///
/// PDFs resume from a page and EPUBs from a percentage, so each flag only
/// fits one format.
fn apply_resume_override(
    book: &mut BookRecord,
    page: Option<u32>,
    percentage: Option<f64>,
) -> Result<()> {
    match book.format {
        BookFormat::Pdf => {
            if percentage.is_some() {
                bail!("PDF books resume from a page; use --initial-page");
            }
            if let Some(page) = page {
                book.current_page = page.max(1);
            }
        }
        format => {
            if page.is_some() {
                bail!("{} books resume from a percentage; use --initial-progress", format);
            }
            if let Some(percentage) = percentage {
                book.progress_percentage = percentage.clamp(0.0, 100.0);
            }
        }
    }
    Ok(())
}

fn describe_target(target: &NavTarget) -> String {
    match target {
        NavTarget::Page(page) => format!("page {}", page),
        NavTarget::Location(token) => token.to_string(),
        NavTarget::Href(href) => href.clone(),
    }
}

fn print_outline(outline: &[ResolvedEntry]) {
    if outline.is_empty() {
        println!("  (no table of contents)");
        return;
    }
    for (i, entry) in outline.iter().enumerate() {
        println!(
            "{:>4}  {}{}  → {}",
            i + 1,
            "  ".repeat(entry.level),
            entry.title,
            describe_target(&entry.target)
        );
    }
}

fn print_help() {
    println!("Commands: n (next), p (previous), g <page|href|epubcfi> (go to),");
    println!("          c <n> (chapter n), t (contents), q (quit)");
}

fn parse_command(line: &str, outline: &[ResolvedEntry]) -> Option<ReaderCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "n" | "next" => Some(ReaderCommand::Next),
        "p" | "prev" => Some(ReaderCommand::Prev),
        "g" | "go" if !rest.is_empty() => Some(ReaderCommand::GoTo {
            target: NavTarget::parse(rest),
        }),
        "c" | "chapter" => match rest.parse::<usize>() {
            Ok(n) if n >= 1 => Some(ReaderCommand::JumpToChapter { index: n - 1 }),
            _ => {
                println!("Usage: c <1..{}>", outline.len());
                None
            }
        },
        "t" | "toc" => {
            print_outline(outline);
            None
        }
        "q" | "quit" => Some(ReaderCommand::Close),
        "" => None,
        _ => {
            print_help();
            None
        }
    }
}

/// Drive one reading session from stdin until the reader quits
async fn run_session(
    loader: Arc<EngineLoader>,
    api: Arc<dyn LibraryApi>,
    config: ReaderConfig,
    request: OpenRequest,
) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(reader_task(loader, api, config, request, cmd_rx, update_tx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut outline = Vec::new();
    let mut failure = None;

    loop {
        tokio::select! {
            update = update_rx.recv() => {
                let Some(update) = update else { break };
                match update {
                    ReaderUpdate::Ready { total_units, outline: entries, .. } => {
                        println!("Ready: {} units, {} contents entries", total_units, entries.len());
                        outline = entries;
                        print_help();
                    }
                    ReaderUpdate::PageRendered { position, summary } => {
                        println!("[{}] {}", position, summary);
                    }
                    ReaderUpdate::ProgressChanged { percentage } => {
                        println!("  {:.1}% read", percentage);
                    }
                    ReaderUpdate::LocationChanged { .. } => {}
                    ReaderUpdate::NavigationFailed { message } => {
                        eprintln!("Navigation failed: {}", message);
                    }
                    ReaderUpdate::Error { kind, message } => {
                        eprintln!("Error ({:?}): {}", kind, message);
                        failure = Some(message);
                    }
                    ReaderUpdate::Closed => break,
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        if let Some(cmd) = parse_command(&line, &outline) {
                            // The task is gone if this fails; the update loop ends next
                            let _ = cmd_tx.send(cmd);
                        }
                    }
                    None => {
                        stdin_open = false;
                        let _ = cmd_tx.send(ReaderCommand::Close);
                    }
                }
            }
        }
    }

    drop(cmd_tx);
    task.await?;
    if let Some(message) = failure {
        bail!(message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logger = AppLogger::new(1000)
        .with_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .with_echo(true);
    logger.clone().init()?;

    let mut config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Progress { page, total } => {
            if total == 0 || page > total {
                bail!("Page {} is outside a {}-page document", page, total);
            }
            let snapshot = pdf_snapshot(page, total);
            println!("Fraction: {:.4}", pdf_progress(page, total));
            println!(
                "Saved as: page {}, {:.2}%",
                snapshot.current_page, snapshot.progress_percentage
            );
        }

        Commands::Outline { file } => {
            let format = BookFormat::from_path(&file)
                .with_context(|| format!("Unknown book format: {}", file.display()))?;
            let loader = EngineLoader::builtin(&config).with_logger(logger);
            let adapter = loader.ensure_for(format).await?;

            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut session = DocumentSession::new(adapter, config);
            let engine = session
                .open(DocumentSource::Bytes(bytes), &AuthContext::anonymous())
                .await?;

            println!("{} ({}, {} units)", file.display(), format, engine.unit_count());
            print_outline(&OutlineResolver::new(engine).resolve_all());
            session.close();
        }

        Commands::Read {
            book_id,
            user_id,
            api_url,
            location,
        } => {
            if let Some(url) = api_url {
                config.api_base_url = url;
            }
            config.validate()?;

            let auth = AuthContext::user(user_id);
            let api = Arc::new(HttpLibrary::new(config.api_base_url.clone()));
            let book = api.get_book(book_id, &auth).await?;
            println!("{} ({}), {:.1}% read", book.title, book.format, book.progress_percentage);

            let mut request = OpenRequest::new(book, auth);
            request.location = location.map(LocationToken::new);
            let loader = Arc::new(EngineLoader::builtin(&config).with_logger(logger));
            run_session(loader, api, config, request).await?;
        }

        Commands::ReadLocal {
            file,
            initial_progress,
            initial_page,
            location,
        } => {
            config.validate()?;

            let library = Arc::new(LocalLibrary::new(&file)?);
            let mut book = library.record().await?;
            apply_resume_override(&mut book, initial_page, initial_progress)?;
            println!("{} ({}), {:.1}% read", book.title, book.format, book.progress_percentage);

            let mut request = OpenRequest::new(book, AuthContext::anonymous());
            request.location = location.map(LocationToken::new);
            let loader = Arc::new(EngineLoader::builtin(&config).with_logger(logger));
            run_session(loader, library, config, request).await?;
        }
    }

    Ok(())
}
