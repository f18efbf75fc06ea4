//! folio - batch editing for ebook archives

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use folio::{
    Batch, BatchStatus, CompiledSelector, ContentStore, CssDialect, EpubStore, ErrorPolicy, Predicate, SelectorKind,
    SelectorOptions, find_all, match_substitute, select_all,
};

#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about = "Batch editing for ebook archives", long_about = None)]
#[command(after_help = "EXAMPLES:
    folio book.epub ls --text                       List text items
    folio book.epub grep 'colou?r'                  Show every match
    folio book.epub sub colour color -o out.epub    Replace and save
    folio book.epub select 'p.note'                 List matching elements
    folio book.epub select --xpath '//h:p' --ns h=http://www.w3.org/1999/xhtml")]
struct Cli {
    /// Input EPUB file
    #[arg(value_name = "BOOK")]
    book: PathBuf,

    #[command(subcommand)]
    command: Command,

    /// Only visit these manifest ids (repeatable)
    #[arg(long = "id", global = true)]
    ids: Vec<String>,

    /// Item filter, e.g. `href:^Text/,mime:application/xhtml`
    #[arg(long, global = true)]
    filter: Option<String>,

    /// What to do when an item fails: ignore, raise or skip
    #[arg(long, global = true, default_value_t = ErrorPolicy::Ignore)]
    on_error: ErrorPolicy,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log per-item progress
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List manifest items
    Ls {
        /// Only text items
        #[arg(long)]
        text: bool,
    },
    /// Print every match of a regular expression
    Grep {
        pattern: String,
        /// Search every item, not just text items
        #[arg(long)]
        all: bool,
    },
    /// Replace every match of a regular expression and save the book
    Sub {
        pattern: String,
        /// Replacement template; `$1` and `${name}` expand to groups
        replacement: String,
        /// Output EPUB file
        #[arg(short, long)]
        output: PathBuf,
        /// Substitute in every item, not just text items
        #[arg(long)]
        all: bool,
    },
    /// List elements matching a selector
    Select {
        expr: String,
        /// Treat the expression as a path expression instead of CSS
        #[arg(long)]
        xpath: bool,
        /// Namespace binding `prefix=uri` (repeatable)
        #[arg(long = "ns", value_name = "PREFIX=URI")]
        namespaces: Vec<String>,
        /// Match CSS names case-insensitively
        #[arg(long)]
        html: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the command; `Ok(false)` means some item failed.
fn run(cli: &Cli) -> Result<bool, String> {
    let mut book = EpubStore::open(&cli.book).map_err(|e| e.to_string())?;

    match &cli.command {
        Command::Ls { text } => {
            let items = book
                .enumerate_all()
                .into_iter()
                .filter(|item| !text || item.is_text())
                .collect::<Vec<_>>();
            if cli.json {
                print_json(&items)?;
            } else {
                for item in &items {
                    println!("{}\t{}\t{}", item.id, item.href, item.mimetype);
                }
            }
            Ok(true)
        }
        Command::Grep { pattern, all } => {
            let batch = batch(cli, *all)?;
            let matches = find_all(&mut book, &batch, pattern.as_str()).map_err(|e| e.to_string())?;
            if cli.json {
                print_json(&matches)?;
            } else {
                for m in &matches {
                    println!("{}:{}:{} {}: {}", m.file_no, m.local_no, m.global_no, m.href, m.text);
                }
            }
            Ok(true)
        }
        Command::Sub {
            pattern,
            replacement,
            output,
            all,
        } => {
            let batch = batch(cli, *all)?;
            let status = match_substitute(&mut book, &batch, pattern.as_str(), replacement.as_str())
                .map_err(|e| e.to_string())?;
            report(cli, &status)?;
            book.save(output).map_err(|e| e.to_string())?;
            if !cli.json {
                println!("Wrote {} ({} items changed)", output.display(), book.modified_ids().len());
            }
            Ok(status.is_success())
        }
        Command::Select {
            expr,
            xpath,
            namespaces,
            html,
        } => {
            let mut options = SelectorOptions::new();
            for binding in namespaces {
                let (prefix, uri) = binding
                    .split_once('=')
                    .ok_or_else(|| format!("expected PREFIX=URI, got {binding:?}"))?;
                options = options.with_namespace(prefix, uri);
            }
            if *html {
                options = options.with_dialect(CssDialect::Html);
            }
            let kind = if *xpath { SelectorKind::Path } else { SelectorKind::CssLike };
            let selector = CompiledSelector::compile(expr, kind, &options).map_err(|e| e.to_string())?;
            let batch = batch(cli, false)?;
            let found = select_all(&mut book, &batch, &selector).map_err(|e| e.to_string())?;
            if cli.json {
                print_json(&found)?;
            } else {
                for el in &found {
                    println!("{}:{}:{} {}: {}", el.file_no, el.local_no, el.global_no, el.href, el.markup);
                }
            }
            Ok(true)
        }
    }
}

fn batch(cli: &Cli, all: bool) -> Result<Batch<'static>, String> {
    let mut batch = if cli.ids.is_empty() {
        if all { Batch::new() } else { Batch::text() }
    } else {
        Batch::new().ids(cli.ids.iter().cloned())
    };
    if let Some(filter) = &cli.filter {
        batch = batch.predicate(Predicate::parse(filter).map_err(|e| e.to_string())?);
    }
    Ok(batch.on_error(cli.on_error))
}

fn report(cli: &Cli, status: &BatchStatus) -> Result<(), String> {
    if cli.json {
        return print_json(status);
    }
    for id in status.failed() {
        eprintln!("failed: {id}");
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}
