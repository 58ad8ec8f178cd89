//! mobimeta - read and rewrite MOBI/AZW metadata

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mobimeta::mobi::{UNKNOWN_AUTHOR, parse_date, read_metadata_with_encoding};
use mobimeta::{Kf8Book, Metadata, UpdateOptions, update_file};

#[derive(Parser)]
#[command(name = "mobimeta")]
#[command(version, about = "Read and rewrite MOBI/AZW metadata", long_about = None)]
#[command(after_help = "EXAMPLES:
    mobimeta info book.azw3                     Show book metadata
    mobimeta set book.mobi --title 'New Title'  Replace the title in place
    mobimeta inspect book.azw3 dump/            Dump the KF8 structure")]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show book metadata
    Info {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Text encoding for books with an unknown codepage (e.g. "utf-8")
        #[arg(long, value_name = "LABEL")]
        encoding: Option<String>,
    },

    /// Overlay the given fields on the current metadata and rewrite the file
    Set(SetArgs),

    /// Dump the structure of a KF8 (AZW3) book
    Inspect {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[arg(value_name = "DIR")]
        output: PathBuf,

        /// Print a JSON summary as well
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SetArgs {
    #[arg(value_name = "FILE")]
    path: PathBuf,

    #[arg(long)]
    title: Option<String>,

    /// Replaces all authors; repeat for several
    #[arg(long = "author", value_name = "AUTHOR")]
    authors: Vec<String>,

    #[arg(long)]
    author_sort: Option<String>,

    #[arg(long)]
    publisher: Option<String>,

    #[arg(long)]
    comments: Option<String>,

    #[arg(long)]
    isbn: Option<String>,

    /// Replaces all tags; repeat for several
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// RFC 3339 or YYYY-MM-DD
    #[arg(long)]
    pubdate: Option<String>,

    /// IANA language tag, e.g. "en-US"
    #[arg(long)]
    language: Option<String>,

    /// Replacement cover image
    #[arg(long, value_name = "IMAGE")]
    cover: Option<PathBuf>,

    /// Write the author sort string as the author
    #[arg(long)]
    prefer_author_sort: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Info {
            path,
            json,
            encoding,
        } => show_info(&path, json, encoding.as_deref()),
        Command::Set(args) => set(args),
        Command::Inspect { path, output, json } => inspect(&path, &output, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn read(path: &Path, encoding: Option<&str>) -> Result<Metadata, String> {
    let codec = match encoding {
        Some(label) => Some(
            encoding_rs::Encoding::for_label(label.as_bytes())
                .ok_or_else(|| format!("unknown encoding: {label}"))?,
        ),
        None => None,
    };
    let mut file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    read_metadata_with_encoding(&mut file, codec).map_err(|e| e.to_string())
}

fn show_info(path: &Path, json: bool, encoding: Option<&str>) -> Result<(), String> {
    let meta = read(path, encoding)?;

    if json {
        let out = serde_json::to_string_pretty(&meta).map_err(|e| e.to_string())?;
        println!("{out}");
        return Ok(());
    }

    println!("File: {}", path.display());
    println!("Title: {}", meta.title);
    println!("Authors: {}", meta.authors.join(" & "));
    if let Some(ref author_sort) = meta.author_sort {
        println!("Author sort: {author_sort}");
    }
    if !meta.language.is_empty() {
        println!("Language: {}", meta.language);
    }
    if let Some(ref publisher) = meta.publisher {
        println!("Publisher: {publisher}");
    }
    if let Some(ref isbn) = meta.isbn {
        println!("ISBN: {isbn}");
    }
    if !meta.tags.is_empty() {
        let tags: Vec<&str> = meta.tags.iter().map(String::as_str).collect();
        println!("Tags: {}", tags.join(", "));
    }
    if let Some(pubdate) = meta.pubdate {
        println!("Published: {}", pubdate.format("%Y-%m-%d"));
    }
    if let Some(ref comments) = meta.comments {
        let comments = comments.trim();
        match comments.char_indices().nth(200) {
            Some((end, _)) => println!("Comments: {}...", &comments[..end]),
            None => println!("Comments: {comments}"),
        }
    }
    if let Some(ref cover) = meta.cover_data {
        println!("Cover: {} ({} bytes)", cover.format.extension(), cover.data.len());
    }

    Ok(())
}

fn set(args: SetArgs) -> Result<(), String> {
    let mut mi = read(&args.path, None)?;
    overlay(&mut mi, &args)?;

    let options = UpdateOptions {
        prefer_author_sort: args.prefer_author_sort,
    };
    update_file(&args.path, &mi, &options).map_err(|e| e.to_string())?;
    println!("Updated {}", args.path.display());
    Ok(())
}

/// Apply the fields given on the command line to the metadata read from the
/// book.
fn overlay(mi: &mut Metadata, args: &SetArgs) -> Result<(), String> {
    // Only a newly supplied cover is rewritten.
    mi.cover_data = None;

    if let Some(ref title) = args.title {
        mi.title = title.clone();
    }
    if !args.authors.is_empty() {
        mi.authors = args.authors.clone();
    } else if mi.authors == [UNKNOWN_AUTHOR] {
        // Placeholder from the reader, not a real author.
        mi.authors.clear();
    }
    if args.author_sort.is_some() {
        mi.author_sort = args.author_sort.clone();
    }
    if args.publisher.is_some() {
        mi.publisher = args.publisher.clone();
    }
    if args.comments.is_some() {
        mi.comments = args.comments.clone();
    }
    if args.isbn.is_some() {
        mi.isbn = args.isbn.clone();
    }
    if !args.tags.is_empty() {
        mi.tags = args.tags.iter().cloned().collect();
    }
    if let Some(ref pubdate) = args.pubdate {
        mi.pubdate = Some(parse_date(pubdate).ok_or_else(|| format!("invalid date: {pubdate}"))?);
    }
    if let Some(ref language) = args.language {
        mi.language = language.clone();
    }
    if let Some(ref cover) = args.cover {
        let data = std::fs::read(cover).map_err(|e| format!("{}: {e}", cover.display()))?;
        *mi = std::mem::take(mi).with_cover(data);
        if mi.cover_data.is_none() {
            return Err(format!("{}: not a JPEG, PNG, GIF or BMP image", cover.display()));
        }
    }
    Ok(())
}

fn inspect(path: &Path, output: &Path, json: bool) -> Result<(), String> {
    let mut file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let book = Kf8Book::open(&mut file).map_err(|e| e.to_string())?;
    book.dump(output).map_err(|e| e.to_string())?;

    let summary = book.summary();
    if json {
        let out = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
        println!("{out}");
    } else {
        println!("Records: {}", summary.records);
        println!("KF8 header record: {}", summary.kf8_header_record);
        println!("Text: {} bytes", summary.text_length);
        println!("Flows: {}", summary.flows);
        println!("Parts: {} ({} fragments)", summary.parts, summary.fragments);
        println!("TOC entries: {}", summary.toc.len());
        println!("Guide entries: {}", summary.guide.len());
        println!("Written to {}", output.display());
    }
    Ok(())
}
