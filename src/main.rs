use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use folio::panic_handler;
use folio::settings::load_settings;
use folio::viewer::{CommandRenderer, DocumentHandle, ViewStatus, Viewer};

#[derive(Debug, Parser)]
#[command(name = "folio")]
#[command(about = "Page through a document with a prefetching render cache")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to <config dir>/folio/config.yaml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Document to open at startup
    #[arg(long, value_name = "FILE")]
    document: Option<PathBuf>,

    /// Page count of --document
    #[arg(long, requires = "document")]
    pages: Option<usize>,

    #[arg(long, value_name = "FILE", default_value = "folio.log")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Renderer command; {path} {page} {scale} and {dpi} are substituted
    #[arg(last = true, required = true, value_name = "RENDERER")]
    renderer: Vec<String>,
}

enum Flow {
    Continue,
    Quit,
}

fn main() -> Result<()> {
    panic_handler::initialize_panic_handler();
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| anyhow!("invalid log level {:?}", cli.log_level))?;
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("cannot create log file {:?}", cli.log_file))?,
    )?;
    info!("Starting folio");

    let settings = load_settings(cli.config.as_deref())?;
    let mut renderer_args = cli.renderer.into_iter();
    let Some(program) = renderer_args.next() else {
        bail!("no renderer command given");
    };
    let renderer = Arc::new(CommandRenderer::new(program, renderer_args.collect()));
    let mut viewer = Viewer::new(renderer, &settings);

    if let Some(path) = cli.document {
        let pages = cli.pages.context("--pages is required with --document")?;
        viewer.open_document(DocumentHandle::new(path), pages)?;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print_status(&mut stdout, &viewer)?;

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match run_command(&mut viewer, &mut stdout, line) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => {
                error!("{line}: {e:#}");
                writeln!(stdout, "error: {e:#}")?;
            }
        }
        viewer.poll();
        print_status(&mut stdout, &viewer)?;
    }

    viewer.close_document();
    info!("Shutting down folio");
    Ok(())
}

fn run_command(viewer: &mut Viewer, out: &mut impl Write, line: &str) -> Result<Flow> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let arg = words.next();

    match command {
        "goto" | "g" => viewer.go_to_page(parse_arg(arg, "page number")?),
        "next" | "n" => viewer.next_page(),
        "prev" | "p" => viewer.prev_page(),
        "first" => viewer.first_page(),
        "last" => viewer.last_page(),
        "zoom-in" | "+" => viewer.zoom_in(),
        "zoom-out" | "-" => viewer.zoom_out(),
        "scale" => viewer.set_scale(parse_arg(arg, "scale")?),
        "retry" => viewer.retry(),
        "wait" => {
            let millis: u64 = match arg {
                Some(_) => parse_arg(arg, "milliseconds")?,
                None => 10_000,
            };
            if !viewer.wait_idle(Duration::from_millis(millis)) {
                writeln!(out, "still rendering")?;
            }
        }
        "status" => {
            let snapshot = viewer.snapshot();
            writeln!(
                out,
                "cache: {} pages {:?}, {} evictions, {} hits, {} misses, {} in flight",
                snapshot.cache.entries,
                viewer.scheduler().cache().pages(),
                snapshot.cache.evictions,
                snapshot.cache.hits,
                snapshot.cache.misses,
                snapshot.in_flight
            )?;
        }
        "save" => {
            let path: PathBuf = parse_arg(arg, "output path")?;
            let Some(image) = viewer.status().image() else {
                bail!("no page is displayed");
            };
            std::fs::write(&path, image.bytes())
                .with_context(|| format!("cannot write {path:?}"))?;
            writeln!(out, "wrote {} bytes to {path:?}", image.len())?;
        }
        "open" => {
            let path: PathBuf = parse_arg(arg, "document path")?;
            let pages = parse_arg(words.next(), "page count")?;
            viewer.open_document(DocumentHandle::new(path), pages)?;
        }
        "close" => viewer.close_document(),
        "quit" | "q" => return Ok(Flow::Quit),
        other => bail!("unknown command {other:?}"),
    }
    Ok(Flow::Continue)
}

fn parse_arg<T>(arg: Option<&str>, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let arg = arg.with_context(|| format!("missing {what}"))?;
    arg.parse()
        .with_context(|| format!("invalid {what} {arg:?}"))
}

fn print_status(out: &mut impl Write, viewer: &Viewer) -> Result<()> {
    let snapshot = viewer.snapshot();
    let state = match &snapshot.status {
        ViewStatus::Idle => {
            writeln!(out, "[idle]")?;
            return Ok(());
        }
        ViewStatus::Loading => "loading".to_string(),
        ViewStatus::Ready(image) => match image.dimensions() {
            Some((w, h)) => format!("ready {w}x{h}"),
            None => format!("ready {} bytes", image.len()),
        },
        ViewStatus::Error(e) => format!("error: {e}"),
    };

    writeln!(
        out,
        "[{}/{} @ {:.2}x] {state} | cache {}/{}, {} evicted",
        snapshot.page,
        snapshot.total_pages,
        snapshot.scale,
        snapshot.cache.entries,
        snapshot.cache.capacity,
        snapshot.cache.evictions
    )?;
    Ok(())
}
