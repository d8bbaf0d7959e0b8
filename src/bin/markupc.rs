//! Compiles a directory of extended-HTML pages into plain HTML.

use anyhow::{Context, Result};
use clap::Parser;
use markup_compiler::{
    compile_html, BuildStore, CollectingSink, CompileOptions, CompilerConfig, FsHost, SourceFile,
    Value,
};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "markupc")]
#[command(author, version, about = "Extended-HTML page compiler", long_about = None)]
struct Cli {
    /// Directory holding the source pages
    input: PathBuf,

    /// Output directory; mirrors the input layout
    #[arg(short, long, default_value = "dist")]
    out: PathBuf,

    /// JSON file used as `props` for every page
    #[arg(long)]
    props: Option<PathBuf>,

    /// JSON object seeding the build store of every page
    #[arg(long)]
    store: Option<PathBuf>,

    /// Compiler config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exit non-zero when any diagnostic was published
    #[arg(long)]
    strict: bool,
}

struct PageReport {
    page: PathBuf,
    diagnostics: usize,
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// `.html` files under `dir`, skipping partials whose name starts with `_`.
fn discover_pages(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.ends_with(".html") && !name.starts_with('_')
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn page_url(root: &Path, page: &Path) -> String {
    let relative = page.strip_prefix(root).unwrap_or(page);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", parts.join("/"))
}

fn compile_page(
    cli: &Cli,
    config: &CompilerConfig,
    props: &serde_json::Value,
    store_seed: &serde_json::Value,
    page: &Path,
) -> Result<PageReport> {
    let url = page_url(&cli.input, page);
    let content = fs::read_to_string(page).with_context(|| format!("reading {}", page.display()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("building runtime")?;

    let store = BuildStore::from_json(store_seed);
    let host = FsHost::new(&cli.input, config.clone(), store.clone());
    let sink = CollectingSink::new();
    let output = runtime.block_on(compile_html(
        SourceFile::new(url.clone(), content),
        CompileOptions {
            properties: Value::from_json(props),
            build_store: store,
            diagnostics: &sink,
            host: &host,
            config,
        },
    ));

    let diagnostics = sink.take();
    for diagnostic in &diagnostics {
        tracing::warn!("{}", diagnostic);
    }

    let target = cli.out.join(url.trim_start_matches('/'));
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&target, output.html()).with_context(|| format!("writing {}", target.display()))?;
    tracing::info!(page = %url, out = %target.display(), "wrote page");

    Ok(PageReport {
        page: page.to_path_buf(),
        diagnostics: diagnostics.len(),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MARKUPC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CompilerConfig::from_json_file(path)?,
        None => CompilerConfig::default(),
    };
    let props = match &cli.props {
        Some(path) => read_json(path)?,
        None => serde_json::Value::Object(Default::default()),
    };
    let store_seed = match &cli.store {
        Some(path) => read_json(path)?,
        None => serde_json::Value::Object(Default::default()),
    };

    let pages = discover_pages(&cli.input);
    tracing::info!(pages = pages.len(), input = %cli.input.display(), "compiling");

    let reports: Vec<Result<PageReport>> = pages
        .par_iter()
        .map(|page| compile_page(&cli, &config, &props, &store_seed, page))
        .collect();

    let mut failed = 0;
    let mut diagnosed = 0;
    for report in reports {
        match report {
            Ok(report) if report.diagnostics > 0 => {
                diagnosed += 1;
                tracing::warn!(
                    page = %report.page.display(),
                    diagnostics = report.diagnostics,
                    "compiled with diagnostics"
                );
            }
            Ok(_) => {}
            Err(err) => {
                failed += 1;
                tracing::error!("{:#}", err);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} page(s) could not be compiled", failed);
    }
    if cli.strict && diagnosed > 0 {
        anyhow::bail!("{} page(s) published diagnostics", diagnosed);
    }
    Ok(())
}
