// src/main.rs
// =============================================================================
// This is the entry point of the prerender-kit CLI.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Set up logging (RUST_LOG, or --verbose)
// 3. Resolve the config: file, then flag overrides, then validation
// 4. Prerender through an HttpRenderer pointed at the upstream server
// 5. Print the manifest and exit with a proper code
//    (0 = success, 1 = a page failed under the error policy, 2 = error)
//
// Rust concepts used:
// - async/await: renders run concurrently on the tokio runtime
// - downcast_ref: telling a render failure apart from an I/O error
// =============================================================================

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use prerender_kit::{
    prerender, HttpRenderer, Manifest, ManifestEntry, PrerenderConfig, PrerenderFailure,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_logging(verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) if e.downcast_ref::<PrerenderFailure>().is_some() => {
            eprintln!("Prerendering failed: {}", e);
            1
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

// RUST_LOG wins; otherwise info for this crate, debug with --verbose
fn init_logging(verbose: bool) {
    let default = if verbose {
        "prerender_kit=debug"
    } else {
        "prerender_kit=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            upstream,
            overrides,
            json,
            manifest,
            verbose: _,
        } => {
            let config = overrides.resolve()?;
            handle_run(&upstream, config, json, manifest).await
        }
        Commands::Config { overrides } => {
            let config = overrides.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

// Handles the 'run' subcommand
async fn handle_run(
    upstream: &str,
    config: PrerenderConfig,
    json: bool,
    write_manifest: bool,
) -> Result<()> {
    let renderer = Arc::new(HttpRenderer::new(upstream)?);
    let out_dir = config.out_dir.clone();

    eprintln!("🔍 Prerendering {} into {}", upstream, out_dir.display());

    let manifest = prerender(config, renderer).await?;

    if write_manifest {
        let dest = out_dir.join("prerendered.json");
        let contents = serde_json::to_string_pretty(&manifest)?;
        tokio::fs::create_dir_all(&out_dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;
        tokio::fs::write(&dest, contents)
            .await
            .with_context(|| format!("Failed to write manifest: {}", dest.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    } else {
        print_table(&manifest);
    }

    Ok(())
}

// Prints the manifest as a human-readable table, sorted by path
fn print_table(manifest: &Manifest) {
    println!("{:<50} {:<10} {:<40}", "PATH", "KIND", "OUTPUT");
    println!("{}", "=".repeat(100));

    for (path, entry) in manifest.entries() {
        let (kind, detail) = describe(&entry);

        // Truncate path if too long for display
        let path_display = if path.chars().count() > 47 {
            format!("{}...", path.chars().take(47).collect::<String>())
        } else {
            path.to_string()
        };

        println!("{:<50} {:<10} {:<40}", path_display, kind, detail);
    }

    println!();
    println!("📊 Summary:");
    println!("   📄 Pages: {}", manifest.pages.len());
    println!("   📦 Assets: {}", manifest.assets.len());
    println!("   🔀 Redirects: {}", manifest.redirects.len());
    println!("   📋 Total: {}", manifest.len());
}

fn describe(entry: &ManifestEntry) -> (&'static str, String) {
    match entry {
        ManifestEntry::Page(page) => ("page", page.file.clone()),
        ManifestEntry::Asset(asset) => (
            "asset",
            asset.content_type.clone().unwrap_or_else(|| "-".to_string()),
        ),
        ManifestEntry::Redirect(redirect) => (
            "redirect",
            format!("{} -> {}", redirect.status, redirect.location),
        ),
    }
}
