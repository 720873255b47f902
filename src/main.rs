mod catalog;
mod compare;
mod config;
mod error;
mod input;
mod matcher;
mod model;
mod output;
mod scraper;
mod store;
mod xml;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::bail;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::compare::ComparisonBuilder;
use crate::config::Config;
use crate::scraper::DirScraper;
use crate::store::CatalogStore;
use crate::xml::specs::{self, SpecsExtractor};

#[derive(Parser)]
#[command(name = "bmecat_compare", about = "Reconcile BMEcat product feeds with web and AI-extracted specifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cleaned product identifiers of an .xml or .json input file
    Ids {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Extract free-text extension fields and write the scraped-text cache
    Specs {
        /// Original BMEcat XML
        #[arg(short, long)]
        original: PathBuf,
        /// Only this product (prints its sections)
        #[arg(short, long)]
        pid: Option<String>,
    },
    /// Build per-product, per-language comparison tables
    Compare {
        /// Original BMEcat XML
        #[arg(short, long)]
        original: PathBuf,
        /// DABAG BMEcat XML
        #[arg(short, long)]
        dabag: PathBuf,
        /// Fetch web data for products missing from the catalog store
        #[arg(long)]
        auto_scrape: bool,
        /// Directory of <id>.json scrape results used by --auto-scrape
        #[arg(long)]
        scraped_dir: Option<PathBuf>,
    },
    /// Build the controlled vocabulary CSV from the catalog store (position-based, best effort)
    Catalog,
    /// Show catalog store statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    let result = match cli.command {
        Commands::Ids { input } => {
            let ids = input::load_supplier_ids(&input, cfg.tolerant_xml)?;
            for id in &ids {
                println!("{}", id);
            }
            println!("\n{} identifiers", ids.len());
            Ok(())
        }
        Commands::Specs { original, pid } => {
            require_file(&original, "Original XML")?;
            let extractor = SpecsExtractor::load(&original, cfg.tolerant_xml)?;
            match pid {
                Some(pid) => {
                    let sections = extractor.extract_fields(&pid, &cfg.udx_fields);
                    if sections.is_empty() {
                        println!("No free-text fields found for {}", pid);
                        return Ok(());
                    }
                    print!("{}", specs::render_sections(&sections));
                    let path = cfg.scraped_text_path(&pid);
                    specs::write_sections(&path, &sections)?;
                    println!("Saved {}", path.display());
                }
                None => {
                    let all = extractor.extract_all(&cfg.udx_fields);
                    let written = write_all_sections(&cfg, &all)?;
                    println!(
                        "{} products, {} with free text written to {}",
                        all.len(),
                        written,
                        cfg.scraped_text_dir.display()
                    );
                }
            }
            Ok(())
        }
        Commands::Compare {
            original,
            dabag,
            auto_scrape,
            scraped_dir,
        } => {
            require_file(&original, "Original XML")?;
            require_file(&dabag, "DABAG XML")?;

            let mut builder = ComparisonBuilder::new(&cfg);
            if let Some(dir) = scraped_dir {
                builder = builder.with_scraper(Box::new(DirScraper::new(dir)));
            }
            let merged = builder.build(&original, &dabag, auto_scrape)?;

            let tables = output::tables(&merged);
            for table in &tables {
                output::save_table(&cfg.comparison_tables_dir, table)?;
            }
            let master_path = cfg.master_comparison_path();
            output::save_master(&master_path, &tables)?;

            println!("Products processed: {}", merged.len());
            println!("Tables created:     {}", tables.len());
            println!("Tables directory:   {}", cfg.comparison_tables_dir.display());
            println!("Master catalog:     {}", master_path.display());
            Ok(())
        }
        Commands::Catalog => {
            let path = cfg.master_json_path();
            if !path.exists() {
                bail!("Catalog store not found at {}. Scrape products first.", path.display());
            }
            let store = CatalogStore::load(&path, cfg.backup_count);
            let count = catalog::export(&store, &cfg.unique_features_path)?;
            println!("{} feature mappings written to {}", count, cfg.unique_features_path.display());
            Ok(())
        }
        Commands::Stats => {
            let store = CatalogStore::load(cfg.master_json_path(), cfg.backup_count);
            let s = store.statistics();
            println!("Store:        {}", store.path().display());
            println!("Products:     {}", s.total_products);
            println!("Created:      {}", s.created_at);
            println!("Last updated: {}", s.last_updated);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn require_file(path: &Path, what: &str) -> anyhow::Result<()> {
    if !path.is_file() {
        bail!("{} not found or not a file: {}", what, path.display());
    }
    Ok(())
}

fn write_all_sections(
    cfg: &Config,
    all: &indexmap::IndexMap<String, specs::Sections>,
) -> anyhow::Result<usize> {
    let pb = ProgressBar::new(all.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut written = 0usize;
    for (pid, sections) in all {
        if !sections.is_empty() {
            specs::write_sections(&cfg.scraped_text_path(pid), sections)?;
            written += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(written)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
