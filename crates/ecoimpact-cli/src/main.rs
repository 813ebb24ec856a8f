use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ecoimpact_core::{EstimationParams, EstimationResult, Product, ReferenceTables};

#[derive(Parser)]
#[command(name = "ecoimpact")]
#[command(about = "Monte-Carlo estimation of a packaged food product's environmental impact", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate environmental impacts for a product
    Estimate {
        /// JSON file holding the product (ingredients, nutriments, categories_tags, ...)
        #[arg(long)]
        product: PathBuf,
        /// JSON file holding the reference tables (ingredients, taxonomy, percentage_distribution)
        #[arg(long)]
        tables: PathBuf,
        /// Comma-separated impact names to estimate (must be keys of ingredients' `impacts` map)
        #[arg(long, value_delimiter = ',')]
        impacts: Vec<String>,
        /// Optional JSON file overriding EstimationParams defaults
        #[arg(long)]
        params: Option<PathBuf>,
        /// Mass in grams to report impacts for (overrides params.quantity)
        #[arg(long)]
        quantity: Option<f64>,
        /// Seed the RNG for a deterministic run (overrides params.seed)
        #[arg(long)]
        seed: Option<u64>,
        /// Include raw per-run distributions in the result
        #[arg(long)]
        distributions: bool,
        /// Output format (json, pretty)
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },
    /// Run preflight checks on a product and report warnings without sampling
    Check {
        #[arg(long)]
        product: PathBuf,
        #[arg(long)]
        tables: PathBuf,
        #[arg(long, value_delimiter = ',')]
        impacts: Vec<String>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf, what: &str) -> T {
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {what} file {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error parsing {what} file {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Estimate { product, tables, impacts, params, quantity, seed, distributions, format } => {
            let product: Product = read_json(&product, "product");
            let tables: ReferenceTables = read_json(&tables, "reference tables");
            let mut params: EstimationParams = match params {
                Some(path) => read_json(&path, "params"),
                None => EstimationParams::default(),
            };
            if let Some(q) = quantity {
                params.quantity = q;
            }
            if seed.is_some() {
                params.seed = seed;
            }
            if distributions {
                params.distributions_as_result = true;
            }

            if impacts.is_empty() {
                eprintln!("Error: --impacts must name at least one impact");
                std::process::exit(1);
            }

            match ecoimpact_core::estimate_impacts(&product, &tables, &params, &impacts) {
                Ok(result) => {
                    if format == "json" {
                        println!("{}", serde_json::to_string_pretty(&result).expect("result is serializable"));
                    } else {
                        print_result(&result);
                    }
                }
                Err(e) => {
                    eprintln!("Estimation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Check { product, tables, impacts } => {
            let product: Product = read_json(&product, "product");
            let tables: ReferenceTables = read_json(&tables, "reference tables");
            let params = EstimationParams::default();

            if impacts.is_empty() {
                eprintln!("Error: --impacts must name at least one impact");
                std::process::exit(1);
            }

            match ecoimpact_core::preflight::run(&product, &tables, &params, &impacts) {
                Ok(out) => {
                    println!("✓ product passes preflight");
                    println!("  use_defined_prct: {}", out.use_defined_prct);
                    println!("  use_nutritional_info: {}", out.use_nutritional_info);
                    if !out.ignored_unknown_ingredients.is_empty() {
                        println!("  ignored unknown ingredients: {}", out.ignored_unknown_ingredients.join(", "));
                    }
                    if !out.warnings.is_empty() {
                        println!("  warnings:");
                        for w in &out.warnings {
                            println!("    - {w}");
                        }
                    }
                }
                Err(e) => {
                    eprintln!("✗ preflight rejected the product: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn print_result(result: &EstimationResult) {
    println!("Product quantity: {:.1}g", result.product_quantity);
    println!("Number of runs: {}", result.number_of_runs);
    println!("Reliability: {}/4", result.reliability);
    println!("Average total used mass: {:.2}g", result.average_total_used_mass);
    println!();
    println!("Impacts:");
    for (name, mean) in &result.impacts_geom_means {
        let unit = result.impacts_units.get(name).map(String::as_str).unwrap_or("?");
        let stdev = result.impacts_geom_stdevs.get(name).copied().unwrap_or(f64::NAN);
        println!("  {name:30} {mean:12.4} {unit:8} (geom stdev x/÷ {stdev:.3})");
        if let Some(quantiles) = result.impacts_quantiles.get(name) {
            for (q, v) in quantiles {
                println!("    q{q:<6} {v:12.4}");
            }
        }
    }
    println!();
    println!("Ingredient mass shares:");
    for (id, share) in &result.ingredients_mass_share {
        println!("  {id:30} {:6.2}%", share * 100.0);
    }
    if !result.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for w in &result.warnings {
            println!("  - {w}");
        }
    }
}
