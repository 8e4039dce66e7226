//! CLI tool for auditing npm dependencies

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use npm_warden::{
    audit_project, render_json, render_text, AuditConfig, AuditReport, RiskSeverity,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "npm-warden")]
#[command(about = "Audit npm dependencies for maintenance and security risks", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the npm project to audit
    #[arg(short = 'p', long, default_value = ".", global = true)]
    project_path: PathBuf,

    /// Path to custom configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Dependencies to ignore (can be specified multiple times)
    #[arg(long = "ignore", global = true)]
    ignore_dependencies: Vec<String>,

    /// Months since last publish to flag as stale
    #[arg(long, global = true)]
    stale_months: Option<f64>,

    /// Minimum weekly downloads threshold
    #[arg(long, global = true)]
    min_downloads: Option<u64>,

    /// Exclude devDependencies from the audit
    #[arg(long, global = true)]
    skip_dev: bool,

    /// Do not run npm audit for known vulnerabilities
    #[arg(long, global = true)]
    skip_vuln_check: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run full audit and display summary
    Scan {
        /// Display every flagged package
        #[arg(long)]
        detailed: bool,

        /// Exit with non-zero code if any risk is found
        #[arg(long)]
        fail_on_risk: bool,
    },

    /// Generate detailed audit report
    Report {
        /// Output format
        #[arg(short = 'f', long, default_value = "text")]
        format: ReportFormat,

        /// Output file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Check dependencies against thresholds (exit code based)
    Check {
        /// Fail when any flag is at or above this severity (low, medium, high)
        #[arg(long, default_value = "low")]
        min_severity: RiskSeverity,
    },
}

#[derive(Clone, Debug)]
enum ReportFormat {
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = match build_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} Failed to load config: {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Auditing dependencies...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = audit_project(&cli.project_path, &config).await;

    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} Audit failed: {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Scan {
            detailed,
            fail_on_risk,
        } => {
            display_summary(&report);

            if detailed {
                println!("{}", render_text(&report));
            }

            if fail_on_risk && report.has_risks() {
                eprintln!(
                    "\n{} {} packages flagged",
                    "Failed:".red().bold(),
                    report.summary.flagged
                );
                process::exit(1);
            }
        }

        Commands::Report { format, output } => {
            let content = match format {
                ReportFormat::Text => render_text(&report),
                ReportFormat::Json => match render_json(&report) {
                    Ok(json) => json,
                    Err(e) => {
                        eprintln!("{} Failed to serialize report: {}", "Error:".red().bold(), e);
                        process::exit(1);
                    }
                },
            };

            if let Some(output_path) = output {
                match std::fs::write(&output_path, content) {
                    Ok(_) => println!("Report written to: {}", output_path.display()),
                    Err(e) => {
                        eprintln!("{} Failed to write report: {}", "Error:".red().bold(), e);
                        process::exit(1);
                    }
                }
            } else {
                println!("{}", content);
            }
        }

        Commands::Check { min_severity } => {
            let failures: Vec<String> = report
                .results
                .iter()
                .flat_map(|result| {
                    result
                        .risks
                        .iter()
                        .filter(|risk| risk.severity >= min_severity)
                        .map(move |risk| {
                            format!(
                                "  - {}@{}: [{} {}] {}",
                                result.package.name,
                                result.package.version,
                                risk.severity,
                                risk.risk_type,
                                risk.reason
                            )
                        })
                })
                .collect();

            if !failures.is_empty() {
                eprintln!("{} {} check failures:", "Failed:".red().bold(), failures.len());
                for failure in failures {
                    eprintln!("{}", failure);
                }
                process::exit(1);
            } else {
                println!("{} All checks passed!", "Success:".green().bold());
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Config file (or defaults) with command-line overrides applied
fn build_config(cli: &Cli) -> anyhow::Result<AuditConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AuditConfig::default(),
    };

    if let Some(months) = cli.stale_months {
        config.stale_months = months;
    }
    if let Some(downloads) = cli.min_downloads {
        config.min_downloads = downloads;
    }
    config.skip_dev |= cli.skip_dev;
    config.skip_vulnerability_check |= cli.skip_vuln_check;
    config
        .ignored_dependencies
        .extend(cli.ignore_dependencies.iter().cloned());

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_config(path: &Path) -> anyhow::Result<AuditConfig> {
    AuditConfig::from_toml_file(path)
        .with_context(|| format!("Could not read config file {}", path.display()))
}

fn display_summary(report: &AuditReport) {
    let summary = &report.summary;
    let percent = |count: usize| {
        if summary.total_packages == 0 {
            0.0
        } else {
            count as f32 / summary.total_packages as f32 * 100.0
        }
    };

    println!("\n{}", "=== Audit Summary ===".bold());
    println!("Project: {}", report.project_name.cyan());
    println!("Total packages: {}", summary.total_packages);
    println!();

    println!("Risks:");
    println!(
        "  {} {} ({:.1}%)",
        "●".red(),
        format!("Security: {}", summary.security).red(),
        percent(summary.security)
    );
    println!(
        "  {} {} ({:.1}%)",
        "●".yellow(),
        format!("Stale: {}", summary.stale).yellow(),
        percent(summary.stale)
    );
    println!(
        "  {} {} ({:.1}%)",
        "●".truecolor(255, 165, 0), // Orange
        format!("Low usage: {}", summary.low_usage).truecolor(255, 165, 0),
        percent(summary.low_usage)
    );
    println!();

    println!(
        "Packages with risks: {} ({} high severity)",
        summary.flagged, summary.high_severity
    );
    if summary.flagged == 0 {
        println!("{}", "No risks found! All dependencies look healthy.".green());
    }
}
