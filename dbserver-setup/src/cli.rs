//! Headless command-line front end.
//!
//! Usage:
//!   dbserver-setup samples list                 List sample schemas under the samples root
//!   dbserver-setup samples install [NAME...]    Install all (or the named) samples
//!   dbserver-setup samples remove NAME...       Drop sample schemas
//!   dbserver-setup packages list                Show the package catalog
//!   dbserver-setup packages plan NAME...        Show the install plan for proposed packages
//!   dbserver-setup check-connection             Verify the server connection

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use crate::database::connection::{check_connection, connect_instance, RealDbConnector};
use crate::packages::{PackageCatalog, PlanAction};
use crate::progress::{ProgressObserver, ProgressReporter, ResultCode};
use crate::samples::{self, ExampleDatabaseInfo};
use crate::settings::SetupSettings;
use crate::utils::logging::mask_connection_string;

#[derive(Parser, Debug)]
#[command(name = "dbserver-setup")]
#[command(version)]
#[command(about = "Database server setup: sample schemas, package plans and connection checks")]
pub struct Cli {
    /// Settings file (default: ./dbserver-setup.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sample database schemas
    Samples {
        #[command(subcommand)]
        action: SampleAction,
    },

    /// Product package catalog
    Packages {
        #[command(subcommand)]
        action: PackageAction,
    },

    /// Open a connection to the server and report the result
    CheckConnection {
        /// Connection string (overrides settings)
        #[arg(long)]
        connection: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SampleAction {
    /// List discovered samples
    List {
        /// Samples root (overrides settings)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Install samples into the server
    Install {
        /// Schema names to install (default: all discovered)
        names: Vec<String>,

        #[arg(long)]
        root: Option<PathBuf>,

        #[arg(long)]
        connection: Option<String>,
    },

    /// Drop sample schemas from the server
    Remove {
        #[arg(required = true)]
        names: Vec<String>,

        #[arg(long)]
        connection: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PackageAction {
    /// List catalog packages
    List {
        /// Catalog manifest (overrides settings)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Propose packages by name and print the resulting plan
    Plan {
        #[arg(required = true)]
        names: Vec<String>,

        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

/// Renders run progress as a terminal bar.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new(message: &str) -> Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
            )?
            .progress_chars("=>-"),
        );
        bar.set_message(message.to_string());
        Ok(Self { bar })
    }
}

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, value: u8) {
        self.bar.set_position(u64::from(value.min(100)));
    }

    fn finished(&self, result: ResultCode) {
        self.bar
            .finish_with_message(format!("{:?} (code {})", result, result.code()));
    }
}

fn resolve_connection(flag: Option<String>, settings: &SetupSettings) -> Result<String> {
    flag.or_else(|| settings.connection_string.clone())
        .filter(|c| !c.trim().is_empty())
        .context("No connection string: pass --connection or set DBSERVER_SETUP_CONNECTION_STRING")
}

async fn load_catalog(flag: Option<PathBuf>, settings: &SetupSettings) -> Result<PackageCatalog> {
    let path = flag
        .or_else(|| settings.catalog_path.clone())
        .context("No catalog manifest: pass --catalog or set catalog_path")?;
    PackageCatalog::load(&path).await
}

/// Run one command. Returns the process exit code.
pub async fn execute(command: Commands, settings: &SetupSettings) -> Result<i32> {
    match command {
        Commands::Samples { action } => match action {
            SampleAction::List { root } => cmd_samples_list(root, settings).await,
            SampleAction::Install {
                names,
                root,
                connection,
            } => cmd_samples_install(names, root, connection, settings).await,
            SampleAction::Remove { names, connection } => {
                cmd_samples_remove(names, connection, settings).await
            }
        },
        Commands::Packages { action } => match action {
            PackageAction::List { catalog } => cmd_packages_list(catalog, settings).await,
            PackageAction::Plan { names, catalog } => {
                cmd_packages_plan(names, catalog, settings).await
            }
        },
        Commands::CheckConnection { connection } => {
            cmd_check_connection(connection, settings).await
        }
    }
}

async fn cmd_samples_list(root: Option<PathBuf>, settings: &SetupSettings) -> Result<i32> {
    let root = root.unwrap_or_else(|| settings.samples_root.clone());
    let found = samples::discover(&root, settings.encoding()).await;

    if found.is_empty() {
        println!("No samples found under {}", root.display());
        return Ok(0);
    }
    for s in &found {
        let count = s.script_count().await;
        println!(
            "{:<24} {} script(s){}",
            s.schema_name,
            count,
            if count > 1 { "" } else { " (schema only)" }
        );
    }
    Ok(0)
}

async fn cmd_samples_install(
    names: Vec<String>,
    root: Option<PathBuf>,
    connection: Option<String>,
    settings: &SetupSettings,
) -> Result<i32> {
    let root = root.unwrap_or_else(|| settings.samples_root.clone());
    let found = samples::discover(&root, settings.encoding()).await;

    let selected: Vec<ExampleDatabaseInfo> = if names.is_empty() {
        found
    } else {
        let missing: Vec<&String> = names
            .iter()
            .filter(|n| !found.iter().any(|s| s.schema_name.eq_ignore_ascii_case(n)))
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("Unknown sample(s): {:?}", missing);
        }
        found
            .into_iter()
            .filter(|s| names.iter().any(|n| s.schema_name.eq_ignore_ascii_case(n)))
            .collect()
    };

    if selected.is_empty() {
        println!("Nothing to install under {}", root.display());
        return Ok(0);
    }

    let conn = resolve_connection(connection, settings)?;
    let instance = connect_instance(&conn, settings.connect_timeout(), settings.connect_retries)
        .await
        .with_context(|| format!("Could not reach {}", mask_connection_string(&conn)))?;

    let console = Arc::new(ConsoleProgress::new("Installing samples")?);
    let reporter = ProgressReporter::new().with_observer(console);
    let outcomes = samples::install_all(&instance, &selected, &reporter).await;

    let mut failed = 0;
    for (name, result) in &outcomes {
        match result {
            Ok(()) => println!("  installed {}", name),
            Err(e) => {
                failed += 1;
                println!("  FAILED    {}: {}", name, e);
            }
        }
    }
    info!(
        "[PHASE: samples] [STEP: install_all] {} of {} sample(s) installed",
        outcomes.len() - failed,
        outcomes.len()
    );
    Ok(if failed == 0 { 0 } else { 1 })
}

async fn cmd_samples_remove(
    names: Vec<String>,
    connection: Option<String>,
    settings: &SetupSettings,
) -> Result<i32> {
    let conn = resolve_connection(connection, settings)?;
    let instance = connect_instance(&conn, settings.connect_timeout(), settings.connect_retries)
        .await
        .with_context(|| format!("Could not reach {}", mask_connection_string(&conn)))?;

    let mut failed = 0;
    for name in &names {
        match samples::drop_schema(Some(&instance), name).await {
            Ok(()) => println!("  removed {}", name),
            Err(e) => {
                failed += 1;
                println!("  FAILED  {}: {}", name, e);
            }
        }
    }
    Ok(if failed == 0 { 0 } else { 1 })
}

async fn cmd_packages_list(catalog: Option<PathBuf>, settings: &SetupSettings) -> Result<i32> {
    let catalog = load_catalog(catalog, settings).await?;
    for p in catalog.packages() {
        let state = if p.installed() { "installed" } else { "available" };
        println!(
            "{:<28} {:<10} {:?}/{:?} {}",
            p.name(),
            p.version().to_string(),
            p.architecture(),
            p.license(),
            state
        );
        if let Some(target) = catalog.upgrade_target(p) {
            println!("    upgrades {} {}", target.name(), target.version());
        }
    }
    Ok(0)
}

async fn cmd_packages_plan(
    names: Vec<String>,
    catalog: Option<PathBuf>,
    settings: &SetupSettings,
) -> Result<i32> {
    let mut catalog = load_catalog(catalog, settings).await?;

    for name in &names {
        let id = catalog
            .find_by_name(name)
            .map(|p| p.id())
            .with_context(|| format!("Unknown package '{}'", name))?;
        let p = catalog.propose_install(id, true)?;
        let features: Vec<&str> = p.selected_features().map(|f| f.name.as_str()).collect();
        info!(
            "[PHASE: packages] [STEP: propose] '{}' proposed with features {:?}",
            p.name(),
            features
        );
    }

    let plan = catalog.plan();
    if plan.is_empty() {
        println!("Nothing to do.");
        return Ok(0);
    }
    for (i, step) in plan.iter().enumerate() {
        let verb = match step.action {
            PlanAction::Install => "install",
            PlanAction::Uninstall => "uninstall",
        };
        println!("{:>2}. {:<9} {}", i + 1, verb, step.package_name);
    }
    Ok(0)
}

async fn cmd_check_connection(connection: Option<String>, settings: &SetupSettings) -> Result<i32> {
    let conn = resolve_connection(connection, settings)?;
    let connector = RealDbConnector {
        timeout: settings.connect_timeout(),
        retries: settings.connect_retries,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Connecting to {}", mask_connection_string(&conn)));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = check_connection(&connector, &conn).await;
    spinner.finish_and_clear();

    match result {
        Ok(()) => {
            println!("Connection OK");
            Ok(0)
        }
        Err(e) => {
            error!(
                "[PHASE: database] [STEP: check_connection] {}",
                e.internal_details
            );
            println!("{}", e.user_message);
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SetupSettings {
        SetupSettings {
            samples_root: PathBuf::from("samples"),
            connection_string: Some("mysql://root:pw@localhost:3306".to_string()),
            script_encoding: "utf-8".to_string(),
            connect_timeout_secs: 1,
            connect_retries: 1,
            catalog_path: None,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "dbserver-setup",
            "-v",
            "samples",
            "install",
            "sakila",
            "world",
            "--root",
            "/opt/samples",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Samples {
                action: SampleAction::Install { names, root, .. },
            } => {
                assert_eq!(names, vec!["sakila", "world"]);
                assert_eq!(root, Some(PathBuf::from("/opt/samples")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn remove_requires_a_name() {
        assert!(Cli::try_parse_from(["dbserver-setup", "samples", "remove"]).is_err());
    }

    #[test]
    fn connection_flag_overrides_settings() {
        let s = settings();
        assert_eq!(
            resolve_connection(Some("mysql://other".to_string()), &s).unwrap(),
            "mysql://other"
        );
        assert_eq!(
            resolve_connection(None, &s).unwrap(),
            "mysql://root:pw@localhost:3306"
        );

        let mut empty = settings();
        empty.connection_string = Some("  ".to_string());
        assert!(resolve_connection(None, &empty).is_err());
    }

    #[tokio::test]
    async fn packages_plan_without_catalog_is_an_error() {
        let err = execute(
            Commands::Packages {
                action: PackageAction::Plan {
                    names: vec!["Server".to_string()],
                    catalog: None,
                },
            },
            &settings(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("No catalog manifest"));
    }

    #[tokio::test]
    async fn samples_list_on_missing_root_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let code = execute(
            Commands::Samples {
                action: SampleAction::List {
                    root: Some(dir.path().join("absent")),
                },
            },
            &settings(),
        )
        .await
        .unwrap();
        assert_eq!(code, 0);
    }
}
