// Database server setup core
// Library entry point: logging, settings and command dispatch

pub mod cli;
pub mod database;
pub mod error;
pub mod install;
pub mod packages;
pub mod progress;
pub mod samples;
pub mod settings;
pub mod utils;
pub mod wizard;

use log::info;
use std::path::Path;

/// Initialize logging with dual format (JSON + human-readable) under `log_dir`.
pub fn init_logging(
    log_dir: &Path,
    level: log::LevelFilter,
    with_stdout: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_log_file = log_dir.join(format!("setup-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("setup-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(level);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", line));
                })
                .chain(std::io::stderr()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                        None,
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Entry point used by the binary: load settings, start logging, run the command.
///
/// Returns the process exit code.
pub async fn run(cli: cli::Cli) -> anyhow::Result<i32> {
    let settings = settings::SetupSettings::load(cli.config.as_deref())?;

    match utils::path_resolver::resolve_log_folder() {
        Ok(log_dir) => {
            if let Err(e) = init_logging(&log_dir, settings.log_level_filter(), cli.verbose) {
                eprintln!("Failed to initialize logging: {}", e);
            }
        }
        Err(e) => eprintln!("Failed to resolve log folder: {}", e),
    }

    info!(
        "[PHASE: initialization] dbserver-setup {} starting",
        env!("CARGO_PKG_VERSION")
    );

    cli::execute(cli.command, &settings).await
}
