// Sample databases
//
// A sample is a schema script plus an optional data script. Install submits both to the
// server instance as one `execute_scripts` call; remove drops the schema.

pub mod discovery;

use encoding_rs::Encoding;
use log::{error, info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::database::ServerInstance;
use crate::error::SampleError;
use crate::progress::{percent, ProgressReporter, ResultCode};

pub use discovery::discover;

/// One installable sample schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleDatabaseInfo {
    pub schema_name: String,
    pub schema_path: PathBuf,
    pub data_path: Option<PathBuf>,
    pub encoding: &'static Encoding,
}

impl ExampleDatabaseInfo {
    pub fn new(
        schema_name: impl Into<String>,
        schema_path: impl Into<PathBuf>,
        data_path: Option<PathBuf>,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            schema_path: schema_path.into(),
            data_path,
            encoding,
        }
    }

    /// Number of scripts an install submits.
    pub async fn script_count(&self) -> usize {
        if self.has_data_script().await {
            2
        } else {
            1
        }
    }

    pub async fn has_data_script(&self) -> bool {
        match self.data_path.as_deref() {
            Some(p) if !p.as_os_str().is_empty() => tokio::fs::metadata(p)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Create the schema (and load its data) on `instance`.
    ///
    /// Fails without touching the instance when there is no instance, no schema path, or the
    /// schema script cannot be read.
    pub async fn install(&self, instance: Option<&dyn ServerInstance>) -> Result<(), SampleError> {
        let instance = instance.ok_or(SampleError::NoInstance)?;

        if self.schema_path.as_os_str().is_empty() {
            return Err(SampleError::EmptySchemaPath(self.schema_name.clone()));
        }
        validate_schema_name(&self.schema_name)?;

        info!(
            "[PHASE: samples] [STEP: install] Installing sample '{}'",
            self.schema_name
        );

        let mut scripts = vec![read_script(&self.schema_path, self.encoding).await?];

        if let Some(data_path) = self.data_path.as_deref() {
            if self.has_data_script().await {
                scripts.push(read_script(data_path, self.encoding).await?);
            } else if !data_path.as_os_str().is_empty() {
                warn!(
                    "[PHASE: samples] [STEP: install] Data script {:?} is gone; installing schema only",
                    data_path
                );
            }
        }

        let expected = scripts.len();
        let executed = instance.execute_scripts(true, &scripts).await;
        if executed != expected {
            error!(
                "[PHASE: samples] [STEP: install] Sample '{}': {} of {} script(s) executed",
                self.schema_name, executed, expected
            );
            return Err(SampleError::ExecutionMismatch { expected, executed });
        }

        info!(
            "[PHASE: samples] [STEP: install] Sample '{}' installed ({} script(s))",
            self.schema_name, executed
        );
        Ok(())
    }

    /// Drop the schema from `instance`.
    pub async fn remove(&self, instance: Option<&dyn ServerInstance>) -> Result<(), SampleError> {
        drop_schema(instance, &self.schema_name).await
    }
}

/// Issue a single `DROP SCHEMA IF EXISTS` for `schema_name`.
pub async fn drop_schema(
    instance: Option<&dyn ServerInstance>,
    schema_name: &str,
) -> Result<(), SampleError> {
    validate_schema_name(schema_name)?;
    let instance = instance.ok_or(SampleError::NoInstance)?;

    info!(
        "[PHASE: samples] [STEP: remove] Dropping schema '{}'",
        schema_name
    );

    let sql = format!("DROP SCHEMA IF EXISTS {}", quote_identifier(schema_name));
    match instance.execute_non_query(&sql).await {
        Ok(()) => Ok(()),
        Err(msg) if msg.is_empty() => Ok(()),
        Err(msg) => {
            error!(
                "[PHASE: samples] [STEP: remove] Dropping '{}' failed: {}",
                schema_name, msg
            );
            Err(SampleError::Execution(msg))
        }
    }
}

/// Install `samples` one after another, reporting progress after each.
///
/// Finishes the reporter with `Success` only when every sample installed.
pub async fn install_all(
    instance: &dyn ServerInstance,
    samples: &[ExampleDatabaseInfo],
    reporter: &ProgressReporter,
) -> Vec<(String, Result<(), SampleError>)> {
    let mut outcomes = Vec::with_capacity(samples.len());
    reporter.report(0);

    for (i, sample) in samples.iter().enumerate() {
        let result = sample.install(Some(instance)).await;
        outcomes.push((sample.schema_name.clone(), result));
        reporter.report(percent(i + 1, samples.len()));
    }

    let all_ok = outcomes.iter().all(|(_, r)| r.is_ok());
    reporter.finish(if all_ok {
        ResultCode::Success
    } else {
        ResultCode::Failed
    });
    outcomes
}

/// MySQL schema names: 1-64 characters, no path separators, dots or NUL.
pub fn validate_schema_name(name: &str) -> Result<(), SampleError> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^[^/\\.\x00]{1,64}$").ok());

    let valid = !name.trim().is_empty()
        && !name.ends_with(' ')
        && pattern.as_ref().is_some_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(SampleError::InvalidSchemaName(name.to_string()))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

async fn read_script(path: &Path, encoding: &'static Encoding) -> Result<String, SampleError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SampleError::NotFound(path.to_path_buf())
        } else {
            SampleError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    // BOM, when present, overrides the configured encoding.
    let (text, used, had_errors) = encoding.decode(&bytes);
    if had_errors {
        return Err(SampleError::Decode {
            path: path.to_path_buf(),
            encoding: used.name(),
        });
    }
    Ok(text.into_owned())
}
