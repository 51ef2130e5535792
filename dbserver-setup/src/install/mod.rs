// Install controller
//
// Runs the catalog's install plan through an external `PackageInstaller`, one step at a time,
// and reports aggregate progress plus exactly one terminal result.
//
// IMPORTANT:
// - One run at a time per controller.
// - Cancellation is honoured between steps; a running step is never interrupted here.

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::packages::{Package, PackageCatalog, PlanAction, PlanStep};
use crate::progress::{ProgressReporter, ResultCode};

/// Callback for the percent (0-100) of the step in flight.
pub type StepProgress<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Performs the actual package (un)installation.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, package: &Package, progress: StepProgress<'_>) -> Result<ResultCode>;
    async fn uninstall(&self, package: &Package, progress: StepProgress<'_>)
        -> Result<ResultCode>;
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub result: ResultCode,
    pub completed: Vec<PlanStep>,
}

/// Requests cancellation of the current run.
///
/// A cancel requested while no run is in flight applies to the next run. The flag is cleared
/// when a run ends.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        info!("[PHASE: install] [STEP: cancel] Cancel requested");
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct InstallController {
    installer: Arc<dyn PackageInstaller>,
    cancel: Arc<AtomicBool>,
    running: AtomicBool,
}

struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Overall percent after `step_percent` of step `index` out of `steps`.
fn overall_percent(index: usize, step_percent: u8, steps: usize) -> u8 {
    if steps == 0 {
        return 100;
    }
    let done = index * 100 + usize::from(step_percent.min(100));
    (done / steps).min(100) as u8
}

impl InstallController {
    pub fn new(installer: Arc<dyn PackageInstaller>) -> Self {
        Self {
            installer,
            cancel: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute the plan for `catalog`.
    ///
    /// Errors only when a run is already in progress; every other outcome is delivered through
    /// `reporter` and the returned summary.
    pub async fn run(
        &self,
        catalog: &PackageCatalog,
        reporter: &ProgressReporter,
    ) -> Result<RunSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            anyhow::bail!("Installation is already running.");
        }
        let _guard = RunGuard {
            running: &self.running,
            cancel: &self.cancel,
        };

        let started = Instant::now();
        let plan = catalog.plan();
        info!(
            "[PHASE: install] [STEP: start] Running plan with {} step(s)",
            plan.len()
        );

        reporter.report(0);
        let mut completed = Vec::new();
        let mut reboot_required = false;

        for (index, step) in plan.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(
                    "[PHASE: install] [STEP: cancel] Cancelled before '{}'",
                    step.package_name
                );
                return Ok(finish(reporter, ResultCode::Cancelled, completed));
            }

            let Some(package) = catalog.get(step.package_id) else {
                error!(
                    "[PHASE: install] [STEP: {:?}] Package {} vanished from catalog",
                    step.action, step.package_id
                );
                return Ok(finish(reporter, ResultCode::Failed, completed));
            };

            info!(
                "[PHASE: install] [STEP: {:?}] {} '{}' {} ({}/{})",
                step.action,
                match step.action {
                    PlanAction::Install => "Installing",
                    PlanAction::Uninstall => "Removing",
                },
                package.name(),
                package.version(),
                index + 1,
                plan.len()
            );

            let on_step_progress = |p: u8| {
                reporter.report(overall_percent(index, p, plan.len()));
            };

            let outcome = match step.action {
                PlanAction::Install => self.installer.install(package, &on_step_progress).await,
                PlanAction::Uninstall => {
                    self.installer.uninstall(package, &on_step_progress).await
                }
            };

            match outcome {
                Ok(ResultCode::Success) => {}
                Ok(ResultCode::RebootRequired) => reboot_required = true,
                Ok(ResultCode::Cancelled) => {
                    warn!(
                        "[PHASE: install] [STEP: {:?}] '{}' cancelled by installer",
                        step.action,
                        package.name()
                    );
                    return Ok(finish(reporter, ResultCode::Cancelled, completed));
                }
                Ok(ResultCode::Failed) => {
                    error!(
                        "[PHASE: install] [STEP: {:?}] '{}' failed",
                        step.action,
                        package.name()
                    );
                    return Ok(finish(reporter, ResultCode::Failed, completed));
                }
                Err(e) => {
                    error!(
                        "[PHASE: install] [STEP: {:?}] '{}' failed: {:#}",
                        step.action,
                        package.name(),
                        e
                    );
                    return Ok(finish(reporter, ResultCode::Failed, completed));
                }
            }

            completed.push(step.clone());
            reporter.report(overall_percent(index + 1, 0, plan.len()));
        }

        let result = if reboot_required {
            ResultCode::RebootRequired
        } else {
            ResultCode::Success
        };
        info!(
            "[PHASE: install] [STEP: complete] Plan finished with {:?} in {}ms",
            result,
            started.elapsed().as_millis()
        );
        reporter.report(100);
        Ok(finish(reporter, result, completed))
    }
}

fn finish(reporter: &ProgressReporter, result: ResultCode, completed: Vec<PlanStep>) -> RunSummary {
    reporter.finish(result);
    RunSummary { result, completed }
}
