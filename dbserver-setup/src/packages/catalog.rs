// Package catalog
//
// Holds the packages known to this setup run, applies wizard transitions by id, and derives the
// install plan consumed by the install controller.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

use super::{Architecture, Package};
use crate::error::PackageError;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    packages: Vec<Package>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub action: PlanAction,
    pub package_id: Uuid,
    pub package_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct PackageCatalog {
    packages: Vec<Package>,
}

impl PackageCatalog {
    pub fn new(packages: Vec<Package>) -> Result<Self> {
        let mut seen = HashSet::new();
        for p in &packages {
            if !seen.insert(p.id()) {
                anyhow::bail!("Duplicate package id {} ({})", p.id(), p.name());
            }
        }

        let catalog = Self { packages };
        for p in &catalog.packages {
            if let Some(target) = p.upgrade_target() {
                if catalog.get(target).is_none() {
                    warn!(
                        "[PHASE: packages] [STEP: catalog] Package '{}' upgrades unknown package {}",
                        p.name(),
                        target
                    );
                }
            }
        }
        Ok(catalog)
    }

    /// Load a catalog manifest: `{ "packages": [ ... ] }`.
    pub async fn load(path: &Path) -> Result<Self> {
        info!(
            "[PHASE: packages] [STEP: load_catalog] Loading catalog from {:?}",
            path
        );

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog file: {:?}", path))?;
        let file: CatalogFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog JSON: {:?}", path))?;

        let catalog = Self::new(file.packages)?;
        info!(
            "[PHASE: packages] [STEP: load_catalog] Loaded {} package(s)",
            catalog.packages.len()
        );
        Ok(catalog)
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn get(&self, id: Uuid) -> Option<&Package> {
        self.packages.iter().find(|p| p.id() == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// The package `package` replaces, if it is in this catalog.
    pub fn upgrade_target(&self, package: &Package) -> Option<&Package> {
        package.upgrade_target().and_then(|id| self.get(id))
    }

    pub fn proposed(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(|p| p.proposed_install())
    }

    pub fn propose_install(&mut self, id: Uuid, proposed: bool) -> Result<&Package, PackageError> {
        let idx = self.index_of(id)?;
        let updated = self.packages[idx].clone().propose_install(proposed);
        self.packages[idx] = updated;
        Ok(&self.packages[idx])
    }

    pub fn select_feature(
        &mut self,
        id: Uuid,
        feature: &str,
        selected: bool,
    ) -> Result<&Package, PackageError> {
        let idx = self.index_of(id)?;
        let updated = self.packages[idx].clone().select_feature(feature, selected)?;
        self.packages[idx] = updated;
        Ok(&self.packages[idx])
    }

    fn index_of(&self, id: Uuid) -> Result<usize, PackageError> {
        self.packages
            .iter()
            .position(|p| p.id() == id)
            .ok_or(PackageError::UnknownPackage(id))
    }

    /// Ordered steps for the proposed packages on this machine.
    pub fn plan(&self) -> Vec<PlanStep> {
        self.plan_for(Architecture::host())
    }

    /// Ordered steps for the proposed packages on a `host` machine.
    ///
    /// Already-installed packages and packages that cannot run on `host` are skipped. An
    /// installed upgrade target is uninstalled before the package replacing it; a proposal
    /// that would replace a newer or equal version is skipped.
    pub fn plan_for(&self, host: Architecture) -> Vec<PlanStep> {
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut uninstalled: HashSet<Uuid> = HashSet::new();

        for p in self.proposed() {
            if p.installed() {
                continue;
            }

            if !p.architecture().runs_on(host) {
                warn!(
                    "[PHASE: packages] [STEP: plan] Skipping '{}': built for {:?}, host is {:?}",
                    p.name(),
                    p.architecture(),
                    host
                );
                continue;
            }

            if let Some(target) = self.upgrade_target(p).filter(|t| t.installed()) {
                if target.version() >= p.version() {
                    warn!(
                        "[PHASE: packages] [STEP: plan] Skipping '{}' {}: installed '{}' {} is not older",
                        p.name(),
                        p.version(),
                        target.name(),
                        target.version()
                    );
                    continue;
                }
                if uninstalled.insert(target.id()) {
                    steps.push(PlanStep {
                        action: PlanAction::Uninstall,
                        package_id: target.id(),
                        package_name: target.name().to_string(),
                    });
                }
            }

            steps.push(PlanStep {
                action: PlanAction::Install,
                package_id: p.id(),
                package_name: p.name().to_string(),
            });
        }

        steps
    }
}
