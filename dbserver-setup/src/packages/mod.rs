//! Installable product packages.
//!
//! A [`Package`] is a value: the wizard changes it only through explicit transitions
//! ([`Package::propose_install`], [`Package::select_feature`]) that return the updated package
//! with dependent state (feature selection) already recomputed.

pub mod catalog;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PackageError;

pub use catalog::{PackageCatalog, PlanAction, PlanStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86,
    X64,
    Arm64,
    Any,
}

impl Architecture {
    /// Architecture of the running process; `Any` when it has no matching variant.
    pub fn host() -> Self {
        match std::env::consts::ARCH {
            "x86" => Architecture::X86,
            "x86_64" => Architecture::X64,
            "aarch64" => Architecture::Arm64,
            _ => Architecture::Any,
        }
    }

    /// Whether a package built for `self` can be installed on `host`.
    /// An unknown (`Any`) host accepts every package.
    pub fn runs_on(self, host: Architecture) -> bool {
        match (self, host) {
            (Architecture::Any, _) | (_, Architecture::Any) => true,
            (Architecture::X86, Architecture::X64) => true,
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum License {
    Community,
    Commercial,
}

/// `major.minor.patch`; missing trailing parts default to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProductVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ProductVersion {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PackageError::InvalidVersion(s.to_string());
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let mut nums = [0u32; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl TryFrom<String> for ProductVersion {
    type Error = PackageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProductVersion> for String {
    fn from(v: ProductVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub default_selected: bool,
    #[serde(default)]
    pub required: bool,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            selected: false,
            default_selected: false,
            required: false,
        }
    }

    pub fn default_on(mut self) -> Self {
        self.default_selected = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    id: Uuid,
    name: String,
    architecture: Architecture,
    version: ProductVersion,
    license: License,
    #[serde(default = "default_per_machine")]
    per_machine: bool,
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    installed: bool,
    #[serde(default)]
    proposed_install: bool,
    /// Package this one replaces. Resolved through the catalog, never owned.
    #[serde(default)]
    upgrade_target: Option<Uuid>,
}

fn default_per_machine() -> bool {
    true
}

impl Package {
    pub fn new(
        name: impl Into<String>,
        architecture: Architecture,
        version: ProductVersion,
        license: License,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            architecture,
            version,
            license,
            per_machine: default_per_machine(),
            features: Vec::new(),
            installed: false,
            proposed_install: false,
            upgrade_target: None,
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn with_per_machine(mut self, per_machine: bool) -> Self {
        self.per_machine = per_machine;
        self
    }

    pub fn with_installed(mut self, installed: bool) -> Self {
        self.installed = installed;
        self
    }

    pub fn upgrading(mut self, target: Uuid) -> Self {
        self.upgrade_target = Some(target);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn version(&self) -> ProductVersion {
        self.version
    }

    pub fn license(&self) -> License {
        self.license
    }

    pub fn per_machine(&self) -> bool {
        self.per_machine
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn selected_features(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(|f| f.selected)
    }

    pub fn installed(&self) -> bool {
        self.installed
    }

    pub fn proposed_install(&self) -> bool {
        self.proposed_install
    }

    pub fn upgrade_target(&self) -> Option<Uuid> {
        self.upgrade_target
    }

    /// Propose (or withdraw) this package for installation.
    ///
    /// Proposing with nothing selected selects the default features; required features are
    /// always selected while proposed. Withdrawing clears the selection.
    pub fn propose_install(mut self, proposed: bool) -> Self {
        self.proposed_install = proposed;
        if proposed {
            let none_selected = !self.features.iter().any(|f| f.selected);
            for f in &mut self.features {
                if f.required || (none_selected && f.default_selected) {
                    f.selected = true;
                }
            }
        } else {
            for f in &mut self.features {
                f.selected = false;
            }
        }
        self
    }

    /// Select or deselect one feature. Selecting a feature proposes the package.
    pub fn select_feature(mut self, feature: &str, selected: bool) -> Result<Self, PackageError> {
        let idx = self
            .features
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(feature))
            .ok_or_else(|| PackageError::UnknownFeature {
                package: self.name.clone(),
                feature: feature.to_string(),
            })?;

        if !selected && self.features[idx].required && self.proposed_install {
            return Err(PackageError::RequiredFeature(self.features[idx].name.clone()));
        }

        self.features[idx].selected = selected;
        if selected && !self.proposed_install {
            self = self.propose_install(true);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Package {
        Package::new(
            "Database Server",
            Architecture::X64,
            ProductVersion::new(8, 4, 2),
            License::Community,
        )
        .with_features(vec![
            Feature::new("core").required(),
            Feature::new("client").default_on(),
            Feature::new("debug_symbols"),
        ])
    }

    fn selected(p: &Package) -> Vec<&str> {
        p.selected_features().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn proposing_selects_defaults_and_required() {
        let p = server().propose_install(true);
        assert!(p.proposed_install());
        assert_eq!(selected(&p), vec!["core", "client"]);
    }

    #[test]
    fn proposing_keeps_an_existing_selection() {
        let p = server()
            .select_feature("debug_symbols", true)
            .unwrap()
            .propose_install(true);
        assert_eq!(selected(&p), vec!["core", "debug_symbols"]);
    }

    #[test]
    fn withdrawing_clears_selection() {
        let p = server().propose_install(true).propose_install(false);
        assert!(!p.proposed_install());
        assert!(selected(&p).is_empty());
    }

    #[test]
    fn required_feature_cannot_be_deselected() {
        let err = server()
            .propose_install(true)
            .select_feature("core", false)
            .unwrap_err();
        assert_eq!(err, PackageError::RequiredFeature("core".to_string()));
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let err = server().select_feature("gui", true).unwrap_err();
        assert!(matches!(err, PackageError::UnknownFeature { .. }));
    }

    #[test]
    fn versions_parse_and_order() {
        let a: ProductVersion = "8.0.36".parse().unwrap();
        let b: ProductVersion = "8.4".parse().unwrap();
        assert_eq!(b, ProductVersion::new(8, 4, 0));
        assert!(a < b);
        assert_eq!(a.to_string(), "8.0.36");
        assert!("8..1".parse::<ProductVersion>().is_err());
        assert!("8.x".parse::<ProductVersion>().is_err());
        assert!("1.2.3.4".parse::<ProductVersion>().is_err());
    }

    #[test]
    fn package_deserializes_from_manifest_json() {
        let json = r#"{
            "id": "6f1c1a4e-5d3b-4c2a-9e55-0a2f1b7c9d10",
            "name": "Workbench",
            "architecture": "x64",
            "version": "8.0.40",
            "license": "commercial",
            "features": [{ "name": "core", "required": true }]
        }"#;
        let p: Package = serde_json::from_str(json).unwrap();
        assert_eq!(p.version(), ProductVersion::new(8, 0, 40));
        assert_eq!(p.license(), License::Commercial);
        assert!(p.per_machine());
        assert!(p.upgrade_target().is_none());
        assert!(p.features()[0].required);
    }

    #[test]
    fn architecture_compatibility() {
        assert!(Architecture::X86.runs_on(Architecture::X64));
        assert!(Architecture::Any.runs_on(Architecture::Arm64));
        assert!(!Architecture::X64.runs_on(Architecture::X86));
        assert!(Architecture::Arm64.runs_on(Architecture::Any));
    }

    #[test]
    fn per_machine_defaults_agree_between_builder_and_manifest() {
        let built = server();
        let parsed: Package = serde_json::from_str(
            r#"{ "id": "6f1c1a4e-5d3b-4c2a-9e55-0a2f1b7c9d11", "name": "Shell",
                 "architecture": "any", "version": "8.4", "license": "community" }"#,
        )
        .unwrap();
        assert_eq!(built.per_machine(), parsed.per_machine());

        let per_user: Package = serde_json::from_str(
            r#"{ "id": "6f1c1a4e-5d3b-4c2a-9e55-0a2f1b7c9d12", "name": "Shell",
                 "architecture": "any", "version": "8.4", "license": "community",
                 "per_machine": false }"#,
        )
        .unwrap();
        assert!(!per_user.per_machine());
    }
}
