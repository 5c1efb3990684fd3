//! Project registry: a TOML file tracking known deployments so tooling
//! can warn when two projects would collide on the same derived VM.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::AccountsError;

/// `[registry]` defaults applied to projects that omit cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryDefaults {
    pub version: u32,
    pub default_cluster: String,
    pub default_rpc_url: String,
    pub default_payer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_program_id: Option<String>,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        let default_payer = dirs::home_dir()
            .unwrap_or_default()
            .join(".config/solana/id.json")
            .display()
            .to_string();
        RegistryDefaults {
            version: 1,
            default_cluster: "devnet".to_string(),
            default_rpc_url: "https://api.devnet.solana.com".to_string(),
            default_payer,
            default_program_id: None,
        }
    }
}

/// One registered project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProjectEntry {
    pub name: String,
    pub path: PathBuf,
    pub manifest: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(default = "default_deployment_state")]
    pub deployment_state: String,
}

fn default_deployment_state() -> String {
    "init".to_string()
}

impl ProjectEntry {
    /// The accounts file path, resolved against the project directory
    /// when relative.
    pub fn accounts_path(&self) -> Option<PathBuf> {
        let accounts = self.accounts.as_ref()?;
        if accounts.is_absolute() {
            Some(accounts.clone())
        } else {
            Some(self.path.join(accounts))
        }
    }
}

/// On-disk registry document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RegistryDoc {
    #[serde(default)]
    pub registry: RegistryDefaults,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

/// Handle to a registry file. Callers construct it with an explicit path
/// so tests and embedders never touch the real home directory.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Registry { path: path.into() }
    }

    /// `~/.frostbite/projects.toml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".frostbite")
            .join("projects.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry, creating it with defaults on first use.
    pub fn load(&self) -> Result<RegistryDoc, AccountsError> {
        if !self.path.exists() {
            let doc = RegistryDoc::default();
            self.save(&doc)?;
            return Ok(doc);
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|source| AccountsError::io(&self.path, source))?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, doc: &RegistryDoc) -> Result<(), AccountsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AccountsError::io(parent, source))?;
        }
        let text = toml::to_string_pretty(doc)?;
        std::fs::write(&self.path, text).map_err(|source| AccountsError::io(&self.path, source))
    }

    pub fn list(&self) -> Result<Vec<ProjectEntry>, AccountsError> {
        Ok(self.load()?.projects)
    }

    pub fn get(&self, name: &str) -> Result<Option<ProjectEntry>, AccountsError> {
        Ok(self.list()?.into_iter().find(|p| p.name == name))
    }

    /// Add or update a project, matching by name or path.
    pub fn register(&self, project: ProjectEntry) -> Result<(), AccountsError> {
        let mut doc = self.load()?;
        match doc
            .projects
            .iter_mut()
            .find(|p| p.name == project.name || p.path == project.path)
        {
            Some(existing) => *existing = project,
            None => doc.projects.push(project),
        }
        self.save(&doc)
    }

    /// Remove a project by name. Returns whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool, AccountsError> {
        let mut doc = self.load()?;
        let before = doc.projects.len();
        doc.projects.retain(|p| p.name != name);
        let removed = doc.projects.len() != before;
        if removed {
            self.save(&doc)?;
        }
        Ok(removed)
    }
}
