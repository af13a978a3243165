// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build environment recipe rendering and fingerprinting.
//!
//! A recipe is everything that affects chroot contents: target architecture,
//! legal host arches, distribution tag, chroot setup command, package
//! repositories, injected files, plugin configuration. Rendering is
//! deterministic (ordered maps throughout) so identical recipes share one
//! fingerprint regardless of input order, and the dynamic chroot name never
//! participates in the hash.

use std::collections::BTreeMap;

use pf_core::{NodeConfig, Task};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvConfigError {
    #[error("file {0} is already added")]
    DuplicateFile(String),

    #[error("plugin {0} is already configured")]
    DuplicatePlugin(String),

    #[error("repository {0} is already added")]
    DuplicateRepo(String),

    #[error("there is no default legal host arches value for the {0} architecture")]
    UnknownArch(String),
}

/// Anything the environment supervisor can cache: a deterministic rendering
/// plus its fingerprint.
pub trait EnvRecipe {
    /// Render the recipe, optionally naming the chroot.
    fn render(&self, root: Option<&str>) -> String;

    /// SHA-256 of the rendering without a chroot name.
    fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.render(None).as_bytes());
        format!("{digest:x}")
    }
}

/// One typed option value, rendered in the tool's python-literal style.
#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, OptValue>),
}

impl OptValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => OptValue::None,
            Value::Bool(b) => OptValue::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(OptValue::Int)
                .unwrap_or_else(|| OptValue::Str(n.to_string())),
            Value::String(s) => OptValue::Str(s.clone()),
            Value::Array(items) => OptValue::List(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(map) => OptValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), OptValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn render(&self) -> String {
        match self {
            OptValue::None => "None".to_string(),
            OptValue::Bool(true) => "True".to_string(),
            OptValue::Bool(false) => "False".to_string(),
            OptValue::Int(n) => n.to_string(),
            OptValue::Str(s) => serde_json::Value::String(s.clone()).to_string(),
            OptValue::List(items) => serde_json::to_string(items).unwrap_or_default(),
            // Maps are rendered key-by-key by the caller.
            OptValue::Map(_) => String::new(),
        }
    }
}

/// Plugin configuration flavors the node renders.
#[derive(Debug, Clone)]
enum PluginConfig {
    Generic {
        enable: bool,
        opts: BTreeMap<String, OptValue>,
    },
    ChrootScan {
        only_failed: bool,
        regexes: Vec<String>,
    },
    BindMount {
        mounts: Vec<(String, String)>,
    },
}

/// One package repository section of the environment's package-manager
/// configuration.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub baseurl: String,
    pub priority: i64,
    pub enabled: bool,
}

/// Build environment recipe.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    options: BTreeMap<String, OptValue>,
    plugins: BTreeMap<String, PluginConfig>,
    files: BTreeMap<String, String>,
    repos: BTreeMap<String, RepoConfig>,
    repo_main: BTreeMap<String, OptValue>,
}

impl EnvConfig {
    /// Start a recipe for one target architecture. Legal host arches
    /// default from the target.
    pub fn new(target_arch: &str) -> Result<Self, EnvConfigError> {
        let mut config = Self::default();
        config.set_option("target_arch", OptValue::Str(target_arch.to_string()));
        config.set_option(
            "legal_host_arches",
            OptValue::List(
                default_legal_host_arches(target_arch)?
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        );
        config.set_option(
            "chroot_setup_cmd",
            OptValue::Str("install @buildsys-build".to_string()),
        );
        // Package-manager main section defaults.
        config.repo_main = default_repo_main();
        Ok(config)
    }

    pub fn set_option(&mut self, name: &str, value: OptValue) {
        self.options.insert(name.to_string(), value);
    }

    pub fn set_repo_main_option(&mut self, name: &str, value: OptValue) {
        self.repo_main.insert(name.to_string(), value);
    }

    pub fn add_repo(&mut self, repo: RepoConfig) -> Result<(), EnvConfigError> {
        if self.repos.contains_key(&repo.name) {
            return Err(EnvConfigError::DuplicateRepo(repo.name));
        }
        self.repos.insert(repo.name.clone(), repo);
        Ok(())
    }

    /// Embed a file into the chroot.
    pub fn add_file(&mut self, path: &str, content: &str) -> Result<(), EnvConfigError> {
        if self.files.contains_key(path) {
            return Err(EnvConfigError::DuplicateFile(path.to_string()));
        }
        self.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    pub fn add_plugin(
        &mut self,
        name: &str,
        enable: bool,
        opts: BTreeMap<String, OptValue>,
    ) -> Result<(), EnvConfigError> {
        self.insert_plugin(name, PluginConfig::Generic { enable, opts })
    }

    /// Capture extra build logs matching the given regexes.
    pub fn add_chroot_scan(
        &mut self,
        only_failed: bool,
        regexes: Vec<String>,
    ) -> Result<(), EnvConfigError> {
        self.insert_plugin("chroot_scan", PluginConfig::ChrootScan { only_failed, regexes })
    }

    /// Bind host paths into the chroot.
    pub fn add_bind_mounts(
        &mut self,
        mounts: Vec<(String, String)>,
    ) -> Result<(), EnvConfigError> {
        self.insert_plugin("bind_mount", PluginConfig::BindMount { mounts })
    }

    fn insert_plugin(&mut self, name: &str, plugin: PluginConfig) -> Result<(), EnvConfigError> {
        if self.plugins.contains_key(name) {
            return Err(EnvConfigError::DuplicatePlugin(name.to_string()));
        }
        self.plugins.insert(name.to_string(), plugin);
        Ok(())
    }

    /// Assemble the recipe for one task on this node.
    pub fn from_task(config: &NodeConfig, task: &Task) -> Result<Self, EnvConfigError> {
        // The chroot options may override the target architecture.
        let chroot_options = task.platform.chroot_options();
        let target_arch = chroot_options
            .get("target_arch")
            .and_then(Value::as_str)
            .unwrap_or(&task.arch);

        let mut env = Self::new(target_arch)?;
        env.set_option("use_bootstrap_container", OptValue::Bool(false));
        env.set_option("use_nspawn", OptValue::Bool(false));
        env.set_option("rpmbuild_networking", OptValue::Bool(true));
        env.set_option("use_host_resolv", OptValue::Bool(true));
        if let Some(dist) = task.platform.dist_tag() {
            env.set_option("dist", OptValue::Str(dist.to_string()));
        }
        for (key, value) in &chroot_options {
            if key == "target_arch" {
                continue;
            }
            env.set_option(key, OptValue::from_json(value));
        }

        for repo in &task.repositories {
            env.add_repo(RepoConfig {
                name: repo.name.clone(),
                baseurl: repo.url.clone(),
                priority: repo.priority,
                enabled: repo.enabled,
            })?;
        }
        for (key, value) in &task.platform.repo_options() {
            env.set_repo_main_option(key, OptValue::from_json(value));
        }

        if config.pesign_support {
            env.add_bind_mounts(vec![
                ("/var/run/pesign".to_string(), "/var/run/pesign".to_string()),
                ("/etc/pki/kmod".to_string(), "/etc/pki/kmod".to_string()),
            ])?;
        }
        if let Some(proxy) = &config.npm_proxy {
            env.add_file(
                "/usr/etc/npmrc",
                &format!("https-proxy={proxy}\nproxy={proxy}\nstrict-ssl=false\n"),
            )?;
            env.add_file(
                "/usr/etc/yarnrc",
                &format!("https-proxy \"{proxy}\"\nproxy \"{proxy}\"\nstrict-ssl false\n"),
            )?;
        }
        let custom_logs = task.platform.custom_logs();
        if !custom_logs.is_empty() {
            env.add_chroot_scan(false, custom_logs)?;
        }

        Ok(env)
    }

    fn render_option(out: &mut String, name: &str, value: &OptValue) {
        match value {
            OptValue::Map(entries) => {
                for (key, entry) in entries {
                    out.push_str(&format!(
                        "config_opts[\"{name}\"][\"{key}\"] = {}\n",
                        entry.render()
                    ));
                }
            }
            other => out.push_str(&format!("config_opts[\"{name}\"] = {}\n", other.render())),
        }
    }

    fn render_plugin(out: &mut String, name: &str, plugin: &PluginConfig) {
        match plugin {
            PluginConfig::Generic { enable, opts } => {
                out.push_str(&format!(
                    "config_opts[\"plugin_conf\"][\"{name}_enable\"] = {}\n",
                    OptValue::Bool(*enable).render()
                ));
                if !*enable {
                    return;
                }
                out.push_str(&format!(
                    "config_opts[\"plugin_conf\"][\"{name}_opts\"] = {{}}\n"
                ));
                for (key, value) in opts {
                    out.push_str(&format!(
                        "config_opts[\"plugin_conf\"][\"{name}_opts\"][{}] = {}\n",
                        OptValue::Str(key.clone()).render(),
                        value.render()
                    ));
                }
            }
            PluginConfig::ChrootScan { only_failed, regexes } => {
                out.push_str("config_opts[\"plugin_conf\"][\"chroot_scan_enable\"] = True\n");
                out.push_str(&format!(
                    "config_opts[\"plugin_conf\"][\"chroot_scan_opts\"] = {{\"only_failed\": {}, \"regexes\": {}}}\n",
                    OptValue::Bool(*only_failed).render(),
                    serde_json::to_string(regexes).unwrap_or_default()
                ));
            }
            PluginConfig::BindMount { mounts } => {
                out.push_str("config_opts[\"plugin_conf\"][\"bind_mount_enable\"] = True\n");
                for (host_path, chroot_path) in mounts {
                    out.push_str(&format!(
                        "config_opts[\"plugin_conf\"][\"bind_mount_opts\"][\"dirs\"].append((\"{host_path}\", \"{chroot_path}\"))\n"
                    ));
                }
            }
        }
    }

    fn render_repo_section(out: &mut String, section: &str, entries: &BTreeMap<String, String>) {
        out.push_str(&format!("[{section}]\n"));
        for (key, value) in entries {
            out.push_str(&format!("{key} = {value}\n"));
        }
        out.push('\n');
    }

    fn render_package_manager_config(&self, out: &mut String) {
        out.push_str("config_opts[\"yum.conf\"] = \"\"\"\n");
        let main: BTreeMap<String, String> = self
            .repo_main
            .iter()
            .map(|(k, v)| (k.clone(), repo_option_string(v)))
            .collect();
        Self::render_repo_section(out, "main", &main);
        for (name, repo) in &self.repos {
            let mut entries = BTreeMap::new();
            entries.insert("name".to_string(), repo.name.clone());
            entries.insert("baseurl".to_string(), repo.baseurl.clone());
            entries.insert("priority".to_string(), repo.priority.to_string());
            entries.insert(
                "enabled".to_string(),
                if repo.enabled { "1" } else { "0" }.to_string(),
            );
            Self::render_repo_section(out, name, &entries);
        }
        out.push_str("\"\"\"\n");
    }
}

impl EnvRecipe for EnvConfig {
    fn render(&self, root: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(root) = root {
            Self::render_option(&mut out, "root", &OptValue::Str(root.to_string()));
        }
        for (name, value) in &self.options {
            if name == "root" || matches!(value, OptValue::None) {
                continue;
            }
            Self::render_option(&mut out, name, value);
        }
        for (name, plugin) in &self.plugins {
            Self::render_plugin(&mut out, name, plugin);
        }
        self.render_package_manager_config(&mut out);
        for (path, content) in &self.files {
            out.push_str(&format!("config_opts[\"files\"][\"{path}\"] = \"\"\"{content}\"\"\"\n"));
        }
        out
    }
}

/// Package-manager booleans render as 1/0; everything else verbatim.
fn repo_option_string(value: &OptValue) -> String {
    match value {
        OptValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        OptValue::Int(n) => n.to_string(),
        OptValue::Str(s) => s.clone(),
        other => other.render(),
    }
}

fn default_repo_main() -> BTreeMap<String, OptValue> {
    let mut main = BTreeMap::new();
    main.insert("assumeyes".to_string(), OptValue::Bool(true));
    main.insert("cachedir".to_string(), OptValue::Str("/var/cache/yum".to_string()));
    main.insert("debuglevel".to_string(), OptValue::Int(1));
    main.insert("gpgcheck".to_string(), OptValue::Bool(false));
    main.insert("logfile".to_string(), OptValue::Str("/var/log/yum.log".to_string()));
    main.insert("obsoletes".to_string(), OptValue::Bool(true));
    main.insert("reposdir".to_string(), OptValue::Str("/dev/null".to_string()));
    main.insert("retries".to_string(), OptValue::Int(20));
    main.insert("rpmverbosity".to_string(), OptValue::Str("info".to_string()));
    main.insert("syslog_ident".to_string(), OptValue::Str("mock".to_string()));
    main
}

/// Acceptable build-host architectures for a target architecture.
pub fn default_legal_host_arches(target_arch: &str) -> Result<Vec<&'static str>, EnvConfigError> {
    match target_arch {
        "x86_64" => Ok(vec!["x86_64"]),
        "i386" | "i586" | "i686" => Ok(vec!["i386", "i586", "i686", "x86_64"]),
        "noarch" => Ok(vec![
            "i386", "i586", "i686", "x86_64", "noarch", "aarch64", "armhf",
        ]),
        "aarch64" => Ok(vec!["aarch64"]),
        "armhfp" | "armhf" => Ok(vec!["aarch64", "armhf", "armhfp"]),
        "ppc64le" => Ok(vec!["ppc64le"]),
        "s390x" => Ok(vec!["s390x"]),
        other => Err(EnvConfigError::UnknownArch(other.to_string())),
    }
}

#[cfg(test)]
#[path = "env_config_tests.rs"]
mod tests;
