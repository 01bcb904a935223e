//! Conda/Micromamba Environment Management
//!
//! Rules may name a conda environment descriptor (`envs/environment.yaml`).
//! With conda enabled, each descriptor is materialized once as a prefix
//! under `.ont_rdb/conda/<name>-<digest>` in the working directory, and
//! jobs run inside it through `micromamba run -p <prefix>`. The digest is
//! taken over the descriptor's contents, so descriptors sharing a name get
//! separate prefixes and an edited descriptor gets a fresh one.
//!
//! # Micromamba Resolution Priority
//!
//! 1. `ONT_RDB_MICROMAMBA` environment variable
//! 2. Next to the ont_rdb executable
//! 3. Development path: `{project_root}/runtime/micromamba`
//! 4. System PATH

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Directory, relative to the working directory, holding created prefixes.
pub const CONDA_PREFIX_DIR: &str = ".ont_rdb/conda";

/// Hex digits of the content digest kept in a prefix name.
const DIGEST_LEN: usize = 12;

/// Lazily-initialized path to the micromamba binary.
pub static MICROMAMBA_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = std::env::var_os("ONT_RDB_MICROMAMBA") {
        let path = PathBuf::from(path);
        info!("Using micromamba from ONT_RDB_MICROMAMBA: {}", path.display());
        return path;
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    if let Some(prod_path) = exe_dir.map(|d| d.join("micromamba")) {
        if prod_path.exists() {
            info!("Using bundled micromamba: {}", prod_path.display());
            return prod_path;
        }
    }

    let dev_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("runtime")
        .join("micromamba");
    if dev_path.exists() {
        info!("Using development micromamba: {}", dev_path.display());
        return dev_path;
    }

    if let Ok(output) = Command::new("which").arg("micromamba").output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                let system_path = PathBuf::from(path_str);
                info!("Using system micromamba: {}", system_path.display());
                return system_path;
            }
        }
    }

    warn!("Micromamba binary not found (searched ONT_RDB_MICROMAMBA, executable dir, runtime/, PATH)");
    warn!("  Download from: https://micro.mamba.pm/");
    PathBuf::from("micromamba")
});

/// Lazily-initialized micromamba root prefix (package cache).
pub static MAMBA_ROOT_PREFIX: Lazy<PathBuf> = Lazy::new(|| {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    let prefix = PathBuf::from(home).join(".ont_rdb").join("micromamba");
    if !prefix.exists() {
        if let Err(e) = fs::create_dir_all(&prefix) {
            warn!("Failed to create micromamba root prefix: {}", e);
        }
    }

    debug!("Using micromamba root prefix: {}", prefix.display());
    prefix
});

/// Creates a Command configured with the correct MAMBA_ROOT_PREFIX.
fn micromamba_command() -> Command {
    let mut cmd = Command::new(&*MICROMAMBA_PATH);
    cmd.env("MAMBA_ROOT_PREFIX", &*MAMBA_ROOT_PREFIX);
    cmd
}

/// The parts of a conda environment descriptor the runner reads.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CondaEnv {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    /// Package specs; nested `pip:` lists are kept as raw values
    #[serde(default)]
    pub dependencies: Vec<Value>,
    /// Path of the descriptor file
    #[serde(skip)]
    pub file: PathBuf,
    /// Hex SHA-256 of the descriptor contents
    #[serde(skip)]
    pub digest: String,
}

fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl CondaEnv {
    /// Reads an environment descriptor.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut env: CondaEnv = serde_yaml::from_str(&content).map_err(|e| {
            Error::Conda(format!(
                "Invalid environment file '{}': {}",
                path.display(),
                e
            ))
        })?;
        env.file = path.to_path_buf();
        env.digest = content_digest(&content);
        Ok(env)
    }

    /// Environment name, falling back to the descriptor's file stem.
    pub fn env_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "env".to_string())
        })
    }

    /// Prefix directory this environment is created in.
    pub fn prefix(&self, working_dir: &Path) -> PathBuf {
        let short = &self.digest[..self.digest.len().min(DIGEST_LEN)];
        let dir_name = if short.is_empty() {
            self.env_name()
        } else {
            format!("{}-{}", self.env_name(), short)
        };
        working_dir.join(CONDA_PREFIX_DIR).join(dir_name)
    }

    /// Package specs given as plain strings.
    pub fn packages(&self) -> Vec<&str> {
        self.dependencies.iter().filter_map(Value::as_str).collect()
    }
}

/// Checks whether a prefix holds a created environment.
pub fn env_exists(prefix: &Path) -> bool {
    prefix.join("conda-meta").is_dir()
}

/// Creates the environment for `descriptor` unless it already exists,
/// returning its prefix.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use ont_rdb::environment::conda::ensure_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let prefix = ensure_env(Path::new("envs/environment.yaml"), Path::new("."))?;
///     println!("environment at {}", prefix.display());
///     Ok(())
/// }
/// ```
pub fn ensure_env(descriptor: &Path, working_dir: &Path) -> Result<PathBuf> {
    let descriptor = if descriptor.is_absolute() {
        descriptor.to_path_buf()
    } else {
        working_dir.join(descriptor)
    };
    let env = CondaEnv::from_file(&descriptor)?;
    let prefix = env.prefix(working_dir);

    if env_exists(&prefix) {
        debug!("Environment '{}' already exists at {}", env.env_name(), prefix.display());
        return Ok(prefix);
    }

    info!(
        "Creating environment '{}' at {} with packages: {:?}",
        env.env_name(),
        prefix.display(),
        env.packages()
    );

    let output = micromamba_command()
        .arg("create")
        .arg("-y")
        .arg("-p")
        .arg(&prefix)
        .arg("-f")
        .arg(&descriptor)
        .output()
        .map_err(|e| {
            Error::Conda(format!(
                "Failed to launch {}: {}",
                MICROMAMBA_PATH.display(),
                e
            ))
        })?;

    if output.status.success() {
        info!("Successfully created environment '{}'", env.env_name());
        Ok(prefix)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Failed to create environment '{}': {}", env.env_name(), stderr);
        Err(Error::Conda(format!(
            "Failed to create environment '{}' from '{}'",
            env.env_name(),
            descriptor.display()
        )))
    }
}

/// Builds the command running `script` with bash inside `prefix`.
pub fn run_in_env(prefix: &Path, script: &Path) -> Command {
    let mut cmd = micromamba_command();
    cmd.arg("run").arg("-p").arg(prefix).arg("bash").arg(script);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::ffi::OsStr;
    use tempfile::tempdir;

    const DESCRIPTOR: &str = r#"
name: ont_rdb
channels:
  - conda-forge
dependencies:
  - python=3.11
  - pandas
  - pip:
      - click
"#;

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("environment.yaml");
        fs::write(&path, DESCRIPTOR).unwrap();

        let env = CondaEnv::from_file(&path).unwrap();
        assert_eq!(env.env_name(), "ont_rdb");
        assert_eq!(env.channels, vec!["conda-forge"]);
        assert_eq!(env.packages(), vec!["python=3.11", "pandas"]);
        assert_eq!(env.dependencies.len(), 3);
        assert_eq!(env.file, path);
    }

    #[test]
    fn test_env_name_falls_back_to_stem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ontology.yaml");
        fs::write(&path, "dependencies: [python]\n").unwrap();

        let env = CondaEnv::from_file(&path).unwrap();
        assert_eq!(env.env_name(), "ontology");
        assert_eq!(env.digest.len(), 64);
        assert_eq!(
            env.prefix(Path::new("/work")),
            PathBuf::from(format!("/work/.ont_rdb/conda/ontology-{}", &env.digest[..12]))
        );
    }

    #[test]
    fn test_same_name_different_contents_get_separate_prefixes() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        fs::write(&a, "name: ont_rdb\ndependencies: [python=3.11]\n").unwrap();
        fs::write(&b, "name: ont_rdb\ndependencies: [python=3.12, pandas]\n").unwrap();

        let env_a = CondaEnv::from_file(&a).unwrap();
        let env_b = CondaEnv::from_file(&b).unwrap();
        assert_eq!(env_a.env_name(), env_b.env_name());
        assert_ne!(env_a.prefix(dir.path()), env_b.prefix(dir.path()));

        fs::create_dir_all(env_a.prefix(dir.path()).join("conda-meta")).unwrap();
        assert!(!env_exists(&env_b.prefix(dir.path())));
    }

    #[test]
    fn test_edited_descriptor_is_not_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("environment.yaml");
        fs::write(&path, DESCRIPTOR).unwrap();
        let before = CondaEnv::from_file(&path).unwrap().prefix(dir.path());
        fs::create_dir_all(before.join("conda-meta")).unwrap();

        fs::write(&path, format!("{}  - numpy\n", DESCRIPTOR)).unwrap();
        let after = CondaEnv::from_file(&path).unwrap().prefix(dir.path());

        assert_ne!(before, after);
        assert!(env_exists(&before));
        assert!(!env_exists(&after));
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            CondaEnv::from_file("/nonexistent/env.yaml"),
            Err(Error::Io { .. })
        ));

        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "dependencies: {not: [a list").unwrap();
        assert!(matches!(CondaEnv::from_file(&path), Err(Error::Conda(_))));
    }

    #[test]
    fn test_env_exists() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("env");
        assert!(!env_exists(&prefix));

        fs::create_dir_all(prefix.join("conda-meta")).unwrap();
        assert!(env_exists(&prefix));
    }

    #[test]
    fn test_ensure_env_reuses_existing_prefix() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("envs")).unwrap();
        fs::write(dir.path().join("envs/environment.yaml"), DESCRIPTOR).unwrap();
        let expected = CondaEnv::from_file(dir.path().join("envs/environment.yaml"))
            .unwrap()
            .prefix(dir.path());
        fs::create_dir_all(expected.join("conda-meta")).unwrap();

        let prefix = ensure_env(Path::new("envs/environment.yaml"), dir.path()).unwrap();
        assert_eq!(prefix, expected);
        assert!(prefix
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("ont_rdb-"));
    }

    #[test]
    fn test_run_in_env_arguments() {
        let cmd = run_in_env(Path::new("/p/env"), Path::new("/tmp/job.sh"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(
            args,
            vec![
                OsStr::new("run"),
                OsStr::new("-p"),
                OsStr::new("/p/env"),
                OsStr::new("bash"),
                OsStr::new("/tmp/job.sh"),
            ]
        );
    }
}
