//! Project Launch
//!
//! Creates a project skeleton whose source files are symlinks to the
//! shared informant class, ontology script and dataframe, and records
//! where they came from in `metadata.txt`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::error::{Error, Result};

/// Subdirectories created in every project.
pub const PROJECT_SUBDIRS: [&str; 7] = [
    "informants",
    "ontology",
    "data",
    "src",
    "archive",
    "log",
    "controller",
];

/// Name of the metadata file written at the project root.
pub const METADATA_FILE: &str = "metadata.txt";

/// Inputs for [`launch_project`].
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub name: String,
    pub informant_class: PathBuf,
    pub ontology_script: PathBuf,
    pub dataframe: PathBuf,
    pub auxiliaries: Option<PathBuf>,
    /// Directory the project directory is created in
    pub base_dir: PathBuf,
}

/// Contents of `metadata.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectMetadata {
    pub project_name: String,
    pub date_of_creation: DateTime<Local>,
    pub informant_class_path: PathBuf,
    pub ontology_script_path: PathBuf,
    pub explorer_auxiliaries_path: Option<PathBuf>,
    pub informant_dataframe_path: PathBuf,
}

impl ProjectMetadata {
    /// Renders as `key: value` lines.
    pub fn to_text(&self) -> String {
        let mut lines = vec![
            format!("project_name: {}", self.project_name),
            format!(
                "date_of_creation: {}",
                self.date_of_creation.format("%Y-%m-%d %H:%M:%S%.6f")
            ),
            format!("informant_class_path: {}", self.informant_class_path.display()),
            format!("ontology_script_path: {}", self.ontology_script_path.display()),
        ];
        if let Some(aux) = &self.explorer_auxiliaries_path {
            lines.push(format!("explorer_auxiliaries_path: {}", aux.display()));
        }
        lines.push(format!(
            "informant_dataframe_path: {}",
            self.informant_dataframe_path.display()
        ));

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

/// Parses `key: value` lines, keeping their order.
pub fn parse_metadata(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn absolute(path: &Path, what: &str) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| {
        Error::Project(format!(
            "{} '{}' is not accessible: {}",
            what,
            path.display(),
            e
        ))
    })
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| Error::Project(format!("'{}' has no file name", path.display())))
}

#[cfg(unix)]
fn symlink(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, link)
}

/// Links `link` to `source`, refusing to replace anything already there.
fn create_link(source: &Path, link: &Path) -> Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        return Err(Error::Project(format!(
            "'{}' already exists",
            link.display()
        )));
    }
    symlink(source, link).map_err(|e| Error::io(link, e))?;
    debug!("Linked {} -> {}", link.display(), source.display());
    Ok(())
}

/// Creates a new project and returns its directory.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::PathBuf;
/// use ont_rdb::project::{launch_project, LaunchOptions};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dir = launch_project(&LaunchOptions {
///         name: "hic_trial".to_string(),
///         informant_class: PathBuf::from("informant_class.py"),
///         ontology_script: PathBuf::from("ontologies/hic_ontology.py"),
///         dataframe: PathBuf::from("ontology_dataframes/hic_ontology_dataframe.pkl"),
///         auxiliaries: None,
///         base_dir: PathBuf::from("projects"),
///     })?;
///     println!("Project created at {}", dir.display());
///     Ok(())
/// }
/// ```
pub fn launch_project(opts: &LaunchOptions) -> Result<PathBuf> {
    let name = opts.name.trim();
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::Project(format!("Invalid project name '{}'", opts.name)));
    }

    let informant_class = absolute(&opts.informant_class, "Informant class")?;
    let ontology_script = absolute(&opts.ontology_script, "Ontology script")?;
    let dataframe = absolute(&opts.dataframe, "Informant dataframe")?;
    let auxiliaries = opts
        .auxiliaries
        .as_deref()
        .map(|p| absolute(p, "Explorer auxiliaries"))
        .transpose()?;

    let project_dir = opts.base_dir.join(name);

    let mut links = vec![(
        informant_class.clone(),
        project_dir.join("src").join("informant_class.py"),
    )];
    if let Some(aux) = &auxiliaries {
        links.push((aux.clone(), project_dir.join("src").join("explorer_auxiliaries.py")));
    }
    links.push((
        ontology_script.clone(),
        project_dir.join("ontology").join(file_name(&ontology_script)?),
    ));
    links.push((
        dataframe.clone(),
        project_dir.join("informants").join(file_name(&dataframe)?),
    ));

    // All destinations are checked before anything is created.
    if let Some((_, taken)) = links.iter().find(|(_, link)| fs::symlink_metadata(link).is_ok()) {
        return Err(Error::Project(format!("'{}' already exists", taken.display())));
    }

    for subdir in PROJECT_SUBDIRS {
        let path = project_dir.join(subdir);
        fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
    }
    info!("Created project structure at {}", project_dir.display());

    for (source, link) in &links {
        create_link(source, link)?;
    }
    info!("Linked informant class, ontology and informants");

    let metadata = ProjectMetadata {
        project_name: name.to_string(),
        date_of_creation: Local::now(),
        informant_class_path: informant_class,
        ontology_script_path: ontology_script,
        explorer_auxiliaries_path: auxiliaries,
        informant_dataframe_path: dataframe,
    };
    let metadata_path = project_dir.join(METADATA_FILE);
    fs::write(&metadata_path, metadata.to_text()).map_err(|e| Error::io(&metadata_path, e))?;
    info!("Created metadata file");

    Ok(project_dir)
}
