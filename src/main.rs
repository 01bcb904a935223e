//! ont_rdb CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Build one ontology dataframe
//! ont_rdb run workflow.yaml ontology_dataframes/hic_ontology_dataframe.pkl
//!
//! # Preview jobs without running them
//! ont_rdb run ontology_dataframes/hic_ontology_dataframe.pkl --dry-run
//!
//! # Override the informant class and run inside the conda environment
//! ont_rdb run --config informant_class_path=src/informant_class.py --use-conda ...
//!
//! # Print the resolved job graph as JSON
//! ont_rdb plan workflow.yaml ontology_dataframes/vae_ontology_dataframe.pkl
//!
//! # Scaffold and consolidate a project
//! ont_rdb launch trial --inf informant_class.py --ont ontologies/hic_ontology.py \
//!     --dataframe ontology_dataframes/hic_ontology_dataframe.pkl
//! ont_rdb consolidate trial
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::{error, info};

use ont_rdb::execution::Engine;
use ont_rdb::project::{consolidate_project, launch_project, LaunchOptions};
use ont_rdb::workflow::load_workflow;
use ont_rdb::{APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

#[derive(Parser, Debug)]
#[command(name = "ont_rdb", version, about = "Ontology dataframe build rules and rule runner")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Workflow file followed by targets. The workflow may be omitted when
/// the first argument is not a `.yaml`/`.yml` file.
#[derive(Args, Debug)]
struct WorkflowArgs {
    /// [WORKFLOW] [TARGETS...]
    #[arg(value_name = "WORKFLOW_OR_TARGET")]
    positional: Vec<String>,

    /// Override a config value (repeatable)
    #[arg(long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build targets
    Run {
        #[command(flatten)]
        workflow: WorkflowArgs,

        /// Thread budget (default: all CPUs)
        #[arg(short, long, default_value_t = 0)]
        cores: usize,

        /// Preview jobs without executing them
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Run jobs even if their outputs are up to date
        #[arg(short = 'F', long)]
        force: bool,

        /// Run rules inside their conda environment
        #[arg(long)]
        use_conda: bool,

        /// Directory relative paths are resolved against
        #[arg(short = 'd', long, value_name = "DIR")]
        working_dir: Option<PathBuf>,
    },

    /// Print the resolved job graph as JSON
    Plan {
        #[command(flatten)]
        workflow: WorkflowArgs,
    },

    /// List the rules of a workflow
    Rules {
        #[arg(default_value = DEFAULT_WORKFLOW)]
        workflow: PathBuf,
    },

    /// Create a project linked to an informant class, ontology and dataframe
    Launch {
        name: String,

        /// Informant class script
        #[arg(long = "inf", value_name = "PATH")]
        informant_class: PathBuf,

        /// Ontology script
        #[arg(long = "ont", value_name = "PATH")]
        ontology_script: PathBuf,

        /// Informant dataframe
        #[arg(long, value_name = "PATH")]
        dataframe: PathBuf,

        /// Explorer auxiliaries script
        #[arg(long, value_name = "PATH")]
        auxiliaries: Option<PathBuf>,

        /// Directory to create the project in
        #[arg(long, value_name = "DIR", default_value = ".")]
        base_dir: PathBuf,
    },

    /// Replace a project's symlinks with file copies
    Consolidate { project_dir: PathBuf },
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Ontology dataframe rule runner");
    println!();
}

/// Splits positional arguments into the workflow file and targets.
fn split_workflow_and_targets(positional: &[String]) -> (PathBuf, Vec<String>) {
    match positional.split_first() {
        Some((first, rest)) if first.ends_with(".yaml") || first.ends_with(".yml") => {
            (PathBuf::from(first), rest.to_vec())
        }
        _ => (PathBuf::from(DEFAULT_WORKFLOW), positional.to_vec()),
    }
}

/// Validates and changes into the working directory.
fn setup_working_directory(working_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(dir) = working_dir else {
        info!("Working directory: {}", env::current_dir()?.display());
        return Ok(());
    };

    if !dir.is_dir() {
        return Err(format!("Working directory does not exist: {}", dir.display()).into());
    }

    env::set_current_dir(dir)?;
    info!("Working directory: {}", env::current_dir()?.display());
    Ok(())
}

fn run_command(
    workflow: WorkflowArgs,
    cores: usize,
    dry_run: bool,
    force: bool,
    use_conda: bool,
    working_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (workflow_path, targets) = split_workflow_and_targets(&workflow.positional);
    // Relative to the invocation directory, not --working-dir.
    let workflow_path = env::current_dir()?.join(workflow_path);

    if dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
    }
    setup_working_directory(working_dir.as_deref())?;

    let loaded = load_workflow(&workflow_path, &workflow.config).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        e
    })?;
    info!("Workflow loaded: {} rules", loaded.rules.len());

    let mut engine = Engine::new(loaded);
    engine.set_targets(targets);
    engine.set_cores(cores);
    engine.set_dry_run(dry_run);
    engine.set_force(force);
    engine.set_use_conda(use_conda);

    engine.run()?;
    Ok(())
}

fn plan_command(workflow: WorkflowArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (workflow_path, targets) = split_workflow_and_targets(&workflow.positional);
    let loaded = load_workflow(&workflow_path, &workflow.config)?;

    let mut engine = Engine::new(loaded);
    engine.set_targets(targets);
    let graph = engine.plan()?;

    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

fn rules_command(workflow_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = load_workflow(workflow_path, &[])?;
    for rule in &workflow.rules {
        println!("{}", rule.name.bold());
        for output in &rule.output {
            println!("  -> {}", output);
        }
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            workflow,
            cores,
            dry_run,
            force,
            use_conda,
            working_dir,
        } => {
            print_banner();
            run_command(workflow, cores, dry_run, force, use_conda, working_dir)
        }
        Commands::Plan { workflow } => plan_command(workflow),
        Commands::Rules { workflow } => rules_command(&workflow),
        Commands::Launch {
            name,
            informant_class,
            ontology_script,
            dataframe,
            auxiliaries,
            base_dir,
        } => {
            let dir = launch_project(&LaunchOptions {
                name,
                informant_class,
                ontology_script,
                dataframe,
                auxiliaries,
                base_dir,
            })?;
            println!("{} {}", "Project created:".green(), dir.display());
            Ok(())
        }
        Commands::Consolidate { project_dir } => {
            let count = consolidate_project(&project_dir)?;
            println!(
                "{} {} symbolic link(s) replaced with file copies",
                "Consolidated:".green(),
                count
            );
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_split_workflow_and_targets() {
        let (wf, targets) = split_workflow_and_targets(&strings(&["rules.yml", "a.pkl"]));
        assert_eq!(wf, PathBuf::from("rules.yml"));
        assert_eq!(targets, vec!["a.pkl"]);

        let (wf, targets) = split_workflow_and_targets(&strings(&["a.pkl", "b.pkl"]));
        assert_eq!(wf, PathBuf::from(DEFAULT_WORKFLOW));
        assert_eq!(targets, vec!["a.pkl", "b.pkl"]);

        let (wf, targets) = split_workflow_and_targets(&[]);
        assert_eq!(wf, PathBuf::from(DEFAULT_WORKFLOW));
        assert!(targets.is_empty());
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "ont_rdb",
            "run",
            "workflow.yaml",
            "ontology_dataframes/hic_ontology_dataframe.pkl",
            "--cores",
            "2",
            "-n",
            "--config",
            "informant_class_path=inf.py",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                workflow,
                cores,
                dry_run,
                force,
                ..
            } => {
                assert_eq!(workflow.positional.len(), 2);
                assert_eq!(workflow.config, vec!["informant_class_path=inf.py"]);
                assert_eq!(cores, 2);
                assert!(dry_run);
                assert!(!force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_launch_arguments() {
        let cli = Cli::try_parse_from([
            "ont_rdb", "launch", "trial", "--inf", "i.py", "--ont", "o.py", "--dataframe", "d.pkl",
        ])
        .unwrap();

        match cli.command {
            Commands::Launch {
                name,
                auxiliaries,
                base_dir,
                ..
            } => {
                assert_eq!(name, "trial");
                assert!(auxiliaries.is_none());
                assert_eq!(base_dir, PathBuf::from("."));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_launch_requires_sources() {
        assert!(Cli::try_parse_from(["ont_rdb", "launch", "trial"]).is_err());
    }
}
