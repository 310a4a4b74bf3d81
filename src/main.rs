//! rpmtool CLI
//!
//! Entry point for the `rpmtool` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use rpmtool::config::{ConfigError, LoadedConfig};
use rpmtool::deps::is_privileged;
use rpmtool::pipeline::display_path;
use rpmtool::tools::{build_tools, check_tools, require_tools, signature_tools};
use rpmtool::{
    logging, BuildContext, BuildMode, BuildRequest, Pipeline, PipelineError, SigningKey,
    SystemTools, TreeRole,
};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "rpmtool")]
#[command(about = "Build and sign RPM packages", version)]
struct Cli {
    /// Debug logging
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Extra config file, applied over the user config
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build packages from a spec file
    Build(BuildArgs),

    /// Check that the external tools are installed
    Tools {
        /// Leave out the signing tools
        #[arg(long)]
        exclude_signature: bool,
    },

    /// Print the build tree directories
    Tree {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Spec file to build
    spec: PathBuf,

    /// Build the source package only
    #[arg(long)]
    srpm: bool,

    /// Do not install build dependencies
    #[arg(long)]
    skip_deps: bool,

    /// Refresh repository metadata before installing build dependencies
    #[arg(long)]
    latest_deps: bool,

    /// Private key file
    #[arg(long, value_name = "PATH")]
    gpg_key: Option<PathBuf>,

    /// Key id or fingerprint
    #[arg(long, value_name = "ID")]
    gpg_key_id: Option<String>,

    /// Key passphrase
    #[arg(long, value_name = "PASSPHRASE", env = "RPMTOOL_GPG_KEY_PASSPHRASE", hide_env_values = true)]
    gpg_key_passphrase: Option<String>,

    /// File holding the key passphrase
    #[arg(long, value_name = "PATH")]
    gpg_key_passphrase_file: Option<PathBuf>,

    /// Print the build report as JSON
    #[arg(long)]
    json: bool,
}

impl BuildArgs {
    fn request(&self) -> BuildRequest {
        let mode = if self.srpm {
            BuildMode::Srpm
        } else {
            BuildMode::Rpm
        };
        BuildRequest {
            spec: self.spec.clone(),
            mode,
            skip_deps: self.skip_deps,
            latest_deps: self.latest_deps,
            key: SigningKey::new(
                self.gpg_key_id.clone(),
                self.gpg_key.clone(),
                self.gpg_key_passphrase.clone(),
                self.gpg_key_passphrase_file.clone(),
            ),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let loaded = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            let e = PipelineError::from(e);
            eprintln!("error: {}", e);
            process::exit(e.exit_code());
        }
    };

    if let Err(e) = logging::init(&loaded.config.log) {
        eprintln!("warning: {}", e);
    }
    for source in &loaded.sources {
        debug!(origin = ?source.origin, path = ?source.path, digest = ?source.digest, "config layer");
    }

    let result = match &cli.command {
        Commands::Build(args) => run_build(loaded, args),
        Commands::Tools { exclude_signature } => run_tools(loaded, *exclude_signature),
        Commands::Tree { json } => run_tree(loaded, *json),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn load_config(cli: &Cli) -> Result<LoadedConfig, ConfigError> {
    let mut overrides = toml::Table::new();
    let level = if cli.verbose {
        Some("debug")
    } else if cli.quiet {
        Some("warn")
    } else {
        None
    };
    if let Some(level) = level {
        let mut log = toml::Table::new();
        log.insert("level".into(), toml::Value::String(level.into()));
        overrides.insert("log".into(), toml::Value::Table(log));
    }

    LoadedConfig::load(cli.config.as_deref(), Some(overrides))
}

fn run_build(loaded: LoadedConfig, args: &BuildArgs) -> Result<i32, PipelineError> {
    let request = args.request();
    let config = loaded.config;

    // Check tools before touching the tree
    let mut required = build_tools(&config.tools, is_privileged());
    if !request.installs_deps() {
        required.retain(|t| !matches!(t.name, "dnf" | "sudo"));
    }
    if let Ok(key) = request.key.validate() {
        required.extend(signature_tools(&config.tools, Some(key.backend())));
    }
    require_tools(&required)?;

    let context = BuildContext::from_config(config)?;
    let system = SystemTools::from_config(context.config())?;
    let report = Pipeline::new(&context, system.collaborators()).run(&request)?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        let base = context.tree().path(request.mode.output_role());
        for artifact in &report.artifacts {
            println!("{}", display_path(&artifact.path, base));
        }
    }
    Ok(0)
}

fn run_tools(loaded: LoadedConfig, exclude_signature: bool) -> Result<i32, PipelineError> {
    let tools = &loaded.config.tools;
    let mut list = build_tools(tools, is_privileged());
    if !exclude_signature {
        list.extend(signature_tools(tools, None));
    }

    let checks = check_tools(&list);
    for check in &checks {
        println!("{}", check);
    }

    if checks.iter().all(|c| c.is_found()) {
        Ok(0)
    } else {
        warn!("some required tools are missing");
        Ok(1)
    }
}

fn run_tree(loaded: LoadedConfig, json: bool) -> Result<i32, PipelineError> {
    let context = BuildContext::from_config(loaded.config)?;
    let tree = context.tree();

    if json {
        println!("{}", serde_json::to_string_pretty(tree)?);
    } else {
        for role in TreeRole::ALL {
            println!("{:<7}{}", role, tree.path(role).display());
        }
    }
    Ok(0)
}
