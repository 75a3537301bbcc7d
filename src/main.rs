//! cidata - build, upload and reconcile cloud-init NoCloud volumes
//!
//! Volumes live in a directory storage backend: one directory per pool under
//! the configured storage root.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cidata_rs::backend::{DirBackend, StorageBackend};
use cidata_rs::config::{DEFAULT_CONFIG_FILE, Settings, SettingsLoader};
use cidata_rs::definition::build;
use cidata_rs::hash;
use cidata_rs::package::package_with;
use cidata_rs::{CloudInitInputs, CloudInitResource, UserDataInput, VolumeKey};

#[derive(Parser)]
#[command(name = "cidata")]
#[command(author, version, about = "Build and manage cloud-init NoCloud volumes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file
    #[arg(long, env = "CIDATA_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Root directory of the storage pools (overrides settings)
    #[arg(long, env = "CIDATA_STORAGE_ROOT", global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cidata volume and print its key
    Create(InputArgs),
    /// Read back the fields of a volume
    Read {
        /// Volume key returned by create
        key: String,
    },
    /// Delete a volume
    Delete {
        /// Volume key returned by create
        key: String,
    },
    /// Compare a volume against desired inputs; exits 2 on drift
    Check {
        /// Volume key returned by create
        key: String,
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Print the fingerprint of user-data
    Hash {
        /// User-data, raw or base64 encoded
        data: Option<String>,
        /// Read raw user-data from a file instead
        #[arg(long, conflicts_with = "data")]
        file: Option<PathBuf>,
    },
    /// Package a volume into a local ISO file without uploading it
    Render {
        #[command(flatten)]
        inputs: InputArgs,
        /// Where to write the image
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List storage pools
    Pools,
    /// Create a storage pool directory
    CreatePool {
        name: String,
    },
}

#[derive(Args)]
struct InputArgs {
    /// YAML file with the inputs; flags override its values
    #[arg(long)]
    from: Option<PathBuf>,

    /// Volume name
    #[arg(long, required_unless_present = "from")]
    name: Option<String>,

    /// Storage pool
    #[arg(long)]
    pool: Option<String>,

    /// Hostname written to meta-data
    #[arg(long)]
    local_hostname: Option<String>,

    /// SSH public key for the default user
    #[arg(long)]
    ssh_authorized_key: Option<String>,

    /// ISO volume label
    #[arg(long)]
    volid: Option<String>,

    /// Name of the user-data file inside the image
    #[arg(long)]
    user_data_path: Option<String>,

    /// Custom user-data, raw or base64 encoded (takes precedence over the SSH key)
    #[arg(long, group = "user_data_source")]
    user_data: Option<String>,

    /// Custom user-data read verbatim from a file
    #[arg(long, group = "user_data_source")]
    user_data_file: Option<PathBuf>,

    /// Custom user-data known to be base64 encoded
    #[arg(long, group = "user_data_source")]
    user_data_base64: Option<String>,

    /// Instance id written to meta-data
    #[arg(long)]
    instance_id: Option<String>,
}

impl InputArgs {
    fn resolve(self, settings: &Settings) -> anyhow::Result<CloudInitInputs> {
        let mut inputs = match &self.from {
            Some(path) => {
                let yaml = fs::read_to_string(path)
                    .with_context(|| format!("reading inputs from {}", path.display()))?;
                CloudInitInputs::from_yaml(&yaml)
                    .with_context(|| format!("parsing inputs from {}", path.display()))?
            }
            None => {
                let Some(name) = &self.name else {
                    bail!("--name is required without --from");
                };
                CloudInitInputs::new(name)
                    .with_pool(&settings.default_pool)
                    .with_volid(&settings.volid)
                    .with_user_data_path(&settings.user_data_path)
            }
        };

        if let Some(name) = self.name {
            inputs.name = name;
        }
        if let Some(pool) = self.pool {
            inputs.pool = pool;
        }
        if let Some(hostname) = self.local_hostname {
            inputs.local_hostname = Some(hostname);
        }
        if let Some(key) = self.ssh_authorized_key {
            inputs.ssh_authorized_key = Some(key);
        }
        if let Some(volid) = self.volid {
            inputs.volid = volid;
        }
        if let Some(path) = self.user_data_path {
            inputs.user_data_path = path;
        }
        if let Some(id) = self.instance_id {
            inputs.instance_id = Some(id);
        }

        if let Some(data) = self.user_data {
            inputs.user_data = UserDataInput::Sniff(data);
        } else if let Some(path) = self.user_data_file {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("reading user-data from {}", path.display()))?;
            inputs.user_data = UserDataInput::Raw(data);
        } else if let Some(data) = self.user_data_base64 {
            inputs.user_data = UserDataInput::Base64(data);
        }

        Ok(inputs)
    }
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn open_backend(settings: &Settings) -> anyhow::Result<DirBackend> {
    DirBackend::open(&settings.storage_root).with_context(|| {
        format!(
            "opening storage backend at {}",
            settings.storage_root.display()
        )
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = SettingsLoader::new()
        .with_config_file(&cli.config)
        .load()
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(root) = &cli.storage_root {
        settings.storage_root = root.clone();
    }
    debug!("Effective settings: {:?}", settings);
    Ok(settings)
}

fn scratch_dir(settings: &Settings) -> Option<&Path> {
    settings.scratch_dir.as_deref()
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let settings = load_settings(&cli)?;
    let packager = settings.packager.packager(scratch_dir(&settings));

    match cli.command {
        Commands::Create(args) => {
            let inputs = args.resolve(&settings)?;
            let backend = open_backend(&settings)?;
            let resource = CloudInitResource::new(&backend).with_packager(packager.as_ref());

            let outcome = resource.create(&inputs)?;
            match outcome.state {
                Ok(state) => print_json(&state)?,
                Err(e) => {
                    print_json(&json!({ "volume_key": outcome.volume_key }))?;
                    return Err(e).with_context(|| {
                        format!("created {} but could not read it back", outcome.volume_key)
                    });
                }
            }
        }
        Commands::Read { key } => {
            let backend = open_backend(&settings)?;
            let state = CloudInitResource::new(&backend).read(&VolumeKey::new(key))?;
            print_json(&state)?;
        }
        Commands::Delete { key } => {
            let backend = open_backend(&settings)?;
            CloudInitResource::new(&backend).delete(&VolumeKey::new(key))?;
        }
        Commands::Check { key, inputs } => {
            let inputs = inputs.resolve(&settings)?;
            let backend = open_backend(&settings)?;
            let state = CloudInitResource::new(&backend).read(&VolumeKey::new(key))?;

            let drifted = state.drift(&inputs);
            print_json(&json!({ "volume_key": state.volume_key, "drifted": drifted }))?;
            if !drifted.is_empty() {
                info!("{} field(s) drifted", drifted.len());
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Hash { data, file } => {
            let fingerprint = match (data, file) {
                (_, Some(path)) => {
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    UserDataInput::Raw(content).fingerprint()
                }
                (Some(data), None) => hash::hash(&data),
                (None, None) => bail!("either DATA or --file is required"),
            };
            println!("{}", fingerprint);
        }
        Commands::Render { inputs, output } => {
            let def = build(&inputs.resolve(&settings)?)?;
            let packaged = package_with(&def, packager.as_ref())?;
            fs::write(&output, &packaged.bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            info!("Wrote {} ({} bytes)", output.display(), packaged.bytes.len());
        }
        Commands::Pools => {
            let backend = open_backend(&settings)?;
            print_json(&backend.list_pools()?)?;
        }
        Commands::CreatePool { name } => {
            let backend = open_backend(&settings)?;
            print_json(&backend.create_pool(&name)?)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
