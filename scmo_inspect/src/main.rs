mod model;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use model::{ClassFile, InstanceFile, Loader};
use scmo_core::{dump, streamer, EngineConfig, ScmoInstance};

/// Inspect SCMO class and instance chunks
#[derive(Parser)]
#[command(name = "scmo-inspect", version)]
struct Opts {
    /// Engine configuration as JSON
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the layout of classes and, optionally, instances
    Dump {
        #[arg(long)]
        classes: PathBuf,
        #[arg(long)]
        instances: Option<PathBuf>,
        /// Append a hex dump of every chunk
        #[arg(long)]
        hex: bool,
    },
    /// Print the object path of every instance
    Paths {
        #[arg(long)]
        classes: PathBuf,
        #[arg(long)]
        instances: PathBuf,
    },
    /// Serialize instances into a stream file
    Stream {
        #[arg(long)]
        classes: PathBuf,
        #[arg(long)]
        instances: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Read a stream file back and dump its instances
    Load {
        #[arg(long)]
        input: PathBuf,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => read_json(path),
        None => Ok(EngineConfig::default()),
    }
}

fn load_instances(loader: &Loader, path: &Path) -> Result<Vec<ScmoInstance>> {
    let files: Vec<InstanceFile> = read_json(path)?;
    files
        .iter()
        .enumerate()
        .map(|(i, f)| {
            loader
                .instance(f)
                .with_context(|| format!("instance #{} in {}", i, path.display()))
        })
        .collect()
}

fn run(opts: Opts) -> Result<()> {
    let config = load_config(opts.config.as_deref())?;

    match opts.command {
        Command::Dump {
            classes,
            instances,
            hex,
        } => {
            let class_files: Vec<ClassFile> = read_json(&classes)?;
            let loader = Loader::new(&class_files, config)?;
            for class in loader.classes(&class_files)? {
                println!("{}", dump::dump_class(&class));
                if hex {
                    println!("{}", dump::hex_dump(class.as_bytes()));
                }
            }
            if let Some(path) = instances {
                for instance in load_instances(&loader, &path)? {
                    println!("{}", dump::dump_instance(&instance));
                    if hex {
                        println!("{}", dump::hex_dump(instance.as_bytes()));
                    }
                }
            }
        }
        Command::Paths { classes, instances } => {
            let class_files: Vec<ClassFile> = read_json(&classes)?;
            let loader = Loader::new(&class_files, config)?;
            for instance in load_instances(&loader, &instances)? {
                println!("{}", instance.object_path());
            }
        }
        Command::Stream {
            classes,
            instances,
            out,
        } => {
            let class_files: Vec<ClassFile> = read_json(&classes)?;
            let loader = Loader::new(&class_files, config)?;
            let instances = load_instances(&loader, &instances)?;
            let bytes = streamer::serialize_instances(&instances)?;
            fs::write(&out, &bytes).with_context(|| format!("writing {}", out.display()))?;
            info!(
                instances = instances.len(),
                bytes = bytes.len(),
                out = %out.display(),
                "wrote stream"
            );
        }
        Command::Load { input } => {
            let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let instances = streamer::deserialize_instances(&bytes, &config)
                .with_context(|| format!("decoding {}", input.display()))?;
            info!(instances = instances.len(), "loaded stream");
            for instance in &instances {
                println!("{}", dump::dump_instance(instance));
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Opts::parse())
}
