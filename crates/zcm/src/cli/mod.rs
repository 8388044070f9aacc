//! CLI command definitions and handlers.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::Result;

use zcm_common::{InstanceId, format_bytes};

use crate::chain::{Chain, RetentionLimits};
use crate::zfs::ZfsCli;

/// ZCM - ZFS clone chain manager
#[derive(Parser)]
#[command(name = "zcm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Managed path (defaults to the current directory)
    #[arg(short, long, global = true, env = "ZCM_PATH")]
    pub path: Option<PathBuf>,

    /// Set the logging level
    #[arg(short = 'l', long, global = true, value_enum, default_value_t = LogLevel::None)]
    pub log_level: LogLevel,

    /// Enable debug logging
    #[arg(short = 'D', long, global = true)]
    pub debug: bool,

    /// Suppress confirmation output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Logging verbosity selected on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// No logging at all.
    None,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Informational messages.
    Info,
    /// Everything, including backend command traces.
    Debug,
}

impl LogLevel {
    /// The `tracing_subscriber` filter directive for this level.
    #[must_use]
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::None => "zcm=off",
            LogLevel::Error => "zcm=error",
            LogLevel::Warn => "zcm=warn",
            LogLevel::Info => "zcm=info",
            LogLevel::Debug => "zcm=debug",
        }
    }
}

/// Chain lifecycle commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a clone chain on a ZFS filesystem
    Init {
        /// Root ZFS filesystem to create
        filesystem: String,

        /// Path the chain will manage
        path: PathBuf,
    },

    /// Snapshot the active instance into a new clone
    #[command(alias = "clone")]
    Create {
        /// Do not create if there would be more than N newer instances
        #[arg(short = 'm', long, value_name = "N")]
        max_newer: Option<usize>,

        /// Do not create if there would be more than N instances in total
        #[arg(short = 'M', long, value_name = "N")]
        max_total: Option<usize>,

        /// Remove instances instead of failing when a maximum is exceeded
        #[arg(short = 'a', long)]
        auto_remove: bool,
    },

    /// Make an instance the active one
    Activate {
        /// Instance id to activate
        id: InstanceId,

        /// Do not activate if there would be more than N newer instances
        #[arg(short = 'm', long, value_name = "N")]
        max_newer: Option<usize>,

        /// Do not activate if there would be more than N older instances
        #[arg(short = 'M', long, value_name = "N")]
        max_older: Option<usize>,

        /// Remove instances instead of failing when a maximum is exceeded
        #[arg(short = 'a', long)]
        auto_remove: bool,
    },

    /// Remove instances from the chain
    #[command(alias = "remove")]
    Rm {
        /// Instance ids to remove
        #[arg(required = true)]
        ids: Vec<InstanceId>,
    },

    /// List instances
    #[command(alias = "list")]
    Ls {
        /// Don't truncate output
        #[arg(long)]
        no_trunc: bool,

        /// Print instances as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show chain information
    #[command(alias = "information")]
    Info {
        /// Show parseable info
        #[arg(short = 'P', long)]
        parseable: bool,
    },

    /// Destroy the chain: every instance, snapshot and directory
    Destroy {
        /// Force destroy without confirmation
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Execute the CLI command.
    pub fn execute(self) -> Result<()> {
        let backend = ZfsCli::new();
        let managed_path = match &self.path {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };

        match self.command {
            Commands::Init { filesystem, path } => {
                Chain::initialize(&backend, &filesystem, &path)?;
                if !self.quiet {
                    println!(
                        "Initialized chain {} at path {}",
                        filesystem,
                        path.display()
                    );
                }
                Ok(())
            }

            Commands::Create {
                max_newer,
                max_total,
                auto_remove,
            } => {
                let mut chain = Chain::open(backend, managed_path)?;
                let instance = chain.create(&RetentionLimits {
                    max_newer,
                    max_total,
                    auto_remove,
                    ..Default::default()
                })?;
                if !self.quiet {
                    println!("Created instance {}", instance.id);
                }
                Ok(())
            }

            Commands::Activate {
                id,
                max_newer,
                max_older,
                auto_remove,
            } => {
                let mut chain = Chain::open(backend, managed_path)?;
                let instance = chain.activate(
                    id,
                    &RetentionLimits {
                        max_newer,
                        max_older,
                        auto_remove,
                        ..Default::default()
                    },
                )?;
                if !self.quiet {
                    println!("Activated instance {}", instance.id);
                }
                Ok(())
            }

            Commands::Rm { ids } => {
                let mut chain = Chain::open(backend, managed_path)?;
                for id in ids {
                    chain.remove(id)?;
                    if !self.quiet {
                        println!("Removed instance {id}");
                    }
                }
                Ok(())
            }

            Commands::Ls { no_trunc, json } => {
                let chain = Chain::open(backend, managed_path)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(chain.instances())?);
                } else {
                    print_table(&chain, no_trunc);
                }
                Ok(())
            }

            Commands::Info { parseable } => {
                let chain = Chain::open(backend, managed_path)?;
                print_info(&chain, parseable);
                Ok(())
            }

            Commands::Destroy { force } => {
                let chain = Chain::open(backend, managed_path)?;
                if !confirm_destroy(force, chain.path())? {
                    return Ok(());
                }
                let path = chain.path().to_path_buf();
                chain.destroy()?;
                if !self.quiet {
                    println!("Destroyed chain at path {}", path.display());
                }
                Ok(())
            }
        }
    }
}

/// Column cap applied unless `--no-trunc` is given.
const TRUNCATE_WIDTH: usize = 40;

fn truncate(value: String, no_trunc: bool) -> String {
    if no_trunc || value.chars().count() <= TRUNCATE_WIDTH {
        value
    } else {
        let head: String = value.chars().take(TRUNCATE_WIDTH - 3).collect();
        format!("{head}...")
    }
}

fn print_table(chain: &Chain<ZfsCli>, no_trunc: bool) {
    println!("A\tID\tMOUNTPOINT\tORIGIN\tDATE\tSIZE");
    for instance in chain.instances() {
        let active = if Some(instance.id) == chain.active_id() {
            "*"
        } else {
            " "
        };
        let origin = instance
            .origin_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            active,
            instance.id,
            truncate(instance.mountpoint.display().to_string(), no_trunc),
            origin,
            instance.creation.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(instance.used),
        );
    }
}

fn print_info(chain: &Chain<ZfsCli>, parseable: bool) {
    let active = chain
        .active_id()
        .map(|id| id.to_string())
        .unwrap_or_default();
    let rows = [
        ("path", chain.path().display().to_string()),
        ("root", chain.root().to_string()),
        ("size", format_bytes(chain.used())),
        ("instances", chain.instances().len().to_string()),
        ("older", chain.older().len().to_string()),
        ("newer", chain.newer().len().to_string()),
        ("active", active),
        ("next-id", chain.next_id().to_string()),
    ];
    if parseable {
        for (key, value) in rows {
            println!("{key}\t{value}");
        }
    } else {
        for (key, value) in rows {
            println!("{:<12} {}", format!("{key}:"), value);
        }
    }
}

fn confirm_destroy(force: bool, path: &Path) -> Result<bool> {
    if force {
        return Ok(true);
    }
    println!(
        "WARNING: all filesystems, clones, snapshots and directories associated with {} will be permanently deleted.",
        path.display()
    );
    println!("This operation is not reversible.");
    print!("Do you want to proceed? (yes/NO) ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
