use std::path::PathBuf;
use std::str::FromStr;
use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use cloud_transfer::api;
use cloud_transfer::config::Config;
use cloud_transfer::core::{
    FileKind,
    FileStorage,
    QueueSnapshot,
    RemoteFile,
    StateStorage,
    StatusCounts,
    TransferQueues,
};
use cloud_transfer::logging::init_logging;

/// Upload and download queues for the cloud disk
#[derive(Debug, Parser)]
#[command(name = "cloud-transfer", version, about)]
struct Cli {
    /// TOML config file; defaults apply when it does not exist
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbosity: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    #[command(flatten)]
    Transfer(Transfer),
    /// Show persisted queue state
    Status,
}

/// Commands that run the queues
#[derive(Debug, PartialEq, Subcommand)]
enum Transfer {
    /// Upload local files into a remote folder
    Upload {
        catalogue: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Download remote files, given as <file-id:name>
    Download {
        #[arg(required = true)]
        files: Vec<RemoteArg>,
    },
    /// Download a remote folder recursively
    DownloadDir { path: String },
}

/// `<file-id:name>`
#[derive(Debug, Clone, PartialEq)]
struct RemoteArg {
    id: String,
    name: String,
}

impl FromStr for RemoteArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(':') {
            Some((id, name)) if !id.is_empty() && !name.is_empty() => Ok(RemoteArg {
                id: id.to_string(),
                name: name.to_string(),
            }),
            _ => Err(format!("expected <file-id:name>, got '{value}'")),
        }
    }
}

fn print_counts(label: &str, counts: &StatusCounts) {
    println!(
        "{label}: {} total, {} pending, {} active, {} paused, {} completed, {} failed",
        counts.total, counts.pending, counts.active, counts.paused, counts.completed, counts.failed
    );
}

async fn print_status(config: &Config) -> anyhow::Result<()> {
    let storage = FileStorage::new(&config.storage.state_dir);

    for (label, key) in [("uploads", &config.upload.storage_key), ("downloads", &config.download.storage_key)] {
        let snapshot: QueueSnapshot = match storage.load(key).await? {
            Some(data) => serde_json::from_str(&data).with_context(|| format!("corrupt state '{key}'"))?,
            None => QueueSnapshot::default(),
        };

        let mut counts = StatusCounts::default();
        for task in &snapshot.tasks {
            counts.record(task.status);
        }
        print_counts(label, &counts);

        for task in snapshot.tasks.iter().rev() {
            match &task.error {
                Some(error) => println!("  {:<12} {:>3}% {} ({})", task.status.as_str(), task.progress, task.name, error),
                None => println!("  {:<12} {:>3}% {}", task.status.as_str(), task.progress, task.name),
            }
        }
    }

    Ok(())
}

async fn run(queues: &TransferQueues, transfer: Transfer) -> anyhow::Result<()> {
    match transfer {
        Transfer::Upload { catalogue, files } => {
            queues.uploads.enqueue_files(&catalogue, files).await?;
            let counts = queues.uploads.wait_idle().await?;
            print_counts("uploads", &counts);
        }
        Transfer::Download { files } => {
            let files = files
                .into_iter()
                .map(|RemoteArg { id, name }| {
                    let kind = FileKind::from_file_name(&name);
                    (id, RemoteFile { name, size: 0, kind })
                })
                .collect();
            queues.downloads.enqueue_files(files).await?;
            let counts = queues.downloads.wait_idle().await?;
            print_counts("downloads", &counts);
        }
        Transfer::DownloadDir { path } => {
            let enqueued = queues.downloads.enqueue_directory(&path).await?;
            for failure in &enqueued.failures {
                eprintln!("skipped {}: {}", failure.path, failure.message);
            }
            println!("queued {} files from {path}", enqueued.ids.len());
            let counts = queues.downloads.wait_idle().await?;
            print_counts("downloads", &counts);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbosity, None)?;

    let config = if args.config.exists() {
        Config::load(&args.config).with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        Config::default()
    };

    let transfer = match args.command {
        Command::Status => return print_status(&config).await,
        Command::Transfer(transfer) => transfer,
    };

    let queues = TransferQueues::spawn(&config, api::http_deps(&config)?);
    let result = run(&queues, transfer).await;
    queues.shutdown().await?;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn args(list: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("cloud-transfer").chain(list.iter().copied()))
    }

    fn remote(id: &str, name: &str) -> RemoteArg {
        RemoteArg { id: id.into(), name: name.into() }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload() {
        let parsed = args(&["-vv", "--config", "c.toml", "upload", "/docs", "a.txt", "b.txt"]).unwrap();
        assert_eq!(parsed.config, PathBuf::from("c.toml"));
        assert_eq!(parsed.verbosity, 2);
        assert_eq!(parsed.command, Command::Transfer(Transfer::Upload {
            catalogue: "/docs".into(),
            files: vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")],
        }));
    }

    #[test]
    fn test_parse_download() {
        let parsed = args(&["download", "12:a.txt", "13:b:c.txt", "-v"]).unwrap();
        assert_eq!(parsed.verbosity, 1);
        assert_eq!(parsed.config, PathBuf::from("config.toml"));
        assert_eq!(parsed.command, Command::Transfer(Transfer::Download {
            files: vec![remote("12", "a.txt"), remote("13", "b:c.txt")],
        }));
        assert!(args(&["download", "nocolon"]).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&[]).is_err());
        assert!(args(&["upload", "/docs"]).is_err());
        assert!(args(&["frobnicate"]).is_err());
        assert_eq!(args(&["status"]).unwrap().command, Command::Status);
        assert_eq!(
            args(&["download-dir", "/photos"]).unwrap().command,
            Command::Transfer(Transfer::DownloadDir { path: "/photos".into() })
        );
    }
}
