use clap::{Parser, Subcommand};
use evc::{Container, ContainerOptions, ContainerReader, UploadResponse, UploadSource};
use std::fs::File;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "evc", about = "Evidence container (.evc) CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect files into an evidence container
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Compression level (0 stores members verbatim)
        #[arg(short, long, default_value = "5")]
        level: i64,
        /// Encrypt with AES-256-GCM (Argon2id key derivation)
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// List container members
    List {
        input: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Extract all members
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Show container metadata and recompute the stream digest
    Info {
        input: PathBuf,
    },
    /// Reconstruct the member list of a truncated container
    Scan {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    match Cli::parse().command {
        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, level, password, input } => {
            let container = Container::create_file(
                &output,
                ContainerOptions { level, password },
            )?;
            for path in &input {
                let name = path.to_string_lossy();
                let response = match File::open(path) {
                    Ok(mut fd) => container.upload(&name, None, UploadSource::Stream(&mut fd)),
                    Err(err) => Err(err.into()),
                };
                match response {
                    Ok(r) => println!("  packed  {}  sha256={}", r.path, r.sha256),
                    Err(err) => {
                        let failed = UploadResponse::from_error(&name, &err);
                        eprintln!("  failed  {}  {}", failed.path, failed.error.unwrap());
                    }
                }
            }
            let summary = container.close()?;
            println!("Created: {} ({} bytes)", output.display(), summary.bytes_written);
            if let Some(sha256) = summary.sha256 {
                println!("SHA-256: {sha256}");
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, password } => {
            let reader = open_reader(&input, &password)?;
            println!("{:<42} {:>12} {:>12}  {:<6} Modified", "Name", "Size", "Stored", "Codec");
            for member in reader.list() {
                let codec = member.codec().map(|c| c.name()).unwrap_or("?");
                let mtime = if member.mtime == 0 {
                    "-".to_string()
                } else {
                    chrono::DateTime::from_timestamp(member.mtime, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string())
                };
                println!(
                    "{:<42} {:>12} {:>12}  {:<6} {}",
                    member.name, member.orig_size, member.comp_size, codec, mtime
                );
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir, password } => {
            let mut reader = open_reader(&input, &password)?;
            std::fs::create_dir_all(&output_dir)?;
            let names: Vec<String> = reader.list().iter().map(|m| m.name.clone()).collect();
            for name in names {
                let data = reader.read_member(&name)?;
                let dest = output_dir.join(&name);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest, data)?;
                println!("  extracted  {name}");
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let mut reader = ContainerReader::open(&input)?;
            println!("── .evc container ─────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Format version {}", reader.superblock.version);
            println!("  UUID           {}", reader.superblock.uuid);
            println!("  Encrypted      {}", reader.is_encrypted());
            println!("  Members        {}", reader.list().len());
            let (bytes, sha256) = reader.verify()?;
            println!("  Stream bytes   {bytes}");
            println!("  SHA-256        {sha256}");
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input } => {
            let index = ContainerReader::scan(File::open(&input)?)?;
            println!("Scan recovered {} member(s) from frame headers:", index.members.len());
            for member in &index.members {
                println!(
                    "  offset={:<10} stored={:<10} size={:<10} name={}",
                    member.offset, member.comp_size, member.orig_size, member.name
                );
            }
        }
    }

    Ok(())
}

fn open_reader(
    path: &PathBuf,
    password: &Option<String>,
) -> Result<ContainerReader, Box<dyn std::error::Error>> {
    Ok(match password {
        Some(pwd) => ContainerReader::open_encrypted(path, pwd)?,
        None => ContainerReader::open(path)?,
    })
}
