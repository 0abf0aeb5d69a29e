//! Command-line interface for the yblob PIV blob store.
//!
//! No PC/SC transport ships in this workspace (spec.md's `Transport`
//! trait is the only hardware boundary; concrete implementations live
//! outside it), so every subcommand here drives a
//! [`yblob_membrane::mock::EmulatedDevice`] whose object table round
//! trips through a `--state` JSON file across invocations, standing in
//! for a token that would otherwise keep its own state.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;
use yblob_core::{ops, StoreError};
use yblob_membrane::mock::{DeviceSnapshot, EmulatedDevice};
use yblob_membrane::DeviceId;

#[derive(Debug, Parser)]
#[command(name = "yblob", about = "PIV-backed blob storage, against an emulated token by default")]
struct Cli {
    /// JSON file persisting the emulated device's object table across invocations.
    #[arg(long, default_value = "yblob-device.json", global = true)]
    state: PathBuf,
    /// Number of data objects the store occupies.
    #[arg(long, default_value_t = 20, global = true)]
    object_count: u8,
    /// Bytes per data object.
    #[arg(long, default_value_t = 2048, global = true)]
    object_size: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Format a fresh, empty store, discarding anything already in --state.
    Format {
        /// PIV slot to hold an encryption key pair (0 disables encryption).
        #[arg(long, default_value_t = 0)]
        key_slot: u8,
        /// Generate a P-256 key pair in --key-slot.
        #[arg(long)]
        generate_key: bool,
    },
    /// Store a file's contents under a name.
    Store {
        name: String,
        /// File to read the payload from; reads stdin if omitted.
        #[arg(long)]
        input: Option<PathBuf>,
        /// PIV slot to encrypt against (0 stores the payload unencrypted).
        #[arg(long, default_value_t = 0)]
        key_slot: u8,
    },
    /// Fetch a blob's contents.
    Fetch {
        name: String,
        /// File to write the payload to; writes stdout if omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        /// PIN required to decrypt an encrypted blob.
        #[arg(long)]
        pin: Option<String>,
    },
    /// Remove a blob.
    Remove { name: String },
    /// List every blob currently resolvable in the store.
    List,
    /// Dump every record's decoded state, and what a sanitize pass would reclaim.
    Fsck,
    /// Run a randomized store/fetch/remove sequence against a fresh, in-process device.
    SelfTest {
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 2_000)]
        iterations: usize,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    SelfTest(#[from] yblob_harness::SelfTestError),
    #[error("no store found at {0:?}; run `format` first")]
    NotFormatted(PathBuf),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("yblob: {err}");
            exit_code_for(&err)
        }
    }
}

/// `EmulatedDevice::add_device`'s deterministic id for serial `1`, used
/// as the one device this CLI ever talks to.
fn device_id() -> DeviceId {
    DeviceId::new("Emulated Reader 00000001")
}

fn run(cli: Cli) -> Result<(), CliError> {
    let device = EmulatedDevice::new();

    if let Command::Format { key_slot, generate_key } = cli.command {
        device.add_device(1, "5.7.1");
        let device_id = device_id();
        let store = ops::format(&device, &device_id, None, cli.object_count, cli.object_size, key_slot, generate_key, None)?;
        println!("formatted {} objects of {} bytes each", store.object_count(), cli.object_size);
        save_snapshot(&cli.state, &device, &device_id)?;
        return Ok(());
    }

    if let Command::SelfTest { seed, iterations } = cli.command {
        let report = yblob_harness::self_test::run(seed, cli.object_count, cli.object_size, iterations)?;
        println!("{report:#?}");
        return Ok(());
    }

    let snapshot = load_snapshot(&cli.state)?.ok_or_else(|| CliError::NotFormatted(cli.state.clone()))?;
    let device_id = device_id();
    device.import_device(device_id.clone(), snapshot);

    match cli.command {
        Command::Format { .. } | Command::SelfTest { .. } => unreachable!("handled above"),
        Command::Store { name, input, key_slot } => {
            let mut store = ops::load(&device, &device_id, cli.object_count)?;
            let payload = read_input(input)?;
            ops::store(&mut store, &device, &device_id, None, &name, &payload, key_slot, 0)?;
            println!("stored {:?} ({} bytes)", name, payload.len());
            save_snapshot(&cli.state, &device, &device_id)?;
        }
        Command::Fetch { name, output, pin } => {
            let store = ops::load(&device, &device_id, cli.object_count)?;
            let payload = ops::fetch(&store, &device, &device_id, &name, pin.as_deref())?;
            write_output(output, &payload)?;
        }
        Command::Remove { name } => {
            let mut store = ops::load(&device, &device_id, cli.object_count)?;
            ops::remove(&mut store, &device, &device_id, None, &name)?;
            println!("removed {name:?}");
            save_snapshot(&cli.state, &device, &device_id)?;
        }
        Command::List => {
            let store = ops::load(&device, &device_id, cli.object_count)?;
            for blob in ops::list(&store) {
                println!(
                    "{}\t{} bytes\t{}",
                    blob.name,
                    blob.unencrypted_size,
                    if blob.is_encrypted() { "encrypted" } else { "plaintext" }
                );
            }
        }
        Command::Fsck => {
            let store = ops::load(&device, &device_id, cli.object_count)?;
            let report = ops::fsck(&store);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_snapshot(path: &PathBuf) -> Result<Option<DeviceSnapshot>, CliError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn save_snapshot(path: &PathBuf, device: &EmulatedDevice, device_id: &DeviceId) -> Result<(), CliError> {
    let snapshot = device.export_device(device_id).expect("device was just operated on");
    let bytes = serde_json::to_vec_pretty(&snapshot)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_input(path: Option<PathBuf>) -> Result<Vec<u8>, std::io::Error> {
    match path {
        Some(path) => fs::read(path),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), std::io::Error> {
    match path {
        Some(path) => fs::write(path, data),
        None => std::io::stdout().write_all(data),
    }
}

fn exit_code_for(err: &CliError) -> ExitCode {
    match err {
        CliError::Io(_) | CliError::Json(_) => ExitCode::from(1),
        CliError::NotFormatted(_) => ExitCode::from(2),
        CliError::Store(StoreError::NotFound(_)) => ExitCode::from(3),
        CliError::Store(StoreError::StoreFull) => ExitCode::from(4),
        CliError::Store(StoreError::InvalidName { .. }) | CliError::Store(StoreError::InvalidObjectSize(_)) => ExitCode::from(5),
        CliError::Store(StoreError::PinRequired(_)) | CliError::Store(StoreError::Transport(_)) => ExitCode::from(6),
        CliError::Store(StoreError::Record(_)) | CliError::Store(StoreError::CorruptChain(..)) => ExitCode::from(7),
        CliError::Store(StoreError::Crypto(_)) => ExitCode::from(8),
        CliError::SelfTest(_) => ExitCode::from(9),
    }
}
