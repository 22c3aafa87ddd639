//! `nfdebug`: inspect, deploy to and listen to a nanoFramework device.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use nfdebug_cli::{hexdump, load_config, parse_hex, parse_hex_bytes, read_image};
use nfdebug_core::commands::monitor::deployment_range;
use nfdebug_core::commands::RebootMode;
use nfdebug_core::{CancelToken, ConnectionState, DeployImage, DeviceEvent, Engine, TcpTransport};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device address (TCP, or a serial-to-TCP bridge)
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    address: SocketAddr,

    /// JSON engine configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Request timeout in milliseconds, overriding the configuration
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the device answers and report what it is running
    Ping,
    /// Firmware, capabilities and loaded assemblies
    Info,
    /// List loaded assemblies
    Assemblies,
    /// Read memory
    Read {
        address: String, // Hex string
        length: usize,
    },
    /// Write memory
    Write {
        address: String, // Hex string
        data: String,    // Hex string (e.g. "DEADBEEF")
    },
    /// Erase a memory range
    Erase { address: String, length: usize },
    /// Show the memory map
    MemoryMap,
    /// Show the flash sector map
    Sectors,
    /// List managed threads with their call stacks
    Threads,
    /// Pause managed execution
    Pause,
    /// Resume managed execution
    Resume,
    /// Write an image to the deployment area and verify it
    Deploy {
        image: PathBuf,
        /// Start address; defaults to the device's deployment sectors
        #[arg(long)]
        at: Option<String>,
    },
    /// Reboot the device
    Reboot {
        #[arg(long, value_enum, default_value_t = Mode::Normal)]
        mode: Mode,
    },
    /// Print device output and notifications until interrupted
    Listen {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Normal,
    Bootloader,
    Clr,
}

impl From<Mode> for RebootMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Normal => Self::Normal,
            Mode::Bootloader => Self::EnterBootloader,
            Mode::Clr => Self::ClrOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.timeout_ms)?;

    // Ctrl+C cancels whatever request is in flight.
    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling...");
            interrupt.cancel();
        }
    });

    // Engine calls block until the device answers; keep them off the async workers.
    let engine = Arc::new(Engine::new(Arc::new(TcpTransport::new(cli.address)), config));
    let address = cli.address;
    {
        let (engine, cancel) = (Arc::clone(&engine), cancel.clone());
        tokio::task::spawn_blocking(move || engine.connect(&cancel))
            .await?
            .with_context(|| format!("Failed to connect to {address}"))?;
    }
    info!("{address} is {}", engine.state());

    let result = if let Commands::Listen { seconds } = cli.command {
        listen(&engine, seconds, &cancel).await
    } else {
        let (engine, cancel) = (Arc::clone(&engine), cancel.clone());
        tokio::task::spawn_blocking(move || run(&engine, &cli, &cancel)).await?
    };
    engine.disconnect();
    result
}

fn run(engine: &Engine, cli: &Cli, cancel: &CancelToken) -> Result<()> {
    match &cli.command {
        Commands::Ping => {
            let reply = engine.ping(cancel)?;
            println!("{}: {} (source {:?}, flags 0x{:08X})", cli.address, engine.state(), reply.source(), reply.flags);
        }
        Commands::Info => {
            let target = engine.target_info(cancel)?;
            let capabilities = engine.capabilities();
            let device = if engine.state() == ConnectionState::Runtime { Some(engine.device_info(cancel)?) } else { None };
            if cli.json {
                let report = serde_json::json!({
                    "state": engine.state().to_string(),
                    "target": target,
                    "capabilities": capabilities.as_deref(),
                    "device": device,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Target:   {} ({})", target.target, target.platform);
                println!("Firmware: {}", target.info);
                println!("Booter:   {}", target.booter_version);
                println!("CLR:      {}", target.clr_version);
                println!("State:    {}", engine.state());
                if let Some(caps) = capabilities {
                    println!("Capabilities: 0x{:08X}", caps.flags);
                }
                if let Some(device) = device {
                    println!("{} assemblies, {} app domains", device.assemblies.len(), device.app_domains.len());
                }
            }
        }
        Commands::Assemblies => {
            let assemblies = engine.assemblies(cancel)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&assemblies)?);
            } else {
                for assembly in assemblies {
                    println!("{:>3}  {:<48} {}", assembly.index, assembly.name, assembly.version);
                }
            }
        }
        Commands::Read { address, length } => {
            let addr = parse_hex(address)?;
            let read = engine.read_memory(addr, *length, cancel)?;
            print!("{}", hexdump(addr, &read.data));
            if !read.is_complete() {
                warn!("Device returned {} of {} bytes", read.data.len(), read.requested);
            }
        }
        Commands::Write { address, data } => {
            let addr = parse_hex(address)?;
            let bytes = parse_hex_bytes(data)?;
            engine.write_memory(addr, &bytes, cancel)?;
            println!("Wrote {} bytes at 0x{addr:08X}", bytes.len());
        }
        Commands::Erase { address, length } => {
            let addr = parse_hex(address)?;
            engine.erase_memory(addr, *length, cancel)?;
            println!("Erased {length} bytes at 0x{addr:08X}");
        }
        Commands::MemoryMap => {
            let regions = engine.memory_map(cancel)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&regions)?);
            } else {
                for region in regions {
                    let kind = if region.is_ram() { "RAM" } else if region.is_flash() { "FLASH" } else { "?" };
                    println!("0x{:08X}  {:>10}  {kind}", region.address, region.length);
                }
            }
        }
        Commands::Sectors => {
            let sectors = engine.flash_sector_map(cancel)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sectors)?);
            } else {
                for sector in sectors {
                    println!(
                        "0x{:08X}  {:>3} x {:>6}  {:?}",
                        sector.start,
                        sector.num_blocks,
                        sector.bytes_per_block,
                        sector.usage()
                    );
                }
            }
        }
        Commands::Threads => {
            for pid in engine.threads(cancel)? {
                let stack = engine.thread_stack(pid, cancel)?;
                println!("Thread {pid} (status 0x{:X})", stack.status);
                for frame in &stack.frames {
                    let name = engine
                        .resolve_method(frame.method_index, cancel)
                        .map_or_else(|_| format!("0x{:08X}", frame.method_index), |m| m.name);
                    println!("  #{}: {name} +0x{:X}", frame.depth, frame.ip);
                }
            }
        }
        Commands::Pause => {
            let conditions = engine.pause_execution(cancel)?;
            println!("Paused (conditions 0x{:08X})", conditions.0);
        }
        Commands::Resume => {
            let conditions = engine.resume_execution(cancel)?;
            println!("Resumed (conditions 0x{:08X})", conditions.0);
        }
        Commands::Deploy { image, at } => {
            let data = read_image(image)?;
            let address = match at {
                Some(at) => parse_hex(at)?,
                None => {
                    let sectors = engine.flash_sector_map(cancel)?;
                    let (start, length) = deployment_range(&sectors).context("Device reports no deployment sectors")?;
                    if data.len() > length as usize {
                        bail!("Image of {} bytes does not fit the {length}-byte deployment area", data.len());
                    }
                    start
                }
            };
            let progress = |sent: usize, total: usize, status: &str| {
                eprint!("\r{status:<48} {:>3}%", sent * 100 / total.max(1));
            };
            let report = engine.deploy(&DeployImage::new(address, data), &progress, cancel)?;
            eprintln!();
            println!("Deployed {} bytes at 0x{:08X} (crc 0x{:08X})", report.bytes, report.address, report.crc);
        }
        Commands::Reboot { mode } => {
            engine.reboot((*mode).into(), cancel)?;
            println!("Rebooting");
        }
        Commands::Listen { .. } => unreachable!("listen runs on the async runtime"),
    }

    Ok(())
}

/// Print events until interrupted, pinging the device to keep the session alive.
async fn listen(engine: &Arc<Engine>, seconds: Option<u64>, cancel: &CancelToken) -> Result<()> {
    let mut events = engine.subscribe();
    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DeviceEvent::Message(text)) => print!("{text}"),
                Ok(DeviceEvent::Disconnected) => bail!("Device disconnected"),
                Ok(event) => info!("{event:?}"),
                Err(RecvError::Lagged(n)) => warn!("Dropped {n} events"),
                Err(RecvError::Closed) => break,
            },
            _ = tick.tick() => {
                ticks += 1;
                if cancel.is_cancelled() || deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    break;
                }
                if ticks % 5 == 0 {
                    let (engine, cancel) = (Arc::clone(engine), cancel.clone());
                    match tokio::task::spawn_blocking(move || engine.ping(&cancel)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!("Keepalive failed: {e}"),
                        Err(e) => warn!("Keepalive task failed: {e}"),
                    }
                }
            }
        }
    }
    Ok(())
}
