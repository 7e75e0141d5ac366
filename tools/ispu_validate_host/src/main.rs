use std::{fs, io::Read, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use ispu_validate_host::{logging::Logger, offline};

#[derive(Debug, Parser)]
#[command(name = "ispu-validate-host")]
#[command(about = "Host tooling for the ISPU validation protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compile UCF text into the packed upload payload.
    UcfPack(UcfPackArgs),
    /// Summarize a UCF text or packed payload.
    UcfInspect(UcfInspectArgs),
    /// Split a recorded front-end stream into commands.
    ParseCommands(ParseCommandsArgs),
    /// Answer a front-end command stream against a sensor on Linux I2C.
    #[cfg(feature = "linux")]
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct UcfPackArgs {
    input: PathBuf,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct UcfInspectArgs {
    input: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ParseCommandsArgs {
    /// Defaults to stdin.
    input: Option<PathBuf>,
}

#[cfg(feature = "linux")]
#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, default_value = "/dev/i2c-1")]
    i2c: PathBuf,
    /// sysfs GPIO number wired to INT1.
    #[arg(long)]
    int1: u64,
    /// sysfs GPIO number wired to INT2.
    #[arg(long)]
    int2: u64,
    /// Recorded front-end stream to replay; defaults to stdin.
    #[arg(long)]
    input: Option<PathBuf>,
}

#[cfg(feature = "linux")]
fn input_pin(number: u64) -> Result<linux_embedded_hal::SysfsPin> {
    use linux_embedded_hal::{sysfs_gpio::Direction, SysfsPin};

    let pin = SysfsPin::new(number);
    pin.export()
        .with_context(|| format!("exporting gpio {number}"))?;
    pin.set_direction(Direction::In)
        .with_context(|| format!("configuring gpio {number} as input"))?;
    Ok(pin)
}

#[cfg(feature = "linux")]
fn serve(args: ServeArgs, logger: &mut Logger) -> Result<()> {
    use ispu_validate_host::session::{HostSession, StdClock};
    use linux_embedded_hal::{Delay, I2cdev};

    let i2c =
        I2cdev::new(&args.i2c).with_context(|| format!("opening {}", args.i2c.display()))?;
    let mut session = HostSession::new(
        i2c,
        input_pin(args.int1)?,
        input_pin(args.int2)?,
        Delay,
        StdClock::default(),
    );
    session.identify()?;
    // stdout carries the protocol replies, so progress goes to the JSON log only
    logger.event(
        "info",
        "serve: sensor ready",
        json!({ "i2c": args.i2c.display().to_string() }),
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let served = match &args.input {
        Some(path) => {
            let file =
                fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
            session.serve(file, &mut out)?
        }
        None => session.serve(std::io::stdin().lock(), &mut out)?,
    };
    logger.event("info", "serve: stream ended", json!({ "commands": served }));
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut logger = Logger::from_env()?;

    match cli.command {
        Commands::UcfPack(args) => {
            let output = args
                .output
                .unwrap_or_else(|| args.input.with_extension("bin"));
            let summary = offline::pack_ucf_file(&args.input, &output)?;
            logger.event(
                "info",
                "ucf: packed",
                json!({ "output": output.display().to_string(), "summary": summary }),
            );
            logger.info(format!(
                "ucf: packed writes={} waits={} bytes={} output={}",
                summary.writes,
                summary.waits,
                summary.packed_bytes,
                output.display()
            ));
        }
        Commands::UcfInspect(args) => {
            let inspection = offline::inspect_ucf_file(&args.input)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&inspection)?);
            } else {
                let summary = &inspection.summary;
                logger.info(format!(
                    "ucf: writes={} waits={} wait_ms={} ispu_mem_bytes={} packed_bytes={}",
                    summary.writes,
                    summary.waits,
                    summary.wait_ms,
                    summary.ispu_mem_bytes,
                    summary.packed_bytes
                ));
            }
        }
        Commands::ParseCommands(args) => {
            let bytes = match &args.input {
                Some(path) => {
                    fs::read(path).with_context(|| format!("reading {}", path.display()))?
                }
                None => {
                    let mut bytes = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut bytes)
                        .context("reading stdin")?;
                    bytes
                }
            };
            let scanned = offline::scan_commands(&bytes);
            for entry in &scanned {
                if entry.command.expects_payload() {
                    logger.info(format!(
                        "{:?} payload={}",
                        entry.command, entry.payload_len
                    ));
                } else {
                    logger.info(format!("{:?}", entry.command));
                }
            }
            logger.event("info", "commands: scanned", json!({ "count": scanned.len() }));
        }
        #[cfg(feature = "linux")]
        Commands::Serve(args) => serve(args, &mut logger)?,
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
