//! GPIO header tool
//!
//! Command-line access to the Raspberry Pi 40-pin header through the
//! `gpio_header` library.
//!
//! # Usage
//!
//! ```bash
//! # Show the header layout
//! gpio-header pinout
//!
//! # Read pin 7 with the pull-up enabled
//! gpio-header read 7 --pull up
//!
//! # Drive pin 11 high, or pulse it for 250 ms
//! gpio-header write 11 1
//! gpio-header pulse 11 --width-ms 250
//!
//! # Print edges on pins 7 and 13 until Ctrl-C
//! gpio-header watch 7 13 --edge rising --poll-ms 20
//!
//! # Bring up a board from a configuration file
//! gpio-header run --config board.toml
//!
//! # Any command against the in-memory simulator
//! gpio-header --simulate watch 7 --duration-secs 2
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use gpio_header::config::Backend;
use gpio_header::pin::bit_level;
use gpio_header::{
    header, runtime, BoardConfig, EdgeFilter, Gpio, GpioSettings, Pull, WatchOptions,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// GPIO header tool
///
/// Pin ownership, peripheral claims and edge watching for the 40-pin header
#[derive(Parser)]
#[command(name = "gpio-header")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Raspberry Pi 40-pin header GPIO tool")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the in-memory simulator instead of hardware registers
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header layout
    Pinout,

    /// Read the level of an input pin
    Read {
        /// Header pin (1-40)
        pin: u8,

        /// Pull resistor
        #[arg(short, long, value_enum, default_value = "off")]
        pull: PullArg,
    },

    /// Drive an output pin
    Write {
        /// Header pin (1-40)
        pin: u8,

        /// Level to write (0 or 1)
        bit: u8,
    },

    /// Drive an output pin high for a while, then low
    Pulse {
        /// Header pin (1-40)
        pin: u8,

        /// Pulse width in milliseconds
        #[arg(short, long, default_value = "100")]
        width_ms: u64,
    },

    /// Print edges on input pins
    Watch {
        /// Header pins (1-40)
        #[arg(required = true)]
        pins: Vec<u8>,

        /// Pull resistor
        #[arg(short, long, value_enum, default_value = "off")]
        pull: PullArg,

        /// Edges to report
        #[arg(short, long, value_enum, default_value = "both")]
        edge: EdgeArg,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "100")]
        poll_ms: u64,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration_secs: Option<u64>,
    },

    /// Configure a board from a TOML file and watch its inputs
    Run {
        /// Board configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration_secs: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PullArg {
    Off,
    Up,
    Down,
}

impl From<PullArg> for Pull {
    fn from(arg: PullArg) -> Self {
        match arg {
            PullArg::Off => Pull::Off,
            PullArg::Up => Pull::Up,
            PullArg::Down => Pull::Down,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum EdgeArg {
    Rising,
    Falling,
    Both,
}

impl From<EdgeArg> for EdgeFilter {
    fn from(arg: EdgeArg) -> Self {
        match arg {
            EdgeArg::Rising => EdgeFilter::Rising,
            EdgeArg::Falling => EdgeFilter::Falling,
            EdgeArg::Both => EdgeFilter::Both,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Pinout => {
            print_pinout();
            Ok(())
        }
        Commands::Read { pin, pull } => handle_read(cli.simulate, pin, pull.into()),
        Commands::Write { pin, bit } => handle_write(cli.simulate, pin, bit),
        Commands::Pulse { pin, width_ms } => handle_pulse(cli.simulate, pin, width_ms),
        Commands::Watch {
            pins,
            pull,
            edge,
            poll_ms,
            duration_secs,
        } => {
            let options = WatchOptions::default()
                .with_edge(edge.into())
                .with_poll_interval(Duration::from_millis(poll_ms));
            handle_watch(cli.simulate, &pins, pull.into(), options, duration_secs)
        }
        Commands::Run {
            config,
            duration_secs,
        } => handle_run(cli.simulate, &config, duration_secs),
    }
}

/// Context over hardware registers, or the simulator with `--simulate`
fn open_context(simulate: bool) -> Result<Gpio> {
    let mut config = BoardConfig::default();
    if simulate {
        config.driver.backend = Backend::Sim;
    }
    let driver = config.driver().context("Failed to create register driver")?;
    Ok(Gpio::new(driver, GpioSettings::default()))
}

fn print_pinout() {
    println!("{}", "=".repeat(50));
    println!("{}", "Raspberry Pi 40-pin Header".cyan().bold());
    println!("{}", "=".repeat(50));

    for row in 0..header::HEADER_PINS / 2 {
        let left = row * 2 + 1;
        let right = left + 1;
        println!("  {:>12} {:>2} | {:<2} {}", label(left), left, right, label(right));
    }

    println!("\n{}", "Groups:".white().bold());
    for group in header::pinout() {
        let pins: Vec<String> = group.pins.iter().map(|p| p.to_string()).collect();
        println!("  {:<18} {}", group.name.cyan(), pins.join(", "));
    }
    println!("\n{}", "=".repeat(50));
}

fn label(pin: u8) -> String {
    match header::resolve(pin) {
        Ok(p) => format!("GPIO{}", p.bcm),
        Err(_) => header::pinout()
            .into_iter()
            .find(|g| g.pins.contains(&pin))
            .map(|g| g.name.to_string())
            .unwrap_or_default(),
    }
}

fn handle_read(simulate: bool, pin: u8, pull: Pull) -> Result<()> {
    let gpio = open_context(simulate)?;
    let input = gpio
        .acquire_input(pin, pull)
        .with_context(|| format!("Failed to acquire pin {} as input", pin))?;
    let level = input.read()?;
    println!(
        "{} Pin {} (GPIO{}) is {}",
        "[OK]".green().bold(),
        pin,
        input.bcm(),
        level_str(level)
    );
    Ok(())
}

fn handle_write(simulate: bool, pin: u8, bit: u8) -> Result<()> {
    let level = bit_level(bit)?;
    let gpio = open_context(simulate)?;
    let output = gpio
        .acquire_output(pin, level)
        .with_context(|| format!("Failed to acquire pin {} as output", pin))?;
    println!(
        "{} Pin {} (GPIO{}) set {}",
        "[OK]".green().bold(),
        pin,
        output.bcm(),
        level_str(output.state()?)
    );
    Ok(())
}

fn handle_pulse(simulate: bool, pin: u8, width_ms: u64) -> Result<()> {
    let gpio = open_context(simulate)?;
    let output = gpio
        .acquire_output(pin, false)
        .with_context(|| format!("Failed to acquire pin {} as output", pin))?;
    let width = Duration::from_millis(width_ms);

    println!(
        "{} Pulsing pin {} for {} ms",
        "[*]".cyan().bold(),
        pin,
        width_ms
    );
    output.pulse(width)?;
    block_on(runtime::run_until(&gpio, async move {
        tokio::time::sleep(width).await
    }))??;
    println!("{} Pin {} is {}", "[OK]".green().bold(), pin, level_str(output.state()?));
    Ok(())
}

fn handle_watch(
    simulate: bool,
    pins: &[u8],
    pull: Pull,
    options: WatchOptions,
    duration_secs: Option<u64>,
) -> Result<()> {
    let gpio = open_context(simulate)?;
    let group = gpio
        .acquire_inputs(pins, pull)
        .context("Failed to acquire input pins")?;

    println!(
        "{} Watching pins {:?} for {} edges every {:?} (Ctrl-C to stop)",
        "[*]".cyan().bold(),
        pins,
        options.edge,
        options.poll_interval
    );
    let watches = group.watch_all(print_edge, options)?;
    block_on(runtime::run_until(&gpio, shutdown_signal(duration_secs)))??;

    watches.unwatch();
    group.close_all()?;
    println!("{} Stopped watching", "[OK]".green().bold());
    Ok(())
}

fn handle_run(simulate: bool, path: &Path, duration_secs: Option<u64>) -> Result<()> {
    let mut config = BoardConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if simulate {
        config.driver.backend = Backend::Sim;
    }

    let gpio = config.build().context("Failed to create register driver")?;
    let board = config.apply(&gpio).context("Failed to configure board")?;

    for claim in &board.peripherals {
        println!(
            "{} {} on pins {:?}",
            "[OK]".green().bold(),
            claim.peripheral(),
            claim.pins()
        );
    }
    for input in &board.inputs {
        println!(
            "{} Input  pin {:>2} (GPIO{}) pull {}",
            "[OK]".green().bold(),
            input.pin(),
            input.bcm(),
            input.pull()
        );
    }
    for output in &board.outputs {
        println!(
            "{} Output pin {:>2} (GPIO{}) {}",
            "[OK]".green().bold(),
            output.pin(),
            output.bcm(),
            level_str(output.state()?)
        );
    }
    if let Some(mode) = gpio.access_mode() {
        println!("{} Register access: {}", "[*]".cyan().bold(), mode);
    }

    let watches = gpio.watch_all(print_edge, gpio.settings().watch_options())?;
    if !watches.is_empty() {
        println!(
            "{} Watching {} input(s) (Ctrl-C to stop)",
            "[*]".cyan().bold(),
            watches.len()
        );
    }
    block_on(runtime::run_until(&gpio, shutdown_signal(duration_secs)))??;

    watches.unwatch();
    gpio.close();
    println!("{} Board released", "[OK]".green().bold());
    Ok(())
}

fn print_edge(level: bool, pin: u8) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let edge = if level {
        "rising ".green()
    } else {
        "falling".yellow()
    };
    println!("{} pin {:>2} {} -> {}", timestamp.to_string().dimmed(), pin, edge, level_str(level));
}

fn level_str(level: bool) -> colored::ColoredString {
    if level {
        "HIGH".green().bold()
    } else {
        "LOW".white().bold()
    }
}

/// Resolves on Ctrl-C, or after `duration_secs` if given
async fn shutdown_signal(duration_secs: Option<u64>) {
    let timeout = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = timeout => {}
    }
}

/// Run `future` on a current-thread runtime; the GPIO context is not `Send`
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    Ok(rt.block_on(future))
}
