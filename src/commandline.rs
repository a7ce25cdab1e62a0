use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Give every board in a fresh chain its bus address, in physical order
    AssignAddresses,
    /// Broadcast a global snapshot latching the system current into all boards
    Snapshot,
    /// Show the 12 cell voltages of one board, or of every configured board
    Voltages {
        /// Board address (e.g. 0xad); all configured boards if omitted
        #[clap(long, short, value_parser = maybe_hex::<u8>)]
        address: Option<u8>,
    },
    /// Show min/max/average cell voltage, temperatures and status of one board, or of every board
    Summary {
        /// Board address (e.g. 0xad); all configured boards if omitted
        #[clap(long, short, value_parser = maybe_hex::<u8>)]
        address: Option<u8>,
    },
    /// Set the voltage above which a board starts bleeding its cells
    BalanceTarget {
        /// Board address, 0xff to broadcast to all boards
        #[clap(long, short, value_parser = maybe_hex::<u8>)]
        address: u8,
        /// Balance target in millivolts
        target_mv: u16,
    },
    /// Stop cell balancing on a board (0xff for all boards)
    ResetBalance {
        #[clap(long, short, value_parser = maybe_hex::<u8>)]
        address: u8,
    },
    /// Read voltages and summary of every configured board once
    All,
    /// Run in daemon mode, polling every board periodically
    Daemon {
        /// Interval between poll cycles (e.g., "55s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "55s")]
        interval: Duration,
        /// Output format of each poll cycle
        #[arg(long, value_enum, default_value_t = OutputFormat::Console)]
        format: OutputFormat,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Console,
    Json,
}

const fn about_text() -> &'static str {
    "battery monitor chain command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// YAML configuration file; command line options take precedence
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port device path (e.g., /dev/serial0 on Linux, COM1 on Windows)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Serial port baud rate
    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Talk to a simulated chain instead of the serial port
    #[arg(long, action)]
    pub simulate: bool,

    /// Comma-separated board addresses in chain order (e.g., 0xad,0xbc,0xde)
    #[arg(long, value_parser = maybe_hex::<u8>, value_delimiter = ',')]
    pub addresses: Vec<u8>,

    /// System current in mA latched into the boards with each snapshot
    #[arg(long)]
    pub system_current: Option<u16>,

    /// Run address assignment before the command
    #[arg(long, action)]
    pub assign: bool,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for a board reply (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// Minimum delay between two commands on the bus (e.g., "1ms", "5ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub delay: Option<Duration>,

    /// Number of retries for failed reads
    #[arg(long)]
    pub retries: Option<u8>,
}
