use anyhow::{Context, Result};
use bmchain_lib::serialport::SerialTransport;
use bmchain_lib::signal::{NullSignaling, OutputPinSignaling, Signaling};
use bmchain_lib::simulator::SimulatedChain;
use bmchain_lib::transport::Transport;
use bmchain_lib::{BmChain, BoardAddress};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod gpio;
mod settings;

use commandline::{CliArgs, CliCommands};
use settings::Settings;

type Chain = BmChain<Box<dyn Transport>, Box<dyn Signaling>>;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn open_chain(settings: &Settings, assign: bool) -> Result<Chain> {
    let config = settings.chain_config()?;
    let (transport, signal): (Box<dyn Transport>, Box<dyn Signaling>) = if settings.simulate {
        info!("Using a simulated chain of {} boards", config.boards().len());
        let sim = if assign {
            SimulatedChain::new(config.boards().len(), settings.simulation_seed)
        } else {
            SimulatedChain::addressed(config.boards(), settings.simulation_seed)
        };
        (Box::new(sim.clone()), Box::new(sim))
    } else {
        let transport = SerialTransport::new(&settings.device, settings.baud_rate)
            .with_context(|| format!("Cannot open serial port '{}'", settings.device))?;
        let signal: Box<dyn Signaling> = match settings.trigger_gpio {
            Some(trigger) => {
                let trigger = gpio::SysfsPin::export(trigger)?;
                let buzzer = settings.buzzer_gpio.map(gpio::SysfsPin::export).transpose()?;
                Box::new(OutputPinSignaling::new(
                    trigger,
                    buzzer,
                    settings.alert_duration,
                ))
            }
            None => Box::new(NullSignaling),
        };
        (Box::new(transport), signal)
    };
    BmChain::new(transport, signal, config).with_context(|| "Cannot set up board chain")
}

fn targets(chain: &Chain, address: Option<u8>) -> Vec<BoardAddress> {
    match address {
        Some(address) => vec![BoardAddress::raw(address)],
        None => chain.boards(),
    }
}

macro_rules! print_voltages {
    ($chain:expr, $address:expr) => {
        println!(
            "{} voltages: {:?}",
            $address,
            $chain
                .cell_voltages($address)
                .with_context(|| format!("Cannot get cell voltages of board {}", $address))?
                .cells()
        )
    };
}
macro_rules! print_summary {
    ($chain:expr, $address:expr) => {
        println!(
            "{} summary: {:?}",
            $address,
            $chain
                .summary($address)
                .with_context(|| format!("Cannot get summary of board {}", $address))?
        )
    };
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let settings = Settings::resolve(&args)?;
    let assign = args.assign || args.command == CliCommands::AssignAddresses;
    let mut chain = open_chain(&settings, assign)?;

    if assign {
        let addresses = chain
            .assign_addresses()
            .with_context(|| "Cannot assign board addresses")?;
        println!("Assigned addresses: {addresses:02X?}");
    }

    match args.command {
        CliCommands::AssignAddresses => {}
        CliCommands::Snapshot => chain
            .global_snapshot()
            .with_context(|| "Cannot send global snapshot")?,
        CliCommands::Voltages { address } => {
            for address in targets(&chain, address) {
                print_voltages!(chain, address);
            }
        }
        CliCommands::Summary { address } => {
            for address in targets(&chain, address) {
                print_summary!(chain, address);
            }
        }
        CliCommands::BalanceTarget { address, target_mv } => {
            let address = BoardAddress::raw(address);
            let accepted = chain
                .set_balance_target(address, target_mv)
                .with_context(|| format!("Cannot set balance target of board {address}"))?;
            println!("Balance target {target_mv} mV for {address} accepted: {accepted}");
        }
        CliCommands::ResetBalance { address } => {
            let address = BoardAddress::raw(address);
            let accepted = chain
                .reset_balance_target(address)
                .with_context(|| format!("Cannot reset balance target of board {address}"))?;
            println!("Balance reset for {address} accepted: {accepted}");
        }
        CliCommands::All => {
            for reading in chain.poll_all().with_context(|| "Cannot poll boards")? {
                println!("{reading:?}");
            }
        }
        CliCommands::Daemon { interval, format } => daemon::run(chain, interval, format)?,
    }

    Ok(())
}
