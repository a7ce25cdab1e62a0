use crate::config::ChainConfig;
use crate::protocol::{
    self, BoardAddress, Command, CommandFrame, ResponseFrame, VoltageGroup, RESPONSE_LENGTH,
};
use crate::signal::Signaling;
use crate::telemetry::{CellVoltageSet, SummaryRecord};
use crate::transport::Transport;
use crate::{Error, Result};
use std::time::{Duration, Instant};

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

/// Telemetry gathered from one board in one poll cycle. A missing field
/// means the reply was lost or corrupted and the previous value still stands.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct BoardReading {
    pub address: BoardAddress,
    pub voltages: Option<CellVoltageSet>,
    pub summary: Option<SummaryRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingState {
    /// Boards are assumed to hold the configured addresses from an earlier run.
    Assumed,
    Assigned,
    Failed { board_index: usize },
}

/// Controller of one chain of battery monitor boards.
///
/// Every exchange is strictly request, wait, read: the link carries no
/// request IDs, so nothing else may use the transport while a call runs.
#[derive(Debug)]
pub struct BmChain<T, S> {
    pub(crate) transport: T,
    pub(crate) signal: S,
    pub(crate) config: ChainConfig,
    pub(crate) addressing: AddressingState,
    last_execution: Instant,
}

impl<T: Transport, S: Signaling> BmChain<T, S> {
    pub fn new(transport: T, signal: S, config: ChainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            signal,
            config,
            addressing: AddressingState::Assumed,
            last_execution: Instant::now(),
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Addresses of the configured boards, in chain order.
    pub fn boards(&self) -> Vec<BoardAddress> {
        self.config.boards().to_vec()
    }

    pub fn set_system_current(&mut self, system_current_ma: u16) {
        self.config.system_current_ma = system_current_ma;
    }

    pub fn into_parts(self) -> (T, S) {
        (self.transport, self.signal)
    }

    pub(crate) fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    fn serial_await_delay(&self) {
        let last_exec_diff = Instant::now().duration_since(self.last_execution);
        if let Some(time_until_delay_reached) = self.config.delay.checked_sub(last_exec_diff) {
            self.pause(time_until_delay_reached);
        }
    }

    pub(crate) fn alert(&mut self) -> Result<()> {
        if self.config.alert {
            self.signal.sound_alert()?;
        }
        Ok(())
    }

    /// Writes a frame for which no reply is expected.
    pub(crate) fn send(&mut self, frame: &CommandFrame) -> Result<()> {
        self.serial_await_delay();
        log::trace!("send: {frame:?}");
        self.transport.write(&frame[..])?;
        self.last_execution = Instant::now();
        Ok(())
    }

    /// Writes a frame and reads the 14-byte reply it asks for.
    pub(crate) fn exchange(&mut self, frame: &CommandFrame) -> Result<ResponseFrame> {
        let address = frame.address();
        let command = frame.command_code();
        // a stale byte from an earlier exchange would shift the whole reply
        self.transport.clear_input_buffer()?;
        self.send(frame)?;
        let rx_buffer = self
            .transport
            .read_exactly(RESPONSE_LENGTH, self.config.timeout)?;
        self.last_execution = Instant::now();

        if rx_buffer.is_empty() {
            log::warn!("Board {address} did not answer command {command:#04x}");
            return Err(Error::AcknowledgmentTimeout {
                address: address.value(),
                command,
            });
        }
        let response = protocol::decode_response(&rx_buffer)
            .map_err(|err| err.in_reply(address.value(), command))
            .inspect_err(|err| log::warn!("{err}"))?;
        if !address.is_reserved() && response.address() != address {
            log::warn!(
                "Board {address} command {command:#04x}: reply from {}",
                response.address()
            );
            return Err(Error::UnexpectedResponder {
                expected: address.value(),
                actual: response.address().value(),
                command,
            });
        }
        Ok(response)
    }

    /// Sends `frame` and reads the reply only when the addressed board will
    /// answer: never for broadcasts or commands boards execute silently.
    pub(crate) fn dispatch(&mut self, frame: &CommandFrame) -> Result<Option<ResponseFrame>> {
        let replies = !frame.address().is_broadcast()
            && Command::from_code(frame.command_code()).is_some_and(Command::expects_reply);
        if replies {
            self.exchange(frame).map(Some)
        } else {
            self.send(frame).map(|()| None)
        }
    }

    // Only for requests the boards can answer any number of times.
    fn exchange_with_retry(&mut self, frame: &CommandFrame) -> Result<ResponseFrame> {
        for t in 0..self.config.retries {
            match self.exchange(frame) {
                Ok(response) => return Ok(response),
                Err(err) if err.is_frame_error() => {
                    log::trace!(
                        "Failed try {} of {}, repeating ({err})",
                        t + 1,
                        self.config.retries
                    );
                }
                Err(err) => return Err(err),
            }
        }
        self.exchange(frame)
    }

    fn ensure_addressed(&self) -> Result<()> {
        if let AddressingState::Failed { board_index } = self.addressing {
            let address = self
                .config
                .boards()
                .get(board_index)
                .map_or(BoardAddress::DEFAULT.value(), |a| a.value());
            return Err(Error::AddressingFailed {
                board_index,
                address,
                reason: "chain addressing did not complete, bus state unknown".to_string(),
            });
        }
        Ok(())
    }

    /// Latches the configured system current into every board so that the
    /// following sequential reads describe the same instant.
    pub fn global_snapshot(&mut self) -> Result<()> {
        self.ensure_addressed()?;
        let frame = protocol::request_global_snapshot(self.config.system_current_ma);
        self.send(&frame)?;
        self.pause(self.config.settle_delay);
        Ok(())
    }

    fn read_cell_voltages(&mut self, address: BoardAddress) -> Result<CellVoltageSet> {
        self.global_snapshot()?;
        let [first, second, third] = VoltageGroup::ALL;
        let frames = [
            self.exchange_with_retry(&protocol::request_voltages(address, first))?,
            self.exchange_with_retry(&protocol::request_voltages(address, second))?,
            self.exchange_with_retry(&protocol::request_voltages(address, third))?,
        ];
        Ok(CellVoltageSet::decode(&frames))
    }

    fn read_summary(&mut self, address: BoardAddress) -> Result<SummaryRecord> {
        self.ensure_addressed()?;
        let frame = protocol::request_summary(address, self.config.system_current_ma);
        Ok(SummaryRecord::decode(&self.exchange_with_retry(&frame)?))
    }

    /// Snapshots the bus, then reads all 12 cell voltages of one board.
    pub fn cell_voltages(&mut self, address: BoardAddress) -> Result<CellVoltageSet> {
        self.alert()?;
        self.read_cell_voltages(address)
    }

    pub fn summary(&mut self, address: BoardAddress) -> Result<SummaryRecord> {
        self.alert()?;
        self.read_summary(address)
    }

    /// Sets the voltage above which the board bleeds its cells.
    ///
    /// A broadcast is always accepted since no board answers it. A targeted
    /// command is accepted when the board answers with a valid frame; a
    /// garbled answer yields `Ok(false)` and silence yields
    /// [`Error::AcknowledgmentTimeout`].
    pub fn set_balance_target(&mut self, address: BoardAddress, target_mv: u16) -> Result<bool> {
        self.ensure_addressed()?;
        self.alert()?;
        log::info!("Sending balance target {target_mv} mV to {address}");
        let frame = protocol::set_balance_target(address, target_mv);
        match self.dispatch(&frame) {
            Ok(_) => Ok(true),
            Err(err @ Error::AcknowledgmentTimeout { .. }) => Err(err),
            Err(err) if err.is_frame_error() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stops balancing on the addressed board(s).
    pub fn reset_balance_target(&mut self, address: BoardAddress) -> Result<bool> {
        self.set_balance_target(address, protocol::BALANCE_STOP_MV)
    }

    /// Reads voltages and summary of one board. Lost or corrupted replies
    /// leave the matching field empty instead of failing the cycle.
    pub fn poll_board(&mut self, address: BoardAddress) -> Result<BoardReading> {
        let voltages = recover(address, "cell voltages", self.read_cell_voltages(address))?;
        let summary = recover(address, "summary", self.read_summary(address))?;
        Ok(BoardReading {
            address,
            voltages,
            summary,
        })
    }

    /// One poll cycle over every configured board, in chain order.
    pub fn poll_all(&mut self) -> Result<Vec<BoardReading>> {
        self.ensure_addressed()?;
        self.alert()?;
        let mut readings = Vec::with_capacity(self.config.boards().len());
        for address in self.boards() {
            log::debug!("Polling board {address}");
            readings.push(self.poll_board(address)?);
        }
        Ok(readings)
    }
}

fn recover<V>(address: BoardAddress, what: &str, result: Result<V>) -> Result<Option<V>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_frame_error() => {
            log::warn!("Skipping {what} of board {address}: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedChain;

    type SimChain = BmChain<SimulatedChain, SimulatedChain>;

    fn addressed_chain(addresses: &[u8]) -> (SimulatedChain, SimChain) {
        let pool: Vec<BoardAddress> = addresses.iter().map(|&a| BoardAddress::raw(a)).collect();
        let sim = SimulatedChain::addressed(&pool, 3);
        let config = ChainConfig::new(pool).without_delays();
        let chain = BmChain::new(sim.clone(), sim.clone(), config).unwrap();
        (sim, chain)
    }

    #[test]
    fn exchange_clears_stale_bytes() {
        let (sim, mut chain) = addressed_chain(&[0x10]);
        sim.inject_noise(&[0x58, 0x00, 0x13]);
        let summary = chain.summary(BoardAddress::raw(0x10)).unwrap();
        assert_eq!(summary, sim.summary(0));
    }

    #[test]
    fn retries_recover_a_corrupted_reply() {
        let (sim, mut chain) = addressed_chain(&[0x10]);
        sim.corrupt_next_reply();
        assert!(chain.summary(BoardAddress::raw(0x10)).is_ok());
        // first attempt plus one retry
        assert_eq!(sim.written().len(), 2);
    }

    #[test]
    fn no_retries_surface_the_frame_error() {
        let (sim, mut chain) = addressed_chain(&[0x10]);
        chain.config.retries = 0;
        sim.truncate_next_reply(9);
        let err = chain.summary(BoardAddress::raw(0x10)).unwrap_err();
        assert!(err.is_frame_error());
        match err {
            Error::BadReply {
                address,
                command,
                source,
            } => {
                assert_eq!((address, command), (0x10, 0x50));
                assert!(matches!(*source, Error::LengthMismatch { expected: 14, actual: 9 }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn snapshot_precedes_voltage_reads() {
        let (sim, mut chain) = addressed_chain(&[0x10, 0x20]);
        chain.set_system_current(1234);
        chain.cell_voltages(BoardAddress::raw(0x20)).unwrap();
        let codes: Vec<u8> = sim.written().iter().map(|f| f.command_code()).collect();
        assert_eq!(codes, vec![0x46, 0xA0, 0xA1, 0xA2]);
        assert_eq!(sim.snapshot_current(0), Some(1234));
        assert_eq!(sim.snapshot_current(1), Some(1234));
    }

    #[test]
    fn alert_sounds_once_per_transaction() {
        let (sim, mut chain) = addressed_chain(&[0x10, 0x20]);
        chain.config.alert = true;
        chain.summary(BoardAddress::raw(0x10)).unwrap();
        chain.poll_all().unwrap();
        assert_eq!(sim.alerts(), 2);
    }

    #[test]
    fn silent_commands_are_not_waited_for() {
        let (sim, mut chain) = addressed_chain(&[0x10, 0x20]);
        let trigger = protocol::trigger(BoardAddress::raw(0x10));
        assert_eq!(chain.dispatch(&trigger).unwrap(), None);
        let broadcast = protocol::set_balance_target(BoardAddress::GLOBAL, 3500);
        assert_eq!(chain.dispatch(&broadcast).unwrap(), None);
        let summary = protocol::request_summary(BoardAddress::raw(0x20), 0);
        let reply = chain.dispatch(&summary).unwrap().unwrap();
        assert_eq!(reply.address(), BoardAddress::raw(0x20));
        assert_eq!(sim.written().len(), 3);
    }

    #[test]
    fn corrupted_reply_names_board_and_command() {
        let (sim, mut chain) = addressed_chain(&[0x10]);
        chain.config.retries = 0;
        sim.corrupt_next_reply();
        let err = chain.summary(BoardAddress::raw(0x10)).unwrap_err();
        assert!(matches!(
            &err,
            Error::BadReply { address: 0x10, command: 0x50, source }
                if matches!(**source, Error::ChecksumMismatch { .. })
        ));
        assert!(err.to_string().contains("0x10"));
    }

    #[test]
    fn failed_addressing_blocks_polling() {
        let (_sim, mut chain) = addressed_chain(&[0x10]);
        chain.addressing = AddressingState::Failed { board_index: 0 };
        assert!(matches!(
            chain.poll_all(),
            Err(Error::AddressingFailed { board_index: 0, address: 0x10, .. })
        ));
    }
}
