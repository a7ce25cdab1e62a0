//! Synthetic board chain answering the way the real firmware does.
//!
//! A [`SimulatedChain`] is a cheap handle on shared state and implements both
//! [`Transport`] and [`Signaling`], so one clone can be the link and another
//! the trigger line of the same [`crate::BmChain`].

use crate::protocol::{
    payload_word, BoardAddress, Command, CommandFrame, ResponseFrame, VoltageGroup,
    BALANCE_STOP_MV,
};
use crate::signal::Signaling;
use crate::telemetry::{encode_voltage_group, SummaryRecord, CELLS_PER_BOARD, CELLS_PER_GROUP};
use crate::transport::Transport;
use crate::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

const CELL_MV_RANGE: std::ops::Range<u16> = 3000..4200;
const TEMPERATURE_RANGE: std::ops::Range<u16> = 200..400;

#[derive(Debug, Clone)]
struct SimBoard {
    address: BoardAddress,
    trigger_out: bool,
    cells: [u16; CELLS_PER_BOARD],
    temperatures: [u16; 2],
    balance_target_mv: u16,
    snapshot_current_ma: Option<u16>,
    silent: bool,
    // readings set by hand, left alone by snapshots
    pinned: bool,
}

#[derive(Debug)]
struct ChainState {
    boards: Vec<SimBoard>,
    gate: bool,
    rx: VecDeque<u8>,
    written: Vec<CommandFrame>,
    gate_log: Vec<bool>,
    alerts: usize,
    corrupt_next: bool,
    truncate_next: Option<usize>,
    addressing_done: bool,
    max_default_listeners: usize,
    rng: StdRng,
}

impl ChainState {
    fn trigger_in(&self, index: usize) -> bool {
        match index {
            0 => self.gate,
            i => self.boards[i - 1].trigger_out,
        }
    }

    fn default_listeners(&self) -> Vec<usize> {
        (0..self.boards.len())
            .filter(|&i| self.boards[i].address == BoardAddress::DEFAULT && self.trigger_in(i))
            .collect()
    }

    fn track_listeners(&mut self) {
        let n = self.default_listeners().len();
        self.max_default_listeners = self.max_default_listeners.max(n);
    }

    fn targets(&self, address: BoardAddress) -> Vec<usize> {
        if address == BoardAddress::DEFAULT {
            return self.default_listeners();
        }
        (0..self.boards.len())
            .filter(|&i| address.is_broadcast() || self.boards[i].address == address)
            .collect()
    }

    fn reply(&mut self, index: usize, payload: &[u8]) {
        let board = &self.boards[index];
        if board.silent {
            log::trace!("Simulated board #{index} stays silent");
            return;
        }
        let mut bytes = ResponseFrame::build(board.address, payload).to_vec();
        if std::mem::take(&mut self.corrupt_next) {
            bytes[5] ^= 0x04;
        }
        if let Some(n) = self.truncate_next.take() {
            bytes.truncate(n);
        }
        self.rx.extend(bytes);
    }

    fn refresh_readings(&mut self) {
        for board in self.boards.iter_mut().filter(|b| !b.pinned) {
            for cell in board.cells.iter_mut() {
                let jitter: i32 = self.rng.gen_range(-5..=5);
                *cell = (i32::from(*cell) + jitter)
                    .clamp(i32::from(CELL_MV_RANGE.start), i32::from(CELL_MV_RANGE.end)) as u16;
            }
            for t in board.temperatures.iter_mut() {
                *t = self.rng.gen_range(TEMPERATURE_RANGE);
            }
        }
    }

    fn summary(&self, index: usize) -> SummaryRecord {
        let board = &self.boards[index];
        let cells = &board.cells;
        let (min_cell, min_voltage) = cells
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(_, v)| v)
            .unwrap_or_default();
        let (max_cell, max_voltage) = cells
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|&(_, v)| v)
            .unwrap_or_default();
        let total: u32 = cells.iter().map(|&v| u32::from(v)).sum();
        SummaryRecord {
            min_voltage,
            min_voltage_cell: min_cell as u8,
            max_voltage,
            max_voltage_cell: max_cell as u8,
            avg_voltage: (total / CELLS_PER_BOARD as u32) as u16,
            temperature1: board.temperatures[0],
            temperature2: board.temperatures[1],
            status: u8::from(board.balance_target_mv < BALANCE_STOP_MV),
        }
    }

    fn handle(&mut self, frame: CommandFrame) {
        self.written.push(frame);
        let Some(command) = Command::from_code(frame.command_code()) else {
            log::debug!("Simulated chain ignores unknown command {frame:?}");
            return;
        };
        let address = frame.address();
        let targets = self.targets(address);
        // Boards never answer a broadcast.
        let replies = !address.is_broadcast();

        match command {
            Command::SetAddress => {
                let new_address = BoardAddress::raw(frame.payload()[0]);
                for i in targets {
                    log::debug!("Simulated board #{i} takes address {new_address}");
                    self.boards[i].address = new_address;
                    if replies {
                        self.reply(i, &[]);
                    }
                }
            }
            Command::Trigger => {
                for i in targets {
                    self.boards[i].trigger_out = !self.boards[i].trigger_out;
                }
            }
            Command::AutoAddrDone => {
                self.addressing_done = true;
                for board in &mut self.boards {
                    board.trigger_out = false;
                }
            }
            Command::GlobalSnapshot => {
                let current = payload_word(frame.payload());
                self.refresh_readings();
                for i in targets {
                    self.boards[i].snapshot_current_ma = Some(current);
                }
            }
            Command::SendSummary => {
                for i in targets.into_iter().filter(|_| replies) {
                    let payload = self.summary(i).encode();
                    self.reply(i, &payload);
                }
            }
            Command::SendAllVoltages1 | Command::SendAllVoltages2 | Command::SendAllVoltages3 => {
                let Some(group) = VoltageGroup::from_command(command) else {
                    return;
                };
                let first = group.first_cell();
                for i in targets.into_iter().filter(|_| replies) {
                    let mut cells = [0; CELLS_PER_GROUP];
                    cells.copy_from_slice(&self.boards[i].cells[first..first + CELLS_PER_GROUP]);
                    self.reply(i, &encode_voltage_group(&cells));
                }
            }
            Command::BalanceTarget => {
                let target = payload_word(frame.payload()).saturating_add(1);
                for i in targets {
                    self.boards[i].balance_target_mv = target;
                    if replies {
                        let payload = frame.payload();
                        self.reply(i, &payload);
                    }
                }
            }
        }
        self.track_listeners();
    }
}

/// Handle on a simulated chain of boards.
#[derive(Debug, Clone)]
pub struct SimulatedChain(Rc<RefCell<ChainState>>);

impl SimulatedChain {
    /// `boards` factory-fresh boards answering only to DEFAULT.
    pub fn new(boards: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let boards = (0..boards)
            .map(|_| {
                let mut cells = [0; CELLS_PER_BOARD];
                for cell in cells.iter_mut() {
                    *cell = rng.gen_range(CELL_MV_RANGE);
                }
                SimBoard {
                    address: BoardAddress::DEFAULT,
                    trigger_out: false,
                    cells,
                    temperatures: [
                        rng.gen_range(TEMPERATURE_RANGE),
                        rng.gen_range(TEMPERATURE_RANGE),
                    ],
                    balance_target_mv: BALANCE_STOP_MV,
                    snapshot_current_ma: None,
                    silent: false,
                    pinned: false,
                }
            })
            .collect();
        Self(Rc::new(RefCell::new(ChainState {
            boards,
            gate: false,
            rx: VecDeque::new(),
            written: Vec::new(),
            gate_log: Vec::new(),
            alerts: 0,
            corrupt_next: false,
            truncate_next: None,
            addressing_done: false,
            max_default_listeners: 0,
            rng,
        })))
    }

    /// Boards that already hold the given addresses, as after a previous run.
    pub fn addressed(addresses: &[BoardAddress], seed: u64) -> Self {
        let chain = Self::new(addresses.len(), seed);
        {
            let mut state = chain.0.borrow_mut();
            for (board, address) in state.boards.iter_mut().zip(addresses) {
                board.address = *address;
            }
            state.addressing_done = true;
        }
        chain
    }

    pub fn board_addresses(&self) -> Vec<BoardAddress> {
        self.0.borrow().boards.iter().map(|b| b.address).collect()
    }

    pub fn addressing_done(&self) -> bool {
        self.0.borrow().addressing_done
    }

    /// Every well-formed command frame the chain has seen, oldest first.
    pub fn written(&self) -> Vec<CommandFrame> {
        self.0.borrow().written.clone()
    }

    pub fn gate_log(&self) -> Vec<bool> {
        self.0.borrow().gate_log.clone()
    }

    pub fn alerts(&self) -> usize {
        self.0.borrow().alerts
    }

    /// Largest number of boards that answered to DEFAULT at the same time.
    pub fn max_default_listeners(&self) -> usize {
        self.0.borrow().max_default_listeners
    }

    pub fn cell_voltages(&self, index: usize) -> [u16; CELLS_PER_BOARD] {
        self.0.borrow().boards[index].cells
    }

    /// Fixes the cell voltages of a board; snapshots no longer change its readings.
    pub fn set_cell_voltages(&self, index: usize, cells: [u16; CELLS_PER_BOARD]) {
        let mut state = self.0.borrow_mut();
        let board = &mut state.boards[index];
        board.cells = cells;
        board.pinned = true;
    }

    /// Fixes the temperatures of a board; snapshots no longer change its readings.
    pub fn set_temperatures(&self, index: usize, temperature1: u16, temperature2: u16) {
        let mut state = self.0.borrow_mut();
        let board = &mut state.boards[index];
        board.temperatures = [temperature1, temperature2];
        board.pinned = true;
    }

    pub fn summary(&self, index: usize) -> SummaryRecord {
        self.0.borrow().summary(index)
    }

    pub fn balance_target(&self, index: usize) -> u16 {
        self.0.borrow().boards[index].balance_target_mv
    }

    pub fn snapshot_current(&self, index: usize) -> Option<u16> {
        self.0.borrow().boards[index].snapshot_current_ma
    }

    /// The board keeps acting on commands but never replies.
    pub fn silence_board(&self, index: usize) {
        self.0.borrow_mut().boards[index].silent = true;
    }

    /// Flips one bit in the next reply.
    pub fn corrupt_next_reply(&self) {
        self.0.borrow_mut().corrupt_next = true;
    }

    /// Cuts the next reply down to `n` bytes.
    pub fn truncate_next_reply(&self, n: usize) {
        self.0.borrow_mut().truncate_next = Some(n);
    }

    /// Puts stray bytes on the line, as electrical noise would.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }
}

impl Transport for SimulatedChain {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        log::trace!("write bytes: {bytes:02X?}");
        match CommandFrame::parse(bytes) {
            Ok(frame) => self.0.borrow_mut().handle(frame),
            Err(err) => log::debug!("Simulated chain drops frame: {err}"),
        }
        Ok(bytes.len())
    }

    fn read_exactly(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>> {
        let mut state = self.0.borrow_mut();
        let n = n.min(state.rx.len());
        let rx_buffer: Vec<u8> = state.rx.drain(..n).collect();
        log::trace!("receive_bytes: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        self.0.borrow_mut().rx.clear();
        Ok(())
    }
}

impl Signaling for SimulatedChain {
    fn set_isolation_gate(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.gate = enabled;
        state.gate_log.push(enabled);
        state.track_listeners();
        Ok(())
    }

    fn sound_alert(&mut self) -> Result<()> {
        self.0.borrow_mut().alerts += 1;
        Ok(())
    }
}
