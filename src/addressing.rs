//! Daisy-chain address assignment.
//!
//! Fresh boards all answer to the DEFAULT address, so they are enabled one at
//! a time: the controller gates in board 0, and each addressed board then
//! gates in its successor while its predecessor stops cascading. At most one
//! board answers to DEFAULT at any moment.

use crate::bus::{AddressingState, BmChain};
use crate::protocol::{self, BoardAddress};
use crate::signal::Signaling;
use crate::transport::Transport;
use crate::{Error, Result};

fn failed(board_index: usize, address: BoardAddress, reason: impl ToString) -> Error {
    Error::AddressingFailed {
        board_index,
        address: address.value(),
        reason: reason.to_string(),
    }
}

impl<T: Transport, S: Signaling> BmChain<T, S> {
    /// Gives every configured board its address from the pool, in chain order,
    /// then tells the boards addressing is over.
    ///
    /// Each board must confirm its new address. The first board that does not
    /// aborts the sequence with [`Error::AddressingFailed`], the controller
    /// gate is released and polling is refused until addressing succeeds.
    pub fn assign_addresses(&mut self) -> Result<Vec<BoardAddress>> {
        let boards = self.boards();
        self.alert()?;
        log::info!("Assigning addresses to {} boards", boards.len());

        match self.run_addressing(&boards) {
            Ok(()) => {
                self.addressing = AddressingState::Assigned;
                log::info!("Addresses assigned to boards: {boards:02X?}");
                Ok(boards)
            }
            Err(err) => {
                if let Error::AddressingFailed { board_index, .. } = err {
                    self.addressing = AddressingState::Failed { board_index };
                }
                if let Err(gate_err) = self.signal.set_isolation_gate(false) {
                    log::warn!("Cannot release trigger line after failed addressing: {gate_err}");
                }
                log::error!("{err}");
                Err(err)
            }
        }
    }

    fn run_addressing(&mut self, boards: &[BoardAddress]) -> Result<()> {
        let first = boards.first().copied().unwrap_or(BoardAddress::DEFAULT);
        self.transport
            .clear_input_buffer()
            .map_err(|e| failed(0, first, e))?;

        for (index, &address) in boards.iter().enumerate() {
            if index == 0 {
                self.signal
                    .set_isolation_gate(true)
                    .map_err(|e| failed(index, address, e))?;
                self.pause(self.config.settle_delay);

                self.confirm_address(index, address)?;
                self.send(&protocol::trigger(address))
                    .map_err(|e| failed(index, address, e))?;

                self.signal
                    .set_isolation_gate(false)
                    .map_err(|e| failed(index, address, e))?;
                self.pause(self.config.settle_delay);
            } else {
                self.confirm_address(index, address)?;
                // this board gates in the next one ...
                self.send(&protocol::trigger(address))
                    .map_err(|e| failed(index, address, e))?;
                // ... and the previous one stops gating in this one
                self.send(&protocol::trigger(boards[index - 1]))
                    .map_err(|e| failed(index, address, e))?;
            }
        }

        let last = boards.len().saturating_sub(1);
        let last_address = boards.last().copied().unwrap_or(BoardAddress::DEFAULT);
        self.send(&protocol::autoaddr_done())
            .map_err(|e| failed(last, last_address, e))?;
        self.pause(self.config.settle_delay);
        Ok(())
    }

    fn confirm_address(&mut self, index: usize, address: BoardAddress) -> Result<()> {
        log::debug!("Sending address {address} to board #{index}");
        match self.exchange(&protocol::set_address(address)) {
            Ok(response) if response.address() == address => {
                log::debug!("Board #{index} confirmed address {address}");
                Ok(())
            }
            Ok(response) => Err(failed(
                index,
                address,
                format!("confirmation came from {}", response.address()),
            )),
            Err(err) => Err(failed(index, address, err)),
        }
    }
}
