use crate::protocol::BoardAddress;
use crate::{Error, Result};
use std::collections::HashSet;
use std::time::Duration;

/// Everything the driver needs to know about the chain it talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    /// Address pool, handed out in physical chain order (board 0 nearest the controller).
    pub address_pool: Vec<BoardAddress>,
    /// Number of boards in the chain.
    pub board_count: usize,
    /// System current in mA latched into the boards on every snapshot.
    pub system_current_ma: u16,
    /// How long to wait for a reply.
    pub timeout: Duration,
    /// Pause after each command written.
    pub delay: Duration,
    /// Pause around trigger line transitions.
    pub settle_delay: Duration,
    /// Extra attempts for idempotent reads.
    pub retries: u8,
    /// Sound the alert before each data transaction.
    pub alert: bool,
}

impl ChainConfig {
    pub const DEFAULT_ADDRESSES: [u8; 3] = [0xAD, 0xBC, 0xDE];
    pub const DEFAULT_SYSTEM_CURRENT_MA: u16 = 285;

    /// One board per pool entry, default timings.
    pub fn new(address_pool: Vec<BoardAddress>) -> Self {
        Self {
            board_count: address_pool.len(),
            address_pool,
            ..Self::default()
        }
    }

    /// Addresses of the boards actually present.
    pub fn boards(&self) -> &[BoardAddress] {
        let n = self.board_count.min(self.address_pool.len());
        &self.address_pool[..n]
    }

    pub fn validate(&self) -> Result<()> {
        if self.address_pool.is_empty() || self.board_count == 0 {
            return Err(Error::EmptyAddressPool);
        }
        if self.board_count > self.address_pool.len() {
            return Err(Error::AddressPoolExhausted {
                boards: self.board_count,
                pool: self.address_pool.len(),
            });
        }
        let mut seen = HashSet::new();
        for address in &self.address_pool {
            if address.is_reserved() {
                return Err(Error::InvalidAddress(address.value()));
            }
            if !seen.insert(*address) {
                return Err(Error::DuplicateAddress(address.value()));
            }
        }
        Ok(())
    }

    /// Zero delays and a short timeout, for simulated chains.
    pub fn without_delays(mut self) -> Self {
        self.delay = Duration::ZERO;
        self.settle_delay = Duration::ZERO;
        self.timeout = Duration::from_millis(10);
        self
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        let address_pool: Vec<BoardAddress> = Self::DEFAULT_ADDRESSES
            .iter()
            .map(|&a| BoardAddress::raw(a))
            .collect();
        Self {
            board_count: address_pool.len(),
            address_pool,
            system_current_ma: Self::DEFAULT_SYSTEM_CURRENT_MA,
            timeout: Duration::from_secs(1),
            delay: Duration::from_millis(1),
            settle_delay: Duration::from_millis(10),
            retries: 2,
            alert: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(addresses: &[u8]) -> Vec<BoardAddress> {
        addresses.iter().map(|&a| BoardAddress::raw(a)).collect()
    }

    #[test]
    fn default_pool_is_valid() {
        let config = ChainConfig::default();
        config.validate().unwrap();
        assert_eq!(config.boards(), pool(&[0xAD, 0xBC, 0xDE]).as_slice());
    }

    #[test]
    fn rejects_reserved_addresses() {
        let config = ChainConfig::new(pool(&[0xAD, 0xFE]));
        assert!(matches!(config.validate(), Err(Error::InvalidAddress(0xFE))));
        let config = ChainConfig::new(pool(&[0xFF]));
        assert!(matches!(config.validate(), Err(Error::InvalidAddress(0xFF))));
    }

    #[test]
    fn rejects_duplicates() {
        let config = ChainConfig::new(pool(&[0xAD, 0xBC, 0xAD]));
        assert!(matches!(config.validate(), Err(Error::DuplicateAddress(0xAD))));
    }

    #[test]
    fn rejects_more_boards_than_addresses() {
        let mut config = ChainConfig::new(pool(&[0xAD, 0xBC]));
        config.board_count = 3;
        assert!(matches!(
            config.validate(),
            Err(Error::AddressPoolExhausted { boards: 3, pool: 2 })
        ));
        assert_eq!(config.boards().len(), 2);
    }

    #[test]
    fn rejects_chains_without_boards() {
        let config = ChainConfig::new(Vec::new());
        assert!(matches!(config.validate(), Err(Error::EmptyAddressPool)));
        let mut config = ChainConfig::new(pool(&[0xAD]));
        config.board_count = 0;
        assert!(matches!(config.validate(), Err(Error::EmptyAddressPool)));
    }

    #[test]
    fn board_count_may_leave_spare_addresses() {
        let mut config = ChainConfig::new(pool(&[0x10, 0x20, 0x30, 0x40]));
        config.board_count = 2;
        config.validate().unwrap();
        assert_eq!(config.boards(), pool(&[0x10, 0x20]).as_slice());
    }
}
