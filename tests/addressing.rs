use bmchain_lib::protocol::{Command, CommandFrame};
use bmchain_lib::simulator::SimulatedChain;
use bmchain_lib::{BmChain, BoardAddress, ChainConfig, Error};

fn addresses(raw: &[u8]) -> Vec<BoardAddress> {
    raw.iter().map(|&a| BoardAddress::raw(a)).collect()
}

type SimChain = BmChain<SimulatedChain, SimulatedChain>;

fn fresh_chain(boards: usize, pool: &[u8]) -> (SimulatedChain, SimChain) {
    let sim = SimulatedChain::new(boards, 11);
    let config = ChainConfig::new(addresses(pool)).without_delays();
    let chain = BmChain::new(sim.clone(), sim.clone(), config).unwrap();
    (sim, chain)
}

fn describe(frames: &[CommandFrame]) -> Vec<(Command, u8)> {
    frames
        .iter()
        .map(|f| (Command::from_code(f.command_code()).unwrap(), f.address().value()))
        .collect()
}

#[test]
fn three_boards_get_pool_addresses_in_chain_order() {
    let (sim, mut chain) = fresh_chain(3, &[0xAD, 0xBC, 0xDE]);

    let assigned = chain.assign_addresses().unwrap();

    assert_eq!(assigned, addresses(&[0xAD, 0xBC, 0xDE]));
    assert_eq!(sim.board_addresses(), addresses(&[0xAD, 0xBC, 0xDE]));
    assert!(sim.addressing_done());
    let done = sim
        .written()
        .iter()
        .filter(|f| f.command_code() == Command::AutoAddrDone.code())
        .count();
    assert_eq!(done, 1);
}

#[test]
fn command_sequence_follows_the_chain() {
    let (sim, mut chain) = fresh_chain(3, &[0xAD, 0xBC, 0xDE]);
    chain.assign_addresses().unwrap();

    assert_eq!(
        describe(&sim.written()),
        vec![
            (Command::SetAddress, 0xFE),
            (Command::Trigger, 0xAD),
            (Command::SetAddress, 0xFE),
            (Command::Trigger, 0xBC),
            (Command::Trigger, 0xAD),
            (Command::SetAddress, 0xFE),
            (Command::Trigger, 0xDE),
            (Command::Trigger, 0xBC),
            (Command::AutoAddrDone, 0xFF),
        ]
    );
    let payloads: Vec<u8> = sim
        .written()
        .iter()
        .filter(|f| f.command_code() == Command::SetAddress.code())
        .map(|f| f.payload()[0])
        .collect();
    assert_eq!(payloads, vec![0xAD, 0xBC, 0xDE]);
    // the controller only gates in the first board
    assert_eq!(sim.gate_log(), vec![true, false]);
}

#[test]
fn only_one_board_answers_default_at_a_time() {
    let (sim, mut chain) = fresh_chain(5, &[0x11, 0x22, 0x33, 0x44, 0x55]);
    chain.assign_addresses().unwrap();
    assert_eq!(sim.max_default_listeners(), 1);
    assert!(!sim.board_addresses().contains(&BoardAddress::DEFAULT));
}

#[test]
fn spare_pool_addresses_stay_unused() {
    let sim = SimulatedChain::new(2, 11);
    let mut config = ChainConfig::new(addresses(&[0x01, 0x02, 0x03])).without_delays();
    config.board_count = 2;
    let mut chain = BmChain::new(sim.clone(), sim.clone(), config).unwrap();
    assert_eq!(chain.assign_addresses().unwrap(), addresses(&[0x01, 0x02]));
}

#[test]
fn silent_middle_board_aborts_addressing() {
    let (sim, mut chain) = fresh_chain(3, &[0xAD, 0xBC, 0xDE]);
    sim.silence_board(1);

    let err = chain.assign_addresses().unwrap_err();

    assert!(matches!(
        err,
        Error::AddressingFailed { board_index: 1, address: 0xBC, .. }
    ));
    assert!(!sim.addressing_done());
    // nothing after the failed confirmation
    let last = *sim.written().last().unwrap();
    assert_eq!(last.command_code(), Command::SetAddress.code());
    // and telemetry stays off until addressing succeeds
    assert!(matches!(
        chain.poll_all(),
        Err(Error::AddressingFailed { board_index: 1, .. })
    ));
}

#[test]
fn rerun_needs_a_power_cycled_chain() {
    let (sim, mut chain) = fresh_chain(2, &[0xAD, 0xBC]);
    sim.truncate_next_reply(5);
    assert!(matches!(
        chain.assign_addresses(),
        Err(Error::AddressingFailed { board_index: 0, .. })
    ));
    // board 0 took its address before the garbled confirmation, so nobody
    // listens on DEFAULT any more
    assert_eq!(sim.board_addresses()[0], BoardAddress::raw(0xAD));
    assert!(chain.assign_addresses().is_err());
    assert!(chain.poll_all().is_err());

    // power cycled boards start over from DEFAULT
    let (sim, mut chain) = fresh_chain(2, &[0xAD, 0xBC]);
    chain.assign_addresses().unwrap();
    assert!(chain.poll_all().unwrap().iter().all(|r| r.voltages.is_some()));
    assert_eq!(sim.board_addresses(), addresses(&[0xAD, 0xBC]));
}

#[test]
fn invalid_pools_are_rejected_up_front() {
    let sim = SimulatedChain::new(2, 11);
    let config = ChainConfig::new(addresses(&[0xAD, 0xAD]));
    assert!(matches!(
        BmChain::new(sim.clone(), sim.clone(), config),
        Err(Error::DuplicateAddress(0xAD))
    ));
    let config = ChainConfig::new(addresses(&[0xFE]));
    assert!(matches!(
        BmChain::new(sim.clone(), sim.clone(), config),
        Err(Error::InvalidAddress(0xFE))
    ));
    let config = ChainConfig::new(Vec::new());
    assert!(matches!(
        BmChain::new(sim.clone(), sim.clone(), config),
        Err(Error::EmptyAddressPool)
    ));
    // nothing reached the boards, they all still answer to DEFAULT
    assert!(sim.written().is_empty());
    assert!(sim.board_addresses().iter().all(|&a| a == BoardAddress::DEFAULT));
}
