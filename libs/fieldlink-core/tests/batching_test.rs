//! Batching properties
//!
//! - Contiguous addresses fit in one request
//! - Gaps and the per-request limit cut requests
//! - Overlapping addresses share registers

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use fieldlink_core::{AddressBatcher, DataType, ReadAddress, RegisterKind};

fn address(channel: u32, start: u16, size: u16) -> ReadAddress {
    ReadAddress {
        channel,
        property: channel,
        kind: RegisterKind::Holding,
        address: start,
        size,
        data_type: if size == 2 {
            DataType::UInt
        } else {
            DataType::UShort
        },
    }
}

#[test]
fn contiguous_run_is_one_request() {
    // Sizes 1,2,1,2,2 laid end to end from 300, shuffled
    let layout = [(300, 1), (301, 2), (303, 1), (304, 2), (306, 2)];
    let mut addresses: Vec<ReadAddress> = layout
        .iter()
        .enumerate()
        .map(|(i, (start, size))| address(i as u32, *start, *size))
        .collect();
    addresses.reverse();
    let total: u16 = layout.iter().map(|(_, size)| size).sum();

    let requests = AddressBatcher::split(addresses, 125);

    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].start, 300);
    assert_eq!(requests[0].quantity, total);
    assert_eq!(requests[0].addresses.len(), layout.len());
}

#[test]
fn gap_splits_requests() {
    let requests = AddressBatcher::split(vec![address(1, 0, 1), address(2, 5, 1)], 2000);

    assert!(requests.len() >= 2);
    assert_eq!((requests[0].start, requests[0].quantity), (0, 1));
    assert_eq!((requests[1].start, requests[1].quantity), (5, 1));
}

#[test]
fn overlap_does_not_double_quantity() {
    let requests = AddressBatcher::split(vec![address(1, 10, 2), address(2, 10, 2)], 2000);

    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].quantity, 2);
    assert_eq!(requests[0].addresses.len(), 2);
}

#[test]
fn large_span_respects_limit() {
    // 1250 two-register values covering 2500 registers
    let addresses: Vec<ReadAddress> = (0..1250u16).map(|i| address(i as u32, i * 2, 2)).collect();

    let requests = AddressBatcher::split(addresses, 2000);

    assert!(requests.len() >= 2);
    assert!(requests.iter().all(|r| r.quantity <= 2000));
    let covered: u32 = requests.iter().map(|r| u32::from(r.quantity)).sum();
    assert_eq!(covered, 2500);
    let members: usize = requests.iter().map(|r| r.addresses.len()).sum();
    assert_eq!(members, 1250);
}

#[test]
fn every_address_lands_inside_its_request() {
    let addresses = vec![
        address(1, 7, 2),
        address(2, 3, 1),
        address(3, 200, 2),
        address(4, 8, 1),
        address(5, 4, 1),
        address(6, 120, 1),
    ];

    let requests = AddressBatcher::split(addresses, 100);

    for request in &requests {
        assert!(request.quantity <= 100);
        for a in &request.addresses {
            assert!(a.address >= request.start);
            assert!(a.end() <= request.end());
        }
    }
    let starts: Vec<u16> = requests.iter().map(|r| r.start).collect();
    assert_eq!(starts, vec![3, 7, 120, 200]);
}
