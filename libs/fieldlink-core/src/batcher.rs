//! Read request batching
//!
//! Coalesces the read addresses of one device into as few range reads as
//! the protocol allows. Two addresses land in the same request when they
//! touch or overlap and the merged span stays within the per-request limit.

use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::model::{ChannelId, PropertyId};
use crate::types::{DataType, RegisterKind};

/// One property to read: where it lives and how wide it is
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAddress {
    pub channel: ChannelId,
    pub property: PropertyId,
    pub kind: RegisterKind,
    pub address: u16,
    /// Number of registers (or bits) occupied
    pub size: u16,
    /// Device-level data type used to decode the response
    pub data_type: DataType,
}

impl ReadAddress {
    /// First address after this one (exclusive end)
    pub fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.size)
    }
}

/// A contiguous range read covering one or more addresses
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub kind: RegisterKind,
    pub start: u16,
    pub quantity: u16,
    pub addresses: Vec<ReadAddress>,
}

impl ReadRequest {
    /// Exclusive end of the range
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.quantity)
    }

    /// Position of an address inside the response payload
    pub fn offset_of(&self, address: &ReadAddress) -> usize {
        usize::from(address.address.saturating_sub(self.start))
    }
}

/// Stateless batch planner
pub struct AddressBatcher;

impl AddressBatcher {
    /// Split the addresses of a single register space into range reads.
    ///
    /// Addresses are sorted by start address (stable, so equal starts keep
    /// their input order). A chunk is cut when the next address starts past
    /// the chunk's running end, or when including it would make the chunk
    /// span more than `max_addresses_per_request` entries. Overlapping
    /// addresses share registers. An empty input yields no requests.
    pub fn split(addresses: Vec<ReadAddress>, max_addresses_per_request: u16) -> Vec<ReadRequest> {
        let max = u32::from(max_addresses_per_request);
        let mut sorted = addresses;
        sorted.sort_by_key(|a| a.address);

        let mut requests = Vec::new();
        let mut chunk: Vec<ReadAddress> = Vec::new();
        let mut start = 0u32;
        let mut max_available = 0u32;

        for address in sorted {
            let next_available = address.end();

            if !chunk.is_empty() {
                let detached = u32::from(address.address) > max_available;
                let candidate_quantity = max_available.max(next_available) - start;
                if detached || candidate_quantity > max {
                    requests.push(Self::flush(&mut chunk, start, max_available));
                }
            }

            if chunk.is_empty() {
                start = u32::from(address.address);
                max_available = next_available;
            } else {
                max_available = max_available.max(next_available);
            }
            chunk.push(address);
        }

        if !chunk.is_empty() {
            requests.push(Self::flush(&mut chunk, start, max_available));
        }

        requests
    }

    /// Group by register space and split each group with its protocol limit
    pub fn plan(addresses: Vec<ReadAddress>, config: &EngineConfig) -> Vec<ReadRequest> {
        let mut groups: BTreeMap<RegisterKind, Vec<ReadAddress>> = BTreeMap::new();
        for address in addresses {
            groups.entry(address.kind).or_default().push(address);
        }

        groups
            .into_iter()
            .flat_map(|(kind, group)| {
                let limit = if kind.is_bit() {
                    config.max_read_bits
                } else {
                    config.max_read_registers
                };
                Self::split(group, limit)
            })
            .collect()
    }

    fn flush(chunk: &mut Vec<ReadAddress>, start: u32, end: u32) -> ReadRequest {
        let addresses = std::mem::take(chunk);
        // Chunks are never empty here; the fallback only keeps the type total
        let kind = addresses
            .first()
            .map(|a| a.kind)
            .unwrap_or(RegisterKind::Holding);
        ReadRequest {
            kind,
            start: start as u16,
            quantity: u16::try_from(end - start).unwrap_or(u16::MAX),
            addresses,
        }
    }
}
