// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Event packets and the per-run input and output views of a module

use crate::error::ModuleError;
use crate::module::ModuleId;
use crate::stream::{ActiveStream, EventType, OutputStream};
use bytes::Bytes;
use std::collections::BTreeMap;

/// A batch of events of one type.
///
/// The payload is opaque to the mainloop. Cloning a packet shares the payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPacket {
    event_type: EventType,
    event_number: usize,
    payload: Bytes,
}

impl EventPacket {
    pub fn new(event_type: EventType, event_number: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            event_type,
            event_number,
            payload: payload.into(),
        }
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn event_number(&self) -> usize {
        self.event_number
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the events of this packet.
    ///
    /// Other holders of the previous payload keep seeing the unmodified events.
    pub fn replace(&mut self, event_number: usize, payload: impl Into<Bytes>) {
        self.event_number = event_number;
        self.payload = payload.into();
    }
}

#[derive(Debug)]
struct Slot {
    packet: EventPacket,
    read_only: bool,
}

/// The inputs visible to a module during one run
#[derive(Debug, Default)]
pub struct EventContainer {
    slots: BTreeMap<ActiveStream, Slot>,
}

impl EventContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, stream: ActiveStream, packet: EventPacket, read_only: bool) {
        self.slots.insert(stream, Slot { packet, read_only });
    }

    /// Packet of the stream `(source, event_type)`, if it carried data this cycle
    pub fn get(&self, source: ModuleId, event_type: &EventType) -> Option<&EventPacket> {
        self.slots
            .get(&ActiveStream::new(source, event_type.clone()))
            .map(|slot| &slot.packet)
    }

    /// Modifiable packet of the stream, `None` for read-only inputs
    pub fn get_mut(&mut self, source: ModuleId, event_type: &EventType) -> Option<&mut EventPacket> {
        self.slots
            .get_mut(&ActiveStream::new(source, event_type.clone()))
            .filter(|slot| !slot.read_only)
            .map(|slot| &mut slot.packet)
    }

    /// First packet of the given type, whatever its source
    pub fn find(&self, event_type: &EventType) -> Option<(&ActiveStream, &EventPacket)> {
        self.iter().find(|(_, packet)| packet.event_type() == event_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActiveStream, &EventPacket)> {
        self.slots.iter().map(|(stream, slot)| (stream, &slot.packet))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of events over all packets
    pub fn event_number(&self) -> usize {
        self.slots.values().map(|slot| slot.packet.event_number).sum()
    }

    /// The modifiable packets after the run, to be published as the module's version
    pub(crate) fn into_writable(self) -> impl Iterator<Item = (ActiveStream, EventPacket)> {
        self.slots
            .into_iter()
            .filter(|(_, slot)| !slot.read_only)
            .map(|(stream, slot)| (stream, slot.packet))
    }
}

/// Collects the packets a module publishes during one run.
///
/// Only declared outputs are accepted, at most one packet per stream and cycle.
#[derive(Debug)]
pub struct OutputCollector<'a> {
    owner: ModuleId,
    declared: &'a [OutputStream],
    packets: BTreeMap<ActiveStream, EventPacket>,
}

impl<'a> OutputCollector<'a> {
    pub fn new(owner: ModuleId, declared: &'a [OutputStream]) -> Self {
        Self {
            owner,
            declared,
            packets: BTreeMap::new(),
        }
    }

    /// Publish a packet on the module's own stream of the packet's type
    pub fn publish(&mut self, packet: EventPacket) -> Result<(), ModuleError> {
        self.publish_as(self.owner, packet)
    }

    /// Publish a packet on a stream declared on behalf of `source`
    pub fn publish_as(&mut self, source: ModuleId, packet: EventPacket) -> Result<(), ModuleError> {
        let stream = ActiveStream::new(source, packet.event_type().clone());
        let declaration = self
            .declared
            .iter()
            .find(|output| output.stream(self.owner) == stream)
            .ok_or_else(|| ModuleError::new(format!("stream {stream} is not a declared output")))?;

        if !declaration.cardinality.admits(packet.event_number()) {
            return Err(ModuleError::new(format!(
                "packet on stream {stream} has {} events, declared {}",
                packet.event_number(),
                declaration.cardinality
            )));
        }
        if self.packets.contains_key(&stream) {
            return Err(ModuleError::new(format!(
                "stream {stream} already published this cycle"
            )));
        }

        self.packets.insert(stream, packet);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub(crate) fn into_packets(self) -> impl Iterator<Item = (ActiveStream, EventPacket)> {
        self.packets.into_iter()
    }
}
