// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::event::{EventContainer, EventPacket};
use crate::module::ModuleId;
use crate::stream::{ActiveStream, InputStream};
use std::collections::{BTreeMap, BTreeSet};

/// Key of one version of a stream: `None` is the producer's version, `Some(p)` the
/// version after processor `p` modified it
type VersionKey = (ActiveStream, Option<ModuleId>);

/// Packets published during the current cycle
#[derive(Debug, Default)]
pub(crate) struct StreamPool {
    versions: BTreeMap<VersionKey, EventPacket>,
}

impl StreamPool {
    pub(crate) fn clear(&mut self) {
        self.versions.clear();
    }

    /// Assemble the input view of a module from the packets published so far this cycle.
    ///
    /// A tap on a processor that published no version falls back to the producer's version.
    pub(crate) fn gather(&self, inputs: &[InputStream]) -> EventContainer {
        let mut container = EventContainer::new();
        for input in inputs {
            let stream = input.stream();
            let packet = input
                .after
                .and_then(|after| self.versions.get(&(stream.clone(), Some(after))))
                .or_else(|| self.versions.get(&(stream.clone(), None)));
            if let Some(packet) = packet {
                container.insert(stream, packet.clone(), input.read_only);
            }
        }
        container
    }

    /// Store the outputs of a producer, dropping streams nobody consumes
    pub(crate) fn publish(
        &mut self,
        active: &BTreeSet<ActiveStream>,
        packets: impl Iterator<Item = (ActiveStream, EventPacket)>,
    ) {
        for (stream, packet) in packets {
            if active.contains(&stream) {
                self.versions.insert((stream, None), packet);
            }
        }
    }

    /// Store the modified inputs of `processor` as its version of those streams
    pub(crate) fn write_back(&mut self, processor: ModuleId, container: EventContainer) {
        for (stream, packet) in container.into_writable() {
            self.versions.insert((stream, Some(processor)), packet);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.versions.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::EventType;

    #[test]
    fn taps_see_modified_version() {
        let camera = ModuleId::from(1);
        let filter = ModuleId::from(2);
        let stream = ActiveStream::new(camera, EventType::POLARITY);
        let active = BTreeSet::from([stream.clone()]);

        let mut pool = StreamPool::default();
        pool.publish(
            &active,
            [(
                stream.clone(),
                EventPacket::new(EventType::POLARITY, 4, vec![0u8; 32]),
            )]
            .into_iter(),
        );

        let mut view = pool.gather(&[InputStream::new(camera, EventType::POLARITY).writable()]);
        let packet = view
            .get_mut(camera, &EventType::POLARITY)
            .expect("writable input");
        packet.replace(1, vec![0u8; 8]);
        pool.write_back(filter, view);

        let plain = pool.gather(&[InputStream::new(camera, EventType::POLARITY)]);
        let tapped = pool.gather(&[InputStream::new(camera, EventType::POLARITY).after(filter)]);
        let untouched = pool.gather(&[InputStream::new(camera, EventType::POLARITY).after(7)]);

        let events = |c: &EventContainer| {
            c.get(camera, &EventType::POLARITY)
                .map(EventPacket::event_number)
        };
        assert_eq!(events(&plain), Some(4));
        assert_eq!(events(&tapped), Some(1));
        assert_eq!(events(&untouched), Some(4));

        pool.clear();
        assert!(pool.gather(&[InputStream::new(camera, EventType::POLARITY)]).is_empty());
    }

    #[test]
    fn unconsumed_streams_are_dropped() {
        let mut pool = StreamPool::default();
        pool.publish(
            &BTreeSet::new(),
            [(
                ActiveStream::new(ModuleId::from(1), EventType::IMU6),
                EventPacket::new(EventType::IMU6, 1, vec![0u8; 24]),
            )]
            .into_iter(),
        );
        assert_eq!(pool.len(), 0);
    }
}
