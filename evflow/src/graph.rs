// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Dependency resolution over stream contracts

use crate::error::Error;
use crate::module::{ModuleId, ModuleKind};
use crate::registry::ModuleRegistry;
use crate::stream::{ActiveStream, EventType, StreamContract};
use evflow_log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// Topologically sorted module ids.
///
/// Every producer precedes its consumers; modules without relative dependency are ordered
/// by ascending id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder(Vec<ModuleId>);

impl ExecutionOrder {
    pub fn as_slice(&self) -> &[ModuleId] {
        &self.0
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = ModuleId> + '_ {
        self.0.iter().copied()
    }

    pub fn position(&self, id: ModuleId) -> Option<usize> {
        self.0.iter().position(|m| *m == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ExecutionOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (index, id) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str("]")
    }
}

/// The resolved dataflow graph
#[derive(Debug, Clone, Default)]
pub struct Graph {
    order: ExecutionOrder,
    streams: BTreeSet<ActiveStream>,
    producers: BTreeMap<ActiveStream, ModuleId>,
    upstream: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
    downstream: BTreeMap<ModuleId, BTreeSet<ModuleId>>,
}

impl Graph {
    pub fn order(&self) -> &ExecutionOrder {
        &self.order
    }

    /// Streams consumed by at least one module. Produced but unconsumed streams are pruned.
    pub fn streams(&self) -> &BTreeSet<ActiveStream> {
        &self.streams
    }

    pub fn stream_exists(&self, source: ModuleId, event_type: &EventType) -> bool {
        self.streams
            .contains(&ActiveStream::new(source, event_type.clone()))
    }

    /// Producer of an active stream
    pub fn producer(&self, stream: &ActiveStream) -> Option<ModuleId> {
        self.producers.get(stream).copied()
    }

    /// Modules `id` directly depends on
    pub fn input_deps(&self, id: ModuleId) -> Vec<ModuleId> {
        self.upstream
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Modules directly depending on `id`
    pub fn output_rev_deps(&self, id: ModuleId) -> Vec<ModuleId> {
        self.downstream
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn add_edge(&mut self, from: ModuleId, to: ModuleId) {
        self.upstream.entry(to).or_default().insert(from);
        self.downstream.entry(from).or_default().insert(to);
    }

    pub(crate) fn downstream(&self) -> &BTreeMap<ModuleId, BTreeSet<ModuleId>> {
        &self.downstream
    }
}

/// Build the graph of all registered modules
pub fn build_graph(registry: &ModuleRegistry) -> Result<Graph, Error> {
    resolve(
        registry
            .iter()
            .map(|record| (record.id(), record.kind(), record.contract())),
    )
}

/// Resolve the dependency graph of the given modules.
///
/// Fails with the first violation found, checking modules by ascending id: ambiguous
/// producers, then per consumer dangling inputs, cardinality mismatches and invalid taps,
/// finally cycles.
pub fn resolve<'a, I>(modules: I) -> Result<Graph, Error>
where
    I: IntoIterator<Item = (ModuleId, ModuleKind, &'a StreamContract)>,
{
    let mut modules: Vec<_> = modules.into_iter().collect();
    modules.sort_by_key(|(id, _, _)| *id);
    let kinds: BTreeMap<ModuleId, ModuleKind> =
        modules.iter().map(|(id, kind, _)| (*id, *kind)).collect();

    // Each stream has exactly one producer
    let mut declared = BTreeMap::new();
    for (id, _, contract) in &modules {
        for output in &contract.outputs {
            let stream = output.stream(*id);
            if let Some((first, _)) = declared.get(&stream) {
                return Err(Error::AmbiguousSource {
                    stream,
                    producers: (*first, *id),
                });
            }
            declared.insert(stream, (*id, output.cardinality));
        }
    }

    let mut graph = Graph::default();

    for (id, _, contract) in &modules {
        for input in &contract.inputs {
            let stream = input.stream();
            let Some((producer, cardinality)) = declared.get(&stream) else {
                return Err(Error::DanglingInput {
                    module: *id,
                    stream,
                });
            };
            if !input.cardinality.accepts(*cardinality) {
                return Err(Error::TypeMismatch {
                    module: *id,
                    stream,
                    expected: input.cardinality,
                    declared: *cardinality,
                });
            }

            if let Some(after) = input.after {
                if !modifies(&modules, &kinds, after, &stream) {
                    return Err(Error::InvalidTap {
                        module: *id,
                        stream,
                        after,
                    });
                }
                graph.add_edge(after, *id);
            }

            graph.add_edge(*producer, *id);
            graph.producers.insert(stream.clone(), *producer);
            graph.streams.insert(stream);
        }
    }

    graph.order = sort(&kinds, &graph.upstream, &graph.downstream)?;
    debug!("Resolved execution order {}", graph.order);
    Ok(graph)
}

/// Whether `processor` is a processor consuming `stream` as modifiable input
fn modifies(
    modules: &[(ModuleId, ModuleKind, &StreamContract)],
    kinds: &BTreeMap<ModuleId, ModuleKind>,
    processor: ModuleId,
    stream: &ActiveStream,
) -> bool {
    if kinds.get(&processor) != Some(&ModuleKind::Processor) {
        return false;
    }
    modules
        .iter()
        .filter(|(id, _, _)| *id == processor)
        .flat_map(|(_, _, contract)| contract.inputs.iter())
        .any(|input| !input.read_only && input.stream() == *stream)
}

/// Kahn's algorithm, taking the smallest ready id first
fn sort(
    kinds: &BTreeMap<ModuleId, ModuleKind>,
    upstream: &BTreeMap<ModuleId, BTreeSet<ModuleId>>,
    downstream: &BTreeMap<ModuleId, BTreeSet<ModuleId>>,
) -> Result<ExecutionOrder, Error> {
    let mut pending: BTreeMap<ModuleId, usize> = kinds
        .keys()
        .map(|id| (*id, upstream.get(id).map_or(0, BTreeSet::len)))
        .collect();
    let mut ready: BTreeSet<ModuleId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(kinds.len());

    while let Some(id) = ready.pop_first() {
        pending.remove(&id);
        order.push(id);
        for consumer in downstream.get(&id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(consumer) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*consumer);
                }
            }
        }
    }

    if !pending.is_empty() {
        return Err(Error::Cycle(pending.into_keys().collect()));
    }
    Ok(ExecutionOrder(order))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::{Cardinality, InputStream, OutputStream};

    const FILTERED: EventType = EventType::from_static("filtered");

    fn id(value: u16) -> ModuleId {
        ModuleId::from(value)
    }

    fn ids(order: &ExecutionOrder) -> Vec<u16> {
        order.iter().map(ModuleId::get).collect()
    }

    fn resolve_all(modules: &[(u16, ModuleKind, StreamContract)]) -> Result<Graph, Error> {
        resolve(modules.iter().map(|(i, k, c)| (id(*i), *k, c)))
    }

    fn input(produces: EventType) -> StreamContract {
        StreamContract::new().output(OutputStream::new(produces))
    }

    fn processor(source: u16, consumes: EventType, produces: EventType) -> StreamContract {
        StreamContract::new()
            .input(InputStream::new(source, consumes))
            .output(OutputStream::new(produces))
    }

    fn output(source: u16, consumes: EventType) -> StreamContract {
        StreamContract::new().input(InputStream::new(source, consumes))
    }

    #[test]
    fn linear_pipeline() {
        let graph = resolve_all(&[
            (3, ModuleKind::Output, output(2, FILTERED)),
            (1, ModuleKind::Input, input(EventType::POLARITY)),
            (2, ModuleKind::Processor, processor(1, EventType::POLARITY, FILTERED)),
        ])
        .expect("valid graph");

        assert_eq!(ids(graph.order()), vec![1, 2, 3]);
        assert!(graph.stream_exists(id(1), &EventType::POLARITY));
        assert!(graph.stream_exists(id(2), &FILTERED));
        assert_eq!(graph.input_deps(id(2)), vec![id(1)]);
        assert_eq!(graph.output_rev_deps(id(2)), vec![id(3)]);
        assert!(graph.output_rev_deps(id(3)).is_empty());
    }

    #[test]
    fn producers_precede_consumers_with_ascending_tie_break() {
        // 9 produces for 2, so 9 runs first although its id is larger
        let modules = [
            (9, ModuleKind::Input, input(EventType::FRAME)),
            (4, ModuleKind::Input, input(EventType::POLARITY)),
            (2, ModuleKind::Processor, processor(9, EventType::FRAME, FILTERED)),
            (
                5,
                ModuleKind::Output,
                output(2, FILTERED).input(InputStream::new(4, EventType::POLARITY)),
            ),
            (7, ModuleKind::Output, output(4, EventType::POLARITY)),
        ];
        let graph = resolve_all(&modules).expect("valid graph");
        assert_eq!(ids(graph.order()), vec![4, 7, 9, 2, 5]);

        for (consumer, _, contract) in &modules {
            let consumer = graph.order().position(id(*consumer));
            for input in &contract.inputs {
                assert!(graph.order().position(input.source) < consumer);
            }
        }

        // Identical input yields an identical order
        for _ in 0..10 {
            let again = resolve_all(&modules).expect("valid graph");
            assert_eq!(again.order(), graph.order());
        }
    }

    #[test]
    fn dangling_input() {
        let result = resolve_all(&[(
            2,
            ModuleKind::Processor,
            processor(5, EventType::FRAME, FILTERED),
        )]);
        match result {
            Err(Error::DanglingInput { module, stream }) => {
                assert_eq!(module, id(2));
                assert_eq!(stream, ActiveStream::new(id(5), EventType::FRAME));
            }
            other => panic!("expected dangling input, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_source() {
        let imu = EventType::from_static("imu");
        let result = resolve_all(&[
            (7, ModuleKind::Input, input(imu.clone())),
            (
                8,
                ModuleKind::Input,
                StreamContract::new().output(OutputStream::new(imu.clone()).on_behalf_of(7)),
            ),
        ]);
        match result {
            Err(Error::AmbiguousSource { stream, producers }) => {
                assert_eq!(stream, ActiveStream::new(id(7), imu));
                assert_eq!(producers, (id(7), id(8)));
            }
            other => panic!("expected ambiguous source, got {other:?}"),
        }
    }

    #[test]
    fn type_mismatch() {
        let result = resolve_all(&[
            (
                1,
                ModuleKind::Input,
                StreamContract::new().output(OutputStream::new(EventType::IMU6).exactly(4)),
            ),
            (
                2,
                ModuleKind::Output,
                StreamContract::new().input(InputStream::new(1, EventType::IMU6).exactly(1)),
            ),
        ]);
        assert!(matches!(
            result,
            Err(Error::TypeMismatch {
                expected: Cardinality::Exactly(1),
                declared: Cardinality::Exactly(4),
                ..
            })
        ));
    }

    #[test]
    fn cycle() {
        let a = EventType::from_static("a");
        let b = EventType::from_static("b");
        let result = resolve_all(&[
            (1, ModuleKind::Input, input(EventType::POLARITY)),
            (
                2,
                ModuleKind::Processor,
                processor(3, b.clone(), a.clone()).input(InputStream::new(1, EventType::POLARITY)),
            ),
            (3, ModuleKind::Processor, processor(2, a, b)),
        ]);
        assert!(matches!(result, Err(Error::Cycle(ref m)) if *m == vec![id(2), id(3)]));

        let own = resolve_all(&[(
            4,
            ModuleKind::Processor,
            processor(4, FILTERED, FILTERED),
        )]);
        assert!(matches!(own, Err(Error::Cycle(ref m)) if *m == vec![id(4)]));
    }

    #[test]
    fn taps_order_after_modifying_processor() {
        let modules = [
            (1, ModuleKind::Input, input(EventType::FRAME)),
            (
                6,
                ModuleKind::Processor,
                StreamContract::new().input(InputStream::new(1, EventType::FRAME).writable()),
            ),
            (
                3,
                ModuleKind::Output,
                StreamContract::new().input(InputStream::new(1, EventType::FRAME).after(6)),
            ),
        ];
        let graph = resolve_all(&modules).expect("valid graph");
        assert_eq!(ids(graph.order()), vec![1, 6, 3]);
        assert_eq!(graph.input_deps(id(3)), vec![id(1), id(6)]);
    }

    #[test]
    fn tap_requires_modifying_processor() {
        let result = resolve_all(&[
            (1, ModuleKind::Input, input(EventType::FRAME)),
            (2, ModuleKind::Processor, processor(1, EventType::FRAME, FILTERED)),
            (
                3,
                ModuleKind::Output,
                StreamContract::new().input(InputStream::new(1, EventType::FRAME).after(2)),
            ),
        ]);
        assert!(matches!(result, Err(Error::InvalidTap { .. })));
    }

    #[test]
    fn unconsumed_streams_are_pruned() {
        let graph = resolve_all(&[(
            1,
            ModuleKind::Input,
            input(EventType::POLARITY).output(OutputStream::new(EventType::IMU6)),
        )])
        .expect("valid graph");
        assert!(graph.streams().is_empty());
        assert!(!graph.stream_exists(id(1), &EventType::POLARITY));
        assert_eq!(ids(graph.order()), vec![1]);
    }
}
