// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Synthetic modules of the demonstration pipeline

use bytes::{Buf, BufMut, Bytes, BytesMut};
use evflow::prelude::*;
use evflow_log::Level;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher as _, Hasher as _, RandomState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Events after noise filtering
pub const FILTERED: EventType = EventType::from_static("filtered");

/// Encoded size of one polarity event: x (u16), y (u16), timestamp and polarity (u32)
const EVENT_SIZE: usize = 8;
const WIDTH: u16 = 346;
const HEIGHT: u16 = 260;
/// Pixel emitting far more events than the scene explains
const HOT_PIXEL: (u16, u16) = (17, 42);
const HOT_PIXEL_EVENTS: usize = 32;
const BATCH_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PolarityEvent {
    x: u16,
    y: u16,
    timestamp: u32,
    on: bool,
}

impl PolarityEvent {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.x);
        buf.put_u16_le(self.y);
        buf.put_u32_le((self.timestamp & 0x7fff_ffff) | (u32::from(self.on) << 31));
    }

    fn decode_all(mut payload: Bytes) -> impl Iterator<Item = PolarityEvent> {
        std::iter::from_fn(move || {
            if payload.remaining() < EVENT_SIZE {
                return None;
            }
            let x = payload.get_u16_le();
            let y = payload.get_u16_le();
            let raw = payload.get_u32_le();
            Some(PolarityEvent {
                x,
                y,
                timestamp: raw & 0x7fff_ffff,
                on: raw >> 31 == 1,
            })
        })
    }
}

fn random_below(bound: u64) -> u64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(bound);
    hasher.finish() % bound.max(1)
}

/// Batches produced by the camera helper thread, not yet taken by the mainloop
#[derive(Debug, Default)]
struct Feed {
    batches: Mutex<VecDeque<Bytes>>,
    rate: AtomicU64,
    stop: AtomicBool,
}

impl Feed {
    /// Queue a batch. The increase is announced before the lock is released, so a consumer
    /// never takes a batch whose increase it cannot yet observe.
    fn push(&self, batch: Bytes, availability: &DataAvailability) {
        let mut batches = self.batches.lock().unwrap_or_else(PoisonError::into_inner);
        batches.push_back(batch);
        availability.notify_increase();
    }

    fn take_all(&self) -> Vec<Bytes> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn generate(&self, start: Instant) -> Bytes {
        let events = (self.rate.load(Ordering::Relaxed) * BATCH_INTERVAL.as_millis() as u64 / 1000)
            .max(1) as usize;
        let timestamp = start.elapsed().as_micros() as u32;
        let mut buf = BytesMut::with_capacity((events + HOT_PIXEL_EVENTS) * EVENT_SIZE);
        for _ in 0..events {
            PolarityEvent {
                x: random_below(u64::from(WIDTH)) as u16,
                y: random_below(u64::from(HEIGHT)) as u16,
                timestamp,
                on: random_below(2) == 1,
            }
            .encode(&mut buf);
        }
        for _ in 0..HOT_PIXEL_EVENTS {
            PolarityEvent {
                x: HOT_PIXEL.0,
                y: HOT_PIXEL.1,
                timestamp,
                on: true,
            }
            .encode(&mut buf);
        }
        buf.freeze()
    }
}

/// Input module emulating a DVS camera.
///
/// A helper thread produces a batch of polarity events every few milliseconds and signals
/// it through the data availability counter. Each run publishes all batches collected since
/// the last run as one packet.
#[derive(Debug, Default)]
pub struct SyntheticCamera {
    feed: Arc<Feed>,
    helper: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub const EVENT_RATE: &'static str = "eventRate";

    pub fn build(_id: ModuleId) -> Box<dyn Module> {
        Box::new(Self::default())
    }

    /// Drop pending batches, keeping the availability counter balanced
    fn discard(&self, ctx: &ModuleContext) {
        for _ in self.feed.take_all() {
            if let Err(e) = ctx.availability().notify_decrease() {
                ctx.log(Level::Error, format_args!("Discarding batch: {e}"));
            }
        }
    }
}

impl Module for SyntheticCamera {
    fn init(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        ctx.node().create(
            Self::EVENT_RATE,
            100_000i64,
            Bounds::Int {
                min: 1,
                max: 10_000_000,
            },
            Flags::NORMAL,
            "Generated events per second",
        )?;
        self.config(ctx);

        self.feed.stop.store(false, Ordering::Relaxed);
        let feed = self.feed.clone();
        let availability = ctx.availability().clone();
        let helper = thread::Builder::new()
            .name(format!("{}-feed", ctx.name()))
            .spawn(move || {
                let start = Instant::now();
                while !feed.stop.load(Ordering::Relaxed) {
                    thread::sleep(BATCH_INTERVAL);
                    feed.push(feed.generate(start), &availability);
                }
            })
            .map_err(|e| format!("failed to spawn feed thread: {e}"))?;
        self.helper = Some(helper);
        Ok(())
    }

    fn run(
        &mut self,
        ctx: &ModuleContext,
        _input: &mut EventContainer,
        output: &mut OutputCollector,
    ) -> Result<(), ModuleError> {
        let batches = self.feed.take_all();
        if batches.is_empty() {
            return Ok(());
        }

        let mut payload = BytesMut::with_capacity(batches.iter().map(Bytes::len).sum());
        for batch in &batches {
            payload.extend_from_slice(batch);
            ctx.availability().notify_decrease()?;
        }
        let events = payload.len() / EVENT_SIZE;
        output.publish(EventPacket::new(EventType::POLARITY, events, payload.freeze()))
    }

    fn config(&mut self, ctx: &ModuleContext) {
        if let Ok(rate) = ctx.node().get_int(Self::EVENT_RATE) {
            self.feed.rate.store(rate.unsigned_abs(), Ordering::Relaxed);
        }
    }

    fn reset(&mut self, ctx: &ModuleContext, source: ModuleId) {
        ctx.log(Level::Info, format_args!("Reset by {source}, dropping buffered events"));
        self.discard(ctx);
    }

    fn exit(&mut self, ctx: &ModuleContext) {
        self.feed.stop.store(true, Ordering::Relaxed);
        if let Some(helper) = self.helper.take() {
            if helper.join().is_err() {
                ctx.log(Level::Error, format_args!("Feed thread panicked"));
            }
        }
        self.discard(ctx);
    }
}

/// Processor dropping the events of hot pixels.
///
/// A pixel firing more than `hotPixelLimit` events within one packet is marked hot; its
/// events are dropped until the next reset.
#[derive(Debug)]
pub struct NoiseFilter {
    limit: usize,
    hot: HashSet<(u16, u16)>,
}

impl NoiseFilter {
    pub const HOT_PIXEL_LIMIT: &'static str = "hotPixelLimit";

    pub fn build(_id: ModuleId) -> Box<dyn Module> {
        Box::new(Self {
            limit: 8,
            hot: HashSet::new(),
        })
    }
}

impl Module for NoiseFilter {
    fn init(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        ctx.node().create(
            Self::HOT_PIXEL_LIMIT,
            8i64,
            Bounds::Int { min: 1, max: 10_000 },
            Flags::NORMAL,
            "Events per packet above which a pixel is considered hot",
        )?;
        self.config(ctx);
        Ok(())
    }

    fn run(
        &mut self,
        ctx: &ModuleContext,
        input: &mut EventContainer,
        output: &mut OutputCollector,
    ) -> Result<(), ModuleError> {
        let Some((_, packet)) = input.find(&EventType::POLARITY) else {
            return Ok(());
        };

        let mut counts: HashMap<(u16, u16), usize> = HashMap::new();
        for event in PolarityEvent::decode_all(packet.payload().clone()) {
            *counts.entry((event.x, event.y)).or_default() += 1;
        }
        for (pixel, _) in counts.into_iter().filter(|(_, n)| *n > self.limit) {
            if self.hot.insert(pixel) {
                ctx.log(Level::Debug, format_args!("Pixel {pixel:?} marked hot"));
            }
        }

        let mut filtered = BytesMut::with_capacity(packet.payload().len());
        let mut events = 0;
        for event in PolarityEvent::decode_all(packet.payload().clone())
            .filter(|e| !self.hot.contains(&(e.x, e.y)))
        {
            event.encode(&mut filtered);
            events += 1;
        }
        output.publish(EventPacket::new(FILTERED, events, filtered.freeze()))
    }

    fn config(&mut self, ctx: &ModuleContext) {
        if let Ok(limit) = ctx.node().get_int(Self::HOT_PIXEL_LIMIT) {
            self.limit = usize::try_from(limit).unwrap_or(usize::MAX);
        }
    }

    fn reset(&mut self, ctx: &ModuleContext, source: ModuleId) {
        ctx.log(
            Level::Info,
            format_args!("Reset by {source}, forgetting {} hot pixels", self.hot.len()),
        );
        self.hot.clear();
    }
}

/// Output module logging event rates
#[derive(Debug)]
pub struct EventStatistics {
    total: u64,
    window_events: u64,
    window_start: Instant,
}

impl EventStatistics {
    pub const REPORT_INTERVAL: &'static str = "reportIntervalMs";

    pub fn build(_id: ModuleId) -> Box<dyn Module> {
        Box::new(Self {
            total: 0,
            window_events: 0,
            window_start: Instant::now(),
        })
    }
}

impl Module for EventStatistics {
    fn init(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        ctx.node().create(
            Self::REPORT_INTERVAL,
            1000i64,
            Bounds::Int {
                min: 100,
                max: 60_000,
            },
            Flags::NORMAL,
            "Interval between rate reports in milliseconds",
        )?;
        self.window_start = Instant::now();
        Ok(())
    }

    fn run(
        &mut self,
        ctx: &ModuleContext,
        input: &mut EventContainer,
        _output: &mut OutputCollector,
    ) -> Result<(), ModuleError> {
        let events = input.event_number() as u64;
        self.total += events;
        self.window_events += events;

        let interval = ctx
            .node()
            .get_int(Self::REPORT_INTERVAL)
            .map(|ms| Duration::from_millis(ms.unsigned_abs()))?;
        let elapsed = self.window_start.elapsed();
        if elapsed >= interval {
            let rate = self.window_events as f64 / elapsed.as_secs_f64();
            ctx.log(
                Level::Info,
                format_args!("{rate:.0} events/s, {} events in total", self.total),
            );
            self.window_events = 0;
            self.window_start = Instant::now();
        }
        Ok(())
    }

    fn reset(&mut self, ctx: &ModuleContext, source: ModuleId) {
        ctx.log(Level::Info, format_args!("Reset by {source}"));
        self.total = 0;
        self.window_events = 0;
        self.window_start = Instant::now();
    }
}
