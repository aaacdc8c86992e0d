// Copyright (C) 2020  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! The consumer-facing handle tying the cache, transport and background poller together.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::cache::{Cache, Value};
use crate::classify;
use crate::error::{Error, Result};
use crate::plan;
use crate::poller;
use crate::transport::{ModbusTransport, Transport, WriteValue};

/// Per-range poll outcome from the most recently completed cycle, kept for operator
/// visibility. `polling` and `failing` are always disjoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollStatus {
    pub polling: BTreeSet<(u32, u32)>,
    pub failing: BTreeSet<(u32, u32)>,
}

/// Construction parameters for an `Engine`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Free-form label used in log messages, e.g. the PLC's plant-floor name.
    pub description: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Poll cadence. `None` starts the engine paused.
    pub rate: Option<Duration>,
    /// Maximum address gap two ranges may straddle and still be merged into one transaction.
    pub reach: u32,
    /// Per-transaction deadline, spanning connect and the PDU exchange.
    pub default_timeout: Duration,
}

impl EngineConfig {
    pub fn new(description: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            host: host.into(),
            port: 502,
            unit_id: 1,
            rate: Some(Duration::from_secs(5)),
            reach: 100,
            default_timeout: Duration::from_secs(3),
        }
    }
}

pub(crate) struct EngineInner {
    pub description: String,
    pub host: String,
    pub port: u16,
    pub reach: u32,
    pub cache: Cache,
    pub transport: Mutex<Box<dyn Transport>>,
    pub online_tx: watch::Sender<bool>,
    pub online_rx: watch::Receiver<bool>,
    pub rate_tx: watch::Sender<Option<Duration>>,
    pub rate_rx: watch::Receiver<Option<Duration>>,
    pub status_tx: watch::Sender<Arc<PollStatus>>,
    pub status_rx: watch::Receiver<Arc<PollStatus>>,
    pub done: AtomicBool,
}

/// A running Modbus/TCP polling engine for a single PLC.
///
/// Cloning an `Engine` is cheap and shares the same cache, transport and background poller;
/// `shutdown` stops the poller for every clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
    poll_task: Arc<JoinHandle<()>>,
}

impl Engine {
    /// Start an engine backed by a real Modbus/TCP connection.
    pub fn connect(config: EngineConfig) -> Self {
        let transport = ModbusTransport::new(
            config.host.clone(),
            config.port,
            config.unit_id,
            config.default_timeout,
        );
        Self::with_transport(config, Box::new(transport))
    }

    /// Start an engine against an arbitrary `Transport`, e.g. `test_utils::FakeTransport`.
    pub fn with_transport(config: EngineConfig, transport: Box<dyn Transport>) -> Self {
        let (online_tx, online_rx) = watch::channel(false);
        let (rate_tx, rate_rx) = watch::channel(config.rate);
        let (status_tx, status_rx) = watch::channel(Arc::new(PollStatus::default()));

        let inner = Arc::new(EngineInner {
            description: config.description,
            host: config.host,
            port: config.port,
            reach: config.reach,
            cache: Cache::new(),
            transport: Mutex::new(transport),
            online_tx,
            online_rx,
            rate_tx,
            rate_rx,
            status_tx,
            status_rx,
            done: AtomicBool::new(false),
        });

        let poll_task = tokio::spawn(poller::run(inner.clone()));
        Self { inner, poll_task: Arc::new(poll_task) }
    }

    /// Register interest in `count` consecutive conventional addresses starting at `address`.
    /// Idempotent; has no effect on addresses already registered.
    pub fn poll(&self, address: u32, count: u32) -> Result<()> {
        classify::classify_read(address, count)?;
        self.inner.cache.poll(address, count);
        Ok(())
    }

    /// Read the most recently cached value for `address`. `Value::Unknown` if `address` was
    /// never registered with `poll`, or has been registered but not yet successfully read.
    pub fn read(&self, address: u32) -> Value {
        self.inner.cache.read(address)
    }

    /// Synchronously write a single value, bypassing the cache and the poll cycle. Competes
    /// with the poller for the shared transport's mutex: a write that arrives mid-cycle waits
    /// for the current transaction to finish, never interleaving with it.
    pub async fn write(&self, address: u32, value: WriteValue) -> Result<()> {
        let mut transport = self.inner.transport.lock().await;
        let (op, offset) = classify::classify_write(address, value.is_multi(), value.is_bit())?;
        transport.begin_transaction(None);
        if !transport.connect().await {
            return Err(Error::PlcOffline(self.inner.host.clone(), self.inner.port));
        }
        transport.write(op, offset, value).await
    }

    /// Whether the PLC is currently considered reachable: `true` once any registered range has
    /// been read successfully, `false` once every registered range has started failing.
    pub fn online(&self) -> bool {
        *self.inner.online_rx.borrow()
    }

    /// The most recent poll cycle's per-range outcome.
    pub fn status(&self) -> Arc<PollStatus> {
        self.inner.status_rx.borrow().clone()
    }

    /// Change the poll cadence. `None` pauses polling (in-flight transactions finish first).
    pub fn set_rate(&self, rate: Option<Duration>) {
        let _ = self.inner.rate_tx.send(rate);
    }

    /// Split `(address, count)` as the planner would for the engine's configured `reach`,
    /// without touching the cache or issuing any I/O. Exposed for operators inspecting what a
    /// given registration set would turn into.
    pub fn plan(&self, ranges: impl IntoIterator<Item = (u32, u32)>) -> Vec<(u32, u32)> {
        plan::merge(ranges, self.inner.reach, None)
    }

    /// Signal the background poller to stop. It exits at the start of its next loop
    /// iteration; any transaction already in flight completes first.
    pub fn shutdown(&self) {
        self.inner.done.store(true, Ordering::SeqCst);
    }

    /// Wait for the background poller to actually exit after `shutdown`.
    pub async fn join(self) {
        if let Ok(task) = Arc::try_unwrap(self.poll_task) {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test_utils::FakeTransport;

    const FAST: Duration = Duration::from_millis(20);

    /// Polls `cond` every 5ms until it's true or `timeout` elapses, panicking on timeout.
    async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition did not become true in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn config() -> EngineConfig {
        let mut cfg = EngineConfig::new("test-plc", "unused");
        cfg.rate = Some(FAST);
        cfg.reach = 10;
        cfg
    }

    /// Law 5: after `poll` and a successful cycle, `read` returns the simulator's value.
    #[tokio::test]
    async fn test_poll_then_read_reflects_device_value() {
        let mut transport = FakeTransport::new();
        transport.set_holding(0, 0x1234);
        let engine = Engine::with_transport(config(), Box::new(transport));

        engine.poll(40_001, 1).unwrap();
        wait_until(Duration::from_secs(2), || engine.read(40_001) == Value::Word(0x1234)).await;

        engine.shutdown();
    }

    /// S5 + Writer: a write lands in the simulator's register bank and is visible on the
    /// next poll cycle, without the cache having been updated directly by the write itself.
    #[tokio::test]
    async fn test_write_then_poll_round_trip() {
        let transport = FakeTransport::new();
        let engine = Engine::with_transport(config(), Box::new(transport));

        engine.write(40_001, WriteValue::Word(0xabcd)).await.unwrap();
        engine.poll(40_001, 1).unwrap();
        wait_until(Duration::from_secs(2), || engine.read(40_001) == Value::Word(0xabcd)).await;

        engine.shutdown();
    }

    /// S5: writing a read-only address is rejected before any I/O is attempted.
    #[tokio::test]
    async fn test_write_rejects_read_only_address() {
        let engine = Engine::with_transport(config(), Box::new(FakeTransport::new()));
        let err = engine.write(30_001, WriteValue::Word(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(30_001, _)));
        engine.shutdown();
    }

    /// Laws 8 / S6: the engine flips online once a registered range reads successfully, and
    /// flips back offline within one cycle of the simulator going unreachable.
    #[tokio::test]
    async fn test_online_offline_transition() {
        let transport = FakeTransport::new();
        let online_handle = transport.online_handle();
        let engine = Engine::with_transport(config(), Box::new(transport));

        // Three distinct bands, as S6 specifies.
        engine.poll(1, 1).unwrap();
        engine.poll(30_001, 1).unwrap();
        engine.poll(40_001, 1).unwrap();

        wait_until(Duration::from_secs(2), || engine.online()).await;

        online_handle.store(false, Ordering::SeqCst);
        wait_until(Duration::from_secs(2), || !engine.online()).await;

        online_handle.store(true, Ordering::SeqCst);
        wait_until(Duration::from_secs(2), || engine.online()).await;

        engine.shutdown();
    }

    /// Law 6: pausing (`rate = None`) quiesces the poller; no further transactions start.
    #[tokio::test]
    async fn test_pause_quiesces_polling() {
        let mut transport = FakeTransport::new();
        transport.delay = Duration::from_millis(1);
        let in_flight = transport.in_flight.clone();
        let engine = Engine::with_transport(config(), Box::new(transport));

        engine.poll(40_001, 1).unwrap();
        wait_until(Duration::from_secs(2), || engine.online()).await;

        engine.set_rate(None);
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Let any last in-flight transaction finish, then confirm nothing new starts.
        wait_until(Duration::from_secs(1), || in_flight.load(Ordering::SeqCst) == 0).await;
        for _ in 0..10 {
            assert_eq!(in_flight.load(Ordering::SeqCst), 0);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        engine.shutdown();
    }

    /// Law 7: a write competing with the poller for the transport mutex never overlaps with
    /// an in-flight poll transaction.
    #[tokio::test]
    async fn test_write_excludes_concurrent_poll() {
        let mut transport = FakeTransport::new();
        transport.delay = Duration::from_millis(30);
        let max_in_flight = transport.max_in_flight.clone();
        let engine = Engine::with_transport(config(), Box::new(transport));

        engine.poll(40_001, 1).unwrap();
        wait_until(Duration::from_secs(2), || engine.online()).await;

        for _ in 0..5 {
            engine.write(40_001, WriteValue::Word(1)).await.unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        engine.shutdown();
    }
}
