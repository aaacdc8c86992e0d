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

//! The background poll loop: plan a cycle's worth of ranges, read each one in turn,
//! update the cache and the online/polling/failing status.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::classify;
use crate::engine::{EngineInner, PollStatus};
use crate::error::Error;
use crate::plan;
use crate::transport::ReadValue;

/// How long to sleep between checks while the engine is paused (`rate == None`).
const PAUSED_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn store_value(inner: &EngineInner, address: u32, value: ReadValue) {
    match value {
        ReadValue::Bits(bits) => inner.cache.store_bits(address, &bits),
        ReadValue::Words(words) => inner.cache.store_words(address, &words),
    }
}

/// One poll cycle: merge the cache's current keys into ranges and read each of them,
/// mutating `polling`/`failing` in place. Returns once every range has been attempted.
async fn poll_cycle(
    inner: &Arc<EngineInner>,
    polling: &BTreeSet<(u32, u32)>,
    failing: &mut BTreeSet<(u32, u32)>,
) -> BTreeSet<(u32, u32)> {
    let keys = inner.cache.keys_snapshot();
    let ranges = plan::merge(keys, inner.reach, None);

    let mut succ = BTreeSet::new();
    let mut fail = BTreeSet::new();

    for (address, count) in ranges {
        let mut transport = inner.transport.lock().await;
        transport.begin_transaction(None);
        let connected = transport.connect().await;
        let result = if !connected {
            Err(Error::PlcOffline(inner.host.clone(), inner.port))
        } else {
            match classify::classify_read(address, count) {
                Ok((op, offset)) => transport.read(op, offset, count as u16).await,
                Err(e) => Err(e),
            }
        };
        drop(transport);

        match result {
            Ok(value) => {
                if !*inner.online_rx.borrow() {
                    let _ = inner.online_tx.send(true);
                    tracing::error!(plc = %inner.description, range = ?(address, count), "PLC online");
                }
                if !polling.contains(&(address, count)) {
                    tracing::warn!(range = ?(address, count), "now polling");
                }
                succ.insert((address, count));
                store_value(inner, address, value);
            }
            Err(Error::Modbus(code)) => {
                fail.insert((address, count));
                if !failing.contains(&(address, count)) {
                    tracing::warn!(range = ?(address, count), exception = ?code, "failing (protocol exception)");
                }
            }
            Err(other) => {
                fail.insert((address, count));
                tracing::error!(range = ?(address, count), error = ?other, "failing");
            }
        }
    }

    let ceasing = polling.difference(&succ).filter(|r| !fail.contains(r));
    for range in ceasing {
        tracing::info!(range = ?range, "no longer polling");
    }

    *failing = fail;
    succ
}

/// The poll task's top-level loop. Spawned once per `Engine`, runs until `done` is set.
pub(crate) async fn run(inner: Arc<EngineInner>) {
    let mut polling: BTreeSet<(u32, u32)> = BTreeSet::new();
    let mut failing: BTreeSet<(u32, u32)> = BTreeSet::new();
    let mut target = Instant::now();
    let mut rate_rx = inner.rate_rx.clone();

    tracing::info!(plc = %inner.description, "poller starting");

    while !inner.done.load(Ordering::SeqCst) {
        let rate = *rate_rx.borrow_and_update();
        let rate = match rate {
            None => {
                tokio::time::sleep(PAUSED_POLL_INTERVAL).await;
                continue;
            }
            Some(rate) => rate,
        };

        let now = Instant::now();
        if now < target {
            tokio::time::sleep(target - now).await;
        }

        let now = Instant::now();
        let slipped = if now > target {
            (now.duration_since(target).as_secs_f64() / rate.as_secs_f64()).floor() as u32
        } else {
            0
        };
        if slipped > 0 {
            tracing::warn!(missed_cycles = slipped, "polling slipped");
        }
        target += rate * (slipped + 1);

        let succ = poll_cycle(&inner, &polling, &mut failing).await;
        polling = succ;

        let _ = inner.status_tx.send(Arc::new(PollStatus { polling: polling.clone(), failing: failing.clone() }));

        if !inner.cache.is_empty() && polling.is_empty() && *inner.online_rx.borrow() {
            let _ = inner.online_tx.send(false);
            tracing::error!(plc = %inner.description, "PLC offline");
        }
    }

    tracing::info!(plc = %inner.description, "poller stopped");
}
