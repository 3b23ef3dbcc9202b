//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rove_utils::task::{IntervalTask, Task};
use rove_utils::{Receiver, Sender};
use tokio::sync::watch;
use tokio::time;

use crate::flood;
use crate::flood::{FloodMsg, FloodSession};
use crate::instance::InstanceState;

//
// LSDB engine tasks diagram:
//
//                      +--------------------+
//   age_tick (1x) ---> |                    |
//                      |                    |
//   maxage_sweep  ---> |     flood queue    | ---> (1x) flood_consumer
//   interval (1x)      |      (bounded)     |
//                      |                    |
//   cksum_verify  ---> |                    |
//   interval (1x)      +--------------------+
//

// ===== LSDB engine tasks =====

// Aging driver: the periodic one-second tick ("age and flood").
//
// The tick collects work under the database lock and enqueues it only after
// releasing the lock, so a full queue backpressures the producer without
// blocking the consumer's access to the database. At most one tick is in
// flight at any time; shutdown is observed between ticks, never mid-drain.
pub(crate) fn age_tick(
    shared: Arc<RwLock<InstanceState>>,
    floodp: Sender<FloodMsg>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Task<()> {
    Task::spawn(async move {
        let period = Duration::from_secs(1);
        let start = time::Instant::now() + period;
        let mut interval = time::interval_at(start, period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let msgs = {
                        let mut state = shared.write().unwrap();
                        let state = &mut *state;
                        state.lsdb.tick(&mut state.lsa_entries)
                    };
                    for msg in msgs {
                        if floodp.send(msg).await.is_err() {
                            return;
                        }
                    }
                }
                _ = shutdown_rx.changed() => return,
            }
        }
    })
}

// MaxAge sweeper interval task.
pub(crate) fn lsdb_maxage_sweep_interval(
    shared: Arc<RwLock<InstanceState>>,
    floodp: Sender<FloodMsg>,
    interval: u64,
) -> IntervalTask {
    IntervalTask::new(Duration::from_secs(interval), false, move || {
        let shared = shared.clone();
        let floodp = floodp.clone();
        async move {
            let msgs = {
                let mut state = shared.write().unwrap();
                let state = &mut *state;
                state.lsdb.maxage_sweep(&mut state.lsa_entries)
            };
            for msg in msgs {
                let _ = floodp.send(msg).await;
            }
        }
    })
}

// Checksum re-verification interval task.
pub(crate) fn cksum_verify_interval(
    shared: Arc<RwLock<InstanceState>>,
    floodp: Sender<FloodMsg>,
    interval: u64,
) -> IntervalTask {
    IntervalTask::new(Duration::from_secs(interval), false, move || {
        let shared = shared.clone();
        let floodp = floodp.clone();
        async move {
            let msgs = {
                let mut state = shared.write().unwrap();
                let state = &mut *state;
                state.lsdb.verify_checksum_sweep(&mut state.lsa_entries)
            };
            for msg in msgs {
                let _ = floodp.send(msg).await;
            }
        }
    })
}

// Flood consumer task.
pub(crate) fn flood_consumer(
    shared: Arc<RwLock<InstanceState>>,
    floodc: Receiver<FloodMsg>,
    session: Box<dyn FloodSession>,
) -> Task<()> {
    Task::spawn(flood::consumer_loop(shared, floodc, session))
}
