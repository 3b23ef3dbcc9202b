//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, RwLock};

use rove_utils::task::{IntervalTask, Task};
use rove_utils::{Sender, UnboundedReceiver};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::collections::{Interfaces, LsaEntries};
use crate::debug::Debug;
use crate::events::LsdbEvent;
use crate::flood::{FloodMsg, FloodSession};
use crate::interface::{InterfaceType, ism};
use crate::lsa::{Lsa, LsaHdr, LsaKey, LsaType};
use crate::lsdb::{LsaEntryFlags, LsaState, Lsdb};
use crate::tasks;

// Instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Config {
    // Capacity of the flood queue. Producers block once it fills up.
    pub flood_queue_depth: usize,
    // Interval between MaxAge garbage-collection sweeps, in seconds.
    pub maxage_sweep_interval: u64,
    // Interval between checksum re-verification sweeps, in seconds.
    pub cksum_verify_interval: u64,
}

// Shared instance state: the database, the entry arena its trees and bins
// point into, and the owning-interface registry.
#[derive(Debug)]
pub struct InstanceState {
    pub lsdb: Lsdb,
    pub lsa_entries: LsaEntries,
    pub interfaces: Interfaces,
}

// An LSDB engine instance.
pub struct Instance {
    pub config: Config,
    shared: Arc<RwLock<InstanceState>>,
    tasks: Option<InstanceTasks>,
}

struct InstanceTasks {
    flood_tx: Sender<FloodMsg>,
    shutdown_tx: watch::Sender<bool>,
    ticker: Task<()>,
    consumer: Task<()>,
    maxage_sweeper: IntervalTask,
    cksum_sweeper: IntervalTask,
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            flood_queue_depth: 1024,
            maxage_sweep_interval: 5,
            cksum_verify_interval: 300,
        }
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    pub fn new() -> InstanceState {
        InstanceState {
            lsdb: Lsdb::new(),
            lsa_entries: Default::default(),
            interfaces: Default::default(),
        }
    }
}

impl Default for InstanceState {
    fn default() -> InstanceState {
        InstanceState::new()
    }
}

// ===== impl Instance =====

impl Instance {
    pub fn new(config: Config) -> Instance {
        Instance {
            config,
            shared: Arc::new(RwLock::new(InstanceState::new())),
            tasks: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.tasks.is_some()
    }

    // Handle to the shared state, for readers (e.g. route computation) that
    // want to walk the database under their own shared lock.
    pub fn state(&self) -> Arc<RwLock<InstanceState>> {
        self.shared.clone()
    }

    // Begins the repeating one-second aging tick and spawns the flood
    // consumer and the sweepers. Starting an already started instance is a
    // no-op.
    pub fn start(&mut self, session: Box<dyn FloodSession>) {
        if self.tasks.is_some() {
            return;
        }
        Debug::InstanceStart.log();

        let (flood_tx, flood_rx) =
            mpsc::channel(self.config.flood_queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ticker = tasks::age_tick(
            self.shared.clone(),
            flood_tx.clone(),
            shutdown_rx,
        );
        let consumer =
            tasks::flood_consumer(self.shared.clone(), flood_rx, session);
        let maxage_sweeper = tasks::lsdb_maxage_sweep_interval(
            self.shared.clone(),
            flood_tx.clone(),
            self.config.maxage_sweep_interval,
        );
        let cksum_sweeper = tasks::cksum_verify_interval(
            self.shared.clone(),
            flood_tx.clone(),
            self.config.cksum_verify_interval,
        );

        self.tasks = Some(InstanceTasks {
            flood_tx,
            shutdown_tx,
            ticker,
            consumer,
            maxage_sweeper,
            cksum_sweeper,
        });
    }

    // Cancels the aging tick, waiting for any in-flight tick to finish
    // draining, then shuts the flood consumer down cooperatively. Stopping
    // an already stopped instance is a no-op.
    pub async fn stop(&mut self) {
        let Some(tasks) = self.tasks.take() else {
            return;
        };
        Debug::InstanceStop.log();

        let InstanceTasks {
            flood_tx,
            shutdown_tx,
            ticker,
            consumer,
            maxage_sweeper,
            cksum_sweeper,
        } = tasks;

        // Stop the aging driver first. The driver never blocks on the queue
        // while holding the database lock, so this cannot deadlock against
        // the consumer.
        let _ = shutdown_tx.send(true);
        let _ = ticker.await;

        // Cancel the sweepers, then drop the last producer handle so the
        // consumer drains the remaining queue items and exits on its own.
        drop(maxage_sweeper);
        drop(cksum_sweeper);
        drop(flood_tx);
        let _ = consumer.await;
    }

    // Inserts or updates a record. Returns whether the record was accepted
    // (an instance not strictly newer than the held copy is rejected).
    pub fn lsa_add(
        &self,
        lsa: Lsa,
        self_originated: bool,
        ifname: Option<&str>,
    ) -> bool {
        let mut state = self.shared.write().unwrap();
        let state = &mut *state;
        let iface_id = ifname.and_then(|ifname| {
            state
                .interfaces
                .get_by_name(ifname)
                .map(|(_, iface)| iface.id)
        });
        state
            .lsdb
            .add(&mut state.lsa_entries, lsa, self_originated, iface_id)
    }

    // Removes the instance matching the given key, if any.
    pub fn lsa_delete(&self, key: &LsaKey) {
        let mut state = self.shared.write().unwrap();
        let state = &mut *state;
        state.lsdb.delete(&mut state.lsa_entries, key);
    }

    // Returns the held instance matching the given header's identity.
    pub fn lsa_lookup(&self, hdr: &LsaHdr) -> Option<Arc<Lsa>> {
        let state = self.shared.read().unwrap();
        state
            .lsdb
            .lookup(&state.lsa_entries, hdr)
            .map(|(_, lse)| lse.data.clone())
    }

    // Records one neighbor's acknowledgment of a forced-expiry update.
    pub fn lsa_ack(&self, key: &LsaKey) {
        let mut state = self.shared.write().unwrap();
        let state = &mut *state;
        if let Some((lse_idx, lse)) = state.lsdb.get(&state.lsa_entries, key)
        {
            if lse.state == LsaState::AwaitingAck {
                let lse = &mut state.lsa_entries[lse_idx];
                lse.pending_acks = lse.pending_acks.saturating_sub(1);
            }
        }
    }

    // Session-layer bookkeeping hook for the flooding-related entry flags.
    pub fn lsa_update_flags(
        &self,
        key: &LsaKey,
        set: LsaEntryFlags,
        clear: LsaEntryFlags,
    ) {
        let mut state = self.shared.write().unwrap();
        let state = &mut *state;
        if let Some((lse_idx, _)) = state.lsdb.get(&state.lsa_entries, key) {
            let lse = &mut state.lsa_entries[lse_idx];
            lse.flags.insert(set);
            lse.flags.remove(clear);
        }
    }

    // Snapshot of all LSA headers, for database exchange and acknowledgment
    // matching.
    pub fn all_headers(
        &self,
        self_originated_only: bool,
        include_opaque: bool,
        include_maxage: bool,
    ) -> Vec<LsaHdr> {
        let state = self.shared.read().unwrap();
        state.lsdb.all_headers(
            &state.lsa_entries,
            self_originated_only,
            include_opaque,
            include_maxage,
        )
    }

    // Registers a listener for database change notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<LsdbEvent> {
        let mut state = self.shared.write().unwrap();
        state.lsdb.subscribe()
    }

    // Per-type sequence number counters.
    pub fn sequence_number(&self, lsa_type: LsaType) -> u32 {
        let state = self.shared.read().unwrap();
        state.lsdb.sequence_number(lsa_type)
    }

    pub fn set_sequence_number(&self, lsa_type: LsaType, seq_no: u32) {
        let mut state = self.shared.write().unwrap();
        state.lsdb.set_sequence_number(lsa_type, seq_no);
    }

    // Creates or updates the session layer's view of an interface.
    pub fn interface_update(
        &self,
        ifname: &str,
        if_type: InterfaceType,
        ism_state: ism::State,
    ) {
        let mut state = self.shared.write().unwrap();
        if state.interfaces.get_by_name(ifname).is_none() {
            state.interfaces.insert(ifname);
        }
        if let Some((_, iface)) = state.interfaces.get_mut_by_name(ifname) {
            iface.if_type = if_type;
            iface.state = ism_state;
        }
    }

    // Removes an interface from the registry.
    pub fn interface_delete(&self, ifname: &str) {
        let mut state = self.shared.write().unwrap();
        if let Some((iface_idx, _)) = state.interfaces.get_by_name(ifname) {
            state.interfaces.delete(iface_idx);
        }
    }
}
