//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, RwLock};

use rove_utils::Receiver;
use serde::{Deserialize, Serialize};

use crate::collections::InterfaceId;
use crate::error::{Error, IoError};
use crate::instance::InstanceState;
use crate::lsa::{Lsa, LsaKey};
use crate::lsdb::{LsaEntryFlags, LsaState};

// The action a queued entry is to be processed with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ProcessingTag {
    VerifyChecksum,
    RefreshLsa,
    MaxAgeLsa,
}

// Work item drained from the flood queue.
#[derive(Clone, Debug, Serialize)]
pub struct FloodMsg {
    pub tag: ProcessingTag,
    pub key: LsaKey,
    pub lsa: Arc<Lsa>,
}

// The send primitive provided by the session layer. Sending over a torn-down
// session fails; failures are logged by the consumer and never retried here.
pub trait FloodSession: Send {
    // Sends a link-state update carrying the given LSA, either out a single
    // interface or out every eligible interface, returning the number of
    // adjacent neighbors the update was offered to.
    fn send_ls_update(
        &mut self,
        ifname: Option<&str>,
        lsa: &Lsa,
    ) -> Result<usize, IoError>;
}

// Where a flood transmission goes.
enum FloodScope {
    AllInterfaces,
    Interface(String),
    Suppressed,
}

// ===== global functions =====

// Flood consumer loop: drains the bounded queue and executes the action
// named by each item's processing tag. A processing failure for one item is
// logged and never terminates the worker. The loop ends cooperatively once
// every producer handle has been dropped.
pub(crate) async fn consumer_loop(
    shared: Arc<RwLock<InstanceState>>,
    mut floodc: Receiver<FloodMsg>,
    mut session: Box<dyn FloodSession>,
) {
    while let Some(msg) = floodc.recv().await {
        if let Err(error) = process(&shared, &mut *session, msg) {
            error.log();
        }
    }
}

fn process(
    shared: &Arc<RwLock<InstanceState>>,
    session: &mut dyn FloodSession,
    msg: FloodMsg,
) -> Result<(), Error> {
    match msg.tag {
        ProcessingTag::VerifyChecksum => process_verify_checksum(shared, msg),
        ProcessingTag::RefreshLsa => process_refresh(shared, session, msg),
        ProcessingTag::MaxAgeLsa => process_maxage(shared, session, msg),
    }
}

// ===== helper functions =====

fn process_verify_checksum(
    shared: &Arc<RwLock<InstanceState>>,
    msg: FloodMsg,
) -> Result<(), Error> {
    let mut state = shared.write().unwrap();
    let state = &mut *state;

    let Some((lse_idx, lse)) = state.lsdb.get(&state.lsa_entries, &msg.key)
    else {
        return Ok(());
    };
    // Skip stale queue items referring to a superseded instance.
    if lse.data.hdr.seq_no != msg.lsa.hdr.seq_no
        || !lse.flags.contains(LsaEntryFlags::CHECK_AGE)
    {
        return Ok(());
    }

    match lse.data.validate() {
        Ok(()) => {
            let lse = &mut state.lsa_entries[lse_idx];
            lse.flags.remove(LsaEntryFlags::CHECK_AGE);
            lse.tag = None;
            Ok(())
        }
        Err(error) => {
            // The stored record no longer verifies; drop it.
            state.lsdb.delete(&mut state.lsa_entries, &msg.key);
            Err(Error::LsaInvalid(msg.key, error))
        }
    }
}

fn process_refresh(
    shared: &Arc<RwLock<InstanceState>>,
    session: &mut dyn FloodSession,
    msg: FloodMsg,
) -> Result<(), Error> {
    // Rebuild the instance under the lock; transmit outside it.
    let (lsa, scope) = {
        let mut state = shared.write().unwrap();
        let state = &mut *state;
        match state.lsdb.refresh(&mut state.lsa_entries, &msg.key) {
            Some((lsa, iface_id)) => {
                let scope = flood_scope(state, iface_id)?;
                (lsa, scope)
            }
            None => return Ok(()),
        }
    };

    let nbrs = transmit(session, &scope, &lsa)?;

    // The refresh degenerated into a premature-aging flush when the
    // sequence number space was exhausted.
    if lsa.hdr.is_maxage() {
        record_flush_acks(shared, &msg.key, nbrs);
    }

    Ok(())
}

fn process_maxage(
    shared: &Arc<RwLock<InstanceState>>,
    session: &mut dyn FloodSession,
    msg: FloodMsg,
) -> Result<(), Error> {
    // Snapshot under a shared lock; transmit outside it.
    let (lsa, scope) = {
        let state = shared.read().unwrap();
        let Some((_, lse)) = state.lsdb.get(&state.lsa_entries, &msg.key)
        else {
            return Ok(());
        };
        if lse.state != LsaState::MaxAge
            || lse.data.hdr.seq_no != msg.lsa.hdr.seq_no
        {
            return Ok(());
        }
        let scope = flood_scope(&state, lse.iface)?;
        (lse.data.clone(), scope)
    };

    let nbrs = transmit(session, &scope, &lsa)?;
    record_flush_acks(shared, &msg.key, nbrs);

    Ok(())
}

fn transmit(
    session: &mut dyn FloodSession,
    scope: &FloodScope,
    lsa: &Lsa,
) -> Result<usize, Error> {
    let nbrs = match scope {
        FloodScope::Suppressed => 0,
        FloodScope::AllInterfaces => {
            session.send_ls_update(None, lsa).map_err(Error::IoError)?
        }
        FloodScope::Interface(ifname) => session
            .send_ls_update(Some(ifname), lsa)
            .map_err(Error::IoError)?,
    };

    Ok(nbrs)
}

// Resolves the flooding scope for an entry's owning interface. The role
// logic itself belongs to the interface layer and is only consulted here:
// on broadcast segments a non-DR/BDR interface does not flood.
fn flood_scope(
    state: &InstanceState,
    iface_id: Option<InterfaceId>,
) -> Result<FloodScope, Error> {
    match iface_id {
        None => Ok(FloodScope::AllInterfaces),
        Some(iface_id) => {
            let (_, iface) = state
                .interfaces
                .get_by_id(iface_id)
                .ok_or(Error::InterfaceIdNotFound(iface_id))?;
            if iface.is_flooding_eligible() {
                Ok(FloodScope::Interface(iface.name.clone()))
            } else {
                Ok(FloodScope::Suppressed)
            }
        }
    }
}

// Records the acknowledgment bookkeeping after a forced-expiry update went
// out. Entries whose pending count reaches zero are collected by the MaxAge
// sweep, which also fires the removal notification.
fn record_flush_acks(
    shared: &Arc<RwLock<InstanceState>>,
    key: &LsaKey,
    nbrs: usize,
) {
    let mut state = shared.write().unwrap();
    let state = &mut *state;

    if let Some((lse_idx, lse)) = state.lsdb.get(&state.lsa_entries, key) {
        if lse.state == LsaState::MaxAge {
            let lse = &mut state.lsa_entries[lse_idx];
            lse.pending_acks = nbrs as u32;
            lse.tag = None;
            if let Err(error) = lse.transition(LsaState::AwaitingAck) {
                error.log();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use rove_utils::task::Task;
    use tokio::sync::mpsc;

    use super::*;
    use crate::instance::InstanceState;
    use crate::interface::{InterfaceType, ism};
    use crate::lsa::{
        LsaBody, LsaHdr, LsaRouter, LsaRouterFlags, LsaRouterLink,
        LsaRouterLinkType, LsaSummary,
    };
    use crate::lsdb::LSA_MAX_AGE;

    #[derive(Clone, Default)]
    struct MockSession {
        sent: Arc<Mutex<Vec<(Option<String>, LsaHdr)>>>,
        nbrs: usize,
    }

    impl FloodSession for MockSession {
        fn send_ls_update(
            &mut self,
            ifname: Option<&str>,
            lsa: &Lsa,
        ) -> Result<usize, IoError> {
            self.sent
                .lock()
                .unwrap()
                .push((ifname.map(str::to_owned), lsa.hdr));
            Ok(self.nbrs)
        }
    }

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn router_lsa(adv_rtr: &str, seq_no: u32) -> Lsa {
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::default(),
            links: vec![LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                addr("10.0.1.0"),
                addr("255.255.255.0"),
                10,
            )],
        });
        Lsa::new(0, addr(adv_rtr), addr(adv_rtr), seq_no, body)
    }

    fn summary_lsa(adv_rtr: &str, seq_no: u32) -> Lsa {
        let body = LsaBody::SummaryNetwork(LsaSummary::new(
            addr("255.255.255.0"),
            20,
        ));
        Lsa::new(0, addr("10.0.0.0"), addr(adv_rtr), seq_no, body)
    }

    fn shared_state() -> Arc<RwLock<InstanceState>> {
        Arc::new(RwLock::new(InstanceState::new()))
    }

    // Two queued items for the same key are processed in FIFO order by the
    // single consumer; the database copy reflects the latest sequence number
    // afterwards, and stale items are no-ops.
    #[tokio::test]
    async fn consumer_fifo_latest_instance_wins() {
        let shared = shared_state();
        let (key, old_data, cur_data) = {
            let mut state = shared.write().unwrap();
            let state = &mut *state;

            let lsa3 = router_lsa("1.1.1.1", 3);
            let key = lsa3.key();
            assert!(state.lsdb.add(&mut state.lsa_entries, lsa3, true, None));
            let old_data = state
                .lsdb
                .get(&state.lsa_entries, &key)
                .unwrap()
                .1
                .data
                .clone();

            let lsa4 = router_lsa("1.1.1.1", 4);
            assert!(state.lsdb.add(&mut state.lsa_entries, lsa4, true, None));

            // Tag the current instance for refresh the way the tick would.
            let (lse_idx, lse) =
                state.lsdb.get(&state.lsa_entries, &key).unwrap();
            let cur_data = lse.data.clone();
            let lse = &mut state.lsa_entries[lse_idx];
            lse.transition(LsaState::PendingRefresh).unwrap();
            lse.tag = Some(ProcessingTag::RefreshLsa);

            (key, old_data, cur_data)
        };

        let session = MockSession {
            nbrs: 2,
            ..Default::default()
        };
        let sent = session.sent.clone();
        let (floodp, floodc) = mpsc::channel(16);
        let consumer = Task::spawn(consumer_loop(
            shared.clone(),
            floodc,
            Box::new(session),
        ));

        floodp
            .send(FloodMsg {
                tag: ProcessingTag::RefreshLsa,
                key,
                lsa: old_data,
            })
            .await
            .unwrap();
        floodp
            .send(FloodMsg {
                tag: ProcessingTag::RefreshLsa,
                key,
                lsa: cur_data,
            })
            .await
            .unwrap();
        drop(floodp);
        consumer.await.unwrap();

        // The first item performed the refresh against the latest database
        // copy; the second found nothing pending.
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.seq_no, 5);

        let state = shared.read().unwrap();
        let (_, lse) = state.lsdb.get(&state.lsa_entries, &key).unwrap();
        assert_eq!(lse.data.hdr.seq_no, 5);
        assert_eq!(lse.state, LsaState::Active);
    }

    #[test]
    fn verify_checksum_drops_corrupt_record() {
        let shared = shared_state();
        let (key, msgs) = {
            let mut state = shared.write().unwrap();
            let state = &mut *state;

            let mut lsa = summary_lsa("9.9.9.9", 2);
            lsa.hdr.cksum = lsa.hdr.cksum.wrapping_add(1);
            let key = lsa.key();
            assert!(state.lsdb.add(&mut state.lsa_entries, lsa, false, None));

            let msgs =
                state.lsdb.verify_checksum_sweep(&mut state.lsa_entries);
            (key, msgs)
        };
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].tag, ProcessingTag::VerifyChecksum);

        let mut session = MockSession::default();
        let result = process(&shared, &mut session, msgs[0].clone());
        assert!(matches!(result, Err(Error::LsaInvalid(..))));

        // The corrupt record was dropped from the database.
        let state = shared.read().unwrap();
        assert!(state.lsdb.get(&state.lsa_entries, &key).is_none());
    }

    #[test]
    fn verify_checksum_keeps_valid_record() {
        let shared = shared_state();
        let (key, msgs) = {
            let mut state = shared.write().unwrap();
            let state = &mut *state;
            let lsa = summary_lsa("9.9.9.9", 2);
            let key = lsa.key();
            assert!(state.lsdb.add(&mut state.lsa_entries, lsa, false, None));
            let msgs =
                state.lsdb.verify_checksum_sweep(&mut state.lsa_entries);
            (key, msgs)
        };

        let mut session = MockSession::default();
        assert!(process(&shared, &mut session, msgs[0].clone()).is_ok());

        let state = shared.read().unwrap();
        let (_, lse) = state.lsdb.get(&state.lsa_entries, &key).unwrap();
        assert!(!lse.flags.contains(LsaEntryFlags::CHECK_AGE));
        assert_eq!(lse.tag, None);
    }

    #[test]
    fn maxage_flush_records_pending_acks() {
        let shared = shared_state();
        let (key, msgs) = {
            let mut state = shared.write().unwrap();
            let state = &mut *state;
            let lsa = summary_lsa("2.2.2.2", 5);
            let key = lsa.key();
            assert!(state.lsdb.add(&mut state.lsa_entries, lsa, false, None));
            let mut msgs = Vec::new();
            for _ in 0..LSA_MAX_AGE {
                msgs.extend(state.lsdb.tick(&mut state.lsa_entries));
            }
            (key, msgs)
        };
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].tag, ProcessingTag::MaxAgeLsa);

        let session = MockSession {
            nbrs: 2,
            ..Default::default()
        };
        let sent = session.sent.clone();
        let mut session = session;
        assert!(process(&shared, &mut session, msgs[0].clone()).is_ok());
        assert_eq!(sent.lock().unwrap().len(), 1);

        {
            let mut state = shared.write().unwrap();
            let state = &mut *state;
            let (lse_idx, lse) =
                state.lsdb.get(&state.lsa_entries, &key).unwrap();
            assert_eq!(lse.state, LsaState::AwaitingAck);
            assert_eq!(lse.pending_acks, 2);

            // Not acknowledged yet: the sweep must keep the entry.
            state.lsdb.maxage_sweep(&mut state.lsa_entries);
            assert!(state.lsdb.get(&state.lsa_entries, &key).is_some());

            // All neighbors acknowledged: the sweep removes it.
            state.lsa_entries[lse_idx].pending_acks = 0;
            state.lsdb.maxage_sweep(&mut state.lsa_entries);
            assert!(state.lsdb.get(&state.lsa_entries, &key).is_none());
        }
    }

    // On a broadcast segment, only a DR or BDR interface floods; the flush
    // still completes its bookkeeping with zero pending acknowledgments.
    #[test]
    fn flood_suppressed_on_non_dr_broadcast_interface() {
        let shared = shared_state();
        let (key, msgs) = {
            let mut state = shared.write().unwrap();
            let state = &mut *state;

            let (_, iface) = state.interfaces.insert("eth0");
            iface.if_type = InterfaceType::Broadcast;
            iface.state = ism::State::DrOther;
            let iface_id = iface.id;

            let lsa = summary_lsa("2.2.2.2", 5);
            let key = lsa.key();
            assert!(state.lsdb.add(
                &mut state.lsa_entries,
                lsa,
                false,
                Some(iface_id)
            ));
            let mut msgs = Vec::new();
            for _ in 0..LSA_MAX_AGE {
                msgs.extend(state.lsdb.tick(&mut state.lsa_entries));
            }
            (key, msgs)
        };

        let session = MockSession::default();
        let sent = session.sent.clone();
        let mut session = session;
        assert!(process(&shared, &mut session, msgs[0].clone()).is_ok());

        assert!(sent.lock().unwrap().is_empty());
        let state = shared.read().unwrap();
        let (_, lse) = state.lsdb.get(&state.lsa_entries, &key).unwrap();
        assert_eq!(lse.state, LsaState::AwaitingAck);
        assert_eq!(lse.pending_acks, 0);
    }
}
