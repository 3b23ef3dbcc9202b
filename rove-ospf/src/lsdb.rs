//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use rove_utils::UnboundedReceiver;
use serde::{Deserialize, Serialize};

use crate::aging::{AgingClock, BinId};
use crate::collections::{
    InterfaceId, LsaEntries, LsaEntryId, LsaEntryIndex,
};
use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::events::{LsdbEvent, LsdbListeners};
use crate::flood::{FloodMsg, ProcessingTag};
use crate::lsa::{Lsa, LsaHdr, LsaIdent, LsaKey, LsaType, LsaTypeCode};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;

// An LSA installed in the database, together with its aging state.
#[derive(Debug)]
pub struct LsaEntry {
    // Entry ID.
    pub id: LsaEntryId,
    // LSA key.
    pub key: LsaKey,
    // LSA data.
    pub data: Arc<Lsa>,
    // Bin currently holding this entry, if any. The entry is unbinned only
    // during the atomic install/delete transition.
    pub bin: Option<BinId>,
    // Aging-clock snapshot taken when the entry was installed.
    pub installed: u64,
    // Age carried in the LSA header at installation time.
    pub rcvd_age: u16,
    // Entry flags.
    pub flags: LsaEntryFlags,
    // Aging state.
    pub state: LsaState,
    // Action this entry is queued for, if any.
    pub tag: Option<ProcessingTag>,
    // Number of neighbors that have not yet acknowledged the forced-expiry
    // update.
    pub pending_acks: u32,
    // Owning interface.
    pub iface: Option<InterfaceId>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
        const CHECK_AGE = 0x04;
        const CHANGED_SINCE_FLOOD = 0x08;
        const SENT_REPLY_OLDER = 0x10;
        const SEQNO_WRAPPING = 0x20;
    }
}

// LSA entry aging states.
//
// Valid transitions:
//
//   Active ---------> PendingRefresh
//     |                    |
//     +------> MaxAge <----+
//                 |
//                 v
//            AwaitingAck
//
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaState {
    #[default]
    Active,
    PendingRefresh,
    MaxAge,
    AwaitingAck,
}

// Per-type sequence number counters, consulted when (re-)originating. The
// router and network counters are coupled and always reset together.
#[derive(Debug, Default)]
pub struct SequenceNumbers(BTreeMap<LsaType, u32>);

// One per-type LSA table.
#[derive(Debug)]
pub struct LsdbSingleType {
    lsa_type: LsaType,
    tree: BTreeMap<LsaKey, LsaEntryIndex>,
    lsa_count: u32,
    cksum_sum: u32,
}

// The link-state database.
//
// Entries live in the caller-owned arena; the database holds per-type trees
// of indexes plus the aging clock whose bins reference the same arena.
#[derive(Debug)]
pub struct Lsdb {
    tree: BTreeMap<LsaType, LsdbSingleType>,
    clock: AgingClock,
    seqnos: SequenceNumbers,
    // Self-originated LSAs whose sequence number space is being restarted,
    // keyed by the successor instance to originate once the flushed
    // instance leaves the database.
    seqno_wrapping: HashMap<LsaKey, (Lsa, Option<InterfaceId>)>,
    listeners: LsdbListeners,
    next_id: LsaEntryId,
    lsa_count: u32,
    cksum_sum: u32,
    // Statistics.
    pub orig_lsa_count: u32,
    pub discontinuity_time: DateTime<Utc>,
}

// ===== impl LsaEntry =====

impl LsaEntry {
    pub(crate) fn new(
        id: LsaEntryId,
        key: LsaKey,
        data: Arc<Lsa>,
        installed: u64,
        flags: LsaEntryFlags,
        iface: Option<InterfaceId>,
    ) -> LsaEntry {
        let rcvd_age = data.hdr.age;

        LsaEntry {
            id,
            key,
            data,
            bin: None,
            installed,
            rcvd_age,
            flags,
            state: LsaState::Active,
            tag: None,
            pending_acks: 0,
            iface,
        }
    }

    // Derives the entry's age at the given monotonic tick count. Once the
    // entry has transitioned into the MaxAge bin, the sentinel MaxAge value
    // is authoritative regardless of counter arithmetic.
    pub(crate) fn age_at(&self, ticks: u64) -> u16 {
        if self.is_maxage() {
            return LSA_MAX_AGE;
        }
        let age = u64::from(self.rcvd_age) + (ticks - self.installed);
        age.min(u64::from(LSA_MAX_AGE)) as u16
    }

    // Derives the entry's current age from the aging clock.
    pub fn current_age(&self, clock: &AgingClock) -> u16 {
        self.age_at(clock.ticks())
    }

    pub fn is_maxage(&self) -> bool {
        matches!(self.state, LsaState::MaxAge | LsaState::AwaitingAck)
    }

    // Single validation point for aging-state transitions.
    pub(crate) fn transition(
        &mut self,
        new_state: LsaState,
    ) -> Result<(), Error> {
        use LsaState::*;
        let valid = matches!(
            (self.state, new_state),
            (Active, PendingRefresh)
                | (Active, MaxAge)
                | (PendingRefresh, MaxAge)
                | (MaxAge, AwaitingAck)
        );
        if !valid {
            return Err(Error::LsaUnexpectedTransition(self.state, new_state));
        }

        self.state = new_state;
        Ok(())
    }
}

// Entry identity is (type, key, sequence number).
impl PartialEq for LsaEntry {
    fn eq(&self, other: &LsaEntry) -> bool {
        self.key == other.key
            && self.data.hdr.seq_no == other.data.hdr.seq_no
    }
}

impl Eq for LsaEntry {}

// ===== impl SequenceNumbers =====

impl SequenceNumbers {
    pub fn get(&self, lsa_type: LsaType) -> u32 {
        *self.0.get(&lsa_type).unwrap_or(&LSA_INIT_SEQ_NO)
    }

    pub fn set(&mut self, lsa_type: LsaType, seq_no: u32) {
        match lsa_type.code() {
            Some(LsaTypeCode::Router | LsaTypeCode::Network) => {
                self.0.insert(LsaTypeCode::Router.into(), seq_no);
                self.0.insert(LsaTypeCode::Network.into(), seq_no);
            }
            _ => {
                self.0.insert(lsa_type, seq_no);
            }
        }
    }

    fn reset(&mut self) {
        self.0.clear();
    }
}

// ===== impl LsdbSingleType =====

impl LsdbSingleType {
    fn new(lsa_type: LsaType) -> LsdbSingleType {
        LsdbSingleType {
            lsa_type,
            tree: Default::default(),
            lsa_count: 0,
            cksum_sum: 0,
        }
    }

    pub fn lsa_type(&self) -> LsaType {
        self.lsa_type
    }

    pub fn lsa_count(&self) -> u32 {
        self.lsa_count
    }

    pub fn cksum_sum(&self) -> u32 {
        self.cksum_sum
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub fn new() -> Lsdb {
        Lsdb {
            tree: Default::default(),
            clock: AgingClock::new(),
            seqnos: Default::default(),
            seqno_wrapping: Default::default(),
            listeners: Default::default(),
            next_id: 0,
            lsa_count: 0,
            cksum_sum: 0,
            orig_lsa_count: 0,
            discontinuity_time: Utc::now(),
        }
    }

    // Clears all tables and resets all sequence counters to the initial
    // sequence number.
    pub fn initialize(&mut self, entries: &mut LsaEntries) {
        let idxs = self
            .tree
            .values()
            .flat_map(|table| table.tree.values().copied())
            .collect::<Vec<_>>();
        for lse_idx in idxs {
            entries.remove(lse_idx);
        }

        self.tree.clear();
        self.clock.clear();
        self.seqno_wrapping.clear();
        self.seqnos.reset();
        self.lsa_count = 0;
        self.cksum_sum = 0;
    }

    pub fn clock(&self) -> &AgingClock {
        &self.clock
    }

    pub fn lsa_count(&self) -> u32 {
        self.lsa_count
    }

    pub fn cksum_sum(&self) -> u32 {
        self.cksum_sum
    }

    pub fn table(&self, lsa_type: LsaType) -> Option<&LsdbSingleType> {
        self.tree.get(&lsa_type)
    }

    // Registers a listener for database change notifications.
    pub fn subscribe(&mut self) -> UnboundedReceiver<LsdbEvent> {
        self.listeners.subscribe()
    }

    pub fn get<'a>(
        &self,
        entries: &'a LsaEntries,
        key: &LsaKey,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        self.tree
            .get(&key.lsa_type)
            .and_then(|table| table.tree.get(key).copied())
            .and_then(|lse_idx| {
                entries.get(lse_idx).map(|lse| (lse_idx, lse))
            })
    }

    // Looks up the instance matching the given header's identity.
    pub fn lookup<'a>(
        &self,
        entries: &'a LsaEntries,
        hdr: &LsaHdr,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        self.get(entries, &hdr.key())
    }

    pub fn find<'a>(
        &self,
        entries: &'a LsaEntries,
        lsa_type: LsaType,
        ident: LsaIdent,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        self.get(entries, &LsaKey::new(lsa_type, ident))
    }

    pub fn iter<'a>(
        &'a self,
        entries: &'a LsaEntries,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree
            .values()
            .flat_map(|table| table.tree.values())
            .filter_map(|lse_idx| {
                entries.get(*lse_idx).map(|lse| (*lse_idx, lse))
            })
    }

    // Adds the record to the database, wrapping it and placing it into the
    // aging clock's bins. Returns whether the record was accepted: an
    // instance that is not strictly newer than the held copy is rejected,
    // which is a normal outcome of flooding, not an error.
    pub fn add(
        &mut self,
        entries: &mut LsaEntries,
        lsa: Lsa,
        self_originated: bool,
        iface: Option<InterfaceId>,
    ) -> bool {
        let key = lsa.key();
        if let Some((_, old_lse)) = self.get(entries, &key) {
            if old_lse.data.hdr.seq_no as i32 >= lsa.hdr.seq_no as i32 {
                Debug::LsaDiscardOlder(&lsa.hdr).log();
                return false;
            }
        }

        let mut flags = LsaEntryFlags::empty();
        if self_originated {
            flags.insert(LsaEntryFlags::SELF_ORIGINATED);
            self.orig_lsa_count += 1;
            self.discontinuity_time = Utc::now();
        } else {
            flags.insert(LsaEntryFlags::RECEIVED);
        }

        self.install(entries, Arc::new(lsa), flags, iface);
        true
    }

    // Installs the provided LSA, replacing any older instance of the same
    // identity.
    pub(crate) fn install(
        &mut self,
        entries: &mut LsaEntries,
        data: Arc<Lsa>,
        mut flags: LsaEntryFlags,
        iface: Option<InterfaceId>,
    ) -> LsaEntryIndex {
        Debug::LsaInstall(&data.hdr).log();

        let key = data.key();

        // A new instance supersedes any pending sequence-number restart.
        self.seqno_wrapping.remove(&key);

        // Remove the old instance of the LSA, comparing contents on the way
        // out.
        let mut content_change = true;
        if let Some((old_lse_idx, old_lse)) = self.get(entries, &key) {
            if old_lse.data.body == data.body
                && old_lse.data.hdr.is_maxage() == data.hdr.is_maxage()
            {
                content_change = false;
            }
            self.delete_entry(entries, old_lse_idx, false);
        }
        if content_change {
            flags.insert(LsaEntryFlags::CHANGED_SINCE_FLOOD);
        }

        // Add entry to its type table.
        self.next_id += 1;
        let lse = LsaEntry::new(
            self.next_id,
            key,
            data.clone(),
            self.clock.ticks(),
            flags,
            iface,
        );
        let lse_idx = entries.insert(lse);

        let table = self
            .tree
            .entry(key.lsa_type)
            .or_insert_with(|| LsdbSingleType::new(key.lsa_type));
        table.tree.insert(key, lse_idx);
        table.lsa_count += 1;
        table.cksum_sum = table.cksum_sum.wrapping_add(data.hdr.cksum as u32);
        self.lsa_count += 1;
        self.cksum_sum = self.cksum_sum.wrapping_add(data.hdr.cksum as u32);

        // Record the per-type sequence number high-water mark.
        if flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
            self.seqnos.set(key.lsa_type, data.hdr.seq_no);
        }

        // Place the entry into the aging clock.
        if data.hdr.is_maxage() {
            let lse = &mut entries[lse_idx];
            if let Err(error) = lse.transition(LsaState::MaxAge) {
                error.log();
            }
            self.clock.add_to_maxage_bin(entries, lse_idx);
        } else {
            self.clock.schedule(entries, lse_idx);
        }

        self.listeners.notify(LsdbEvent::LsaAdded { lsa: data });

        lse_idx
    }

    // Removes the instance matching the given key. Absent keys are a no-op.
    pub fn delete(&mut self, entries: &mut LsaEntries, key: &LsaKey) {
        if let Some((lse_idx, _)) = self.get(entries, key) {
            self.delete_entry(entries, lse_idx, true);
        }
    }

    fn delete_entry(
        &mut self,
        entries: &mut LsaEntries,
        lse_idx: LsaEntryIndex,
        notify: bool,
    ) {
        self.clock.remove_from_bin(entries, lse_idx);
        let Some(lse) = entries.remove(lse_idx) else {
            return;
        };

        if let Some(table) = self.tree.get_mut(&lse.key.lsa_type) {
            if table.tree.remove(&lse.key).is_some() {
                table.lsa_count -= 1;
                table.cksum_sum = table
                    .cksum_sum
                    .wrapping_sub(lse.data.hdr.cksum as u32);
                self.lsa_count -= 1;
                self.cksum_sum = self
                    .cksum_sum
                    .wrapping_sub(lse.data.hdr.cksum as u32);
            }
        }

        Debug::LsaDelete(&lse.data.hdr).log();

        if notify {
            self.listeners.notify(LsdbEvent::LsaRemoved { lsa: lse.data });
        }
    }

    // Ages the database by one second, returning the flooding work the tick
    // produced.
    pub fn tick(&mut self, entries: &mut LsaEntries) -> Vec<FloodMsg> {
        self.clock.tick(entries)
    }

    // Defensive sweep: force-moves into the MaxAge bin any entry whose true
    // age reached MaxAge despite bin misplacement (e.g. after a missed
    // tick).
    pub fn check_ages(&mut self, entries: &mut LsaEntries) -> Vec<FloodMsg> {
        self.clock.check_ages(entries)
    }

    // Re-issues a self-originated LSA: new instance, next sequence number,
    // age zero, recomputed checksum, re-inserted into the bin its next
    // refresh falls due at.
    //
    // Three outcomes are possible:
    // - the refreshed instance is installed and returned for transmission;
    // - the sequence number space is exhausted, in which case the current
    //   instance is prematurely aged and returned for transmission as a
    //   forced-expiry update, and the successor is recorded for origination
    //   once the flush completes;
    // - the queued request no longer matches the database state (the entry
    //   is gone or was superseded), in which case there is nothing to do,
    //   unless a recorded successor is waiting to restart the sequence
    //   space.
    pub(crate) fn refresh(
        &mut self,
        entries: &mut LsaEntries,
        key: &LsaKey,
    ) -> Option<(Arc<Lsa>, Option<InterfaceId>)> {
        match self.get(entries, key) {
            Some((lse_idx, lse)) => {
                if lse.state != LsaState::PendingRefresh
                    || !lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                {
                    return None;
                }
                let old = lse.data.clone();
                let iface = lse.iface;

                if old.hdr.seq_no == LSA_MAX_SEQ_NO {
                    // When an attempt is made to increment the sequence
                    // number past MaxSequenceNumber, the current instance
                    // must first be flushed from the routing domain by
                    // prematurely aging it. Only once that instance has left
                    // the database can the successor be originated with the
                    // initial sequence number.
                    Debug::LsaSeqNoWrapping(&old.hdr).log();
                    let succ = Lsa::new(
                        0,
                        old.hdr.lsa_id,
                        old.hdr.adv_rtr,
                        LSA_INIT_SEQ_NO,
                        old.body.clone(),
                    );
                    self.seqno_wrapping.insert(*key, (succ, iface));
                    entries[lse_idx]
                        .flags
                        .insert(LsaEntryFlags::SEQNO_WRAPPING);
                    self.clock.expire(
                        entries,
                        lse_idx,
                        LsaFlushReason::PrematureAging,
                    );
                    return Some((entries[lse_idx].data.clone(), iface));
                }

                let lsa = Lsa::new(
                    0,
                    old.hdr.lsa_id,
                    old.hdr.adv_rtr,
                    old.hdr.seq_no.wrapping_add(1),
                    old.body.clone(),
                );
                Debug::LsaRefresh(&lsa.hdr).log();

                let data = Arc::new(lsa);
                self.install(
                    entries,
                    data.clone(),
                    LsaEntryFlags::SELF_ORIGINATED,
                    iface,
                );
                self.orig_lsa_count += 1;
                self.discontinuity_time = Utc::now();

                Some((data, iface))
            }
            None => {
                // Sequence-number restart: the flushed instance has left the
                // database, so the recorded successor may now be originated.
                let (succ, iface) = self.seqno_wrapping.remove(key)?;
                let data = Arc::new(succ);
                self.install(
                    entries,
                    data.clone(),
                    LsaEntryFlags::SELF_ORIGINATED,
                    iface,
                );
                self.orig_lsa_count += 1;
                self.discontinuity_time = Utc::now();

                Some((data, iface))
            }
        }
    }

    // Iterates the MaxAge bin, permanently deleting every entry whose
    // forced-expiry update has been acknowledged by all neighbors. Returns
    // the origination work unblocked by the deletions (sequence-number
    // restarts).
    pub fn maxage_sweep(&mut self, entries: &mut LsaEntries) -> Vec<FloodMsg> {
        let mut msgs = Vec::new();
        let mut count = 0;

        for lse_idx in self.clock.maxage_bin().list() {
            let lse = &entries[lse_idx];
            if lse.pending_acks != 0 {
                continue;
            }

            let key = lse.key;
            let wrapping =
                lse.flags.contains(LsaEntryFlags::SEQNO_WRAPPING);
            self.delete_entry(entries, lse_idx, true);
            count += 1;

            if wrapping {
                if let Some((succ, _)) = self.seqno_wrapping.get(&key) {
                    msgs.push(FloodMsg {
                        tag: ProcessingTag::RefreshLsa,
                        key,
                        lsa: Arc::new(succ.clone()),
                    });
                }
            }
        }

        if count > 0 {
            Debug::MaxAgeSweep(count).log();
        }

        msgs
    }

    // Marks every live entry for checksum re-verification and returns the
    // corresponding queue work.
    pub fn verify_checksum_sweep(
        &mut self,
        entries: &mut LsaEntries,
    ) -> Vec<FloodMsg> {
        let mut msgs = Vec::new();
        let idxs = self
            .iter(entries)
            .filter(|(_, lse)| lse.state == LsaState::Active)
            .map(|(lse_idx, _)| lse_idx)
            .collect::<Vec<_>>();

        for lse_idx in idxs {
            let lse = &mut entries[lse_idx];
            lse.flags.insert(LsaEntryFlags::CHECK_AGE);
            lse.tag = Some(ProcessingTag::VerifyChecksum);
            msgs.push(FloodMsg {
                tag: ProcessingTag::VerifyChecksum,
                key: lse.key,
                lsa: lse.data.clone(),
            });
        }

        msgs
    }

    // Returns a snapshot of all LSA headers, with ages derived from the
    // aging clock. Used by database-exchange and acknowledgment processing.
    pub fn all_headers(
        &self,
        entries: &LsaEntries,
        self_originated_only: bool,
        include_opaque: bool,
        include_maxage: bool,
    ) -> Vec<LsaHdr> {
        self.iter(entries)
            .filter(|(_, lse)| {
                if self_originated_only
                    && !lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                {
                    return false;
                }
                if !include_opaque && lse.key.lsa_type.is_opaque() {
                    return false;
                }
                if !include_maxage && lse.is_maxage() {
                    return false;
                }
                true
            })
            .map(|(_, lse)| {
                let mut hdr = lse.data.hdr;
                hdr.age = lse.current_age(&self.clock);
                hdr
            })
            .collect()
    }

    // Per-type sequence number counters.
    pub fn sequence_number(&self, lsa_type: LsaType) -> u32 {
        self.seqnos.get(lsa_type)
    }

    pub fn set_sequence_number(&mut self, lsa_type: LsaType, seq_no: u32) {
        self.seqnos.set(lsa_type, seq_no);
    }
}

impl Default for Lsdb {
    fn default() -> Lsdb {
        Lsdb::new()
    }
}
