//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collections::{LsaEntries, LsaEntryIndex};
use crate::debug::{Debug, LsaFlushReason};
use crate::flood::{FloodMsg, ProcessingTag};
use crate::lsa::LsaKey;
use crate::lsdb::{
    LSA_MAX_AGE, LSA_REFRESH_TIME, LsaEntryFlags, LsaState,
};

// Bin identifier: an ordinary bin index, or the MaxAge holding bin.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum BinId {
    Ordinary(u16),
    MaxAge,
}

// A collection of LSDB entries all scheduled to come due at the same tick.
//
// Bins only track membership; they never touch the clock or the database.
// Access is serialized by the aging clock's caller, which holds the
// database-wide lock.
#[derive(Debug)]
pub struct AgeBin {
    id: BinId,
    entries: BTreeMap<LsaKey, LsaEntryIndex>,
}

// The LSDB aging clock.
//
// The clock owns one ordinary bin per second of MaxAge plus the MaxAge
// holding bin. Ordinary bins are addressed by absolute future tick: an entry
// lives in the bin whose index equals the tick at which its next event
// (refresh for self-originated entries, expiry otherwise) falls due.
#[derive(Debug)]
pub struct AgingClock {
    // Wrapping age counter.
    age_counter: u16,
    // Set once the age counter has wrapped for the first time.
    rollover: bool,
    // Monotonic tick count. Unlike `age_counter` this never wraps, so true
    // entry ages can always be derived from it.
    ticks: u64,
    // Ordinary bins, indexed by bin number.
    bins: Vec<AgeBin>,
    // Holding area for expired entries awaiting acknowledgment.
    maxage_bin: AgeBin,
}

// ===== impl AgeBin =====

impl AgeBin {
    fn new(id: BinId) -> AgeBin {
        AgeBin {
            id,
            entries: Default::default(),
        }
    }

    pub(crate) fn add(&mut self, key: LsaKey, lse_idx: LsaEntryIndex) {
        self.entries.insert(key, lse_idx);
    }

    pub(crate) fn remove(&mut self, key: &LsaKey) -> Option<LsaEntryIndex> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &LsaKey) -> Option<LsaEntryIndex> {
        self.entries.get(key).copied()
    }

    // Returns a snapshot of the bin's members, detached from the bin so the
    // caller may mutate memberships while iterating.
    pub fn list(&self) -> Vec<LsaEntryIndex> {
        self.entries.values().copied().collect()
    }

    pub fn bin_number(&self) -> BinId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ===== impl AgingClock =====

impl AgingClock {
    pub(crate) fn new() -> AgingClock {
        let bins = (0..LSA_MAX_AGE)
            .map(|bin_no| AgeBin::new(BinId::Ordinary(bin_no)))
            .collect();

        AgingClock {
            age_counter: 0,
            rollover: false,
            ticks: 0,
            bins,
            maxage_bin: AgeBin::new(BinId::MaxAge),
        }
    }

    pub fn age_counter(&self) -> u16 {
        self.age_counter
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn has_rolled_over(&self) -> bool {
        self.rollover
    }

    // Maps a residual lifetime in seconds to the bin the event falls into.
    pub fn age2bin(&self, residual: u16) -> u16 {
        ((self.age_counter as u32 + residual as u32) % LSA_MAX_AGE as u32)
            as u16
    }

    pub fn bin(&self, bin_no: u16) -> &AgeBin {
        &self.bins[bin_no as usize]
    }

    pub fn maxage_bin(&self) -> &AgeBin {
        &self.maxage_bin
    }

    // Places a newly installed entry into the bin where its next event
    // (refresh or expiry) falls due. Entries already at MaxAge never go
    // through here; the caller routes them straight to the MaxAge bin.
    pub(crate) fn schedule(
        &mut self,
        entries: &mut LsaEntries,
        lse_idx: LsaEntryIndex,
    ) {
        let lse = &entries[lse_idx];
        let age = lse.rcvd_age;
        let residual = if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
            LSA_REFRESH_TIME.saturating_sub(age).max(1)
        } else {
            (LSA_MAX_AGE - age).max(1)
        };

        let bin_no = self.age2bin(residual);
        self.bins[bin_no as usize].add(lse.key, lse_idx);
        entries[lse_idx].bin = Some(BinId::Ordinary(bin_no));
    }

    // Moves an entry out of its ordinary bin (if any) into the MaxAge bin.
    pub(crate) fn add_to_maxage_bin(
        &mut self,
        entries: &mut LsaEntries,
        lse_idx: LsaEntryIndex,
    ) {
        self.remove_from_bin(entries, lse_idx);
        let lse = &mut entries[lse_idx];
        self.maxage_bin.add(lse.key, lse_idx);
        lse.bin = Some(BinId::MaxAge);
    }

    // Removes an entry from whichever bin it currently names. No-op if the
    // entry is unbinned.
    pub(crate) fn remove_from_bin(
        &mut self,
        entries: &mut LsaEntries,
        lse_idx: LsaEntryIndex,
    ) {
        let lse = &mut entries[lse_idx];
        match lse.bin {
            Some(BinId::Ordinary(bin_no)) => {
                self.bins[bin_no as usize].remove(&lse.key);
            }
            Some(BinId::MaxAge) => {
                self.maxage_bin.remove(&lse.key);
            }
            None => (),
        }
        lse.bin = None;
    }

    // Ages the database by one second and collects the flooding work the
    // tick produced.
    //
    // The counter is advanced first; the bin whose index equals the new
    // counter value is the one whose residents have just come due. Residents
    // visited before their event is due (possible after a defensive re-bin)
    // are left alone; they will be revisited when their true event bin is
    // reached.
    pub(crate) fn tick(
        &mut self,
        entries: &mut LsaEntries,
    ) -> Vec<FloodMsg> {
        self.ticks += 1;
        self.age_counter += 1;
        let mut wrapped = false;
        if self.age_counter == LSA_MAX_AGE {
            self.age_counter = 0;
            self.rollover = true;
            wrapped = true;
        }

        let ticks = self.ticks;
        let mut msgs = Vec::new();
        let due = self.age_counter;
        for lse_idx in self.bins[due as usize].list() {
            let lse = &mut entries[lse_idx];
            let age = lse.age_at(ticks);

            if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                && age >= LSA_REFRESH_TIME
                && lse.state == LsaState::Active
            {
                if let Err(error) = lse.transition(LsaState::PendingRefresh)
                {
                    error.log();
                    continue;
                }
                lse.tag = Some(ProcessingTag::RefreshLsa);
                msgs.push(FloodMsg {
                    tag: ProcessingTag::RefreshLsa,
                    key: lse.key,
                    lsa: lse.data.clone(),
                });
            } else if age >= LSA_MAX_AGE {
                msgs.extend(self.expire(
                    entries,
                    lse_idx,
                    LsaFlushReason::Expiry,
                ));
            }
        }

        // The counter wrap invalidates bin-position arithmetic for anything
        // that missed its visit (e.g. after a long process pause), so run a
        // full age recomputation pass.
        if wrapped {
            msgs.extend(self.check_ages(entries));
        }

        msgs
    }

    // Defensive sweep: force-moves into the MaxAge bin any entry whose true
    // age reached MaxAge despite bin misplacement.
    pub(crate) fn check_ages(
        &mut self,
        entries: &mut LsaEntries,
    ) -> Vec<FloodMsg> {
        let ticks = self.ticks;
        let overdue = entries
            .iter()
            .filter(|(_, lse)| {
                matches!(
                    lse.state,
                    LsaState::Active | LsaState::PendingRefresh
                ) && lse.age_at(ticks) >= LSA_MAX_AGE
            })
            .map(|(lse_idx, _)| lse_idx)
            .collect::<Vec<_>>();

        overdue
            .into_iter()
            .filter_map(|lse_idx| {
                self.expire(entries, lse_idx, LsaFlushReason::Expiry)
            })
            .collect()
    }

    // Expires a single entry: stamps its record at MaxAge, moves it into the
    // MaxAge bin and emits the forced-expiry flooding work.
    pub(crate) fn expire(
        &mut self,
        entries: &mut LsaEntries,
        lse_idx: LsaEntryIndex,
        reason: LsaFlushReason,
    ) -> Option<FloodMsg> {
        let lse = &mut entries[lse_idx];
        if let Err(error) = lse.transition(LsaState::MaxAge) {
            error.log();
            return None;
        }

        // Stamp the record at MaxAge.
        let mut lsa = (*lse.data).clone();
        lsa.set_maxage();
        lse.data = Arc::new(lsa);
        lse.tag = Some(ProcessingTag::MaxAgeLsa);

        let key = lse.key;
        let data = lse.data.clone();
        Debug::LsaFlush(&data.hdr, reason).log();

        self.add_to_maxage_bin(entries, lse_idx);

        Some(FloodMsg {
            tag: ProcessingTag::MaxAgeLsa,
            key,
            lsa: data,
        })
    }

    // Drops every bin membership. Entries themselves are removed by the
    // database.
    pub(crate) fn clear(&mut self) {
        for bin in &mut self.bins {
            bin.entries.clear();
        }
        self.maxage_bin.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::lsa::{Lsa, LsaBody, LsaSummary};
    use crate::lsdb::LsaEntry;

    fn summary_lsa(adv_rtr: &str, seq_no: u32) -> Lsa {
        let adv_rtr: Ipv4Addr = adv_rtr.parse().unwrap();
        let body = LsaBody::SummaryNetwork(LsaSummary::new(
            "255.255.255.0".parse().unwrap(),
            20,
        ));
        Lsa::new(0, "10.0.0.0".parse().unwrap(), adv_rtr, seq_no, body)
    }

    fn entry(
        entries: &mut LsaEntries,
        clock: &AgingClock,
        lsa: Lsa,
        flags: LsaEntryFlags,
    ) -> LsaEntryIndex {
        let key = lsa.key();
        let lse = LsaEntry::new(
            1,
            key,
            Arc::new(lsa),
            clock.ticks(),
            flags,
            None,
        );
        entries.insert(lse)
    }

    // Counts how many bins (ordinary plus MaxAge) hold the given key.
    fn membership_count(clock: &AgingClock, key: &LsaKey) -> usize {
        let mut count = (0..LSA_MAX_AGE)
            .filter(|bin_no| clock.bin(*bin_no).get(key).is_some())
            .count();
        if clock.maxage_bin().get(key).is_some() {
            count += 1;
        }
        count
    }

    #[test]
    fn age2bin_wraps() {
        let mut clock = AgingClock::new();
        let mut entries = LsaEntries::default();
        assert_eq!(clock.age2bin(0), 0);
        assert_eq!(clock.age2bin(LSA_MAX_AGE), 0);
        for _ in 0..10 {
            clock.tick(&mut entries);
        }
        assert_eq!(clock.age2bin(LSA_MAX_AGE - 1), 9);
    }

    #[test]
    fn schedule_by_next_event() {
        let mut clock = AgingClock::new();
        let mut entries = LsaEntries::default();

        // Self-originated entries come due at their refresh time, received
        // ones at their expiry time.
        let self_idx = entry(
            &mut entries,
            &clock,
            summary_lsa("1.1.1.1", 1),
            LsaEntryFlags::SELF_ORIGINATED,
        );
        let rcvd_idx = entry(
            &mut entries,
            &clock,
            summary_lsa("2.2.2.2", 1),
            LsaEntryFlags::RECEIVED,
        );
        clock.schedule(&mut entries, self_idx);
        clock.schedule(&mut entries, rcvd_idx);

        assert_eq!(
            entries[self_idx].bin,
            Some(BinId::Ordinary(LSA_REFRESH_TIME))
        );
        assert_eq!(entries[rcvd_idx].bin, Some(BinId::Ordinary(0)));
    }

    #[test]
    fn single_bin_membership() {
        let mut clock = AgingClock::new();
        let mut entries = LsaEntries::default();
        let lse_idx = entry(
            &mut entries,
            &clock,
            summary_lsa("1.1.1.1", 1),
            LsaEntryFlags::RECEIVED,
        );
        let key = entries[lse_idx].key;

        clock.schedule(&mut entries, lse_idx);
        assert_eq!(membership_count(&clock, &key), 1);

        clock.add_to_maxage_bin(&mut entries, lse_idx);
        assert_eq!(membership_count(&clock, &key), 1);
        assert_eq!(
            clock.maxage_bin().bin_number(),
            BinId::MaxAge
        );
    }

    #[test]
    fn remove_from_bin_is_idempotent() {
        let mut clock = AgingClock::new();
        let mut entries = LsaEntries::default();
        let lse_idx = entry(
            &mut entries,
            &clock,
            summary_lsa("1.1.1.1", 1),
            LsaEntryFlags::RECEIVED,
        );
        let key = entries[lse_idx].key;

        clock.schedule(&mut entries, lse_idx);
        clock.remove_from_bin(&mut entries, lse_idx);
        assert_eq!(entries[lse_idx].bin, None);
        assert_eq!(membership_count(&clock, &key), 0);

        // Removing an unbinned entry is a no-op.
        clock.remove_from_bin(&mut entries, lse_idx);
        assert_eq!(entries[lse_idx].bin, None);
    }

    #[test]
    fn premature_visit_is_noop() {
        let mut clock = AgingClock::new();
        let mut entries = LsaEntries::default();
        let lse_idx = entry(
            &mut entries,
            &clock,
            summary_lsa("1.1.1.1", 1),
            LsaEntryFlags::RECEIVED,
        );
        clock.schedule(&mut entries, lse_idx);

        // Re-bin defensively so the entry is visited long before its expiry.
        clock.remove_from_bin(&mut entries, lse_idx);
        let bin_no = clock.age2bin(5);
        clock.bins[bin_no as usize].add(entries[lse_idx].key, lse_idx);
        entries[lse_idx].bin = Some(BinId::Ordinary(bin_no));

        let mut msgs = Vec::new();
        for _ in 0..10 {
            msgs.extend(clock.tick(&mut entries));
        }
        assert!(msgs.is_empty());
        assert_eq!(entries[lse_idx].state, LsaState::Active);
    }

    #[test]
    fn check_ages_force_moves_overdue_entries() {
        let mut clock = AgingClock::new();
        let mut entries = LsaEntries::default();
        let lse_idx = entry(
            &mut entries,
            &clock,
            summary_lsa("1.1.1.1", 1),
            LsaEntryFlags::RECEIVED,
        );
        clock.schedule(&mut entries, lse_idx);

        // Simulate an entry whose bin position no longer matches its age.
        entries[lse_idx].rcvd_age = LSA_MAX_AGE - 1;
        clock.tick(&mut entries);

        let msgs = clock.check_ages(&mut entries);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].tag, ProcessingTag::MaxAgeLsa);
        assert_eq!(entries[lse_idx].bin, Some(BinId::MaxAge));
        assert_eq!(entries[lse_idx].state, LsaState::MaxAge);
        assert!(entries[lse_idx].data.hdr.is_maxage());
    }
}
