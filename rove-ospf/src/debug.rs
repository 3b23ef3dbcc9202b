//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lsa::LsaHdr;

// LSDB debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instance lifecycle
    InstanceStart,
    InstanceStop,
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaDiscardOlder(&'a LsaHdr),
    LsaRefresh(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaDelete(&'a LsaHdr),
    LsaSeqNoWrapping(&'a LsaHdr),
    MaxAgeSweep(usize),
}

// Reason why an LSA is being flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::LsaInstall(hdr)
            | Debug::LsaDiscardOlder(hdr)
            | Debug::LsaRefresh(hdr)
            | Debug::LsaDelete(hdr)
            | Debug::LsaSeqNoWrapping(hdr) => {
                debug!(lsa_type = %hdr.lsa_type, lsa_id = %hdr.lsa_id,
                    adv_rtr = %hdr.adv_rtr, seq_no = %hdr.seq_no, "{}", self);
            }
            Debug::LsaFlush(hdr, reason) => {
                debug!(lsa_type = %hdr.lsa_type, lsa_id = %hdr.lsa_id,
                    adv_rtr = %hdr.adv_rtr, ?reason, "{}", self);
            }
            Debug::MaxAgeSweep(count) => {
                debug!(%count, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaDiscardOlder(..) => {
                write!(f, "discarding LSA (not newer than database copy)")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaDelete(..) => {
                write!(f, "deleting LSA")
            }
            Debug::LsaSeqNoWrapping(..) => {
                write!(f, "LSA sequence number is wrapping")
            }
            Debug::MaxAgeSweep(..) => {
                write!(f, "swept MaxAge LSAs")
            }
        }
    }
}
