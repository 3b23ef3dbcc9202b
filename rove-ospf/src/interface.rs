//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

use crate::collections::InterfaceId;

// The subset of interface state this engine consumes. The interface
// finite-state machine itself (DR election, wait timers, and so on) lives in
// the session layer, which keeps these fields up to date.
#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub if_type: InterfaceType,
    pub state: ism::State,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceType {
    Broadcast,
    NonBroadcast,
    PointToMultipoint,
    PointToPoint,
}

// Interface state-machine types, as maintained by the session layer.
pub mod ism {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(id: InterfaceId, name: String) -> Interface {
        Interface {
            id,
            name,
            if_type: InterfaceType::Broadcast,
            state: ism::State::Down,
        }
    }

    // Checks whether this interface may flood link-state updates. On
    // broadcast and NBMA segments only the DR and the BDR flood on behalf of
    // the segment; point-to-point and point-to-multipoint interfaces flood
    // whenever they are operational.
    pub fn is_flooding_eligible(&self) -> bool {
        match self.if_type {
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                matches!(self.state, ism::State::Dr | ism::State::Backup)
            }
            InterfaceType::PointToMultipoint
            | InterfaceType::PointToPoint => {
                self.state == ism::State::PointToPoint
            }
        }
    }
}
