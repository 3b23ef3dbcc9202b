//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use rove_utils::{UnboundedReceiver, UnboundedSender};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::lsa::Lsa;

// LSDB change notifications, delivered to registered listeners so that
// route computation can react to database changes.
#[derive(Clone, Debug, Serialize)]
pub enum LsdbEvent {
    LsaAdded { lsa: Arc<Lsa> },
    LsaRemoved { lsa: Arc<Lsa> },
}

// Registered LSDB event listeners.
#[derive(Debug, Default)]
pub struct LsdbListeners(Vec<UnboundedSender<LsdbEvent>>);

// ===== impl LsdbListeners =====

impl LsdbListeners {
    // Registers a new listener and returns its receiving half.
    pub(crate) fn subscribe(&mut self) -> UnboundedReceiver<LsdbEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.push(tx);
        rx
    }

    // Delivers the event to all registered listeners, pruning the ones that
    // have gone away.
    pub(crate) fn notify(&mut self, event: LsdbEvent) {
        self.0.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
