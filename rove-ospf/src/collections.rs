//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};

use generational_arena::Index;

use crate::interface::Interface;
use crate::lsdb::LsaEntry;

pub type ObjectId = u32;

pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type LsaEntryId = ObjectId;
pub type LsaEntryIndex = Index;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

#[derive(Debug, Default)]
pub struct Interfaces {
    arena: Arena<Interface>,
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    next_id: InterfaceId,
}

pub type LsaEntries = Arena<LsaEntry>;

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn insert(&mut self, value: T) -> Index {
        self.0.insert(value)
    }

    pub(crate) fn remove(&mut self, index: Index) -> Option<T> {
        self.0.remove(index)
    }

    pub(crate) fn get(&self, index: Index) -> Option<&T> {
        self.0.get(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert(
        &mut self,
        ifname: &str,
    ) -> (InterfaceIndex, &mut Interface) {
        // Create and insert interface into the arena.
        self.next_id += 1;
        let iface = Interface::new(self.next_id, ifname.to_owned());
        let iface_idx = self.arena.insert(iface);

        // Link interface to different collections.
        let iface = &mut self.arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        if self
            .name_tree
            .insert(iface.name.clone(), iface_idx)
            .is_some()
        {
            panic!("interface name={} already exists", iface.name);
        }

        (iface_idx, iface)
    }

    pub(crate) fn delete(&mut self, iface_idx: InterfaceIndex) {
        let iface = &mut self.arena[iface_idx];

        // Unlink interface from different collections.
        self.id_tree.remove(&iface.id);
        self.name_tree.remove(&iface.name);

        // Remove interface from the arena.
        self.arena.remove(iface_idx);
    }

    pub(crate) fn get_by_id(
        &self,
        id: InterfaceId,
    ) -> Option<(InterfaceIndex, &Interface)> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
    }

    pub(crate) fn get_by_name(
        &self,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
    }

    pub(crate) fn get_mut_by_name(
        &mut self,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &mut Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut self.arena[iface_idx]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.name_tree
            .values()
            .map(|iface_idx| &self.arena[*iface_idx])
    }
}
