//! Process table.
//!
//! PCBs live in an arena of generation-tagged slots. The scheduling ring is
//! threaded through the PCBs' `prev`/`next` handles and always holds every
//! live process, in insertion order after whichever process created it.

use alloc::vec::Vec;

use super::process::{Process, ProcessId};
use super::ProcessError;

struct Slot {
    generation: u16,
    process: Option<Process>,
}

pub struct ProcessTable {
    slots: Vec<Slot>,
    free_slots: Vec<u16>,
    len: usize,
}

impl ProcessTable {
    /// A table holding `process` alone, linked to itself.
    pub fn with_root(mut process: Process) -> (Self, ProcessId) {
        let id = ProcessId::from_parts(0, 1);
        process.prev = id;
        process.next = id;
        let table = Self {
            slots: alloc::vec![Slot { generation: 1, process: Some(process) }],
            free_slots: Vec::new(),
            len: 1,
        };
        (table, id)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether another process can be inserted.
    pub fn has_room(&self) -> bool {
        !self.free_slots.is_empty() || self.slots.len() <= u16::MAX as usize
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.process.as_ref()
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.process.as_mut()
    }

    /// Successor of `id` in the ring.
    pub fn next_of(&self, id: ProcessId) -> Option<ProcessId> {
        self.get(id).map(Process::next)
    }

    /// Insert `process` into the ring right after `anchor`.
    pub fn insert_after(&mut self, anchor: ProcessId, mut process: Process) -> Result<ProcessId, ProcessError> {
        let after = self
            .get(anchor)
            .map(Process::next)
            .ok_or(ProcessError::NoSuchProcess(anchor))?;

        let id = match self.free_slots.pop() {
            Some(index) => ProcessId::from_parts(index, self.slots[index as usize].generation),
            None => {
                let index = u16::try_from(self.slots.len()).map_err(|_| ProcessError::TableFull)?;
                self.slots.push(Slot { generation: 1, process: None });
                ProcessId::from_parts(index, 1)
            }
        };

        process.prev = anchor;
        process.next = after;
        self.slots[id.index()].process = Some(process);
        if let Some(anchor) = self.get_mut(anchor) {
            anchor.next = id;
        }
        if let Some(after) = self.get_mut(after) {
            after.prev = id;
        }
        self.len += 1;
        Ok(id)
    }

    /// Unlink `id` from the ring and free its slot.
    ///
    /// The last process can never be removed.
    pub fn remove(&mut self, id: ProcessId) -> Option<Process> {
        if self.len <= 1 {
            return None;
        }
        let (prev, next) = {
            let process = self.get(id)?;
            (process.prev, process.next)
        };
        if let Some(prev) = self.get_mut(prev) {
            prev.next = next;
        }
        if let Some(next) = self.get_mut(next) {
            next.prev = prev;
        }

        let slot = &mut self.slots[id.index()];
        let process = slot.process.take();
        slot.generation = slot.generation % ProcessId::MAX_GENERATION + 1;
        self.free_slots.push(id.index() as u16);
        self.len -= 1;
        process
    }

    /// Ring order starting at `start`, each process exactly once.
    pub fn ring_from(&self, start: ProcessId) -> RingIter<'_> {
        RingIter {
            table: self,
            start,
            next: self.contains(start).then_some(start),
        }
    }

    /// Check that the ring is doubly linked and reaches every live process.
    pub fn ring_is_consistent(&self) -> bool {
        let Some(start) = self.live_ids().next() else {
            return self.len == 0;
        };
        let mut visited = 0;
        let mut id = start;
        loop {
            let Some(process) = self.get(id) else {
                return false;
            };
            if self.get(process.next).map(Process::prev) != Some(id) {
                return false;
            }
            visited += 1;
            if visited > self.len {
                return false;
            }
            id = process.next;
            if id == start {
                break;
            }
        }
        visited == self.len
    }

    fn live_ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.process
                .as_ref()
                .map(|_| ProcessId::from_parts(index as u16, slot.generation))
        })
    }
}

pub struct RingIter<'a> {
    table: &'a ProcessTable,
    start: ProcessId,
    next: Option<ProcessId>,
}

impl Iterator for RingIter<'_> {
    type Item = ProcessId;

    fn next(&mut self) -> Option<ProcessId> {
        let current = self.next?;
        self.next = self
            .table
            .next_of(current)
            .filter(|&following| following != self.start);
        Some(current)
    }
}
