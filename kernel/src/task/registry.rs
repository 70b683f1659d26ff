//! Thread arena and the four scheduler lists.
//!
//! Threads live in a slot arena addressed by generation-checked handles. The
//! ready, blocked, sleeping and trash lists are doubly linked through the
//! slots themselves, so every insert and remove is O(1) and a thread can be
//! on at most one list. A slot is only recycled after its thread has been
//! delisted and freed; handles to the old occupant are then rejected.

use alloc::vec::Vec;

use crate::error::ListError;
use crate::task::thread::{Thread, ThreadState, Tid};

/// Stable reference to a thread in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadHandle {
    index: u32,
    generation: u32,
}

/// The four scheduler lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Ready,
    Blocked,
    Sleeping,
    Trash,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [
        ListKind::Ready,
        ListKind::Blocked,
        ListKind::Sleeping,
        ListKind::Trash,
    ];

    /// List a thread in `state` must be on.
    pub fn for_state(state: ThreadState) -> Self {
        match state {
            ThreadState::Ready | ThreadState::Running => ListKind::Ready,
            ThreadState::Blocked => ListKind::Blocked,
            ThreadState::Sleeping => ListKind::Sleeping,
            ThreadState::Trash => ListKind::Trash,
        }
    }

    fn resting_state(self) -> ThreadState {
        match self {
            ListKind::Ready => ThreadState::Ready,
            ListKind::Blocked => ThreadState::Blocked,
            ListKind::Sleeping => ThreadState::Sleeping,
            ListKind::Trash => ThreadState::Trash,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Links {
    prev: Option<u32>,
    next: Option<u32>,
    list: Option<ListKind>,
}

#[derive(Debug)]
struct Entry {
    thread: Thread,
    links: Links,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ListHead {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    lists: [ListHead; 4],
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `thread` in the arena, unlinked.
    pub fn add(&mut self, thread: Thread) -> ThreadHandle {
        let entry = Entry {
            thread,
            links: Links::default(),
        };
        match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ThreadHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ThreadHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn entry(&self, handle: ThreadHandle) -> Option<&Entry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, handle: ThreadHandle) -> Option<&mut Entry> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    // Only called with indices taken from live links.
    fn links_mut(&mut self, index: u32) -> Option<&mut Links> {
        self.slots
            .get_mut(index as usize)
            .and_then(|slot| slot.entry.as_mut())
            .map(|entry| &mut entry.links)
    }

    fn handle_at(&self, index: u32) -> Option<ThreadHandle> {
        let slot = self.slots.get(index as usize)?;
        slot.entry.as_ref().map(|_| ThreadHandle {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, handle: ThreadHandle) -> Option<&Thread> {
        self.entry(handle).map(|entry| &entry.thread)
    }

    pub fn get_mut(&mut self, handle: ThreadHandle) -> Option<&mut Thread> {
        self.entry_mut(handle).map(|entry| &mut entry.thread)
    }

    pub fn contains(&self, handle: ThreadHandle) -> bool {
        self.entry(handle).is_some()
    }

    /// Handle of the live thread with id `tid`.
    pub fn find(&self, tid: Tid) -> Option<ThreadHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .filter(|entry| entry.thread.id == tid)
                .map(|_| ThreadHandle {
                    index: index as u32,
                    generation: slot.generation,
                })
        })
    }

    /// List `handle` is currently linked on.
    pub fn list_of(&self, handle: ThreadHandle) -> Option<ListKind> {
        self.entry(handle).and_then(|entry| entry.links.list)
    }

    pub fn len(&self, list: ListKind) -> usize {
        self.lists[list.slot()].len
    }

    pub fn is_empty(&self, list: ListKind) -> bool {
        self.len(list) == 0
    }

    pub fn head(&self, list: ListKind) -> Option<ThreadHandle> {
        self.lists[list.slot()].head.and_then(|i| self.handle_at(i))
    }

    pub fn tail(&self, list: ListKind) -> Option<ThreadHandle> {
        self.lists[list.slot()].tail.and_then(|i| self.handle_at(i))
    }

    /// Successor of `handle` on whatever list it is on.
    pub fn next_in(&self, handle: ThreadHandle) -> Option<ThreadHandle> {
        self.entry(handle)
            .and_then(|entry| entry.links.next)
            .and_then(|i| self.handle_at(i))
    }

    pub fn prev_in(&self, handle: ThreadHandle) -> Option<ThreadHandle> {
        self.entry(handle)
            .and_then(|entry| entry.links.prev)
            .and_then(|i| self.handle_at(i))
    }

    /// Walk `list` from head to tail.
    pub fn iter(&self, list: ListKind) -> ListIter<'_> {
        ListIter {
            registry: self,
            next: self.head(list),
        }
    }

    /// Append `handle` to the tail of `list`.
    ///
    /// The thread's state is brought in line with the list when the two
    /// disagree.
    pub fn insert(&mut self, list: ListKind, handle: ThreadHandle) -> Result<(), ListError> {
        let old_tail = self.lists[list.slot()].tail;
        let entry = self.entry_mut(handle).ok_or(ListError::StaleHandle)?;
        if entry.links.list.is_some() {
            return Err(ListError::AlreadyLinked);
        }

        entry.links = Links {
            prev: old_tail,
            next: None,
            list: Some(list),
        };
        if ListKind::for_state(entry.thread.state) != list {
            entry.thread.state = list.resting_state();
        }

        match old_tail {
            Some(tail) => {
                if let Some(links) = self.links_mut(tail) {
                    links.next = Some(handle.index);
                }
            }
            None => self.lists[list.slot()].head = Some(handle.index),
        }
        let head = &mut self.lists[list.slot()];
        head.tail = Some(handle.index);
        head.len += 1;
        Ok(())
    }

    /// Splice `handle` out of `list`. Never frees.
    ///
    /// Removing from an empty list does nothing. Removing a thread that is
    /// not on a non-empty `list` is a caller bug.
    pub fn remove(&mut self, list: ListKind, handle: ThreadHandle) -> Result<(), ListError> {
        let links = self.entry(handle).ok_or(ListError::StaleHandle)?.links;
        if self.is_empty(list) {
            return Ok(());
        }
        if links.list != Some(list) {
            debug_assert!(false, "thread {:?} is not on the {:?} list", handle, list);
            log::warn!("remove: thread {:?} not on {:?} list", handle, list);
            return Err(ListError::NotMember);
        }

        match links.prev {
            Some(prev) => {
                if let Some(l) = self.links_mut(prev) {
                    l.next = links.next;
                }
            }
            None => self.lists[list.slot()].head = links.next,
        }
        match links.next {
            Some(next) => {
                if let Some(l) = self.links_mut(next) {
                    l.prev = links.prev;
                }
            }
            None => self.lists[list.slot()].tail = links.prev,
        }
        self.lists[list.slot()].len -= 1;

        if let Some(entry) = self.entry_mut(handle) {
            entry.links = Links::default();
        }
        Ok(())
    }

    /// Set the thread's state and move it onto the matching list.
    pub fn transition(&mut self, handle: ThreadHandle, state: ThreadState) -> Result<(), ListError> {
        let current = self.list_of(handle);
        let target = ListKind::for_state(state);
        let entry = self.entry_mut(handle).ok_or(ListError::StaleHandle)?;

        if current == Some(target) {
            entry.thread.state = state;
            return Ok(());
        }
        if let Some(list) = current {
            self.remove(list, handle)?;
        }
        if let Some(entry) = self.entry_mut(handle) {
            entry.thread.state = state;
        }
        self.insert(target, handle)
    }

    /// Drop an unlinked thread from the arena and hand it back.
    pub fn free(&mut self, handle: ThreadHandle) -> Result<Thread, ListError> {
        let entry = self.entry(handle).ok_or(ListError::StaleHandle)?;
        if entry.links.list.is_some() {
            return Err(ListError::AlreadyLinked);
        }

        let slot = &mut self.slots[handle.index as usize];
        let entry = slot.entry.take().ok_or(ListError::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        Ok(entry.thread)
    }

    /// Delist a trashed thread and free it.
    pub fn reap(&mut self, handle: ThreadHandle) -> Result<Thread, ListError> {
        if self.list_of(handle) != Some(ListKind::Trash) {
            return Err(if self.contains(handle) {
                ListError::NotMember
            } else {
                ListError::StaleHandle
            });
        }
        self.remove(ListKind::Trash, handle)?;
        self.free(handle)
    }

    /// Verify head/tail/neighbour links and state/list agreement.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        let mut seen = 0;
        for list in ListKind::ALL {
            let head = self.lists[list.slot()];
            let mut prev: Option<ThreadHandle> = None;
            let mut count = 0;
            for handle in self.iter(list) {
                let entry = self.entry(handle).unwrap();
                assert_eq!(entry.links.list, Some(list));
                assert_eq!(ListKind::for_state(entry.thread.state), list);
                assert_eq!(entry.links.prev, prev.map(|p| p.index));
                prev = Some(handle);
                count += 1;
                assert!(count <= self.slots.len(), "cycle on {:?}", list);
            }
            assert_eq!(count, head.len);
            assert_eq!(head.tail, prev.map(|p| p.index));
            assert_eq!(head.head.is_none(), head.len == 0);
            seen += count;
        }
        let linked = self
            .slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .filter(|e| e.links.list.is_some())
            .count();
        assert_eq!(seen, linked, "a thread is on more than one list");
    }
}

pub struct ListIter<'a> {
    registry: &'a ThreadRegistry,
    next: Option<ThreadHandle>,
}

impl Iterator for ListIter<'_> {
    type Item = ThreadHandle;

    fn next(&mut self) -> Option<ThreadHandle> {
        let current = self.next?;
        self.next = self.registry.next_in(current);
        Some(current)
    }
}
