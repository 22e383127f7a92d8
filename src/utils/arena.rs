//! Generational slot storage
//!
//! Objects of the core (surfaces, regions, buffers, pixmaps, clients) live in
//! [`Arena`]s and are referred to by small copyable keys. A key carries the
//! generation of the slot it was issued for: once the object is removed, the
//! slot is reused with a new generation, and the stale key resolves to nothing.

use std::collections::TryReserveError;
use std::fmt;
use std::marker::PhantomData;

/// Key types usable with an [`Arena`]
pub trait ArenaKey: Copy + Eq + fmt::Debug {
    /// Build a key from its slot index and generation
    fn from_parts(index: u32, generation: u32) -> Self;
    /// Slot index of this key
    fn index(&self) -> u32;
    /// Generation of this key
    fn generation(&self) -> u32;
}

macro_rules! arena_key {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::utils::arena::ArenaKey for $name {
            #[inline]
            fn from_parts(index: u32, generation: u32) -> Self {
                $name { index, generation }
            }

            #[inline]
            fn index(&self) -> u32 {
                self.index
            }

            #[inline]
            fn generation(&self) -> u32 {
                self.generation
            }
        }
    };
}

pub(crate) use arena_key;

#[derive(Debug)]
enum Slot<V> {
    Occupied { generation: u32, value: V },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Storage of values addressed by generational keys
pub struct Arena<K, V> {
    slots: Vec<Slot<V>>,
    free_head: Option<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K, V: fmt::Debug> fmt::Debug for Arena<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("len", &self.len)
            .field("slots", &self.slots)
            .finish()
    }
}

impl<K, V> Default for Arena<K, V> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            _key: PhantomData,
        }
    }
}

impl<K: ArenaKey, V> Arena<K, V> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no live value
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value, reporting allocation failure instead of aborting
    pub fn try_insert(&mut self, value: V) -> Result<K, TryReserveError> {
        self.try_insert_with(|_| value)
    }

    /// Insert a value built from its own key
    pub fn try_insert_with(&mut self, f: impl FnOnce(K) -> V) -> Result<K, TryReserveError> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match *slot {
                Slot::Vacant { generation, next_free } => (generation, next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            let key = K::from_parts(index, generation);
            *slot = Slot::Occupied {
                generation,
                value: f(key),
            };
            self.free_head = next_free;
            self.len += 1;
            return Ok(key);
        }

        self.slots.try_reserve(1)?;
        let index = self.slots.len() as u32;
        let key = K::from_parts(index, 0);
        self.slots.push(Slot::Occupied {
            generation: 0,
            value: f(key),
        });
        self.len += 1;
        Ok(key)
    }

    /// Remove the value of a key, if it is still alive
    pub fn remove(&mut self, key: K) -> Option<V> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation() => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: key.generation().wrapping_add(1),
            next_free: self.free_head,
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(key.index());
        self.len -= 1;
        Some(value)
    }

    /// Whether a key still refers to a live value
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Access the value of a key
    pub fn get(&self, key: K) -> Option<&V> {
        match self.slots.get(key.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation() => Some(value),
            _ => None,
        }
    }

    /// Mutably access the value of a key
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        match self.slots.get_mut(key.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation() => Some(value),
            _ => None,
        }
    }

    /// Iterate over live keys and values, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, value } => Some((K::from_parts(index as u32, *generation), value)),
            Slot::Vacant { .. } => None,
        })
    }

    /// Iterate mutably over live keys and values, in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((K::from_parts(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Collect the live keys
    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(key, _)| key).collect()
    }
}
