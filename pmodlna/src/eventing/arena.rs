//! Arène d'abonnements à clés générationnelles.
//!
//! Les notifications en attente pointent vers leur abonnement sans le
//! maintenir en vie : une clé `(index, generation)` devient muette dès que
//! l'abonnement est retiré, et l'entrée correspondante est abandonnée.

use super::device::Subscription;

/// Clé stable d'un abonnement dans l'arène.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubKey {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Subscription>,
}

/// Arène de slots réutilisables.
///
/// Un slot libéré voit sa génération incrémentée, ce qui invalide les
/// anciennes clés sans risque de confusion avec un nouvel occupant.
#[derive(Debug, Default)]
pub struct SubscriptionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    occupied: usize,
}

impl SubscriptionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subscription: Subscription) -> SubKey {
        self.occupied += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(subscription);
            return SubKey {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(subscription),
        });
        SubKey {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, key: SubKey) -> Option<&Subscription> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, key: SubKey) -> Option<&mut Subscription> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Retire l'abonnement et invalide sa clé.
    pub fn remove(&mut self, key: SubKey) -> Option<Subscription> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.occupied -= 1;
        Some(entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubKey, &Subscription)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    SubKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SubKey, &mut Subscription)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.entry.as_mut().map(move |entry| {
                (
                    SubKey {
                        index: index as u32,
                        generation,
                    },
                    entry,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }
}
