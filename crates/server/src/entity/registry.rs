//! Dense entity storage addressed by stable ids.

use glam::Vec2;
use std::collections::HashMap;

/// Stable handle of a registry entity. Never reused while the registry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

/// Common view over food, viruses and mass blobs.
pub trait Entity {
    fn id(&self) -> EntityId;
    fn position(&self) -> Vec2;
    fn radius(&self) -> f32;
    fn mass(&self) -> f32;
}

/// Capacity is not enforced here: callers (the mass balancer) decide how many
/// entities may exist.
#[derive(Debug)]
pub struct Registry<T> {
    items: Vec<T>,
    /// Position tracking for O(1) removal.
    index: HashMap<EntityId, usize>,
    next_id: u32,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<T: Entity> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id.
    pub fn next_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1; // Skip 0
        }
        EntityId(id)
    }

    pub fn insert(&mut self, item: T) -> EntityId {
        let id = item.id();
        let pos = self.items.len();
        self.items.push(item);
        self.index.insert(id, pos);
        id
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.index.get(&id).map(|&pos| &self.items[pos])
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    /// Remove one entity (O(1) swap-remove).
    pub fn remove_one(&mut self, id: EntityId) -> Option<T> {
        let pos = self.index.remove(&id)?;
        let last_pos = self.items.len() - 1;
        if pos != last_pos {
            let swapped_id = self.items[last_pos].id();
            self.items.swap(pos, last_pos);
            self.index.insert(swapped_id, pos);
        }
        self.items.pop()
    }

    /// Remove every listed id that is still present; returns how many went.
    pub fn remove(&mut self, ids: &[EntityId]) -> usize {
        ids.iter().filter(|&&id| self.remove_one(id).is_some()).count()
    }

    /// Drop up to `n` entities from the end of the storage.
    pub fn remove_excess(&mut self, n: usize) -> usize {
        let mut removed = 0;
        while removed < n {
            match self.items.pop() {
                Some(item) => {
                    self.index.remove(&item.id());
                    removed += 1;
                }
                None => break,
            }
        }
        removed
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn positions(&self) -> Vec<Vec2> {
        self.items.iter().map(Entity::position).collect()
    }

    /// Ids of entities whose centre lies inside the circle and pass `filter`.
    pub fn ids_in_circle(
        &self,
        center: Vec2,
        radius: f32,
        mut filter: impl FnMut(&T) -> bool,
    ) -> Vec<EntityId> {
        let r2 = radius * radius;
        self.items
            .iter()
            .filter(|e| e.position().distance_squared(center) <= r2 && filter(e))
            .map(Entity::id)
            .collect()
    }
}
