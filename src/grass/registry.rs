//! Registries of enabled obstacles and surfaces.
//!
//! An entity is in its registry exactly while it is enabled. Adding and
//! removing are the only membership changes; iteration follows insertion
//! order so encoder output is deterministic.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::grass::obstacle::Obstacle;
use crate::grass::surface::Surface;

/// Stable id of a registered entity. Ids are never reused.
pub struct EntityId<T> {
    raw: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> EntityId<T> {
    fn new(raw: u64) -> Self {
        Self { raw, _kind: PhantomData }
    }

    pub fn raw(self) -> u64 {
        self.raw
    }
}

impl<T> Clone for EntityId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityId<T> {}

impl<T> PartialEq for EntityId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for EntityId<T> {}

impl<T> Hash for EntityId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for EntityId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.raw)
    }
}

pub type ObstacleId = EntityId<Obstacle>;
pub type SurfaceId = EntityId<Surface>;

/// Insertion-ordered set of enabled entities of one kind.
#[derive(Debug)]
pub struct Registry<T> {
    entries: Vec<(EntityId<T>, T)>,
    next_id: u64,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Register an entity on enable
    pub fn add(&mut self, entity: T) -> EntityId<T> {
        self.next_id += 1;
        let id = EntityId::new(self.next_id);
        self.entries.push((id, entity));
        id
    }

    /// Deregister an entity on disable, handing it back
    pub fn remove(&mut self, id: EntityId<T>) -> Option<T> {
        let pos = self.entries.iter().position(|(e, _)| *e == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, id: EntityId<T>) -> Option<&T> {
        self.entries.iter().find(|(e, _)| *e == id).map(|(_, t)| t)
    }

    /// Edit an entity in place. Membership is unchanged.
    pub fn get_mut(&mut self, id: EntityId<T>) -> Option<&mut T> {
        self.entries.iter_mut().find(|(e, _)| *e == id).map(|(_, t)| t)
    }

    pub fn contains(&self, id: EntityId<T>) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId<T>, &T)> {
        self.entries.iter().map(|(id, t)| (*id, t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the encoder draws
#[derive(Debug, Default)]
pub struct SceneRegistry {
    pub obstacles: Registry<Obstacle>,
    pub surfaces: Registry<Surface>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
