//! Collision and consumption rules.

use crate::entity::{Cell, CellId, Entity, EntityId, Food, MassBlob, Registry, Virus};
use crate::player::Player;
use fixedbitset::FixedBitSet;
use std::collections::HashSet;

/// Blob ratio rule: the cell must exceed the blob by the predation ratio.
#[inline]
pub fn can_eat_blob(cell_mass: f32, blob_mass: f32, ratio: f32) -> bool {
    cell_mass > blob_mass * ratio
}

/// A virus is only eaten by a strictly heavier cell.
#[inline]
pub fn can_eat_virus(cell_mass: f32, virus_mass: f32) -> bool {
    cell_mass > virus_mass
}

/// Cell-vs-cell rule: the victim's centre lies in the eater and the eater is
/// heavier by the predation ratio.
#[inline]
pub fn can_consume(eater: &Cell, victim: &Cell, ratio: f32) -> bool {
    eater.mass() > victim.mass() * ratio && eater.contains_point(victim.position)
}

/// Everything one player's cells picked up in a tick.
#[derive(Debug, Default)]
pub struct Pickups {
    pub food: Vec<EntityId>,
    pub blobs: Vec<EntityId>,
    pub viruses: Vec<EntityId>,
    /// Mass gained per cell slot.
    pub gains: Vec<(usize, f32)>,
    /// Cells that ate a virus, once each.
    pub virus_slots: Vec<usize>,
}

impl Pickups {
    pub fn is_empty(&self) -> bool {
        self.food.is_empty() && self.blobs.is_empty() && self.viruses.is_empty()
    }
}

/// Scan food, blobs and viruses under each of the player's cells.
/// An entity under several cells goes to the first one.
pub fn collect_pickups(
    player: &Player,
    food: &Registry<Food>,
    blobs: &Registry<MassBlob>,
    viruses: &Registry<Virus>,
    ratio: f32,
) -> Pickups {
    let mut out = Pickups::default();
    // Ids are only unique within one registry.
    let mut food_claimed: HashSet<EntityId> = HashSet::new();
    let mut blobs_claimed: HashSet<EntityId> = HashSet::new();
    let mut viruses_claimed: HashSet<EntityId> = HashSet::new();

    for (slot, cell) in player.cells.iter().enumerate() {
        let mut gain = 0.0;

        for id in food.ids_in_circle(cell.position, cell.radius(), |_| true) {
            if food_claimed.insert(id) {
                gain += food.get(id).map_or(0.0, Entity::mass);
                out.food.push(id);
            }
        }

        let edible_blob = |b: &MassBlob| {
            !b.shields(player.id, cell.id) && can_eat_blob(cell.mass(), b.mass, ratio)
        };
        for id in blobs.ids_in_circle(cell.position, cell.radius(), edible_blob) {
            if blobs_claimed.insert(id) {
                gain += blobs.get(id).map_or(0.0, Entity::mass);
                out.blobs.push(id);
            }
        }

        let mut ate_virus = false;
        for id in viruses.ids_in_circle(cell.position, cell.radius(), |v| can_eat_virus(cell.mass(), v.mass)) {
            if viruses_claimed.insert(id) {
                out.viruses.push(id);
                ate_virus = true;
            }
        }
        if ate_virus {
            out.virus_slots.push(slot);
        }

        if gain > 0.0 {
            out.gains.push((slot, gain));
        }
    }
    out
}

/// One cell eating another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub eater: u32,
    pub eater_cell: CellId,
    pub victim: u32,
    pub victim_cell: CellId,
}

/// Find every cross-player consumption in a lobby. Each victim appears at most
/// once and a consumed cell does not eat afterwards.
pub fn find_predation(players: &[Player], ratio: f32) -> Vec<Consumption> {
    let flat: Vec<(usize, &Cell)> = players
        .iter()
        .enumerate()
        .flat_map(|(pi, p)| p.cells.iter().map(move |c| (pi, c)))
        .collect();

    let mut consumed = FixedBitSet::with_capacity(flat.len());
    let mut events = Vec::new();

    for (i, &(eater_owner, eater)) in flat.iter().enumerate() {
        if consumed.contains(i) {
            continue;
        }
        for (j, &(victim_owner, victim)) in flat.iter().enumerate() {
            if victim_owner == eater_owner || consumed.contains(j) {
                continue;
            }
            if can_consume(eater, victim, ratio) {
                consumed.insert(j);
                events.push(Consumption {
                    eater: players[eater_owner].id,
                    eater_cell: eater.id,
                    victim: players[victim_owner].id,
                    victim_cell: victim.id,
                });
            }
        }
    }
    events
}
