//! Viewport culling and snapshot building.

use crate::entity::{Entity, VIRUS_HUE};
use crate::lobby::LobbyManager;
use crate::player::Player;
use crate::world::World;
use glam::Vec2;
use protocol::packets::ServerPacket;
use protocol::{CellView, EntityView, PlayerView};

/// Non-food entities count as this much larger when culled.
const VISIBILITY_SLACK: f32 = 1.1;

/// Axis-aligned view rectangle.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub min: Vec2,
    pub max: Vec2,
}

impl Viewport {
    /// Rectangle centred on `center` for a screen at the given zoom.
    pub fn new(center: Vec2, screen_width: f32, screen_height: f32, zoom: f32) -> Self {
        let zoom = zoom.max(f32::EPSILON);
        let half = Vec2::new(screen_width / 2.0 / zoom, screen_height / 2.0 / zoom);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Whether a square of half-size `half` around `position` overlaps the view.
    #[inline]
    pub fn overlaps(&self, position: Vec2, half: f32) -> bool {
        position.x + half >= self.min.x
            && position.x - half <= self.max.x
            && position.y + half >= self.min.y
            && position.y - half <= self.max.y
    }

    pub fn for_player(player: &Player) -> Self {
        Self::new(
            player.centroid,
            player.screen_width,
            player.screen_height,
            player.view_scale(),
        )
    }
}

/// Who a snapshot is built for.
#[derive(Debug, Clone, Copy)]
pub enum Viewer<'a> {
    /// A player sees their own lobby through their viewport.
    Player { world: &'a World, player: &'a Player },
    /// A spectator sees every lobby whole, centred on the world.
    Spectator { lobbies: &'a LobbyManager, center: Vec2 },
}

impl Viewer<'_> {
    pub fn snapshot(&self) -> ServerPacket {
        match *self {
            Viewer::Player { world, player } => {
                let view = Viewport::for_player(player);
                let mut players = Vec::new();
                let mut food = Vec::new();
                let mut mass = Vec::new();
                let mut viruses = Vec::new();
                collect_world(world, Some(&view), Some(player.id), &mut players, &mut food, &mut mass, &mut viruses);
                ServerPacket::Snapshot {
                    me: player_view(player),
                    players,
                    food,
                    mass,
                    viruses,
                }
            }
            Viewer::Spectator { lobbies, center } => {
                let mut players = Vec::new();
                let mut food = Vec::new();
                let mut mass = Vec::new();
                let mut viruses = Vec::new();
                for (_, world) in lobbies.iter() {
                    collect_world(world, None, None, &mut players, &mut food, &mut mass, &mut viruses);
                }
                ServerPacket::Snapshot {
                    me: spectator_view(center),
                    players,
                    food,
                    mass,
                    viruses,
                }
            }
        }
    }
}

fn collect_world(
    world: &World,
    view: Option<&Viewport>,
    skip: Option<u32>,
    players: &mut Vec<PlayerView>,
    food: &mut Vec<EntityView>,
    mass: &mut Vec<EntityView>,
    viruses: &mut Vec<EntityView>,
) {
    let visible = |position: Vec2, half: f32| view.is_none_or(|v| v.overlaps(position, half));

    for other in &world.players {
        if Some(other.id) == skip || !other.is_alive() {
            continue;
        }
        if other
            .cells
            .iter()
            .any(|c| visible(c.position, c.radius() * VISIBILITY_SLACK))
        {
            players.push(player_view(other));
        }
    }
    food.extend(
        world
            .food
            .iter()
            .filter(|f| visible(f.position, f.radius()))
            .map(|f| entity_view(f, f.hue)),
    );
    mass.extend(
        world
            .blobs
            .iter()
            .filter(|b| visible(b.position, b.radius() * VISIBILITY_SLACK))
            .map(|b| entity_view(b, b.hue)),
    );
    viruses.extend(
        world
            .viruses
            .iter()
            .filter(|v| visible(v.position, v.radius() * VISIBILITY_SLACK))
            .map(|v| entity_view(v, VIRUS_HUE)),
    );
}

fn entity_view(e: &impl Entity, hue: u16) -> EntityView {
    let p = e.position();
    EntityView {
        x: p.x,
        y: p.y,
        radius: e.radius(),
        mass: e.mass(),
        hue,
    }
}

/// Public state of a player.
pub fn player_view(p: &Player) -> PlayerView {
    PlayerView {
        id: p.id,
        name: p.name.clone(),
        hue: p.hue,
        x: p.centroid.x,
        y: p.centroid.y,
        mass_total: p.mass_total().round().max(0.0) as u32,
        escrow_balance: p.escrow_balance,
        wallet_balance: p.wallet_balance,
        cells: p
            .cells
            .iter()
            .map(|c| CellView {
                x: c.position.x,
                y: c.position.y,
                mass: c.mass(),
                radius: c.radius(),
            })
            .collect(),
    }
}

fn spectator_view(center: Vec2) -> PlayerView {
    PlayerView {
        id: 0,
        name: String::new(),
        hue: 0,
        x: center.x,
        y: center.y,
        mass_total: 0,
        escrow_balance: 0,
        wallet_balance: 0,
        cells: Vec::new(),
    }
}
