//! World entities: player cells and the registry-backed food, virus and mass blob kinds.

mod cell;
mod food;
mod mass_blob;
mod placement;
mod registry;
mod virus;

pub use cell::{mass_to_radius, Boost, Cell, CellId, MASS_FLOOR};
pub use food::Food;
pub use mass_blob::MassBlob;
pub use placement::choose_position;
pub use registry::{Entity, EntityId, Registry};
pub use virus::{Virus, VIRUS_HUE};
