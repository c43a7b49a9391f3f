//! Collaborator capabilities consumed by the gateway.

pub mod sector_lookup;

pub use sector_lookup::SectorLookup;
