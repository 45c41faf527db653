//! Particle contact network built from saddle-point records.
//!
//! Each saddle (2-saddle critical point) of the distance field marks a contact
//! between two particles. The contact file stores one row per saddle; this
//! module turns those rows into an undirected adjacency mapping and derives the
//! views that the statistics pipelines and the extremum graph need:
//!
//! - [`ContactNetwork`]: particle id -> raw contact records (no deduplication)
//! - [`ContactNetwork::strongest_contacts`]: one record per neighbour, keeping
//!   the saddle with the largest distance value
//! - [`saddle_contact_ids`]: saddle id -> particles touching it
//! - [`extremum_graph`]: strongest saddles paired with neighbour maxima

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::warn;
use nalgebra::Point3;

use crate::error::{Result, StatsError};

pub type ParticleId = i64;
pub type SaddleId = i64;


/// One row of the contact file: a saddle linking two particles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSaddle {
    pub contact_id: SaddleId,
    pub max_1: ParticleId,
    pub max_2: ParticleId,
    pub position: Point3<f64>,
    pub value: f64,
}

/// A saddle contact seen from one of the two particles it links.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactRecord {
    pub contact_id: SaddleId,
    pub position: Point3<f64>,
    pub owner_id: ParticleId,
    pub sibling_id: ParticleId,
    pub distance_value: f64,
}

/// Adjacency mapping from particle id to the contact records it owns.
///
/// Built once and read-only afterwards, so it can be shared across worker
/// tasks behind an `Arc` without locking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactNetwork {
    adjacency: BTreeMap<ParticleId, Vec<ContactRecord>>,
}

impl ContactNetwork {
    /// Builds the network from raw saddle rows. Every row yields two mirrored
    /// records; multiple saddles between the same pair are all kept.
    pub fn build(raw: &[RawSaddle]) -> Self {
        let mut adjacency: BTreeMap<ParticleId, Vec<ContactRecord>> = BTreeMap::new();

        for row in raw {
            let forward = ContactRecord {
                contact_id: row.contact_id,
                position: row.position,
                owner_id: row.max_1,
                sibling_id: row.max_2,
                distance_value: row.value,
            };
            let backward = ContactRecord {
                owner_id: row.max_2,
                sibling_id: row.max_1,
                ..forward
            };

            adjacency.entry(row.max_1).or_default().push(forward);
            adjacency.entry(row.max_2).or_default().push(backward);
        }

        Self { adjacency }
    }

    /// Raw contact records owned by `particle`, in input order.
    pub fn contacts(&self, particle: ParticleId) -> &[ContactRecord] {
        self.adjacency
            .get(&particle)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, particle: ParticleId) -> bool {
        self.adjacency.contains_key(&particle)
    }

    pub fn particle_ids(&self) -> impl Iterator<Item = ParticleId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn num_particles(&self) -> usize {
        self.adjacency.len()
    }

    pub fn num_records(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    /// Distinct sibling ids of `particle`.
    pub fn neighbours(&self, particle: ParticleId) -> BTreeSet<ParticleId> {
        self.contacts(particle)
            .iter()
            .map(|record| record.sibling_id)
            .collect()
    }

    /// Number of distinct neighbouring particles.
    pub fn coordination_number(&self, particle: ParticleId) -> usize {
        self.neighbours(particle).len()
    }

    /// One record per sibling: the saddle with the largest distance value.
    ///
    /// Replacement happens only on a strictly larger value, so among equal
    /// values the first one encountered is kept. Siblings appear in the order
    /// they were first seen.
    pub fn strongest_contacts(&self, particle: ParticleId) -> Vec<ContactRecord> {
        let mut slots: HashMap<ParticleId, usize> = HashMap::new();
        let mut strongest: Vec<ContactRecord> = Vec::new();

        for record in self.contacts(particle) {
            match slots.get(&record.sibling_id) {
                Some(&slot) => {
                    if record.distance_value > strongest[slot].distance_value {
                        strongest[slot] = *record;
                    }
                }
                None => {
                    slots.insert(record.sibling_id, strongest.len());
                    strongest.push(*record);
                }
            }
        }

        strongest
    }

    /// The network with every (owner, sibling) pair reduced to its strongest saddle.
    pub fn deduplicated(&self) -> ContactNetwork {
        let adjacency = self
            .adjacency
            .keys()
            .map(|&particle| (particle, self.strongest_contacts(particle)))
            .collect();
        ContactNetwork { adjacency }
    }

    /// Connected components of the contact graph, each sorted, ordered by
    /// their smallest particle id.
    pub fn connected_components(&self) -> Vec<BTreeSet<ParticleId>> {
        let mut visited: BTreeSet<ParticleId> = BTreeSet::new();
        let mut components = Vec::new();

        for start in self.particle_ids() {
            if !visited.insert(start) {
                continue;
            }
            let mut component = BTreeSet::from([start]);
            let mut stack = vec![start];
            while let Some(current) = stack.pop() {
                for record in self.contacts(current) {
                    if visited.insert(record.sibling_id) {
                        component.insert(record.sibling_id);
                        stack.push(record.sibling_id);
                    }
                }
            }
            components.push(component);
        }

        components
    }
}

/// Groups saddle rows by saddle id, collecting the particles touching each saddle.
pub fn saddle_contact_ids(raw: &[RawSaddle]) -> BTreeMap<SaddleId, BTreeSet<ParticleId>> {
    let mut groups: BTreeMap<SaddleId, BTreeSet<ParticleId>> = BTreeMap::new();
    for row in raw {
        let particles = groups.entry(row.contact_id).or_default();
        particles.insert(row.max_1);
        particles.insert(row.max_2);
    }

    for (saddle, particles) in &groups {
        if particles.len() != 2 {
            warn!(
                "saddle {} touches {} particles (expected 2)",
                saddle,
                particles.len()
            );
        }
    }

    groups
}

/// Particle maxima (core) positions keyed by particle id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaximaTable {
    positions: BTreeMap<ParticleId, Point3<f64>>,
}

impl MaximaTable {
    /// Keeps the first point of each particle's group, matching how the maxima
    /// file stores one point per particle.
    pub fn from_groups(groups: &BTreeMap<ParticleId, Vec<Point3<f64>>>) -> Self {
        let positions = groups
            .iter()
            .filter_map(|(&id, points)| points.first().map(|p| (id, *p)))
            .collect();
        Self { positions }
    }

    pub fn insert(&mut self, particle: ParticleId, position: Point3<f64>) {
        self.positions.insert(particle, position);
    }

    pub fn position(&self, particle: ParticleId) -> Result<Point3<f64>> {
        self.positions
            .get(&particle)
            .copied()
            .ok_or(StatsError::Lookup {
                table: "maxima",
                id: particle,
            })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// An edge of the extremum graph: root maximum -> saddle -> neighbour maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremumEdge {
    pub neighbour: ParticleId,
    pub saddle: ContactRecord,
    pub neighbour_maximum: Point3<f64>,
}

/// Extremum graph around `root`, one edge per neighbour through its strongest saddle.
///
/// Fails with [`StatsError::Lookup`] if a neighbour has no maxima position; the
/// id is never corrected.
pub fn extremum_graph(
    network: &ContactNetwork,
    root: ParticleId,
    maxima: &MaximaTable,
) -> Result<Vec<ExtremumEdge>> {
    network
        .strongest_contacts(root)
        .into_iter()
        .map(|saddle| {
            Ok(ExtremumEdge {
                neighbour: saddle.sibling_id,
                saddle,
                neighbour_maximum: maxima.position(saddle.sibling_id)?,
            })
        })
        .collect()
}
