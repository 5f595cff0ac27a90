//! Core simulation state for the Verdant ecosystem.
//!
//! The engine owns a population of plants and herbivores, a day/night
//! environmental clock, and a uniform-grid spatial index. The host drives it
//! with one [`EcosystemManager::tick`] call per frame; everything else
//! (rendering, audio, input translation) lives outside this crate and talks
//! to the manager through its query/mutation surface and the
//! [`LifecycleObserver`] sink.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use verdant_index::{IndexError, UniformGrid};

new_key_type! {
    /// Stable handle for organisms backed by a generational slot map.
    pub struct OrganismId;
}

/// Errors raised when constructing or reconfiguring the ecosystem.
#[derive(Debug, Error)]
pub enum EcosystemError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Spatial index rejected its configuration.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Lineage counter (organisms produced by reproduction increment this).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Generation(pub u32);

impl Generation {
    /// Advances to the next lineage generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Axis-aligned 3D position in world space.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared Euclidean distance to `other`.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Component array, in the layout the spatial index consumes.
    #[must_use]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Day/night state recomputed once per tick from elapsed simulated time.
///
/// No other component mutates this mid-tick; organisms receive it by
/// reference during their update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentalFactors {
    /// Whether the current day phase is in the daylight half.
    pub is_day_time: bool,
    /// Continuous brightness in `[0, 1]`, peak at dawn, trough at midnight.
    pub light_level: f32,
    /// Simulated seconds per full day/night cycle.
    pub day_length: f32,
    /// Simulated seconds since the world was created.
    pub elapsed_time: f32,
}

impl EnvironmentalFactors {
    fn new(day_length: f32) -> Self {
        Self {
            is_day_time: true,
            light_level: 1.0,
            day_length,
            elapsed_time: 0.0,
        }
    }

    fn advance(&mut self, delta_time: f32) {
        self.elapsed_time += delta_time;
        let phase = self.day_phase();
        self.is_day_time = phase < 0.5;
        self.light_level = (phase * std::f32::consts::TAU).cos() * 0.5 + 0.5;
    }

    /// Fraction of the current day cycle elapsed, in `[0, 1)`.
    #[must_use]
    pub fn day_phase(&self) -> f32 {
        (self.elapsed_time % self.day_length) / self.day_length
    }

    /// Movement scale applied to herbivores: full speed by day, half by night.
    #[must_use]
    pub const fn day_multiplier(&self) -> f32 {
        if self.is_day_time { 1.0 } else { 0.5 }
    }
}

/// Heritable traits carried by every organism.
///
/// All fields are strictly positive and bounded; mutation is a clamped
/// multiplicative perturbation, so traits can neither collapse to zero nor
/// run away across generations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Dna {
    /// Body scale; drives growth, reproduction spread, and the render proxy.
    pub size: f32,
    /// HSL color triple consumed by the render proxy.
    pub color: [f32; 3],
    /// Movement rate in world units per second (zero for plants).
    pub speed: f32,
    /// Divisor applied to the baseline metabolic drain.
    pub energy_efficiency: f32,
}

const DNA_SIZE_MIN: f32 = 0.1;
const DNA_SIZE_MAX: f32 = 4.0;
const DNA_SPEED_MIN: f32 = 0.5;
const DNA_SPEED_MAX: f32 = 12.0;
const DNA_EFFICIENCY_MIN: f32 = 0.25;
const DNA_EFFICIENCY_MAX: f32 = 4.0;

impl Dna {
    /// Sample randomized plant traits.
    pub fn random_plant(rng: &mut SmallRng) -> Self {
        Self {
            size: rng.random_range(0.5..1.5),
            color: [
                rng.random_range(0.22..0.42),
                rng.random_range(0.55..0.85),
                rng.random_range(0.35..0.55),
            ],
            speed: 0.0,
            energy_efficiency: rng.random_range(0.8..1.2),
        }
    }

    /// Sample randomized herbivore traits.
    pub fn random_herbivore(rng: &mut SmallRng) -> Self {
        Self {
            size: rng.random_range(0.6..1.4),
            color: [
                rng.random_range(0.02..0.12),
                rng.random_range(0.45..0.75),
                rng.random_range(0.35..0.55),
            ],
            speed: rng.random_range(2.0..6.0),
            energy_efficiency: rng.random_range(0.8..1.2),
        }
    }

    fn perturbed(rng: &mut SmallRng, value: f32, spread: f32, min: f32, max: f32) -> f32 {
        if spread <= 0.0 {
            return value.clamp(min, max);
        }
        let factor = 1.0 + rng.random_range(-spread..=spread);
        (value * factor).clamp(min, max)
    }

    fn jittered_hue(rng: &mut SmallRng, hue: f32, spread: f32) -> f32 {
        if spread <= 0.0 {
            return hue;
        }
        (hue + rng.random_range(-spread..=spread)).rem_euclid(1.0)
    }

    /// Plant inheritance: size and efficiency perturbed, hue jittered.
    #[must_use]
    pub fn mutated_plant(self, config: &EcosystemConfig, rng: &mut SmallRng) -> Self {
        Self {
            size: Self::perturbed(
                rng,
                self.size,
                config.trait_mutation_spread,
                DNA_SIZE_MIN,
                DNA_SIZE_MAX,
            ),
            color: [
                Self::jittered_hue(rng, self.color[0], config.color_mutation_spread),
                self.color[1],
                self.color[2],
            ],
            speed: self.speed,
            energy_efficiency: Self::perturbed(
                rng,
                self.energy_efficiency,
                config.efficiency_mutation_spread,
                DNA_EFFICIENCY_MIN,
                DNA_EFFICIENCY_MAX,
            ),
        }
    }

    /// Herbivore inheritance: size, speed, and efficiency perturbed.
    #[must_use]
    pub fn mutated_herbivore(self, config: &EcosystemConfig, rng: &mut SmallRng) -> Self {
        Self {
            size: Self::perturbed(
                rng,
                self.size,
                config.trait_mutation_spread,
                DNA_SIZE_MIN,
                DNA_SIZE_MAX,
            ),
            color: [
                Self::jittered_hue(rng, self.color[0], config.color_mutation_spread),
                self.color[1],
                self.color[2],
            ],
            speed: Self::perturbed(
                rng,
                self.speed,
                config.trait_mutation_spread,
                DNA_SPEED_MIN,
                DNA_SPEED_MAX,
            ),
            energy_efficiency: Self::perturbed(
                rng,
                self.energy_efficiency,
                config.efficiency_mutation_spread,
                DNA_EFFICIENCY_MIN,
                DNA_EFFICIENCY_MAX,
            ),
        }
    }
}

/// Variant tag for the two organism kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrganismKind {
    Plant,
    Herbivore,
}

/// Plant-only state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlantState {
    /// Energy ceiling; photosynthesis gain diminishes approaching it.
    pub max_energy: f32,
    /// Simulated seconds until the plant may reproduce again.
    pub cooldown: f32,
    /// Readiness flag computed during the update pass, consumed by the
    /// reproduction pass.
    pub ready_to_reproduce: bool,
}

/// Herbivore-only state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HerbivoreState {
    /// Non-owning reference to the pursued plant; re-validated every use and
    /// cleared the moment it goes stale.
    pub target: Option<OrganismId>,
    /// Radius of the nearest-plant search.
    pub search_radius: f32,
    /// Age at which the last search ran, successful or not.
    pub last_search: f32,
    /// Readiness flag computed during the update pass.
    pub ready_to_reproduce: bool,
}

/// Kind-specific organism payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Body {
    Plant(PlantState),
    Herbivore(HerbivoreState),
}

/// A single organism: common fields plus a kind payload.
///
/// Owned exclusively by the [`EcosystemManager`]; external components refer
/// to organisms only through their [`OrganismId`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Organism {
    pub position: Position,
    pub energy: f32,
    pub age: f32,
    pub generation: Generation,
    pub dna: Dna,
    pub body: Body,
}

impl Organism {
    /// Construct a plant.
    #[must_use]
    pub const fn plant(
        position: Position,
        energy: f32,
        dna: Dna,
        max_energy: f32,
        generation: Generation,
    ) -> Self {
        Self {
            position,
            energy,
            age: 0.0,
            generation,
            dna,
            body: Body::Plant(PlantState {
                max_energy,
                cooldown: 0.0,
                ready_to_reproduce: false,
            }),
        }
    }

    /// Construct a herbivore. A fresh herbivore searches on its first tick.
    #[must_use]
    pub const fn herbivore(
        position: Position,
        energy: f32,
        dna: Dna,
        search_radius: f32,
        search_interval: f32,
        generation: Generation,
    ) -> Self {
        Self {
            position,
            energy,
            age: 0.0,
            generation,
            dna,
            body: Body::Herbivore(HerbivoreState {
                target: None,
                search_radius,
                last_search: -search_interval,
                ready_to_reproduce: false,
            }),
        }
    }

    /// Variant tag of this organism.
    #[must_use]
    pub const fn kind(&self) -> OrganismKind {
        match self.body {
            Body::Plant(_) => OrganismKind::Plant,
            Body::Herbivore(_) => OrganismKind::Herbivore,
        }
    }

    /// `energy > 0` is the sole alive predicate.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.energy > 0.0
    }

    /// Whether the reproduction pass should call [`Organism::reproduce`].
    #[must_use]
    pub const fn ready_to_reproduce(&self) -> bool {
        match self.body {
            Body::Plant(state) => state.ready_to_reproduce,
            Body::Herbivore(state) => state.ready_to_reproduce,
        }
    }

    /// Plant payload, if this organism is a plant.
    #[must_use]
    pub const fn plant_state(&self) -> Option<&PlantState> {
        match &self.body {
            Body::Plant(state) => Some(state),
            Body::Herbivore(_) => None,
        }
    }

    /// Herbivore payload, if this organism is a herbivore.
    #[must_use]
    pub const fn herbivore_state(&self) -> Option<&HerbivoreState> {
        match &self.body {
            Body::Herbivore(state) => Some(state),
            Body::Plant(_) => None,
        }
    }

    /// Advance a plant by `delta_time`, returning whether it survived.
    ///
    /// Daylight energy gain carries diminishing returns as energy approaches
    /// the cap; nights add passive decay on top of the baseline metabolic
    /// drain. The reproduction readiness roll happens here so the later
    /// reproduction pass reads only state fixed by the update pass.
    pub fn update_plant(
        &mut self,
        delta_time: f32,
        environment: &EnvironmentalFactors,
        config: &EcosystemConfig,
        rng: &mut SmallRng,
    ) -> bool {
        let Body::Plant(mut state) = self.body else {
            return self.is_alive();
        };
        self.age += delta_time;

        if environment.is_day_time {
            let gain = config.photosynthesis_rate
                * environment.light_level
                * delta_time
                * (1.0 - self.energy / state.max_energy);
            self.energy = (self.energy + gain).min(state.max_energy);
        } else {
            self.energy -= config.plant_night_decay * delta_time;
        }

        if self.dna.size < config.plant_size_cap && self.energy > config.plant_growth_threshold {
            self.dna.size =
                (self.dna.size * (1.0 + config.plant_growth_rate * delta_time))
                    .min(config.plant_size_cap);
            self.energy -= config.plant_growth_cost * delta_time;
        }

        self.energy -= delta_time / self.dna.energy_efficiency;

        state.cooldown = (state.cooldown - delta_time).max(0.0);
        state.ready_to_reproduce = self.energy > config.plant_reproduce_threshold
            && state.cooldown <= 0.0
            && rng.random::<f32>() < config.plant_reproduce_probability;
        self.body = Body::Plant(state);

        self.energy > 0.0
    }

    /// Deduct the reproduction cost and produce a mutated offspring.
    ///
    /// Returns `None` unless the readiness flag computed during the update
    /// pass is set. Consuming the flag resets the plant cooldown.
    pub fn reproduce(
        &mut self,
        config: &EcosystemConfig,
        rng: &mut SmallRng,
    ) -> Option<Organism> {
        match self.body {
            Body::Plant(mut state) => {
                if !state.ready_to_reproduce {
                    return None;
                }
                state.ready_to_reproduce = false;
                state.cooldown = config.plant_reproduce_cooldown;
                self.body = Body::Plant(state);
                self.energy -= config.plant_reproduce_cost;

                let spread = self.dna.size * 0.5;
                let position = Position::new(
                    self.position.x + rng.random_range(-spread..=spread),
                    self.position.y,
                    self.position.z + rng.random_range(-spread..=spread),
                );
                let dna = self.dna.mutated_plant(config, rng);
                Some(Organism::plant(
                    position,
                    config.plant_offspring_energy,
                    dna,
                    state.max_energy,
                    self.generation.next(),
                ))
            }
            Body::Herbivore(mut state) => {
                if !state.ready_to_reproduce {
                    return None;
                }
                state.ready_to_reproduce = false;
                self.body = Body::Herbivore(state);
                self.energy -= config.herbivore_reproduce_cost;

                let jitter = config.herbivore_spawn_jitter;
                let position = Position::new(
                    self.position.x + rng.random_range(-jitter..=jitter),
                    self.position.y,
                    self.position.z + rng.random_range(-jitter..=jitter),
                );
                let dna = self.dna.mutated_herbivore(config, rng);
                Some(Organism::herbivore(
                    position,
                    config.herbivore_offspring_energy,
                    dna,
                    state.search_radius,
                    config.herbivore_search_interval,
                    self.generation.next(),
                ))
            }
        }
    }
}

/// Tunable simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EcosystemConfig {
    /// Simulated seconds per full day/night cycle.
    pub day_length: f32,
    /// Edge length of the spatial index cells.
    pub cell_size: f32,
    /// Half-extent of the ground plane; wandering clamps x/z to it.
    pub world_extent: f32,
    /// Seed for the simulation RNG; `None` draws one from entropy.
    pub rng_seed: Option<u64>,
    /// Number of tick summaries retained in the rolling history.
    pub history_capacity: usize,

    /// Peak daylight energy gain rate for plants.
    pub photosynthesis_rate: f32,
    /// Extra plant energy drain per second while it is night.
    pub plant_night_decay: f32,
    /// Energy a user-planted seed starts with.
    pub plant_initial_energy: f32,
    /// Energy ceiling for user-planted seeds.
    pub plant_max_energy: f32,
    /// Energy above which a plant spends some of it on growth.
    pub plant_growth_threshold: f32,
    /// Multiplicative size growth per second while growing.
    pub plant_growth_rate: f32,
    /// Energy spent per second while growing.
    pub plant_growth_cost: f32,
    /// Size above which plants stop growing.
    pub plant_size_cap: f32,
    /// Energy above which a plant may become ready to reproduce.
    pub plant_reproduce_threshold: f32,
    /// Fixed energy deducted from a reproducing plant.
    pub plant_reproduce_cost: f32,
    /// Per-tick readiness roll probability for plants.
    pub plant_reproduce_probability: f32,
    /// Cooldown restored after each plant reproduction.
    pub plant_reproduce_cooldown: f32,
    /// Energy a plant offspring starts with.
    pub plant_offspring_energy: f32,

    /// Energy a user-placed herbivore starts with.
    pub herbivore_initial_energy: f32,
    /// Radius of the nearest-plant search.
    pub herbivore_search_radius: f32,
    /// Minimum simulated seconds between searches.
    pub herbivore_search_interval: f32,
    /// Distance below which a pursuing herbivore eats instead of moving.
    pub herbivore_eat_distance: f32,
    /// Energy transferred per eating tick (not per second); capped by the
    /// plant's remaining energy.
    pub herbivore_bite_size: f32,
    /// Energy above which a herbivore may become ready to reproduce.
    pub herbivore_reproduce_threshold: f32,
    /// Fixed energy deducted from a reproducing herbivore.
    pub herbivore_reproduce_cost: f32,
    /// Per-tick readiness roll probability for herbivores.
    pub herbivore_reproduce_probability: f32,
    /// Energy a herbivore offspring starts with.
    pub herbivore_offspring_energy: f32,
    /// Horizontal spawn offset for herbivore offspring.
    pub herbivore_spawn_jitter: f32,

    /// Relative spread of the size/speed mutation (e.g. `0.1` for ±10%).
    pub trait_mutation_spread: f32,
    /// Relative spread of the energy-efficiency mutation.
    pub efficiency_mutation_spread: f32,
    /// Absolute hue jitter applied to offspring color.
    pub color_mutation_spread: f32,
}

impl Default for EcosystemConfig {
    fn default() -> Self {
        Self {
            day_length: 60.0,
            cell_size: 10.0,
            world_extent: 50.0,
            rng_seed: None,
            history_capacity: 256,

            photosynthesis_rate: 10.0,
            plant_night_decay: 0.5,
            plant_initial_energy: 50.0,
            plant_max_energy: 200.0,
            plant_growth_threshold: 100.0,
            plant_growth_rate: 0.02,
            plant_growth_cost: 0.5,
            plant_size_cap: 2.5,
            plant_reproduce_threshold: 120.0,
            plant_reproduce_cost: 30.0,
            plant_reproduce_probability: 0.02,
            plant_reproduce_cooldown: 5.0,
            plant_offspring_energy: 30.0,

            herbivore_initial_energy: 80.0,
            herbivore_search_radius: 25.0,
            herbivore_search_interval: 1.0,
            herbivore_eat_distance: 1.5,
            herbivore_bite_size: 8.0,
            herbivore_reproduce_threshold: 150.0,
            herbivore_reproduce_cost: 50.0,
            herbivore_reproduce_probability: 0.01,
            herbivore_offspring_energy: 50.0,
            herbivore_spawn_jitter: 2.0,

            trait_mutation_spread: 0.10,
            efficiency_mutation_spread: 0.05,
            color_mutation_spread: 0.02,
        }
    }
}

impl EcosystemConfig {
    fn validate(&self) -> Result<(), EcosystemError> {
        if !self.day_length.is_finite() || self.day_length <= 0.0 {
            return Err(EcosystemError::InvalidConfig("day_length must be positive"));
        }
        if self.world_extent <= 0.0 {
            return Err(EcosystemError::InvalidConfig(
                "world_extent must be positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(EcosystemError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        if self.photosynthesis_rate < 0.0
            || self.plant_night_decay < 0.0
            || self.plant_growth_rate < 0.0
            || self.plant_growth_cost < 0.0
            || self.plant_reproduce_cost < 0.0
            || self.plant_reproduce_cooldown < 0.0
            || self.herbivore_bite_size < 0.0
            || self.herbivore_reproduce_cost < 0.0
            || self.herbivore_spawn_jitter < 0.0
            || self.herbivore_search_interval < 0.0
        {
            return Err(EcosystemError::InvalidConfig(
                "rates, costs, cooldowns, and intervals must be non-negative",
            ));
        }
        if self.plant_initial_energy <= 0.0
            || self.plant_max_energy <= 0.0
            || self.plant_offspring_energy <= 0.0
            || self.herbivore_initial_energy <= 0.0
            || self.herbivore_offspring_energy <= 0.0
        {
            return Err(EcosystemError::InvalidConfig(
                "starting energies must be positive",
            ));
        }
        if self.plant_initial_energy > self.plant_max_energy {
            return Err(EcosystemError::InvalidConfig(
                "plant_initial_energy cannot exceed plant_max_energy",
            ));
        }
        if self.herbivore_search_radius <= 0.0 || self.herbivore_eat_distance <= 0.0 {
            return Err(EcosystemError::InvalidConfig(
                "search radius and eat distance must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.plant_reproduce_probability)
            || !(0.0..=1.0).contains(&self.herbivore_reproduce_probability)
        {
            return Err(EcosystemError::InvalidConfig(
                "reproduction probabilities must be within [0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.trait_mutation_spread)
            || !(0.0..1.0).contains(&self.efficiency_mutation_spread)
            || !(0.0..1.0).contains(&self.color_mutation_spread)
        {
            return Err(EcosystemError::InvalidConfig(
                "mutation spreads must be within [0, 1)",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Summary emitted after each tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub plant_count: usize,
    pub herbivore_count: usize,
    pub births: usize,
    pub deaths: usize,
    pub is_day_time: bool,
    pub light_level: f32,
}

/// Sink notified of organism lifecycle events.
///
/// This is the boundary the render proxy attaches to: one creation per
/// organism entering the population, one removal per release, one summary
/// per completed tick. The core holds no rendering handles itself.
pub trait LifecycleObserver {
    /// A new organism entered the population.
    fn organism_created(&mut self, _id: OrganismId, _organism: &Organism) {}

    /// An organism was released (death or explicit removal).
    fn organism_removed(&mut self, _id: OrganismId, _kind: OrganismKind) {}

    /// A tick finished and produced a summary.
    fn tick_completed(&mut self, _summary: &TickSummary) {}
}

/// No-op observer.
#[derive(Debug, Default)]
pub struct NullObserver;

impl LifecycleObserver for NullObserver {}

/// Aggregate simulation state: population, spatial index, environment.
///
/// The manager is the sole owner and the only mutation surface. One call to
/// [`EcosystemManager::tick`] executes one deterministic simulation step;
/// all randomness flows through the seeded RNG injected via configuration.
pub struct EcosystemManager {
    config: EcosystemConfig,
    tick: Tick,
    environment: EnvironmentalFactors,
    rng: SmallRng,
    organisms: SlotMap<OrganismId, Organism>,
    /// Insertion-ordered roster giving the fixed iteration order of the
    /// update and reproduction passes. Pruned after every mutation pass.
    roster: Vec<OrganismId>,
    index: UniformGrid<OrganismId>,
    pending_spawns: Vec<Organism>,
    observer: Box<dyn LifecycleObserver>,
    births_this_tick: usize,
    deaths_this_tick: usize,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for EcosystemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcosystemManager")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("environment", &self.environment)
            .field("organism_count", &self.organisms.len())
            .finish()
    }
}

impl EcosystemManager {
    /// Instantiate a new ecosystem using the supplied configuration.
    pub fn new(config: EcosystemConfig) -> Result<Self, EcosystemError> {
        Self::with_observer(config, Box::new(NullObserver))
    }

    /// Instantiate a new ecosystem with a lifecycle observer attached.
    pub fn with_observer(
        config: EcosystemConfig,
        observer: Box<dyn LifecycleObserver>,
    ) -> Result<Self, EcosystemError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let index = UniformGrid::new(config.cell_size)?;
        let environment = EnvironmentalFactors::new(config.day_length);
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            environment,
            rng,
            organisms: SlotMap::with_key(),
            roster: Vec::new(),
            index,
            pending_spawns: Vec::new(),
            observer,
            births_this_tick: 0,
            deaths_this_tick: 0,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Execute one simulation step covering `delta_time` simulated seconds.
    ///
    /// Stage order is fixed: environment, organism updates (dead organisms
    /// released immediately, survivors relocated in the index), reproduction
    /// scan, offspring commit, summary. Offspring never tick in the tick that
    /// created them.
    pub fn tick(&mut self, delta_time: f32) -> TickSummary {
        debug_assert!(
            delta_time.is_finite() && delta_time >= 0.0,
            "delta_time must be finite and non-negative"
        );
        self.tick = self.tick.next();
        self.stage_environment(delta_time);
        self.stage_update(delta_time);
        self.stage_reproduction();
        self.stage_spawn_commit();
        self.stage_summary()
    }

    fn stage_environment(&mut self, delta_time: f32) {
        self.environment.advance(delta_time);
    }

    fn stage_update(&mut self, delta_time: f32) {
        let snapshot: Vec<OrganismId> = self.roster.clone();
        for id in snapshot {
            // Released earlier this pass, e.g. a plant grazed to death.
            if !self.organisms.contains_key(id) {
                continue;
            }
            let (alive, drained) = if !self.organisms[id].is_alive() {
                // Dead is terminal; an exhausted organism never updates again.
                (false, None)
            } else {
                match self.organisms[id].body {
                    Body::Plant(_) => (self.update_plant(id, delta_time), None),
                    Body::Herbivore(_) => self.update_herbivore(id, delta_time),
                }
            };
            if let Some(plant_id) = drained {
                self.release(plant_id);
            }
            if alive {
                let position = self.organisms[id].position;
                self.index.relocate(id, position.to_array());
            } else {
                self.release(id);
            }
        }
        self.roster.retain(|id| self.organisms.contains_key(*id));
        self.clear_stale_targets();
    }

    /// Drop target references to organisms released this tick, so a stored
    /// target always resolves to a live plant between ticks.
    fn clear_stale_targets(&mut self) {
        let Self {
            organisms, roster, ..
        } = self;
        for &id in roster.iter() {
            let Some(organism) = organisms.get(id) else {
                continue;
            };
            let Body::Herbivore(state) = organism.body else {
                continue;
            };
            let Some(target_id) = state.target else {
                continue;
            };
            let stale = organisms
                .get(target_id)
                .is_none_or(|plant| !plant.is_alive());
            if stale
                && let Some(Body::Herbivore(state)) =
                    organisms.get_mut(id).map(|organism| &mut organism.body)
            {
                state.target = None;
            }
        }
    }

    fn update_plant(&mut self, id: OrganismId, delta_time: f32) -> bool {
        let Self {
            organisms,
            rng,
            config,
            environment,
            ..
        } = self;
        let Some(organism) = organisms.get_mut(id) else {
            return false;
        };
        organism.update_plant(delta_time, environment, config, rng)
    }

    /// Advance one herbivore: validate or acquire a target, pursue and eat or
    /// wander, pay the metabolic cost, roll reproduction readiness.
    ///
    /// Returns `(alive, drained)` where `drained` names a plant whose energy
    /// this bite exhausted; the caller releases it immediately.
    fn update_herbivore(
        &mut self,
        id: OrganismId,
        delta_time: f32,
    ) -> (bool, Option<OrganismId>) {
        let Self {
            organisms,
            index,
            rng,
            config,
            environment,
            ..
        } = self;

        let (position, age, dna, mut state) = match organisms.get(id) {
            Some(organism) => match organism.body {
                Body::Herbivore(state) => (
                    organism.position,
                    organism.age + delta_time,
                    organism.dna,
                    state,
                ),
                Body::Plant(_) => return (organism.is_alive(), None),
            },
            None => return (false, None),
        };

        // Stale-reference invalidation: a dead or vanished target means this
        // tick falls back to wandering.
        if let Some(target_id) = state.target {
            let stale = organisms
                .get(target_id)
                .is_none_or(|plant| plant.kind() != OrganismKind::Plant || !plant.is_alive());
            if stale {
                state.target = None;
            }
        }

        if state.target.is_none() && age - state.last_search > config.herbivore_search_interval {
            state.last_search = age;
            state.target = index
                .nearest_within(position.to_array(), state.search_radius, |candidate| {
                    candidate != id
                        && organisms.get(candidate).is_some_and(|organism| {
                            organism.kind() == OrganismKind::Plant && organism.is_alive()
                        })
                })
                .map(|(key, _)| key);
        }

        let day_multiplier = environment.day_multiplier();
        let mut drained = None;

        match state.target {
            Some(target_id) => {
                if let Some([herbivore, plant]) = organisms.get_disjoint_mut([id, target_id]) {
                    let distance = herbivore.position.distance(plant.position);
                    if distance < config.herbivore_eat_distance {
                        let bite = config.herbivore_bite_size.min(plant.energy);
                        plant.energy -= bite;
                        herbivore.energy += bite;
                        if plant.energy <= 0.0 {
                            state.target = None;
                            drained = Some(target_id);
                        }
                    } else {
                        let step = (dna.speed * day_multiplier * delta_time).min(distance);
                        let toward = step / distance;
                        herbivore.position.x += (plant.position.x - herbivore.position.x) * toward;
                        herbivore.position.y += (plant.position.y - herbivore.position.y) * toward;
                        herbivore.position.z += (plant.position.z - herbivore.position.z) * toward;
                    }
                } else {
                    state.target = None;
                }
            }
            None => {
                if let Some(herbivore) = organisms.get_mut(id) {
                    let drift = dna.speed * day_multiplier * delta_time;
                    let extent = config.world_extent;
                    herbivore.position.x = (herbivore.position.x
                        + rng.random_range(-drift..=drift))
                    .clamp(-extent, extent);
                    herbivore.position.z = (herbivore.position.z
                        + rng.random_range(-drift..=drift))
                    .clamp(-extent, extent);
                }
            }
        }

        let Some(herbivore) = organisms.get_mut(id) else {
            return (false, drained);
        };
        herbivore.age = age;
        herbivore.energy -= delta_time / dna.energy_efficiency;
        state.ready_to_reproduce = herbivore.energy > config.herbivore_reproduce_threshold
            && rng.random::<f32>() < config.herbivore_reproduce_probability;
        herbivore.body = Body::Herbivore(state);

        (herbivore.energy > 0.0, drained)
    }

    fn stage_reproduction(&mut self) {
        let Self {
            organisms,
            roster,
            rng,
            config,
            pending_spawns,
            ..
        } = self;
        for &id in roster.iter() {
            let Some(parent) = organisms.get_mut(id) else {
                continue;
            };
            if !parent.ready_to_reproduce() {
                continue;
            }
            if let Some(offspring) = parent.reproduce(config, rng) {
                pending_spawns.push(offspring);
            }
        }
    }

    fn stage_spawn_commit(&mut self) {
        if self.pending_spawns.is_empty() {
            return;
        }
        let spawned = std::mem::take(&mut self.pending_spawns);
        self.births_this_tick += spawned.len();
        for organism in spawned {
            self.insert_organism(organism);
        }
    }

    fn stage_summary(&mut self) -> TickSummary {
        let summary = TickSummary {
            tick: self.tick,
            plant_count: self.plant_count(),
            herbivore_count: self.herbivore_count(),
            births: self.births_this_tick,
            deaths: self.deaths_this_tick,
            is_day_time: self.environment.is_day_time,
            light_level: self.environment.light_level,
        };
        self.births_this_tick = 0;
        self.deaths_this_tick = 0;
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());
        self.observer.tick_completed(&summary);
        summary
    }

    fn insert_organism(&mut self, organism: Organism) -> OrganismId {
        let position = organism.position;
        let id = self.organisms.insert(organism);
        self.roster.push(id);
        self.index.insert(id, position.to_array());
        self.observer.organism_created(id, &self.organisms[id]);
        id
    }

    fn release(&mut self, id: OrganismId) {
        if let Some(organism) = self.organisms.remove(id) {
            self.index.remove(id);
            self.deaths_this_tick += 1;
            self.observer.organism_removed(id, organism.kind());
        }
    }

    /// Plant a seed with randomized DNA, returning its handle.
    pub fn plant_seed(&mut self, position: Position) -> OrganismId {
        let dna = Dna::random_plant(&mut self.rng);
        let organism = Organism::plant(
            position,
            self.config.plant_initial_energy,
            dna,
            self.config.plant_max_energy,
            Generation::default(),
        );
        self.insert_organism(organism)
    }

    /// Place a herbivore with randomized DNA, returning its handle.
    pub fn add_herbivore(&mut self, position: Position) -> OrganismId {
        let dna = Dna::random_herbivore(&mut self.rng);
        let organism = Organism::herbivore(
            position,
            self.config.herbivore_initial_energy,
            dna,
            self.config.herbivore_search_radius,
            self.config.herbivore_search_interval,
            Generation::default(),
        );
        self.insert_organism(organism)
    }

    /// Release every organism within `radius` (inclusive) of `point`,
    /// regardless of kind, returning how many were removed.
    pub fn remove_nearby(&mut self, point: Position, radius: f32) -> usize {
        let victims: Vec<OrganismId> = self
            .roster
            .iter()
            .copied()
            .filter(|id| {
                self.organisms
                    .get(*id)
                    .is_some_and(|organism| organism.position.distance(point) <= radius)
            })
            .collect();
        for &id in &victims {
            self.release(id);
        }
        self.roster.retain(|id| self.organisms.contains_key(*id));
        victims.len()
    }

    /// Number of live plants.
    #[must_use]
    pub fn plant_count(&self) -> usize {
        self.organisms
            .values()
            .filter(|organism| organism.kind() == OrganismKind::Plant)
            .count()
    }

    /// Number of live herbivores.
    #[must_use]
    pub fn herbivore_count(&self) -> usize {
        self.organisms
            .values()
            .filter(|organism| organism.kind() == OrganismKind::Herbivore)
            .count()
    }

    /// Total number of live organisms.
    #[must_use]
    pub fn organism_count(&self) -> usize {
        self.organisms.len()
    }

    /// Borrow an organism by handle.
    #[must_use]
    pub fn organism(&self, id: OrganismId) -> Option<&Organism> {
        self.organisms.get(id)
    }

    /// Mutably borrow an organism by handle.
    ///
    /// Positions edited through this re-sync with the spatial index on the
    /// next tick.
    #[must_use]
    pub fn organism_mut(&mut self, id: OrganismId) -> Option<&mut Organism> {
        self.organisms.get_mut(id)
    }

    /// Iterate live organisms in insertion order.
    pub fn organisms(&self) -> impl Iterator<Item = (OrganismId, &Organism)> {
        self.roster
            .iter()
            .filter_map(|id| self.organisms.get(*id).map(|organism| (*id, organism)))
    }

    /// Current environmental state.
    #[must_use]
    pub const fn environment(&self) -> &EnvironmentalFactors {
        &self.environment
    }

    /// Change the day/night cycle duration.
    pub fn set_day_length(&mut self, value: f32) {
        debug_assert!(value.is_finite() && value > 0.0, "day_length must be positive");
        self.config.day_length = value;
        self.environment.day_length = value;
    }

    /// Ticks processed since boot.
    #[must_use]
    pub const fn tick_count(&self) -> Tick {
        self.tick
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Immutable access to configuration.
    #[must_use]
    pub const fn config(&self) -> &EcosystemConfig {
        &self.config
    }

    /// Read access to the spatial index (debug overlays, invariant checks).
    #[must_use]
    pub const fn spatial_index(&self) -> &UniformGrid<OrganismId> {
        &self.index
    }
}
