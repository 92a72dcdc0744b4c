//! Planetary system validation and the built-in ladder map pool.

use crate::config::MAX_PLANETS;
use crate::error::SystemError;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{GeneratorParams, PlanetConfig, SystemConfig};

const DEFAULT_SEED: f64 = 12345.0;
const DEFAULT_RADIUS_RANGE: (f64, f64) = (100.0, 1300.0);

fn normalize(value: Option<f64>, min: f64, max: f64, default: f64) -> Option<f64> {
    Some(match value {
        Some(value) if value.is_finite() => value.clamp(min, max),
        _ => default,
    })
}

/// Clamps every generator parameter into range, filling in defaults.
pub fn normalize_generator(generator: &mut GeneratorParams) {
    generator.seed = normalize(generator.seed, 0.0, f64::MAX, DEFAULT_SEED);
    generator.height_range = normalize(generator.height_range, 0.0, 100.0, 50.0);
    generator.biome_scale = normalize(generator.biome_scale, 0.0, 100.0, 50.0);
    generator.water_height = normalize(generator.water_height, 0.0, 100.0, 50.0);
    generator.water_depth = normalize(generator.water_depth, 0.0, 100.0, 0.0);
    generator.temperature = normalize(generator.temperature, 0.0, 100.0, 50.0);
    generator.metal_density = normalize(generator.metal_density, 0.0, 100.0, 50.0);
    generator.metal_clusters = normalize(generator.metal_clusters, 0.0, 100.0, 50.0);
    if generator.biome == "moon" {
        generator.water_height = Some(-1.0);
    }

    let (min, max) = DEFAULT_RADIUS_RANGE;
    generator.radius = normalize(generator.radius, min, max, (min + max) / 2.0);
}

fn validate_planet(planet: &mut PlanetConfig) -> Result<(), String> {
    let generator = planet
        .generator
        .as_mut()
        .ok_or_else(|| "No generator".to_string())?;
    normalize_generator(generator);
    Ok(())
}

/// Checks a system for launchability and normalizes its planets in place.
pub fn validate_system(system: &mut SystemConfig) -> Result<(), SystemError> {
    if system.planets.is_empty() {
        return Err(SystemError::NoPlanets);
    }
    if system.planets.len() > MAX_PLANETS {
        return Err(SystemError::TooManyPlanets(MAX_PLANETS));
    }
    if !system.planets.iter().any(|planet| planet.starting_planet) {
        return Err(SystemError::NoStartingPlanet);
    }

    for (index, planet) in system.planets.iter_mut().enumerate() {
        validate_planet(planet).map_err(|reason| SystemError::InvalidPlanet { index, reason })?;
    }
    Ok(())
}

fn planet(name: &str, biome: &str, seed: f64, radius: f64, starting: bool) -> PlanetConfig {
    PlanetConfig {
        name: name.to_string(),
        starting_planet: starting,
        generator: Some(GeneratorParams {
            biome: biome.to_string(),
            seed: Some(seed),
            radius: Some(radius),
            height_range: Some(25.0),
            biome_scale: Some(50.0),
            water_height: Some(33.0),
            water_depth: Some(50.0),
            temperature: Some(50.0),
            metal_density: Some(50.0),
            metal_clusters: Some(50.0),
        }),
        ..PlanetConfig::default()
    }
}

/// Systems a ladder session picks from at random.
pub fn ladder_systems() -> Vec<SystemConfig> {
    vec![
        SystemConfig {
            name: "Amplus".to_string(),
            planets: vec![planet("Amplus Prime", "earth", 4815.0, 600.0, true)],
        },
        SystemConfig {
            name: "Tundra Run".to_string(),
            planets: vec![
                planet("Glacis", "ice", 1623.0, 550.0, true),
                planet("Shard", "moon", 42.0, 250.0, false),
            ],
        },
        SystemConfig {
            name: "Ember Gate".to_string(),
            planets: vec![
                planet("Cinder", "lava", 9001.0, 500.0, true),
                planet("Ashfall", "desert", 777.0, 450.0, true),
            ],
        },
        SystemConfig {
            name: "Verdant Twins".to_string(),
            planets: vec![
                planet("Lush", "tropical", 2718.0, 520.0, true),
                planet("Canopy", "tropical", 3141.0, 520.0, true),
                planet("Husk", "metal", 1337.0, 300.0, false),
            ],
        },
    ]
}

pub fn random_ladder_system<R: Rng + ?Sized>(rng: &mut R) -> SystemConfig {
    ladder_systems()
        .choose(rng)
        .cloned()
        .unwrap_or_default()
}
