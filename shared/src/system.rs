//! Planetary system descriptors supplied by the lobby creator.
//!
//! A `SystemConfig` can be large (custom planet sources, landing zones, CSG
//! brushes). Clients only ever see the `MinimalSystem` projection, which
//! replaces the bulky lists with counts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Terrain generator parameters for one planet.
///
/// Every numeric field is optional on the wire; validation clamps present
/// values into range and fills missing ones with defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorParams {
    #[serde(default)]
    pub biome: String,
    #[serde(default)]
    pub seed: Option<f64>,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub height_range: Option<f64>,
    #[serde(default)]
    pub biome_scale: Option<f64>,
    #[serde(default)]
    pub water_height: Option<f64>,
    #[serde(default)]
    pub water_depth: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub metal_density: Option<f64>,
    #[serde(default)]
    pub metal_clusters: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PlanetConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub starting_planet: bool,
    #[serde(default)]
    pub generator: Option<GeneratorParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_zones: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metal_spots: Vec<Value>,
    #[serde(rename = "planetCSG", default, skip_serializing_if = "Vec::is_empty")]
    pub planet_csg: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    /// Orbital and cosmetic fields passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanetConfig {
    /// Landing zones come either as a bare list or wrapped as `{ "list": [...] }`.
    pub fn landing_zone_count(&self) -> usize {
        match &self.landing_zones {
            Some(Value::Array(zones)) => zones.len(),
            Some(Value::Object(wrapped)) => wrapped
                .get("list")
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
            _ => 0,
        }
    }

    pub fn summary(&self) -> PlanetSummary {
        PlanetSummary {
            name: self.name.clone(),
            starting_planet: self.starting_planet,
            generator: self.generator.clone(),
            metal_spots_count: self.metal_spots.len(),
            planet_csg_count: self.planet_csg.len(),
            landing_zones_count: self.landing_zone_count(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub planets: Vec<PlanetConfig>,
}

impl SystemConfig {
    pub fn minimal(&self) -> MinimalSystem {
        MinimalSystem {
            name: self.name.clone(),
            planets: self.planets.iter().map(PlanetConfig::summary).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PlanetSummary {
    pub name: String,
    pub starting_planet: bool,
    pub generator: Option<GeneratorParams>,
    pub metal_spots_count: usize,
    #[serde(rename = "planetCSG_count")]
    pub planet_csg_count: usize,
    pub landing_zones_count: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// System description with the bulky per-planet payloads reduced to counts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct MinimalSystem {
    pub name: String,
    pub planets: Vec<PlanetSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_system() -> SystemConfig {
        serde_json::from_value(json!({
            "name": "Twin Moons",
            "planets": [
                {
                    "name": "Alpha",
                    "starting_planet": true,
                    "mass": 5000,
                    "generator": { "biome": "earth", "seed": 7, "heightRange": 30 },
                    "landing_zones": { "list": [[0, 0, 1], [1, 0, 0]] },
                    "metal_spots": [[1, 2, 3]],
                    "planetCSG": [{}, {}, {}]
                },
                {
                    "name": "Beta",
                    "generator": { "biome": "moon" },
                    "landing_zones": [[0, 1, 0]]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parses_camel_case_generator() {
        let system = sample_system();
        let generator = system.planets[0].generator.as_ref().unwrap();
        assert_eq!(generator.biome, "earth");
        assert_eq!(generator.height_range, Some(30.0));
        assert_eq!(generator.water_depth, None);
    }

    #[test]
    fn test_minimal_system_counts() {
        let minimal = sample_system().minimal();
        assert_eq!(minimal.name, "Twin Moons");
        assert_eq!(minimal.planets[0].landing_zones_count, 2);
        assert_eq!(minimal.planets[0].metal_spots_count, 1);
        assert_eq!(minimal.planets[0].planet_csg_count, 3);
        assert_eq!(minimal.planets[1].landing_zones_count, 1);
        assert_eq!(minimal.planets[1].metal_spots_count, 0);
    }

    #[test]
    fn test_minimal_system_drops_bulky_fields() {
        let value = serde_json::to_value(sample_system().minimal()).unwrap();
        let alpha = &value["planets"][0];
        assert!(alpha.get("planetCSG").is_none());
        assert!(alpha.get("landing_zones").is_none());
        assert_eq!(alpha["planetCSG_count"], 3);
        assert_eq!(alpha["mass"], 5000);
    }
}
