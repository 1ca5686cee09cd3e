//! Terrain renderer configuration
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes. `validate` rejects bad values instead of clamping them.

use super::{invalid_config_error, RendererResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MB: u64 = 1024 * 1024;

/// Highest tessellation factor the patch shaders accept
pub const MAX_TESSELLATION_LEVEL: f32 = 64.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainRenderConfig {
    // Tiles
    /// World edge length of a level-0 tile
    pub tile_size: f32,
    /// Height samples per tile edge
    pub tile_resolution: u32,
    pub max_visible_tiles: usize,
    pub height_scale: f32,

    // Tessellation and LOD bands
    pub near_distance: f32,
    pub far_distance: f32,
    pub min_tess_level: f32,
    pub max_tess_level: f32,
    pub tessellation_scale: f32,

    // Toggles
    pub enable_frustum_culling: bool,
    pub enable_gpu_culling: bool,
    pub enable_wireframe: bool,
    pub enable_lod_morphing: bool,

    // Lighting
    pub sun_direction: [f32; 3],
    pub sun_color: [f32; 3],
    pub ambient_color: [f32; 3],

    // Fog
    pub fog_color: [f32; 3],
    pub fog_density: f32,
    pub fog_start: f32,
    pub fog_end: f32,

    // Material
    pub roughness: f32,
    pub metallic: f32,

    // Streaming
    /// 0 picks a quarter of the available cores
    pub loader_threads: usize,
    pub max_tiles: usize,
    /// CPU plus GPU bytes of resident tiles
    pub max_tile_memory: u64,
    pub eviction_frames: u32,
    pub loads_per_frame: usize,
    pub cache_size_mb: u64,
}

impl Default for TerrainRenderConfig {
    fn default() -> Self {
        Self {
            tile_size: 512.0,
            tile_resolution: 128,
            max_visible_tiles: 256,
            height_scale: 1.0,

            near_distance: 50.0,
            far_distance: 2000.0,
            min_tess_level: 1.0,
            max_tess_level: MAX_TESSELLATION_LEVEL,
            tessellation_scale: 1.0,

            enable_frustum_culling: true,
            enable_gpu_culling: false,
            enable_wireframe: false,
            enable_lod_morphing: true,

            sun_direction: [-0.5, -0.8, -0.3],
            sun_color: [1.0, 0.95, 0.8],
            ambient_color: [0.2, 0.25, 0.3],

            fog_color: [0.7, 0.8, 0.9],
            fog_density: 0.0001,
            fog_start: 1000.0,
            fog_end: 5000.0,

            roughness: 0.8,
            metallic: 0.1,

            loader_threads: 0,
            max_tiles: 1024,
            max_tile_memory: 1024 * MB,
            eviction_frames: crate::streaming::DEFAULT_EVICTION_FRAMES,
            loads_per_frame: crate::streaming::DEFAULT_LOADS_PER_FRAME,
            cache_size_mb: 256,
        }
    }
}

impl TerrainRenderConfig {
    pub fn from_toml_str(source: &str) -> RendererResult<Self> {
        let config: TerrainRenderConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RendererResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn to_json(&self) -> RendererResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> RendererResult<()> {
        if !self.tile_size.is_finite() || self.tile_size <= 0.0 {
            return Err(invalid_config_error("tile_size", "must be a positive number"));
        }
        if self.tile_resolution < 2 {
            return Err(invalid_config_error("tile_resolution", "must be at least 2"));
        }
        if self.max_visible_tiles == 0 {
            return Err(invalid_config_error("max_visible_tiles", "must be non-zero"));
        }
        if !self.height_scale.is_finite() {
            return Err(invalid_config_error("height_scale", "must be finite"));
        }
        if !self.near_distance.is_finite() || self.near_distance <= 0.0 {
            return Err(invalid_config_error("near_distance", "must be positive"));
        }
        if !self.far_distance.is_finite() || self.far_distance <= self.near_distance {
            return Err(invalid_config_error(
                "far_distance",
                "must be greater than near_distance",
            ));
        }
        if self.min_tess_level < 1.0 {
            return Err(invalid_config_error("min_tess_level", "must be at least 1"));
        }
        if self.max_tess_level < self.min_tess_level
            || self.max_tess_level > MAX_TESSELLATION_LEVEL
        {
            return Err(invalid_config_error(
                "max_tess_level",
                "must lie within [min_tess_level, 64]",
            ));
        }
        if self.max_tiles == 0 {
            return Err(invalid_config_error("max_tiles", "must be non-zero"));
        }
        if self.max_tile_memory == 0 {
            return Err(invalid_config_error("max_tile_memory", "must be non-zero"));
        }
        Ok(())
    }

    /// Name of the first field that only takes effect at construction
    pub(crate) fn fixed_field_change(&self, other: &TerrainRenderConfig) -> Option<&'static str> {
        if self.tile_resolution != other.tile_resolution {
            Some("tile_resolution")
        } else if self.height_scale != other.height_scale {
            Some("height_scale")
        } else if self.loader_threads != other.loader_threads {
            Some("loader_threads")
        } else if self.eviction_frames != other.eviction_frames {
            Some("eviction_frames")
        } else if self.cache_size_mb != other.cache_size_mb {
            Some("cache_size_mb")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn rejected_field(config: &TerrainRenderConfig) -> String {
        match config.validate() {
            Err(EngineError::InvalidConfig { field, .. }) => field,
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        TerrainRenderConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_without_clamping() {
        let mut config = TerrainRenderConfig {
            tile_size: 0.0,
            ..Default::default()
        };
        assert_eq!(rejected_field(&config), "tile_size");
        assert_eq!(config.tile_size, 0.0);

        config = TerrainRenderConfig {
            far_distance: 10.0,
            ..Default::default()
        };
        assert_eq!(rejected_field(&config), "far_distance");

        config = TerrainRenderConfig {
            max_tess_level: 65.0,
            ..Default::default()
        };
        assert_eq!(rejected_field(&config), "max_tess_level");

        config = TerrainRenderConfig {
            tile_resolution: 1,
            ..Default::default()
        };
        assert_eq!(rejected_field(&config), "tile_resolution");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TerrainRenderConfig::from_toml_str(
            "tile_size = 1000.0\nenable_wireframe = true\nfog_color = [0.1, 0.2, 0.3]\n",
        )
        .unwrap();
        assert_eq!(config.tile_size, 1000.0);
        assert!(config.enable_wireframe);
        assert_eq!(config.fog_color, [0.1, 0.2, 0.3]);
        assert_eq!(config.max_visible_tiles, 256);

        assert!(TerrainRenderConfig::from_toml_str("max_tiles = 0").is_err());
        assert!(matches!(
            TerrainRenderConfig::from_toml_str("tile_size = \"big\""),
            Err(EngineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_json_snapshot() {
        let json = TerrainRenderConfig::default().to_json().unwrap();
        let parsed: TerrainRenderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TerrainRenderConfig::default());
    }

    #[test]
    fn test_fixed_fields() {
        let base = TerrainRenderConfig::default();
        let changed = TerrainRenderConfig {
            tile_resolution: 64,
            fog_density: 0.5,
            ..base.clone()
        };
        assert_eq!(base.fixed_field_change(&changed), Some("tile_resolution"));
        let tweaked = TerrainRenderConfig {
            fog_density: 0.5,
            ..base.clone()
        };
        assert_eq!(base.fixed_field_change(&tweaked), None);
    }
}
