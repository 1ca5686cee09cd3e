use serde::Serialize;

/// Per-frame counters returned by `TerrainRenderer::render`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderStats {
    pub frame_index: u64,
    /// Tiles drawn this frame
    pub tiles_rendered: u32,
    /// Candidates rejected by the frustum, distance, band or cap filters
    pub tiles_culled: u32,
    /// Selected tiles still waiting for data
    pub tiles_loading: u32,
    /// Selected tiles skipped because they failed
    pub tiles_failed: u32,
    pub candidate_tiles: u32,
    pub draw_calls: u32,
    /// Estimate from the tessellation bounds
    pub triangles_rendered: u64,
    pub frame_time_ms: f32,
    pub culling_time_ms: f32,
    pub render_time_ms: f32,
    /// CPU plus GPU bytes of resident tiles
    pub memory_usage: u64,
    pub gpu_memory_usage: u64,
}

impl RenderStats {
    pub fn summary(&self) -> String {
        format!(
            "frame {}: {} drawn, {} culled, {} loading, {} draws, {:.2} ms ({:.2} cull, {:.2} render)",
            self.frame_index,
            self.tiles_rendered,
            self.tiles_culled,
            self.tiles_loading,
            self.draw_calls,
            self.frame_time_ms,
            self.culling_time_ms,
            self.render_time_ms
        )
    }
}
