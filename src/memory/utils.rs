//! Size and alignment helpers

use super::{PoolConfig, TerrainMemoryType};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// Round `size` up to a multiple of `alignment` (a power of two)
pub fn align_size(size: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return size;
    }
    (size + alignment - 1) & !(alignment - 1)
}

pub fn is_aligned(offset: u64, alignment: u64) -> bool {
    alignment <= 1 || offset & (alignment - 1) == 0
}

/// Alignment a resource of this type should use when placed by hand
pub fn optimal_alignment(memory_type: TerrainMemoryType) -> u64 {
    match memory_type {
        TerrainMemoryType::StagingBuffer => 64,
        other => PoolConfig::for_type(other).alignment,
    }
}

/// Human readable size, e.g. `1.50 MB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Parse sizes such as `128MB`, `2 GB`, `1.5gb` or `4096`
pub fn parse_memory_size(text: &str) -> Option<u64> {
    let upper = text.trim().to_ascii_uppercase();
    let split = upper
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(split);
    let value: f64 = number.parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }

    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KB,
        "M" | "MB" | "MIB" => MB,
        "G" | "GB" | "GIB" => GB,
        "T" | "TB" | "TIB" => TB,
        _ => return None,
    };
    Some((value * multiplier as f64).round() as u64)
}

/// Pool size that holds a typical working set for the observed request sizes
pub fn calculate_optimal_pool_size(memory_type: TerrainMemoryType, sizes: &[u64]) -> u64 {
    if sizes.is_empty() {
        return 64 * MB;
    }

    let total: u64 = sizes.iter().sum();
    let largest = sizes.iter().copied().max().unwrap_or(0);
    let average = total / sizes.len() as u64;

    // Room for ~15 average requests or 3 of the largest
    let mut pool_size = (average * 15).max(largest * 3);
    match memory_type {
        TerrainMemoryType::HeightTexture | TerrainMemoryType::ColorTexture => pool_size *= 2,
        _ => {}
    }

    pool_size.clamp(16 * MB, GB)
}
