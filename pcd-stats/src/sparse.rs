use crate::error::StatsError;

/// Which side of an anchor an offset falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Plus,
    Minus,
}

/// Maps a signed offset from an anchor onto a side and an array index.
/// Offsets below the anchor are stored at `-(offset + 1)`.
pub(crate) fn split_offset(offset: i64) -> (Side, usize) {
    if offset >= 0 {
        (Side::Plus, offset as usize)
    } else {
        (Side::Minus, (-(offset + 1)) as usize)
    }
}

pub(crate) fn join_offset(side: Side, index: usize) -> i64 {
    match side {
        Side::Plus => index as i64,
        Side::Minus => -(index as i64) - 1,
    }
}

/// Chunk sizes used when a sparse array has to grow.
///
/// These only trade memory for reallocation frequency; results do not
/// depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Histogram counters added per growth step.
    pub bins: usize,
    /// Occupancy rows added per growth step.
    pub rows: usize,
    /// Occupancy bitset words (32 cells each) added per growth step.
    pub words: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            bins: 1024,
            rows: 1024,
            words: 256,
        }
    }
}

/// Grows `vec` so that `index` is in bounds. The new length is rounded up to
/// a multiple of `chunk` and new slots hold `T::default()`.
///
/// Returns whether the vector grew.
pub(crate) fn grow_to<T: Clone + Default>(
    vec: &mut Vec<T>,
    index: usize,
    chunk: usize,
    what: &'static str,
) -> Result<bool, StatsError> {
    if index < vec.len() {
        return Ok(false);
    }
    let chunk = chunk.max(1);
    let len = (index / chunk + 1) * chunk;
    vec.try_reserve_exact(len - vec.len())
        .map_err(|source| StatsError::Allocation { what, len, source })?;
    vec.resize(len, T::default());
    Ok(true)
}
