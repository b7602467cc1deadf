//! Arena configuration parameters.

use kiln_core::mem::{KIB, MIB};

use crate::error::ArenaError;

/// Sizing for a virtual-memory arena.
///
/// Both sizes are rounded up to the page size when the arena is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Bytes of address space to reserve. This is the hard upper bound on
    /// what the arena can ever hand out.
    ///
    /// Default: 64 MiB.
    pub reserve: usize,

    /// Bytes to commit eagerly at creation. Further pages are committed on
    /// demand, doubling each time.
    ///
    /// Default: 4 KiB. Zero defers all commits to the first allocation.
    pub commit: usize,
}

impl ArenaConfig {
    /// Default address-space reservation.
    pub const DEFAULT_RESERVE: usize = 64 * MIB;

    /// Default eager commit.
    pub const DEFAULT_COMMIT: usize = 4 * KIB;

    /// Create a config with the given reservation and the default commit
    /// (clamped so that it never exceeds the reservation).
    pub fn new(reserve: usize) -> Self {
        Self {
            reserve,
            commit: Self::DEFAULT_COMMIT.min(reserve),
        }
    }

    /// Check that the sizes describe a usable arena.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.reserve == 0 || self.commit > self.reserve {
            return Err(ArenaError::InvalidSize {
                reserve: self.reserve,
                commit: self.commit,
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            reserve: Self::DEFAULT_RESERVE,
            commit: Self::DEFAULT_COMMIT,
        }
    }
}
