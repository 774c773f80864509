//! Sortable identifiers for purchases, items and scans.

use crate::error::{CoreError, CoreResult};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use ulid::Ulid;

/// Crockford base-32 alphabet (no I, L, O or U).
pub const ALPHABET: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of an encoded identifier.
pub const ENCODED_LEN: usize = 26;

/// Length of the time prefix of an encoded identifier.
pub const TIME_LEN: usize = 10;

/// A time-prefixed, randomly-suffixed identifier.
///
/// The encoded form is 26 characters: 10 characters of millisecond time
/// followed by 16 characters (80 bits) of randomness. Identifiers minted in
/// strictly later milliseconds sort strictly greater, both as values and as
/// strings. Two identifiers minted in the same millisecond are ordered by
/// their random part, which is arbitrary.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(Ulid);

impl Identifier {
    /// Creates an identifier from a millisecond timestamp and random bits.
    ///
    /// Only the low 80 bits of `random` are used.
    #[must_use]
    pub fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, random))
    }

    /// Parses an encoded identifier.
    ///
    /// Only the canonical uppercase alphabet is accepted.
    pub fn parse(value: &str) -> CoreResult<Self> {
        if value.len() != ENCODED_LEN || !value.chars().all(|c| ALPHABET.contains(c)) {
            return Err(CoreError::invalid_identifier(value));
        }
        Ulid::from_string(value)
            .map(Self)
            .map_err(|_| CoreError::invalid_identifier(value))
    }

    /// Returns the millisecond timestamp component.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_string()
    }
}

/// Source of millisecond timestamps for the generator.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Generates [`Identifier`]s.
///
/// Randomness comes from the thread-local CSPRNG, so a single generator can be
/// shared by any number of threads without coordination.
#[derive(Clone)]
pub struct IdGenerator {
    clock: Clock,
}

impl IdGenerator {
    /// Creates a generator backed by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(crate::types::now_millis),
        }
    }

    /// Creates a generator with a custom clock.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// Mints the next identifier.
    #[must_use]
    pub fn next(&self) -> Identifier {
        let random: u128 = rand::thread_rng().gen();
        Identifier::from_parts((self.clock)(), random)
    }

    /// Mints the next identifier in its encoded string form.
    #[must_use]
    pub fn next_string(&self) -> String {
        self.next().to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}
