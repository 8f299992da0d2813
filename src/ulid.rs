//! # ULID Engine
//!
//! Generates 128-bit, lexicographically sortable identifiers: 48 bits of
//! millisecond wall-clock time followed by 80 bits of randomness, encoded as
//! 26 Crockford base-32 characters. Because the timestamp leads, string
//! order equals chronological order, which is what makes the store's
//! `(topic, id DESC)` index and the retention range scan work.
//!
//! ## Layout
//!
//! ```text
//!  byte  0                   5 6                             15
//!       ┌─────────────────────┬───────────────────────────────┐
//!       │ 48-bit ms timestamp │        80-bit random tail     │
//!       └─────────────────────┴───────────────────────────────┘
//!  char  0         9 10                                      25
//!       ┌───────────┬─────────────────────────────────────────┐
//!       │ 10 chars  │               16 chars                  │
//!       └───────────┴─────────────────────────────────────────┘
//! ```
//!
//! ## Monotonicity
//!
//! Two ids minted by the same generator are strictly increasing as byte
//! strings. Within one millisecond the random tail is incremented as an
//! 80-bit big-endian integer instead of redrawn; a clock that retreats is
//! clamped to the last observed millisecond and takes the same increment
//! path. Tail overflow within a single millisecond is ignored as
//! astronomically improbable.
//!
//! ## Entropy
//!
//! The random tail is produced by an RC4-style keystream. It is tiny, has
//! no fixed-width dependencies, and is entirely sufficient here: the
//! randomness backs uniqueness, not secrecy, and on the hot path the tail
//! is incremented far more often than fresh bytes are drawn. The keystream
//! is seeded from the OS entropy source; without [`GeneratorOptions::secure`]
//! a time/stack/counter bootstrap stands in when the OS source fails.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

// =============================================================================
// Encoding Tables
// =============================================================================

/// Length of the canonical text form.
pub const ULID_LEN: usize = 26;

/// Crockford base-32 alphabet: digits and uppercase letters minus I, L, O, U.
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Reverse mapping from ASCII byte to 5-bit value; -1 marks invalid input.
///
/// Accepts lowercase, and the usual Crockford aliases: `I`/`L` decode as 1,
/// `O` decodes as 0. `U` stays invalid.
const DECODE: [i8; 256] = {
    let mut table = [-1i8; 256];
    let mut v = 0;
    while v < 32 {
        let c = ALPHABET[v];
        table[c as usize] = v as i8;
        if c >= b'A' {
            table[(c + 32) as usize] = v as i8;
        }
        v += 1;
    }
    table[b'I' as usize] = 1;
    table[b'i' as usize] = 1;
    table[b'L' as usize] = 1;
    table[b'l' as usize] = 1;
    table[b'O' as usize] = 0;
    table[b'o' as usize] = 0;
    table
};

// =============================================================================
// Encode / Decode
// =============================================================================

/// Encodes a 16-byte identifier into its 26-character canonical form.
///
/// 130 output bits carry 128 input bits, so the first character encodes
/// only the top 3 bits and is always in `0..=7`.
pub fn encode(bytes: &[u8; 16]) -> [u8; ULID_LEN] {
    let value = u128::from_be_bytes(*bytes);
    let mut out = [0u8; ULID_LEN];
    for (i, slot) in out.iter_mut().enumerate() {
        let shift = 125 - 5 * i;
        *slot = ALPHABET[((value >> shift) & 0x1f) as usize];
    }
    out
}

/// Decodes a 26-character string back into its 16-byte identifier.
///
/// # Errors
///
/// Returns [`Error::InvalidUlid`] if the input is not exactly 26 characters,
/// contains a character outside the Crockford alphabet, or has a first
/// character above `7` (the top 2 bits of a valid id are zero by
/// construction, so the first character carries at most 3 bits).
pub fn decode(s: &str) -> Result<[u8; 16]> {
    let bytes = s.as_bytes();
    if bytes.len() != ULID_LEN {
        return Err(Error::InvalidUlid(format!(
            "expected {ULID_LEN} characters, got {}",
            bytes.len()
        )));
    }

    let first = DECODE[bytes[0] as usize];
    if first < 0 {
        return Err(Error::InvalidUlid(format!(
            "invalid character {:?}",
            bytes[0] as char
        )));
    }
    if first > 7 {
        return Err(Error::InvalidUlid(format!(
            "first character {:?} encodes more than 3 bits",
            bytes[0] as char
        )));
    }

    let mut value = first as u128;
    for &b in &bytes[1..] {
        let v = DECODE[b as usize];
        if v < 0 {
            return Err(Error::InvalidUlid(format!(
                "invalid character {:?}",
                b as char
            )));
        }
        value = (value << 5) | v as u128;
    }

    Ok(value.to_be_bytes())
}

// =============================================================================
// Ulid
// =============================================================================

/// A validated, canonically-encoded identifier.
///
/// The wrapped string is always 26 uppercase Crockford characters, so
/// `Ord` on `Ulid` equals chronological order of the embedded timestamps.
/// Construction goes through [`Ulid::parse`] (which canonicalizes case and
/// aliases) or a [`UlidGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ulid(String);

impl Ulid {
    /// Parses and canonicalizes an externally-supplied identifier.
    ///
    /// Lowercase input and Crockford aliases (`I`, `L`, `O`) are accepted
    /// and normalized to the canonical uppercase form, so equality and
    /// ordering are well-defined afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUlid`] for anything [`decode`] rejects.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = decode(s)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Builds an id from its 16-byte form.
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let encoded = encode(bytes);
        // The alphabet is pure ASCII; the conversion cannot fail.
        Self(String::from_utf8(encoded.to_vec()).expect("crockford output is ascii"))
    }

    /// Returns the canonical 26-character text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the owned string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns the 16-byte form.
    pub fn to_bytes(&self) -> [u8; 16] {
        decode(&self.0).expect("ulid is always canonically encoded")
    }

    /// Returns the millisecond Unix timestamp embedded in the id.
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.to_bytes();
        let mut ts = 0u64;
        for &b in &bytes[..6] {
            ts = (ts << 8) | b as u64;
        }
        ts
    }
}

impl std::fmt::Display for Ulid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Behavior switches for a [`UlidGenerator`].
#[derive(Debug, Clone, Copy)]
pub struct GeneratorOptions {
    /// Redraw the random tail even within the same millisecond. Faster,
    /// but ids minted in one millisecond are no longer strictly ordered.
    pub relaxed: bool,

    /// Clear the top bit of the random tail on every refill, guaranteeing
    /// at least 2^79 increments of headroom before the tail could carry
    /// into the timestamp.
    pub paranoid: bool,

    /// Fail construction instead of falling back to the weak bootstrap
    /// when the OS entropy source is unavailable.
    pub secure: bool,
}

impl Default for GeneratorOptions {
    /// The configuration the plugin runs with: strict monotonicity and
    /// increment headroom, weak-seed fallback permitted.
    fn default() -> Self {
        Self {
            relaxed: false,
            paranoid: true,
            secure: false,
        }
    }
}

/// Stateful, single-threaded id generator.
///
/// # Ownership
///
/// The generator is owned by the message handler and mutated only on the
/// broker's publish thread. It is deliberately not `Sync`; one instance
/// exists per plugin context.
#[derive(Debug)]
pub struct UlidGenerator {
    /// The last id handed out, in byte form. The increment path mutates
    /// this in place.
    last: [u8; 16],

    /// Millisecond timestamp of the last id. Never decreases.
    last_ts: u64,

    opts: GeneratorOptions,

    /// RC4-style keystream state.
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl UlidGenerator {
    /// Creates a generator seeded from the OS entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`] when the OS source fails and
    /// [`GeneratorOptions::secure`] is set. Otherwise a failed read falls
    /// back to [`Self::bootstrap`].
    pub fn new(opts: GeneratorOptions) -> Result<Self> {
        let mut gen = Self {
            last: [0; 16],
            last_ts: 0,
            opts,
            s: [0; 256],
            i: 0,
            j: 0,
        };
        for (i, slot) in gen.s.iter_mut().enumerate() {
            *slot = i as u8;
        }

        let mut key = [0u8; 256];
        match OsRng.try_fill_bytes(&mut key) {
            Ok(()) => gen.mix(&key),
            Err(e) if opts.secure => return Err(Error::Entropy(e.to_string())),
            Err(_) => gen.bootstrap(),
        }

        Ok(gen)
    }

    /// Mints the next identifier.
    ///
    /// The returned id is strictly greater, byte-wise, than every id this
    /// generator has returned before (unless `relaxed` is set). The
    /// timestamp prefix equals the current wall-clock millisecond, or the
    /// last observed one if the clock stepped backwards.
    pub fn next(&mut self) -> Ulid {
        let mut ts = system_time_ms();
        if ts < self.last_ts {
            // Clock retreat: reuse the last timestamp and keep counting.
            ts = self.last_ts;
        }

        if !self.opts.relaxed && ts == self.last_ts {
            // Same millisecond: bump the 80-bit tail, carry toward byte 6.
            for i in (6..16).rev() {
                self.last[i] = self.last[i].wrapping_add(1);
                if self.last[i] != 0 {
                    break;
                }
            }
            return Ulid::from_bytes(&self.last);
        }

        self.last_ts = ts;
        self.last[0] = (ts >> 40) as u8;
        self.last[1] = (ts >> 32) as u8;
        self.last[2] = (ts >> 24) as u8;
        self.last[3] = (ts >> 16) as u8;
        self.last[4] = (ts >> 8) as u8;
        self.last[5] = ts as u8;

        for i in 6..16 {
            self.last[i] = self.keystream_byte();
        }

        if self.opts.paranoid {
            self.last[6] &= 0x7f;
        }

        Ulid::from_bytes(&self.last)
    }

    /// One key-scheduling pass over the permutation.
    fn mix(&mut self, key: &[u8]) {
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(self.s[i])
                .wrapping_add(key[i % key.len()]);
            self.s.swap(i, j as usize);
        }
    }

    /// Seeds the permutation without OS entropy.
    ///
    /// Mixes wall-clock nanoseconds, a monotonic-clock reading, a stack
    /// address and a round counter over 2^16 key-scheduling passes. The
    /// result is unpredictable enough for uniqueness; it is not, and does
    /// not need to be, cryptographic.
    fn bootstrap(&mut self) {
        let start = Instant::now();
        let mut noise = [0u8; 32];
        for round in 0u64..1 << 16 {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64);
            noise[0..8].copy_from_slice(&nanos.to_le_bytes());
            noise[8..16].copy_from_slice(&round.to_le_bytes());
            noise[16..24].copy_from_slice(&(start.elapsed().as_nanos() as u64).to_le_bytes());
            let addr = noise.as_ptr() as usize as u64;
            noise[24..32].copy_from_slice(&addr.to_le_bytes());
            self.mix(&noise);
        }
    }

    /// Draws one byte from the keystream.
    fn keystream_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[idx as usize]
    }
}

/// Current Unix time in milliseconds. A coarse clock is fine at this
/// resolution.
fn system_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// =============================================================================
// Tests
// =============================================================================
