//! Spatial sort key.
//!
//! Coordinates are fixed-point degrees x 10^7. Latitude is shifted into
//! `0..=1_800_000_000` and longitude into `0..=3_600_000_000`, then the two
//! 32-bit values are bit-interleaved (Morton order). Keys that are close
//! numerically are, with high probability, close on the ground.

use std::fmt;

/// Fixed-point scale: one unit is 10^-7 degrees.
pub const COORD_SCALE: f64 = 10_000_000.0;

/// Largest valid latitude in fixed-point units.
pub const LAT_LIMIT: i32 = 900_000_000;

/// Largest valid longitude in fixed-point units.
pub const LON_LIMIT: i32 = 1_800_000_000;

/// A point in fixed-point degrees x 10^7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinate {
    /// Latitude, `-LAT_LIMIT..=LAT_LIMIT` when valid.
    pub lat: i32,
    /// Longitude, `-LON_LIMIT..=LON_LIMIT` when valid.
    pub lon: i32,
}

impl Coordinate {
    /// Creates a coordinate from fixed-point values.
    #[must_use]
    pub const fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// Creates a coordinate from floating-point degrees, rounding to the
    /// nearest fixed-point unit and clamping to the valid range.
    #[must_use]
    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        let lat = (lat * COORD_SCALE).round().clamp(-f64::from(LAT_LIMIT), f64::from(LAT_LIMIT));
        let lon = (lon * COORD_SCALE).round().clamp(-f64::from(LON_LIMIT), f64::from(LON_LIMIT));
        Self {
            lat: lat as i32,
            lon: lon as i32,
        }
    }

    /// Returns `(lat, lon)` in degrees.
    #[must_use]
    pub fn to_degrees(self) -> (f64, f64) {
        (
            f64::from(self.lat) / COORD_SCALE,
            f64::from(self.lon) / COORD_SCALE,
        )
    }

    /// Returns the coordinate clamped to the valid range.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            lat: self.lat.clamp(-LAT_LIMIT, LAT_LIMIT),
            lon: self.lon.clamp(-LON_LIMIT, LON_LIMIT),
        }
    }

    /// Returns the spatial key of this coordinate.
    #[must_use]
    pub fn key(self) -> GeoKey {
        GeoKey::from_coordinate(self)
    }
}

/// Sortable spatial key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GeoKey(pub u64);

impl GeoKey {
    /// Smallest possible key.
    pub const MIN: Self = Self(0);
    /// Largest possible key.
    pub const MAX: Self = Self(u64::MAX);

    /// Wraps a raw key value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Computes the key of a coordinate. Out-of-range input is clamped.
    #[must_use]
    pub fn from_coordinate(coord: Coordinate) -> Self {
        let coord = coord.clamped();
        let lat = (i64::from(coord.lat) + i64::from(LAT_LIMIT)) as u32;
        let lon = (i64::from(coord.lon) + i64::from(LON_LIMIT)) as u32;
        Self((spread(lat) << 1) | spread(lon))
    }

    /// Inverts [`GeoKey::from_coordinate`] for keys of valid coordinates.
    #[must_use]
    pub fn coordinate(self) -> Coordinate {
        let lat = i64::from(compact(self.0 >> 1)) - i64::from(LAT_LIMIT);
        let lon = i64::from(compact(self.0)) - i64::from(LON_LIMIT);
        Coordinate {
            lat: lat as i32,
            lon: lon as i32,
        }
    }

    /// Returns the coarse bucket containing this key.
    #[must_use]
    pub const fn bucket(self, shift: u32) -> u64 {
        if shift >= 64 {
            0
        } else {
            self.0 >> shift
        }
    }

    /// Returns the next larger key, saturating at [`GeoKey::MAX`].
    #[must_use]
    pub const fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for GeoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{:016x}", self.0)
    }
}

impl From<u64> for GeoKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Moves bit `i` of `v` to bit `2i`.
fn spread(v: u32) -> u64 {
    let mut x = u64::from(v);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Inverse of [`spread`]: gathers the even bits of `v`.
fn compact(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}
