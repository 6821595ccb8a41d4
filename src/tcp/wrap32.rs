use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A 32-bit TCP sequence number. Arithmetic wraps modulo 2^32 and ordering is
/// decided by the signed difference, so `Wrap32::new(0)` comes after `Wrap32::new(u32::MAX)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Wrap32 {
    value: u32,
}

impl Wrap32 {
    const WRAP_SIZE: u64 = 1 << 32;
    const HALF_WRAP: u64 = 1 << 31;

    pub const fn new(value: u32) -> Self {
        Wrap32 { value }
    }

    pub const fn value(&self) -> u32 {
        self.value
    }

    /// Wrap an absolute `seq_no` given an `initial seq_no`
    pub fn wrap(n: u64, isn: Wrap32) -> Self {
        Wrap32::new((n + isn.value as u64) as u32)
    }

    /// Unwrap the given `initial seq_no` to an absolute `seq_no` closest to the `checkpoint`
    pub fn unwrap(&self, isn: Wrap32, checkpoint: u64) -> u64 {
        let relative = self.value.wrapping_sub(isn.value) as u64;

        // Number of wraps that lands closest to the checkpoint
        let k = (checkpoint + Self::HALF_WRAP).saturating_sub(relative) >> 32;

        relative + k * Self::WRAP_SIZE
    }

    /// Forward distance from `self` to `other`, counting through the wrap.
    pub fn distance_to(&self, other: Wrap32) -> u32 {
        other.value.wrapping_sub(self.value)
    }

    pub fn is_before(&self, other: Wrap32) -> bool {
        (*self - other) < 0
    }

    pub fn is_at_or_before(&self, other: Wrap32) -> bool {
        (*self - other) <= 0
    }

    pub fn is_after(&self, other: Wrap32) -> bool {
        (*self - other) > 0
    }

    pub fn min_seq(self, other: Wrap32) -> Wrap32 {
        if self.is_before(other) {
            self
        } else {
            other
        }
    }

    pub fn max_seq(self, other: Wrap32) -> Wrap32 {
        if self.is_after(other) {
            self
        } else {
            other
        }
    }
}

impl From<u32> for Wrap32 {
    fn from(value: u32) -> Self {
        Wrap32::new(value)
    }
}

impl Add<u32> for Wrap32 {
    type Output = Wrap32;

    fn add(self, n: u32) -> Wrap32 {
        Wrap32::new(self.value.wrapping_add(n))
    }
}

impl AddAssign<u32> for Wrap32 {
    fn add_assign(&mut self, n: u32) {
        self.value = self.value.wrapping_add(n);
    }
}

/// Signed distance `self - other`. Only meaningful while the two numbers are
/// less than 2^31 apart.
impl Sub for Wrap32 {
    type Output = i32;

    fn sub(self, other: Wrap32) -> i32 {
        self.value.wrapping_sub(other.value) as i32
    }
}

impl PartialOrd for Wrap32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some((*self - *other).cmp(&0))
    }
}

impl fmt::Display for Wrap32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// -- Unit tests --
