use std::cmp::PartialEq;
use std::ops::{Add, Div, Mul, Rem, Sub};

//-----------------------------------------

pub trait Integer:
    Sized
    + Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Rem<Output = Self>
    + PartialEq
{
    fn zero() -> Self;
    fn one() -> Self;
}

pub fn div_up<T: Integer>(v: T, divisor: T) -> T {
    if v % divisor != Integer::zero() {
        v / divisor + Integer::one()
    } else {
        v / divisor
    }
}

pub fn round_down<T: Integer>(v: T, unit: T) -> T {
    v - v % unit
}

pub fn round_up<T: Integer>(v: T, unit: T) -> T {
    div_up(v, unit) * unit
}

//-----------------------------------------

impl Integer for usize {
    fn zero() -> Self {
        0
    }

    fn one() -> Self {
        1
    }
}

impl Integer for u64 {
    fn zero() -> Self {
        0
    }

    fn one() -> Self {
        1
    }
}

//-----------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(div_up(9u64, 4), 3);
        assert_eq!(round_down(4097u64, 4096), 4096);
        assert_eq!(round_up(4097u64, 4096), 8192);
        assert_eq!(round_up(8192u64, 4096), 8192);
        assert_eq!(round_up(0usize, 512), 0);
    }
}

//-----------------------------------------
