//! Disk capacity values as the platform encodes them (`32G`, `512M`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::CodecError;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// A disk capacity in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskSize(u64);

impl DiskSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// `None` when the capacity does not fit in 64 bits of bytes.
    pub const fn from_gigabytes(gb: u64) -> Option<Self> {
        match gb.checked_mul(GIB) {
            Some(bytes) => Some(Self(bytes)),
            None => None,
        }
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Whole gigabytes, rounded down.
    pub fn in_gigabytes(self) -> u64 {
        self.0 / GIB
    }
}

impl FromStr for DiskSize {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidSize(s.to_string());

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        if number.is_empty() || number.starts_with('.') || number.ends_with('.') {
            return Err(invalid());
        }

        let value: f64 = number.parse().map_err(|_| invalid())?;
        let multiplier = match unit.to_ascii_lowercase().as_str() {
            "" => 1,
            "k" | "kb" | "kib" => KIB,
            "m" | "mb" | "mib" => MIB,
            "g" | "gb" | "gib" => GIB,
            "t" | "tb" | "tib" => TIB,
            _ => return Err(invalid()),
        };

        Ok(Self((value * multiplier as f64).ceil() as u64))
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let round = |unit: u64| (self.0 as f64 / unit as f64 * 100.0).ceil() / 100.0;
        match self.0 {
            b if b < KIB => write!(f, "{b}"),
            b if b < MIB => write!(f, "{}K", round(KIB)),
            b if b < GIB => write!(f, "{}M", round(MIB)),
            b if b < TIB => write!(f, "{}G", round(GIB)),
            _ => write!(f, "{}T", round(TIB)),
        }
    }
}

impl Serialize for DiskSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
