use std::{fmt, ops::BitOr};

use itertools::Itertools;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// A single API capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Feature {
    FinalEntrypoints,
    HeadlessCheck,
    IpcCheck,
    GetProgress,
    OpenCheck,
    CustomProgressBars,
}

impl Feature {
    pub fn bit(self) -> u64 {
        1 << self as u32
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A set of capabilities, as a bitmask. Bit positions are stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Features(u64);

impl Features {
    pub const NONE: Features = Features(0);

    pub const FINAL_ENTRYPOINTS: Features = Features(1 << 0);
    pub const HEADLESS_CHECK: Features = Features(1 << 1);
    pub const IPC_CHECK: Features = Features(1 << 2);
    pub const GET_PROGRESS: Features = Features(1 << 3);
    pub const OPEN_CHECK: Features = Features(1 << 4);
    pub const CUSTOM_PROGRESS_BARS: Features = Features(1 << 5);

    /// Everything 1.0.3 provides.
    pub const V1_0_3: Features = Features(
        Features::FINAL_ENTRYPOINTS.0
            | Features::HEADLESS_CHECK.0
            | Features::IPC_CHECK.0
            | Features::GET_PROGRESS.0
            | Features::OPEN_CHECK.0,
    );

    /// Everything 1.0.4 provides.
    pub const V1_0_4: Features = Features(Features::V1_0_3.0 | Features::CUSTOM_PROGRESS_BARS.0);

    pub fn from_bits(bits: u64) -> Features {
        Features(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    /// Whether any of `requested` is present.
    pub fn has_features(self, requested: Features) -> bool {
        self.0 & requested.0 != 0
    }

    /// Whether every one of `requested` is present.
    pub fn contains(self, requested: Features) -> bool {
        self.0 & requested.0 == requested.0
    }

    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::iter().filter(move |feature| self.0 & feature.bit() != 0)
    }
}

impl From<Feature> for Features {
    fn from(feature: Feature) -> Features {
        Features(feature.bit())
    }
}

impl BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iter().map(Feature::name).join(", "))
    }
}
