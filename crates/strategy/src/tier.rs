// SPDX-License-Identifier: Apache-2.0

//! Optimization tiers.

/// The optimization levels, totally ordered.
///
/// `VeryHot` is reserved for profiling-instrumented bodies on the way to
/// `Scorching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Unoptimized compilation.
    NoOpt,
    /// Cheap first compile.
    Cold,
    /// The standard tier.
    Warm,
    /// Optimized recompilation.
    Hot,
    /// Hot plus profiling instrumentation.
    VeryHot,
    /// Maximum optimization, fed by very-hot profiles.
    Scorching,
}

impl Tier {
    /// All tiers, ascending.
    pub const ALL: [Tier; 6] = [
        Tier::NoOpt,
        Tier::Cold,
        Tier::Warm,
        Tier::Hot,
        Tier::VeryHot,
        Tier::Scorching,
    ];

    /// The tier sampling promotes to after this one, if any. `VeryHot`
    /// bodies have already gathered their profile and finish at
    /// `Scorching`.
    #[must_use]
    pub fn next_for_sampling(self) -> Option<Tier> {
        match self {
            Tier::NoOpt | Tier::Cold => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Hot),
            Tier::Hot | Tier::VeryHot => Some(Tier::Scorching),
            Tier::Scorching => None,
        }
    }

    /// Moves `delta` steps along the tier ladder, clamped at the ends.
    #[must_use]
    pub fn offset(self, delta: i32) -> Tier {
        let index = Self::ALL
            .iter()
            .position(|&t| t == self)
            .unwrap_or_default() as i32;
        let clamped = (index + delta).clamp(0, Self::ALL.len() as i32 - 1);
        Self::ALL[clamped as usize]
    }

    /// Stable small encoding, for atomics.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Tier::NoOpt => 0,
            Tier::Cold => 1,
            Tier::Warm => 2,
            Tier::Hot => 3,
            Tier::VeryHot => 4,
            Tier::Scorching => 5,
        }
    }

    /// Decodes [`to_u8`](Tier::to_u8); out-of-range values clamp to
    /// `Scorching`.
    #[must_use]
    pub fn from_u8(raw: u8) -> Tier {
        *Self::ALL.get(raw as usize).unwrap_or(&Tier::Scorching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(Tier::NoOpt < Tier::Cold);
        assert!(Tier::Cold < Tier::Warm);
        assert!(Tier::Warm < Tier::Hot);
        assert!(Tier::Hot < Tier::VeryHot);
        assert!(Tier::VeryHot < Tier::Scorching);
    }

    #[test]
    fn encoding_round_trips() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_u8(tier.to_u8()), tier);
        }
    }

    #[test]
    fn offset_clamps_at_both_ends() {
        assert_eq!(Tier::Cold.offset(-5), Tier::NoOpt);
        assert_eq!(Tier::Hot.offset(10), Tier::Scorching);
        assert_eq!(Tier::Warm.offset(1), Tier::Hot);
        assert_eq!(Tier::Warm.offset(-1), Tier::Cold);
    }
}
