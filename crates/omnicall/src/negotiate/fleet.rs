//! Fleet-wide version vote.
//!
//! Decides whether a many-endpoint invocation should ask for a different
//! version than the caller requested. The rules are applied in a fixed order
//! and every tie is broken on integer version keys, so identical probe
//! results always produce the same decision.

use std::collections::{BTreeMap, BTreeSet};

/// Versions one surviving endpoint speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointVersions {
    /// Version spoken at the probed URL.
    pub primary: u32,
    /// Every version spoken at any URL, including the primary.
    pub supported: BTreeSet<u32>,
}

impl EndpointVersions {
    /// Builds a tally entry; the primary is always counted as supported.
    #[must_use]
    pub fn new(primary: u32, others: impl IntoIterator<Item = u32>) -> Self {
        let mut supported: BTreeSet<u32> = others.into_iter().collect();
        supported.insert(primary);
        Self { primary, supported }
    }
}

/// Which rule settled the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRule {
    /// Every endpoint speaks the desired version at its probed URL.
    AllLive,
    /// Every endpoint speaks the desired version somewhere.
    AllAnywhere,
    /// At least half the endpoints speak the desired version somewhere.
    DesiredMajority,
    /// The most common primary version is supported everywhere.
    MostLiveUniversal,
    /// The most common primary version is primary on at least half.
    MostLiveMajority,
    /// The most widely supported version is supported everywhere.
    MostAnywhereUniversal,
    /// The most widely supported version is supported by at least half.
    MostAnywhereMajority,
    /// Nothing won, but some endpoint still speaks the desired version.
    DesiredStillSupported,
    /// Nobody speaks the desired version; fall back to the most supported.
    LastResort,
}

/// Result of a fleet vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    /// Version the vote settled on.
    pub version: u32,
    /// Rule that settled it.
    pub rule: VoteRule,
}

/// Counts of live and anywhere support for every version seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    total: usize,
    live: BTreeMap<u32, usize>,
    anywhere: BTreeMap<u32, usize>,
}

impl Tally {
    /// Tallies the surviving endpoints.
    #[must_use]
    pub fn new(endpoints: &[EndpointVersions]) -> Self {
        let mut tally = Self {
            total: endpoints.len(),
            ..Self::default()
        };
        for endpoint in endpoints {
            *tally.live.entry(endpoint.primary).or_default() += 1;
            for version in &endpoint.supported {
                *tally.anywhere.entry(*version).or_default() += 1;
            }
        }
        tally
    }

    /// Number of surviving endpoints.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Endpoints whose primary version is `version`.
    #[must_use]
    pub fn live(&self, version: u32) -> usize {
        self.live.get(&version).copied().unwrap_or_default()
    }

    /// Endpoints speaking `version` at any URL.
    #[must_use]
    pub fn anywhere(&self, version: u32) -> usize {
        self.anywhere.get(&version).copied().unwrap_or_default()
    }

    const fn at_least_half(&self, count: usize) -> bool {
        count * 2 >= self.total
    }
}

/// Runs the vote for `desired` over the surviving endpoints.
///
/// An empty fleet keeps `desired`.
#[must_use]
pub fn vote(endpoints: &[EndpointVersions], desired: u32) -> Vote {
    let tally = Tally::new(endpoints);
    let keep = |rule| Vote {
        version: desired,
        rule,
    };
    if tally.total == 0 || tally.live(desired) == tally.total {
        return keep(VoteRule::AllLive);
    }
    if tally.anywhere(desired) == tally.total {
        return keep(VoteRule::AllAnywhere);
    }
    if tally.at_least_half(tally.anywhere(desired)) {
        return keep(VoteRule::DesiredMajority);
    }

    let most_live = most_common(&tally.live, desired);
    let most_anywhere = most_common(&tally.anywhere, desired);

    if let Some(version) = most_live {
        if tally.anywhere(version) == tally.total {
            return Vote {
                version,
                rule: VoteRule::MostLiveUniversal,
            };
        }
        if tally.at_least_half(tally.live(version)) {
            return Vote {
                version,
                rule: VoteRule::MostLiveMajority,
            };
        }
    }
    if let Some(version) = most_anywhere {
        if tally.anywhere(version) == tally.total {
            return Vote {
                version,
                rule: VoteRule::MostAnywhereUniversal,
            };
        }
        if tally.at_least_half(tally.anywhere(version)) {
            return Vote {
                version,
                rule: VoteRule::MostAnywhereMajority,
            };
        }
    }
    if tally.anywhere(desired) > 0 {
        return keep(VoteRule::DesiredStillSupported);
    }
    most_anywhere.map_or_else(
        || keep(VoteRule::LastResort),
        |version| Vote {
            version,
            rule: VoteRule::LastResort,
        },
    )
}

/// Version with the highest count; ties prefer closeness to `desired`, then
/// the lower version.
fn most_common(counts: &BTreeMap<u32, usize>, desired: u32) -> Option<u32> {
    counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .min_by_key(|(version, count)| {
            (
                std::cmp::Reverse(**count),
                version.abs_diff(desired),
                **version,
            )
        })
        .map(|(version, _)| *version)
}
