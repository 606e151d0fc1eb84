//! VLAN tag sets.
//!
//! A [`VlanSet`] is either a concrete set of 802.1Q tags in
//! `[VLAN_MIN, VLAN_MAX]` or the symbolic [`VlanSet::Any`], meaning
//! "unconstrained, the other party chooses".
//!
//! All negotiation state is expressed in this type. Operations never mutate
//! their operands; every set operation returns a new value so that exclusion
//! history survives speculative recomputation.
//!
//! # ANY semantics
//!
//! - `ANY ∪ S = ANY`
//! - `ANY ∩ S = S`
//! - `ANY − S = FULL − S` (FULL is every legal tag), `S − ANY = ∅`
//! - `S ⊆ ANY` for every `S`, but `ANY ⊄ S` for any concrete `S`
//! - [`VlanSet::random_element`] never yields from `ANY`

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest assignable VLAN tag.
pub const VLAN_MIN: u16 = 2;

/// Highest assignable VLAN tag.
pub const VLAN_MAX: u16 = 4094;

/// Textual form of [`VlanSet::Any`].
pub const ANY_TOKEN: &str = "any";

/// Error parsing a VLAN set from its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VlanSetError {
    /// Token is not a number or range.
    #[error("Invalid VLAN token '{0}'")]
    InvalidToken(String),

    /// Tag outside `[VLAN_MIN, VLAN_MAX]`.
    #[error("VLAN tag {0} out of range {VLAN_MIN}-{VLAN_MAX}")]
    OutOfRange(u32),

    /// Range whose start is above its end.
    #[error("Inverted VLAN range {0}-{1}")]
    InvertedRange(u16, u16),
}

/// A set of VLAN tags, or ANY.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VlanSet {
    /// Unconstrained; the other party picks.
    Any,
    /// Concrete tags.
    Tags(BTreeSet<u16>),
}

impl Default for VlanSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl VlanSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::Tags(BTreeSet::new())
    }

    /// The symbolic ANY value.
    pub fn any() -> Self {
        Self::Any
    }

    /// Every legal tag, as a concrete set.
    pub fn full() -> Self {
        Self::Tags((VLAN_MIN..=VLAN_MAX).collect())
    }

    /// A single tag.
    pub fn single(tag: u16) -> Self {
        Self::Tags(BTreeSet::from([tag]))
    }

    /// An inclusive range of tags, clamped to the legal tag space.
    pub fn range(start: u16, end: u16) -> Self {
        let start = start.max(VLAN_MIN);
        let end = end.min(VLAN_MAX);
        if start > end {
            return Self::empty();
        }
        Self::Tags((start..=end).collect())
    }

    /// Builds a concrete set from tags, dropping anything outside the legal space.
    pub fn from_tags(tags: impl IntoIterator<Item = u16>) -> Self {
        Self::Tags(
            tags.into_iter()
                .filter(|t| (VLAN_MIN..=VLAN_MAX).contains(t))
                .collect(),
        )
    }

    /// Returns true for [`VlanSet::Any`].
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if this is a concrete set with no tags. ANY is never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Any => false,
            Self::Tags(tags) => tags.is_empty(),
        }
    }

    /// Number of concrete tags, or `None` for ANY.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Any => None,
            Self::Tags(tags) => Some(tags.len()),
        }
    }

    /// Returns true if `tag` is a member. ANY contains every legal tag.
    pub fn contains(&self, tag: u16) -> bool {
        match self {
            Self::Any => (VLAN_MIN..=VLAN_MAX).contains(&tag),
            Self::Tags(tags) => tags.contains(&tag),
        }
    }

    /// The concrete tags, or `None` for ANY.
    pub fn tags(&self) -> Option<&BTreeSet<u16>> {
        match self {
            Self::Any => None,
            Self::Tags(tags) => Some(tags),
        }
    }

    /// The only tag, if this is a concrete singleton.
    pub fn single_tag(&self) -> Option<u16> {
        match self {
            Self::Tags(tags) if tags.len() == 1 => tags.iter().next().copied(),
            _ => None,
        }
    }

    /// Set union. ANY absorbs.
    pub fn union(&self, other: &VlanSet) -> VlanSet {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => Self::Any,
            (Self::Tags(a), Self::Tags(b)) => Self::Tags(a.union(b).copied().collect()),
        }
    }

    /// Set intersection. ANY is the identity.
    pub fn intersection(&self, other: &VlanSet) -> VlanSet {
        match (self, other) {
            (Self::Any, x) | (x, Self::Any) => x.clone(),
            (Self::Tags(a), Self::Tags(b)) => Self::Tags(a.intersection(b).copied().collect()),
        }
    }

    /// Set difference `self − other`.
    pub fn difference(&self, other: &VlanSet) -> VlanSet {
        match (self, other) {
            (_, Self::Any) => Self::empty(),
            (Self::Any, Self::Tags(b)) if b.is_empty() => Self::Any,
            (Self::Any, Self::Tags(b)) => {
                Self::Tags((VLAN_MIN..=VLAN_MAX).filter(|t| !b.contains(t)).collect())
            }
            (Self::Tags(a), Self::Tags(b)) => Self::Tags(a.difference(b).copied().collect()),
        }
    }

    /// Subset test. Everything is a subset of ANY; ANY is a subset only of ANY.
    pub fn is_subset_of(&self, other: &VlanSet) -> bool {
        match (self, other) {
            (_, Self::Any) => true,
            (Self::Any, Self::Tags(_)) => false,
            (Self::Tags(a), Self::Tags(b)) => a.is_subset(b),
        }
    }

    /// Returns true if the two sets share no tag.
    pub fn is_disjoint(&self, other: &VlanSet) -> bool {
        if self.is_empty() || other.is_empty() {
            return true;
        }
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => false,
            (Self::Tags(a), Self::Tags(b)) => a.is_disjoint(b),
        }
    }

    /// Draws one concrete tag uniformly at random. ANY and the empty set yield `None`.
    pub fn random_element<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u16> {
        match self {
            Self::Any => None,
            Self::Tags(tags) => tags.iter().copied().choose(rng),
        }
    }

    /// Iterates concrete tags in ascending order. ANY yields nothing.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.tags().into_iter().flat_map(|tags| tags.iter().copied())
    }

    fn parse_tag(token: &str) -> Result<u16, VlanSetError> {
        let value: u32 = token
            .parse()
            .map_err(|_| VlanSetError::InvalidToken(token.to_string()))?;
        if value < u32::from(VLAN_MIN) || value > u32::from(VLAN_MAX) {
            return Err(VlanSetError::OutOfRange(value));
        }
        Ok(value as u16)
    }
}

impl FromStr for VlanSet {
    type Err = VlanSetError;

    /// Parses `any`, the empty string, or a comma separated list of tags and
    /// inclusive ranges such as `100-110,200`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(ANY_TOKEN) {
            return Ok(Self::Any);
        }

        let mut tags = BTreeSet::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.split_once('-') {
                Some((lo, hi)) => {
                    let lo = Self::parse_tag(lo.trim())?;
                    let hi = Self::parse_tag(hi.trim())?;
                    if lo > hi {
                        return Err(VlanSetError::InvertedRange(lo, hi));
                    }
                    tags.extend(lo..=hi);
                }
                None => {
                    tags.insert(Self::parse_tag(token)?);
                }
            }
        }
        Ok(Self::Tags(tags))
    }
}

impl fmt::Display for VlanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags = match self {
            Self::Any => return f.write_str(ANY_TOKEN),
            Self::Tags(tags) => tags,
        };

        // Collapse consecutive runs into ranges
        let mut runs: Vec<(u16, u16)> = Vec::new();
        for &tag in tags {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == tag => *end = tag,
                _ => runs.push((tag, tag)),
            }
        }

        let rendered: Vec<String> = runs
            .into_iter()
            .map(|(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}

impl TryFrom<String> for VlanSet {
    type Error = VlanSetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VlanSet> for String {
    fn from(value: VlanSet) -> Self {
        value.to_string()
    }
}
