//! Query narrowing test.
//!
//! Decides whether the results fetched for an old query are guaranteed to
//! be a superset of what a new query would return. If so the new query can
//! be answered by filtering locally; otherwise a refetch is required.
//!
//! The test is a conservative lower bound: it may demand a refetch that was
//! not strictly needed, but it never reports a narrowing that could miss
//! results.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::query::{
    BoundingBox, DateRange, ProjectFilter, Query, BOX, DATE, LOT_SIZE, PROJECTS, REGION, TEXT,
};

/// Why a refetch is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefetchReason {
    NoPriorQuery,
    LotSize,
    Projects,
    Text,
    DateRange,
    BoundingBox,
    Region,
    /// An unrecognised filter changed.
    Other(String),
}

impl fmt::Display for RefetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefetchReason::NoPriorQuery => f.write_str("no prior query"),
            RefetchReason::LotSize => f.write_str("lot size filter present"),
            RefetchReason::Projects => f.write_str("project filter widened"),
            RefetchReason::Text => f.write_str("text filter widened"),
            RefetchReason::DateRange => f.write_str("date range widened"),
            RefetchReason::BoundingBox => f.write_str("bounding box widened"),
            RefetchReason::Region => f.write_str("region changed"),
            RefetchReason::Other(name) => write!(f, "filter {name:?} changed"),
        }
    }
}

/// Outcome of the narrowing test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Old results are a superset; filter locally.
    Narrowing,
    /// Results must be fetched again.
    Refetch(RefetchReason),
}

impl Verdict {
    pub fn is_narrowing(&self) -> bool {
        matches!(self, Verdict::Narrowing)
    }
}

type Check = fn(&Query, &Query) -> bool;

/// Is `new` provably narrower than (or equal to) `old`?
pub fn is_narrowing_query(new: &Query, old: Option<&Query>) -> bool {
    narrowing_verdict(new, old).is_narrowing()
}

/// Run every dimension check and report the first failing one.
pub fn narrowing_verdict(new: &Query, old: Option<&Query>) -> Verdict {
    let Some(old) = old else {
        return Verdict::Refetch(RefetchReason::NoPriorQuery);
    };

    let checks: [(RefetchReason, Check); 6] = [
        (RefetchReason::LotSize, lot_size_narrows),
        (RefetchReason::Projects, projects_narrow),
        (RefetchReason::Text, text_narrows),
        (RefetchReason::DateRange, date_range_narrows),
        (RefetchReason::BoundingBox, box_narrows),
        (RefetchReason::Region, region_unchanged),
    ];
    for (reason, check) in checks {
        if !check(new, old) {
            return Verdict::Refetch(reason);
        }
    }

    match changed_other_filter(new, old) {
        Some(name) => Verdict::Refetch(RefetchReason::Other(name)),
        None => Verdict::Narrowing,
    }
}

/// Lot size is computed by the server; any use forces a refetch.
fn lot_size_narrows(new: &Query, old: &Query) -> bool {
    new.lot_size().is_none() && old.lot_size().is_none()
}

fn projects_narrow(new: &Query, old: &Query) -> bool {
    match (old.get(PROJECTS), new.get(PROJECTS)) {
        (None, None) => true,
        (Some(old), Some(new)) if old == new => true,
        (Some(old), Some(new)) => matches!(
            (ProjectFilter::from_str(old), ProjectFilter::from_str(new)),
            (Ok(ProjectFilter::All), Ok(_))
        ),
        // Introduced or dropped.
        _ => false,
    }
}

/// The new text must extend the old text, so anything matching it also
/// matches the old text.
fn text_narrows(new: &Query, old: &Query) -> bool {
    match (old.text(), new.text()) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(old), Some(new)) => new.starts_with(old),
    }
}

fn date_range_narrows(new: &Query, old: &Query) -> bool {
    contained::<DateRange>(old.get(DATE), new.get(DATE), |outer, inner| {
        outer.contains(inner)
    })
}

fn box_narrows(new: &Query, old: &Query) -> bool {
    contained::<BoundingBox>(old.get(BOX), new.get(BOX), |outer, inner| {
        outer.contains(inner)
    })
}

/// Shared containment rule for range-like filters: absent in the old query
/// admits anything, absent in the new one widens, otherwise the new value
/// must parse and lie inside the old one.
fn contained<T: FromStr>(old: Option<&str>, new: Option<&str>, within: fn(&T, &T) -> bool) -> bool {
    match (old, new) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(old), Some(new)) if old == new => true,
        (Some(old), Some(new)) => match (old.parse::<T>(), new.parse::<T>()) {
            (Ok(outer), Ok(inner)) => within(&outer, &inner),
            _ => false,
        },
    }
}

/// No containment reasoning for regions.
fn region_unchanged(new: &Query, old: &Query) -> bool {
    old.get(REGION) == new.get(REGION)
}

fn changed_other_filter(new: &Query, old: &Query) -> Option<String> {
    const KNOWN: [&str; 6] = [TEXT, LOT_SIZE, PROJECTS, DATE, BOX, REGION];
    let names: BTreeSet<&str> = old.iter().chain(new.iter()).map(|(name, _)| name).collect();
    names
        .into_iter()
        .filter(|name| !KNOWN.contains(name))
        .find(|name| old.get(name) != new.get(name))
        .map(str::to_string)
}
