//! Filter queries and local filtering.
//!
//! A [`Query`] maps filter names to their text values, exactly as they
//! appear in the fragment (`f.text=Main`) and in fetch requests. Typed
//! accessors parse the recognised filters on demand.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::codec::encode_value;
use crate::collection::Entity;
use crate::error::{Result, StateError};
use crate::state::StateValue;

/// Free-text filter.
pub const TEXT: &str = "text";
/// Lot size filter, evaluated by the server only.
pub const LOT_SIZE: &str = "lotsize";
/// Project inclusion filter.
pub const PROJECTS: &str = "projects";
/// Date range filter.
pub const DATE: &str = "date";
/// Bounding box filter.
pub const BOX: &str = "box";
/// Named region filter.
pub const REGION: &str = "region";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Axis-aligned bounding box, `south,west,north,east` in text form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Build a box from two opposite corners in any order.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            south: a.lat.min(b.lat),
            west: a.lng.min(b.lng),
            north: a.lat.max(b.lat),
            east: a.lng.max(b.lng),
        }
    }

    pub fn contains_point(&self, point: Point) -> bool {
        (self.south..=self.north).contains(&point.lat) && (self.west..=self.east).contains(&point.lng)
    }

    /// True if `other` lies wholly inside `self` (edges may touch).
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.south <= other.south
            && self.west <= other.west
            && self.north >= other.north
            && self.east >= other.east
    }
}

impl FromStr for BoundingBox {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        let coords = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| StateError::invalid_filter(BOX, err.to_string()))?;
        match coords.as_slice() {
            &[lat1, lng1, lat2, lng2] if coords.iter().all(|c| c.is_finite()) => Ok(
                Self::from_corners(Point::new(lat1, lng1), Point::new(lat2, lng2)),
            ),
            _ => Err(StateError::invalid_filter(BOX, "expected 4 finite coordinates")),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

/// Inclusive date range; either end may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(StateError::invalid_filter(DATE, "start is after end"));
            }
        }
        Ok(Self { start, end })
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    /// True if every date in `other` is also in `self`.
    pub fn contains(&self, other: &DateRange) -> bool {
        let start_ok = match (self.start, other.start) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(outer), Some(inner)) => inner >= outer,
        };
        let end_ok = match (self.end, other.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(outer), Some(inner)) => inner <= outer,
        };
        start_ok && end_ok
    }
}

impl FromStr for DateRange {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once(',')
            .ok_or_else(|| StateError::invalid_filter(DATE, "expected start,end"))?;
        let parse = |part: &str| -> Result<Option<NaiveDate>> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            NaiveDate::parse_from_str(part, DATE_FORMAT)
                .map(Some)
                .map_err(|err| StateError::invalid_filter(DATE, format!("{part:?}: {err}")))
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_date = |date: Option<NaiveDate>| {
            date.map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default()
        };
        write!(f, "{},{}", fmt_date(self.start), fmt_date(self.end))
    }
}

/// Whether proposals attached to a project are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectFilter {
    /// Everything.
    All,
    /// Only proposals attached to a project.
    Include,
    /// Only proposals without a project.
    Exclude,
}

impl ProjectFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectFilter::All => "all",
            ProjectFilter::Include => "include",
            ProjectFilter::Exclude => "exclude",
        }
    }

    /// Does an entity with this project status pass? Unknown counts as
    /// not attached to a project.
    pub fn admits(&self, is_project: Option<bool>) -> bool {
        match self {
            ProjectFilter::All => true,
            ProjectFilter::Include => is_project == Some(true),
            ProjectFilter::Exclude => is_project != Some(true),
        }
    }
}

impl FromStr for ProjectFilter {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(ProjectFilter::All),
            "include" => Ok(ProjectFilter::Include),
            "exclude" => Ok(ProjectFilter::Exclude),
            other => Err(StateError::invalid_filter(
                PROJECTS,
                format!("unknown value {other:?}"),
            )),
        }
    }
}

/// Entity attributes consulted by local filtering. Every accessor defaults
/// to "unknown", which fails the corresponding filter.
pub trait Filterable: Entity {
    fn search_text(&self) -> Option<String> {
        None
    }

    fn location(&self) -> Option<Point> {
        None
    }

    fn date(&self) -> Option<NaiveDate> {
        None
    }

    fn is_project(&self) -> Option<bool> {
        None
    }

    fn region(&self) -> Option<String> {
        None
    }
}

/// Active filter criteria: filter name -> filter value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(BTreeMap<String, String>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Filters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Builder: set a filter. An empty value removes it.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, Some(value.into()));
        self
    }

    pub(crate) fn set(&mut self, name: &str, value: Option<String>) {
        match value.filter(|value| !value.is_empty()) {
            Some(value) => {
                self.0.insert(name.to_string(), value);
            }
            None => {
                self.0.remove(name);
            }
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.get(TEXT)
    }

    pub fn lot_size(&self) -> Option<&str> {
        self.get(LOT_SIZE)
    }

    pub fn region(&self) -> Option<&str> {
        self.get(REGION)
    }

    pub fn projects(&self) -> Result<Option<ProjectFilter>> {
        self.get(PROJECTS).map(str::parse).transpose()
    }

    pub fn date_range(&self) -> Result<Option<DateRange>> {
        self.get(DATE).map(str::parse).transpose()
    }

    pub fn bounding_box(&self) -> Result<Option<BoundingBox>> {
        self.get(BOX).map(str::parse).transpose()
    }

    /// Render as a URL query string for fetch requests.
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| format!("{}={}", encode_value(name), encode_value(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Read a query from the state map mirrored under the filter key.
    /// Nested maps are ignored.
    pub fn from_state_value(value: Option<&StateValue>) -> Self {
        let Some(map) = value.and_then(StateValue::as_map) else {
            return Self::default();
        };
        map.iter()
            .filter_map(|(name, value)| value.as_text().map(|text| (name.clone(), text.to_string())))
            .collect()
    }

    /// The state map form of this query.
    pub fn to_state_value(&self) -> StateValue {
        StateValue::Map(
            self.0
                .iter()
                .map(|(name, value)| (name.clone(), StateValue::from(value.as_str())))
                .collect(),
        )
    }

    /// Evaluate the locally computable filters against `entity`.
    ///
    /// `lotsize` and unrecognised filters are not evaluated; a query
    /// carrying a different value for them is never narrowing, so results
    /// filtered here were already filtered by the server for those.
    /// Unparseable values reject everything.
    pub fn matches<E: Filterable>(&self, entity: &E) -> bool {
        if let Some(text) = self.text() {
            let needle = text.to_lowercase();
            let found = entity
                .search_text()
                .is_some_and(|haystack| haystack.to_lowercase().contains(&needle));
            if !found {
                return false;
            }
        }
        match self.bounding_box() {
            Ok(Some(bbox)) if !entity.location().is_some_and(|p| bbox.contains_point(p)) => {
                return false
            }
            Err(_) => return false,
            _ => {}
        }
        match self.date_range() {
            Ok(Some(range)) if !entity.date().is_some_and(|d| range.contains_date(d)) => {
                return false
            }
            Err(_) => return false,
            _ => {}
        }
        match self.projects() {
            Ok(Some(filter)) if !filter.admits(entity.is_project()) => return false,
            Err(_) => return false,
            _ => {}
        }
        if let Some(region) = self.region() {
            if entity.region().as_deref() != Some(region) {
                return false;
            }
        }
        true
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (name, value) in iter {
            let name = name.into();
            query.set(&name, Some(value.into()));
        }
        query
    }
}
