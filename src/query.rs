use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Geographic bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    fn validate(&self) -> Result<()> {
        let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);
        let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);
        if !lon_ok(self.west) || !lon_ok(self.east) {
            return Err(Error::InvalidQuery(format!(
                "bounding box longitude out of range: {}",
                self
            )));
        }
        if !lat_ok(self.south) || !lat_ok(self.north) || self.south > self.north {
            return Err(Error::InvalidQuery(format!(
                "bounding box latitude out of range: {}",
                self
            )));
        }
        Ok(())
    }
}

/// `W,S,E,N`, the form CMR and EGI expect.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for BoundingBox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidQuery(format!("bounding box '{}': {}", s, e)))?;
        match parts.as_slice() {
            [w, s, e, n] => BoundingBox::new(*w, *s, *e, *n),
            _ => Err(Error::InvalidQuery(format!(
                "bounding box '{}' must have four values W,S,E,N",
                s
            ))),
        }
    }
}

/// The area a search or order is restricted to. Exactly one form is ever sent.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialFilter {
    BoundingBox(BoundingBox),
    /// Comma-separated `lon,lat` pairs, counter-clockwise, first point repeated last.
    Polygon(String),
}

impl SpatialFilter {
    /// The query parameters for this filter. Orders send the box under both
    /// `bounding_box` and `bbox`.
    pub(crate) fn params(&self, for_order: bool) -> Vec<(&'static str, String)> {
        match self {
            SpatialFilter::BoundingBox(b) => {
                let v = b.to_string();
                if for_order {
                    vec![("bounding_box", v.clone()), ("bbox", v)]
                } else {
                    vec![("bounding_box", v)]
                }
            }
            SpatialFilter::Polygon(p) => vec![("polygon", p.clone())],
        }
    }
}

/// Inclusive range of whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TemporalRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidQuery(format!(
                "temporal range ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses `yyyy-MM-dd` dates.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let day = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| Error::InvalidQuery(format!("invalid date '{}': {}", s, e)))
        };
        Self::new(day(start)?, day(end)?)
    }

    /// `yyyy-MM-ddT00:00:00Z,yyyy-MM-ddT23:59:59Z`
    pub fn to_param(&self) -> String {
        format!(
            "{}T00:00:00Z,{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// One granule search against CMR.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub short_name: String,
    pub version: String,
    pub temporal: TemporalRange,
    pub spatial: Option<SpatialFilter>,
    pub page_size: usize,
}

impl SearchQuery {
    /// Request parameters for `page_num`; fails when no spatial filter is set.
    pub(crate) fn params(&self, page_num: usize) -> Result<Vec<(&'static str, String)>> {
        let spatial = self.spatial.as_ref().ok_or_else(|| {
            Error::InvalidQuery("missing bounding box or polygon to search for".into())
        })?;

        let mut params = vec![
            ("short_name", self.short_name.clone()),
            ("version", self.version.clone()),
            ("temporal", self.temporal.to_param()),
            ("page_size", self.page_size.to_string()),
            ("page_num", page_num.to_string()),
        ];
        params.extend(spatial.params(false));
        Ok(params)
    }
}
