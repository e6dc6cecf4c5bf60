use crate::error::Result;
use crate::osm::ElementKind;

/// Longitude/latitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Self {
        Location { lon, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// Rectangular envelope. The default box is invalid and absorbs the first
/// valid location or box it is extended with.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    bounds: Option<[f64; 4]>,
}

impl BoundingBox {
    pub fn invalid() -> Self {
        BoundingBox { bounds: None }
    }

    pub fn from_location(location: Location) -> Self {
        let mut bbox = Self::invalid();
        bbox.extend(location);
        bbox
    }

    /// Box from explicit corners; invalid if either corner is.
    pub fn from_corners(min: Location, max: Location) -> Self {
        if min.is_valid() && max.is_valid() {
            BoundingBox {
                bounds: Some([min.lon, min.lat, max.lon, max.lat]),
            }
        } else {
            Self::invalid()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bounds.is_some()
    }

    /// `[min_lon, min_lat, max_lon, max_lat]`, only for a valid box.
    pub fn as_array(&self) -> Option<[f64; 4]> {
        self.bounds
    }

    pub fn extend(&mut self, location: Location) {
        if location.is_valid() {
            self.union(&BoundingBox {
                bounds: Some([location.lon, location.lat, location.lon, location.lat]),
            });
        }
    }

    pub fn union(&mut self, other: &BoundingBox) {
        let Some(theirs) = other.bounds else {
            return;
        };
        self.bounds = Some(match self.bounds {
            None => theirs,
            Some(ours) => [
                ours[0].min(theirs[0]),
                ours[1].min(theirs[1]),
                ours[2].max(theirs[2]),
                ours[3].max(theirs[3]),
            ],
        });
    }
}

/// Outcome of resolving a list of references against the index.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Resolved {
    pub bbox: BoundingBox,
    /// References that were not found in the index.
    pub missing: u64,
}

/// Union of the geometry behind a list of typed references. Node references
/// go through `node_lookup`, way references through `way_lookup`; relation
/// references are not followed.
pub fn resolve_bbox<I, N, W>(refs: I, mut node_lookup: N, mut way_lookup: W) -> Result<Resolved>
where
    I: IntoIterator<Item = (ElementKind, i64)>,
    N: FnMut(i64) -> Result<Option<Location>>,
    W: FnMut(i64) -> Result<Option<BoundingBox>>,
{
    let mut resolved = Resolved::default();

    for (kind, id) in refs {
        match kind {
            ElementKind::Node => match node_lookup(id)? {
                Some(location) => resolved.bbox.extend(location),
                None => resolved.missing += 1,
            },
            ElementKind::Way => match way_lookup(id)? {
                Some(bbox) => resolved.bbox.union(&bbox),
                None => resolved.missing += 1,
            },
            ElementKind::Relation => {}
        }
    }

    Ok(resolved)
}
