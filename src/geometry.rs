//! Point-in-area tests for country and continent polygons.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{format_err, Context};
use geo::{BoundingRect, Contains};
use geo_types::{Geometry, MultiPolygon, Rect};
use geojson::GeoJson;
use tracing::warn;

use crate::location::LonLat;
use crate::Result;

/// One administrative area, with its bounding box precomputed so most
/// containment tests never touch the polygon.
struct PreparedArea {
    bbox: Rect<f64>,
    polygon: MultiPolygon<f64>,
}

/// Preloaded country and continent geometries, keyed by geoname id.
#[derive(Default)]
pub struct AreaIndex {
    areas: HashMap<i64, PreparedArea>,
    /// Areas we've already complained about. Containment against a
    /// missing area is false, but we only say so once per area.
    warned_missing: Mutex<BTreeSet<i64>>,
}

impl AreaIndex {
    pub fn new() -> AreaIndex {
        AreaIndex::default()
    }

    /// Register an area polygon. Degenerate (empty) polygons are ignored.
    pub fn insert(&mut self, geoname_id: i64, polygon: MultiPolygon<f64>) {
        if let Some(bbox) = polygon.bounding_rect() {
            self.areas.insert(geoname_id, PreparedArea { bbox, polygon });
        } else {
            warn!("ignoring empty polygon for area {}", geoname_id);
        }
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Does the area contain the coordinate?
    ///
    /// Checks the bounding box first and only then the polygon. A missing
    /// area never contains anything.
    pub fn contains(&self, geoname_id: i64, coordinate: LonLat) -> bool {
        let area = match self.areas.get(&geoname_id) {
            Some(area) => area,
            None => {
                let mut warned = self
                    .warned_missing
                    .lock()
                    .expect("missing-area set poisoned");
                if warned.insert(geoname_id) {
                    warn!("no geometry loaded for area {}", geoname_id);
                }
                return false;
            }
        };
        let bbox = &area.bbox;
        if coordinate.lon < bbox.min().x
            || coordinate.lon > bbox.max().x
            || coordinate.lat < bbox.min().y
            || coordinate.lat > bbox.max().y
        {
            return false;
        }
        area.polygon.contains(&coordinate.to_point())
    }

    /// Load areas from a GeoJSON feature collection whose features carry a
    /// numeric `geoname_id` property and a (Multi)Polygon geometry.
    pub fn from_geojson_file(path: &Path) -> Result<AreaIndex> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read area file {}", path.display()))?;
        let geojson: GeoJson = raw
            .parse()
            .with_context(|| format!("could not parse GeoJSON in {}", path.display()))?;
        let collection = match geojson {
            GeoJson::FeatureCollection(collection) => collection,
            _ => {
                return Err(format_err!(
                    "expected a FeatureCollection in {}",
                    path.display()
                ))
            }
        };

        let mut index = AreaIndex::new();
        for feature in collection.features {
            let geoname_id = feature
                .properties
                .as_ref()
                .and_then(|properties| properties.get("geoname_id"))
                .and_then(|value| value.as_i64());
            let geoname_id = match geoname_id {
                Some(geoname_id) => geoname_id,
                None => {
                    warn!("skipping area feature without a geoname_id property");
                    continue;
                }
            };
            let geometry = match feature.geometry {
                Some(geometry) => geometry,
                None => {
                    warn!("skipping area {} without a geometry", geoname_id);
                    continue;
                }
            };
            let geometry: Geometry<f64> = geometry.try_into().with_context(|| {
                format!("could not convert geometry of area {}", geoname_id)
            })?;
            match geometry {
                Geometry::Polygon(polygon) => {
                    index.insert(geoname_id, MultiPolygon(vec![polygon]));
                }
                Geometry::MultiPolygon(polygons) => index.insert(geoname_id, polygons),
                _ => warn!("skipping area {}: not a polygon", geoname_id),
            }
        }
        Ok(index)
    }
}
