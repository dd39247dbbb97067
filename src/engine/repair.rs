//! Geometry repair
//!
//! Only polygonal geometries are repaired. Every ring of an invalid polygon
//! is noded at its self-intersections and split into simple closed loops.
//! The loops of the exterior are unioned and the loops of the interiors cut
//! out of that union, so a bowtie keeps both of its lobes. Parts of an
//! invalid multipolygon are repaired one by one and then unioned. Points and
//! lines are never considered invalid here.

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::orient::{Direction, Orient};
use geo::{unary_union, Area, BooleanOps, Coord, Geometry, Line, LineString, MultiPolygon, Polygon, Validation};

use super::wkb;

/// Repair `geometry` if it is an invalid polygonal geometry.
///
/// Returns `None` when the geometry needs no repair, or when nothing with
/// an area is left of it.
pub fn make_valid(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    let repaired = match geometry {
        Geometry::Polygon(polygon) if !polygon.is_valid() => rebuild_polygon(polygon),
        Geometry::MultiPolygon(polygons) if !polygons.is_valid() => {
            let parts: Vec<MultiPolygon<f64>> = polygons.iter().map(rebuild_polygon).collect();
            unary_union(&parts)
        }
        _ => return None,
    };

    match repaired.0.len() {
        0 => None,
        1 => repaired.0.into_iter().next().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(repaired)),
    }
}

/// Repair the geometry stored in a GeoPackage blob.
///
/// `geometry_type` is the layer's declared type. A repair that splits a
/// feature of a single-part layer (`POLYGON`) yields one blob per part, so
/// each can be stored as its own feature.
///
/// Returns `None` when the blob is valid or cannot be decoded.
pub fn repair_blob(blob: &[u8], geometry_type: &str) -> Option<Vec<Vec<u8>>> {
    let decoded = wkb::decode_blob(blob)?;
    let repaired = make_valid(&decoded.geometry)?;

    let parts = match repaired {
        Geometry::MultiPolygon(polygons) if geometry_type.eq_ignore_ascii_case("POLYGON") => {
            polygons.0.into_iter().map(Geometry::Polygon).collect()
        }
        Geometry::Polygon(polygon) if geometry_type.eq_ignore_ascii_case("MULTIPOLYGON") => {
            vec![Geometry::MultiPolygon(MultiPolygon::new(vec![polygon]))]
        }
        other => vec![other],
    };
    Some(
        parts
            .iter()
            .map(|geometry| wkb::encode_blob(decoded.srs_id, geometry))
            .collect(),
    )
}

fn rebuild_polygon(polygon: &Polygon<f64>) -> MultiPolygon<f64> {
    let shell = unary_union(&simple_loops(polygon.exterior()));
    let holes = simple_loops_of(polygon.interiors());
    if holes.is_empty() {
        return shell;
    }
    shell.difference(&unary_union(&holes))
}

fn simple_loops_of(rings: &[LineString<f64>]) -> Vec<Polygon<f64>> {
    rings.iter().flat_map(simple_loops).collect()
}

/// Split `ring` at its self-intersections into simple loops with an area.
fn simple_loops(ring: &LineString<f64>) -> Vec<Polygon<f64>> {
    let noded = node_ring(ring);
    let Some(&first) = noded.first() else {
        return Vec::new();
    };

    let mut loops = Vec::new();
    let mut stack: Vec<Coord<f64>> = Vec::new();
    for coord in noded.into_iter().chain(std::iter::once(first)) {
        if let Some(position) = stack.iter().position(|c| *c == coord) {
            let mut closed: Vec<Coord<f64>> = stack.drain(position..).collect();
            closed.push(coord);
            if closed.len() >= 4 {
                let part = Polygon::new(LineString::new(closed), Vec::new());
                if part.unsigned_area() > 0.0 {
                    loops.push(part.orient(Direction::Default));
                }
            }
        }
        stack.push(coord);
    }
    loops
}

/// Vertices of `ring`, open, with every crossing between two of its
/// segments inserted into both segments.
fn node_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = ring.0.clone();
    coords.dedup();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    let n = coords.len();
    if n < 3 {
        return Vec::new();
    }

    let segment = |i: usize| Line::new(coords[i], coords[(i + 1) % n]);
    let mut splits: Vec<Vec<Coord<f64>>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            match line_intersection(segment(i), segment(j)) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    splits[i].push(intersection);
                    splits[j].push(intersection);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    for point in [intersection.start, intersection.end] {
                        splits[i].push(point);
                        splits[j].push(point);
                    }
                }
                None => {}
            }
        }
    }

    let mut noded = Vec::with_capacity(n);
    for (i, mut points) in splits.into_iter().enumerate() {
        let line = segment(i);
        noded.push(line.start);
        points.retain(|p| *p != line.start && *p != line.end);
        points.sort_by(|a, b| along(&line, a).total_cmp(&along(&line, b)));
        noded.extend(points);
    }
    noded.dedup();
    noded
}

/// Position of `point` along `line` as a fraction of its length.
fn along(line: &Line<f64>, point: &Coord<f64>) -> f64 {
    let delta = line.delta();
    let length_squared = delta.x * delta.x + delta.y * delta.y;
    if length_squared == 0.0 {
        return 0.0;
    }
    ((point.x - line.start.x) * delta.x + (point.y - line.start.y) * delta.y) / length_squared
}
