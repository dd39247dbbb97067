//! GeoPackage geometry blobs
//!
//! A GeoPackage stores each geometry as a small header (`GP` magic, version,
//! flags, SRS id and an optional envelope) followed by standard WKB. Only
//! two-dimensional WKB is decoded; anything else (Z/M geometries, extended
//! blobs, unknown types) decodes to `None` and is left untouched by callers.
//! Encoding always writes little-endian WKB with an XY envelope.

use geo::{
    BoundingRect, Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Point, Polygon,
};

const MAGIC: &[u8; 2] = b"GP";
const FLAG_LITTLE_ENDIAN: u8 = 0x01;
const FLAG_ENVELOPE_XY: u8 = 0x02;
const FLAG_EMPTY: u8 = 0x10;
const FLAG_EXTENDED: u8 = 0x20;

/// A decoded GeoPackage geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobGeometry {
    pub srs_id: i32,
    pub geometry: Geometry<f64>,
}

/// Decode a GeoPackage geometry blob.
pub fn decode_blob(bytes: &[u8]) -> Option<BlobGeometry> {
    if bytes.len() < 8 || &bytes[0..2] != MAGIC {
        return None;
    }
    let flags = bytes[3];
    if flags & FLAG_EXTENDED != 0 || flags & FLAG_EMPTY != 0 {
        return None;
    }
    let little = flags & FLAG_LITTLE_ENDIAN != 0;
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        _ => return None,
    };

    let mut header = Reader::new(&bytes[4..8], little);
    let srs_id = header.u32()? as i32;

    let wkb = bytes.get(8 + envelope_len..)?;
    let geometry = Reader::new(wkb, true).geometry()?;
    Some(BlobGeometry { srs_id, geometry })
}

/// Encode `geometry` as a GeoPackage blob.
pub fn encode_blob(srs_id: i32, geometry: &Geometry<f64>) -> Vec<u8> {
    let envelope = geometry.bounding_rect();
    let mut flags = FLAG_LITTLE_ENDIAN;
    if envelope.is_some() {
        flags |= FLAG_ENVELOPE_XY;
    }

    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(MAGIC);
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&srs_id.to_le_bytes());
    if let Some(rect) = envelope {
        for value in [rect.min().x, rect.max().x, rect.min().y, rect.max().y] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    write_geometry(&mut out, geometry);
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], little: bool) -> Self {
        Self { bytes, pos: 0, little }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.bytes.get(self.pos..self.pos + N)?;
        self.pos += N;
        slice.try_into().ok()
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        let raw = self.take::<4>()?;
        Some(if self.little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn f64(&mut self) -> Option<f64> {
        let raw = self.take::<8>()?;
        Some(if self.little {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    fn coord(&mut self) -> Option<Coord<f64>> {
        Some(Coord {
            x: self.f64()?,
            y: self.f64()?,
        })
    }

    fn coords(&mut self) -> Option<Vec<Coord<f64>>> {
        let count = self.u32()? as usize;
        // Each coordinate needs 16 bytes; reject counts the buffer cannot hold.
        if count.checked_mul(16)? > self.bytes.len().saturating_sub(self.pos) {
            return None;
        }
        (0..count).map(|_| self.coord()).collect()
    }

    fn polygon_body(&mut self) -> Option<Polygon<f64>> {
        let rings = self.u32()? as usize;
        let mut rings = (0..rings)
            .map(|_| self.coords().map(LineString::new))
            .collect::<Option<Vec<_>>>()?;
        if rings.is_empty() {
            return Some(Polygon::new(LineString::new(vec![]), vec![]));
        }
        let exterior = rings.remove(0);
        Some(Polygon::new(exterior, rings))
    }

    /// Read one WKB geometry, including its byte-order marker.
    fn geometry(&mut self) -> Option<Geometry<f64>> {
        self.little = match self.u8()? {
            0 => false,
            1 => true,
            _ => return None,
        };
        let kind = self.u32()?;
        let geometry = match kind {
            1 => Geometry::Point(Point::from(self.coord()?)),
            2 => Geometry::LineString(LineString::new(self.coords()?)),
            3 => Geometry::Polygon(self.polygon_body()?),
            4 => Geometry::MultiPoint(MultiPoint::new(self.parts(|g| match g {
                Geometry::Point(p) => Some(p),
                _ => None,
            })?)),
            5 => Geometry::MultiLineString(MultiLineString::new(self.parts(|g| match g {
                Geometry::LineString(l) => Some(l),
                _ => None,
            })?)),
            6 => Geometry::MultiPolygon(MultiPolygon::new(self.parts(|g| match g {
                Geometry::Polygon(p) => Some(p),
                _ => None,
            })?)),
            7 => Geometry::GeometryCollection(GeometryCollection::new_from(self.parts(Some)?)),
            _ => return None,
        };
        Some(geometry)
    }

    fn parts<T>(&mut self, keep: impl Fn(Geometry<f64>) -> Option<T>) -> Option<Vec<T>> {
        let count = self.u32()? as usize;
        if count > self.bytes.len().saturating_sub(self.pos) {
            return None;
        }
        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            parts.push(keep(self.geometry()?)?);
        }
        Some(parts)
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_coord(out: &mut Vec<u8>, coord: Coord<f64>) {
    out.extend_from_slice(&coord.x.to_le_bytes());
    out.extend_from_slice(&coord.y.to_le_bytes());
}

fn write_coords(out: &mut Vec<u8>, line: &LineString<f64>) {
    write_u32(out, line.0.len() as u32);
    for coord in &line.0 {
        write_coord(out, *coord);
    }
}

fn write_header(out: &mut Vec<u8>, kind: u32) {
    out.push(1);
    write_u32(out, kind);
}

fn write_polygon(out: &mut Vec<u8>, polygon: &Polygon<f64>) {
    write_header(out, 3);
    if polygon.exterior().0.is_empty() && polygon.interiors().is_empty() {
        write_u32(out, 0);
        return;
    }
    write_u32(out, 1 + polygon.interiors().len() as u32);
    write_coords(out, polygon.exterior());
    for ring in polygon.interiors() {
        write_coords(out, ring);
    }
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(point) => {
            write_header(out, 1);
            write_coord(out, point.0);
        }
        Geometry::Line(line) => {
            write_header(out, 2);
            write_coords(out, &LineString::new(vec![line.start, line.end]));
        }
        Geometry::LineString(line) => {
            write_header(out, 2);
            write_coords(out, line);
        }
        Geometry::Polygon(polygon) => write_polygon(out, polygon),
        Geometry::Rect(rect) => write_polygon(out, &rect.to_polygon()),
        Geometry::Triangle(triangle) => write_polygon(out, &triangle.to_polygon()),
        Geometry::MultiPoint(points) => {
            write_header(out, 4);
            write_u32(out, points.0.len() as u32);
            for point in &points.0 {
                write_geometry(out, &Geometry::Point(*point));
            }
        }
        Geometry::MultiLineString(lines) => {
            write_header(out, 5);
            write_u32(out, lines.0.len() as u32);
            for line in &lines.0 {
                write_header(out, 2);
                write_coords(out, line);
            }
        }
        Geometry::MultiPolygon(polygons) => {
            write_header(out, 6);
            write_u32(out, polygons.0.len() as u32);
            for polygon in &polygons.0 {
                write_polygon(out, polygon);
            }
        }
        Geometry::GeometryCollection(collection) => {
            write_header(out, 7);
            write_u32(out, collection.0.len() as u32);
            for member in &collection.0 {
                write_geometry(out, member);
            }
        }
    }
}
