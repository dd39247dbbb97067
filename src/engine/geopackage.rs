//! Native GeoPackage access and layer append
//!
//! A GeoPackage is an SQLite database with three core tables:
//! `gpkg_spatial_ref_sys`, `gpkg_contents` and `gpkg_geometry_columns`.
//! Appending a layer means:
//!
//! 1. Open the source read-only and check it lists the layer.
//! 2. Open (or create) the output container.
//! 3. On the first append of a layer, recreate its table from the source DDL
//!    and register it in the output's core tables.
//! 4. Copy every feature over the columns both tables share, leaving the
//!    primary key to the output so appended features never collide.
//! 5. Widen the layer's `gpkg_contents` bounds to cover the new features.
//!
//! Steps 3-5 run inside one transaction: a failed append leaves the output
//! exactly as it was.

use std::path::{Path, PathBuf};

use geo::{BoundingRect, Coord, Geometry, Rect};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};

use super::{repair, wkb, AppendRequest};
use crate::error::{Error, Result};

/// `PRAGMA application_id` of a GeoPackage ("GPKG").
pub const APPLICATION_ID: i32 = 0x4750_4B47;
/// `PRAGMA user_version` for GeoPackage 1.2.
pub const USER_VERSION: i32 = 10200;

const CORE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER,
    CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
    CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
INSERT OR IGNORE INTO gpkg_spatial_ref_sys VALUES
    ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
    ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system'),
    ('WGS 84 geodetic', 4326, 'EPSG', 4326,
     'GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]]',
     'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid');
";

/// Geometry column registration of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryColumn {
    pub column: String,
    pub geometry_type: String,
    pub srs_id: i32,
    pub z: i32,
    pub m: i32,
}

#[derive(Debug, Clone)]
struct ContentsRow {
    data_type: String,
    identifier: Option<String>,
    description: Option<String>,
    srs_id: Option<i32>,
}

/// An open GeoPackage container.
#[derive(Debug)]
pub struct GeoPackage {
    conn: Connection,
    path: PathBuf,
}

impl GeoPackage {
    /// Open an existing container for reading.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::engine(
                "open geopackage",
                format!("{} does not exist", path.display()),
            ));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a container for writing, creating it and its core tables when
    /// the file does not exist yet.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let exists = path.is_file();
        let conn = Connection::open(path)?;
        if !exists {
            conn.pragma_update(None, "application_id", APPLICATION_ID)?;
            conn.pragma_update(None, "user_version", USER_VERSION)?;
        }
        conn.execute_batch(CORE_TABLES)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of every feature layer, in registration order.
    pub fn layers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    pub fn has_layer(&self, layer: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM gpkg_contents WHERE table_name = ?1",
                [layer],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn feature_count(&self, layer: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(layer)), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Geometry column of `layer`, when it has one.
    pub fn geometry_column(&self, layer: &str) -> Result<Option<GeometryColumn>> {
        let column = self
            .conn
            .query_row(
                "SELECT column_name, geometry_type_name, srs_id, z, m
                 FROM gpkg_geometry_columns WHERE table_name = ?1",
                [layer],
                |row| {
                    Ok(GeometryColumn {
                        column: row.get(0)?,
                        geometry_type: row.get(1)?,
                        srs_id: row.get(2)?,
                        z: row.get(3)?,
                        m: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(column)
    }

    /// Layer bounds recorded in `gpkg_contents` as `(min_x, max_x, min_y, max_y)`.
    pub fn bounds(&self, layer: &str) -> Result<Option<(f64, f64, f64, f64)>> {
        let bounds = self
            .conn
            .query_row(
                "SELECT min_x, max_x, min_y, max_y FROM gpkg_contents WHERE table_name = ?1",
                [layer],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(match bounds {
            Some((Some(a), Some(b), Some(c), Some(d))) => Some((a, b, c, d)),
            _ => None,
        })
    }

    /// Decoded geometries of `layer` in row order. Blobs that cannot be
    /// decoded (or are NULL) come back as `None`.
    pub fn geometries(&self, layer: &str) -> Result<Vec<Option<Geometry<f64>>>> {
        let Some(column) = self.geometry_column(layer)? else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY rowid",
            quote(&column.column),
            quote(layer)
        ))?;
        let blobs = stmt
            .query_map([], |row| row.get::<_, Option<Vec<u8>>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(blobs
            .into_iter()
            .map(|blob| blob.and_then(|b| wkb::decode_blob(&b)).map(|d| d.geometry))
            .collect())
    }

    /// Text values of one attribute column of `layer`, in row order.
    pub fn text_values(&self, layer: &str, column: &str) -> Result<Vec<Option<String>>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM {} ORDER BY rowid", quote(column), quote(layer)))?;
        let values = stmt
            .query_map([], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    /// Create an empty feature layer with an integer primary key `fid`, a
    /// geometry column `geom` and the given text attributes.
    pub fn create_layer(&self, layer: &str, srs_id: i32, geometry_type: &str, attributes: &[&str]) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO gpkg_spatial_ref_sys VALUES (?1, ?2, 'NONE', ?2, 'undefined', NULL)",
            params![format!("SRS {}", srs_id), srs_id],
        )?;

        let mut columns = vec![
            "\"fid\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL".to_string(),
            format!("\"geom\" {}", geometry_type.to_ascii_uppercase()),
        ];
        columns.extend(attributes.iter().map(|a| format!("{} TEXT", quote(a))));
        self.conn
            .execute_batch(&format!("CREATE TABLE {} ({});", quote(layer), columns.join(", ")))?;

        self.conn.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id) VALUES (?1, 'features', ?1, ?2)",
            params![layer, srs_id],
        )?;
        self.conn.execute(
            "INSERT INTO gpkg_geometry_columns VALUES (?1, 'geom', ?2, ?3, 0, 0)",
            params![layer, geometry_type.to_ascii_uppercase(), srs_id],
        )?;
        Ok(())
    }

    /// Insert one feature into a layer created by [`GeoPackage::create_layer`].
    pub fn insert_feature(&self, layer: &str, geometry: &Geometry<f64>, attributes: &[(&str, &str)]) -> Result<()> {
        let column = self.geometry_column(layer)?.ok_or_else(|| {
            Error::engine(
                "insert feature",
                format!("{} has no geometry layer '{}'", self.path.display(), layer),
            )
        })?;

        let mut names = vec![quote(&column.column)];
        let mut values = vec![Value::Blob(wkb::encode_blob(column.srs_id, geometry))];
        for (name, value) in attributes {
            names.push(quote(name));
            values.push(Value::Text(value.to_string()));
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(layer),
                names.join(", "),
                placeholders.join(", ")
            ),
            params_from_iter(values.iter()),
        )?;
        Ok(())
    }

    /// Insert one feature with a raw geometry blob.
    pub fn insert_blob(&self, layer: &str, blob: &[u8]) -> Result<()> {
        let column = self.geometry_column(layer)?.ok_or_else(|| {
            Error::engine(
                "insert feature",
                format!("{} has no geometry layer '{}'", self.path.display(), layer),
            )
        })?;
        self.conn.execute(
            &format!("INSERT INTO {} ({}) VALUES (?1)", quote(layer), quote(&column.column)),
            [blob],
        )?;
        Ok(())
    }

    fn contents(&self, layer: &str) -> Result<Option<ContentsRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT data_type, identifier, description, srs_id FROM gpkg_contents WHERE table_name = ?1",
                [layer],
                |row| {
                    Ok(ContentsRow {
                        data_type: row.get(0)?,
                        identifier: row.get(1)?,
                        description: row.get(2)?,
                        srs_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Non-primary-key columns of `layer`, in declaration order.
    fn data_columns(&self, layer: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk = 0 ORDER BY cid")?;
        let columns = stmt
            .query_map([layer], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn table_sql(&self, layer: &str) -> Result<Option<String>> {
        let sql = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [layer],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(sql)
    }
}

/// Append one layer of `request.source` into `request.output`.
///
/// Returns the number of features appended.
pub fn append_layer(request: &AppendRequest<'_>) -> Result<u64> {
    let source = GeoPackage::open_read_only(request.source)?;
    let layer = request.layer;

    let Some(contents) = source.contents(layer)? else {
        return Err(Error::engine(
            "append layer",
            format!("{} has no layer '{}'", request.source.display(), layer),
        ));
    };
    let geometry_column = source.geometry_column(layer)?;

    let mut output = GeoPackage::open_or_create(request.output)?;
    let tx = output.conn.transaction()?;

    let exists = tx
        .query_row("SELECT 1 FROM gpkg_contents WHERE table_name = ?1", [layer], |_| Ok(()))
        .optional()?
        .is_some();
    if !exists {
        let ddl = source.table_sql(layer)?.ok_or_else(|| {
            Error::engine(
                "append layer",
                format!("{} lists layer '{}' without a table", request.source.display(), layer),
            )
        })?;
        tx.execute_batch(&ddl)?;
        register_layer(&source, &tx, layer, &contents, geometry_column.as_ref())?;
    }

    let source_columns = source.data_columns(layer)?;
    let output_columns: Vec<String> = {
        let mut stmt = tx.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk = 0 ORDER BY cid")?;
        let columns = stmt
            .query_map([layer], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        columns
    };
    let columns: Vec<&String> = source_columns
        .iter()
        .filter(|c| output_columns.iter().any(|o| o.eq_ignore_ascii_case(c)))
        .collect();
    if columns.is_empty() {
        return Err(Error::engine(
            "append layer",
            format!("layer '{}' shares no columns with the output", layer),
        ));
    }

    let geometry_index = geometry_column
        .as_ref()
        .and_then(|g| columns.iter().position(|c| c.eq_ignore_ascii_case(&g.column)));
    let column_list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    let placeholders = (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ");

    let mut count = 0u64;
    let mut extent: Option<Rect<f64>> = None;
    {
        let mut select = source
            .conn
            .prepare(&format!("SELECT {} FROM {}", column_list, quote(layer)))?;
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(layer),
            column_list,
            placeholders
        ))?;

        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = (0..columns.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // A repair may split one feature into several for single-part
            // layers; each part keeps the feature's attributes.
            let mut geometries: Vec<Option<Vec<u8>>> = vec![None];
            if let (Some(index), Some(column)) = (geometry_index, geometry_column.as_ref()) {
                if let Value::Blob(blob) = &values[index] {
                    if request.make_valid {
                        if let Some(parts) = repair::repair_blob(blob, &column.geometry_type) {
                            geometries = parts.into_iter().map(Some).collect();
                        }
                    }
                }
            }

            for geometry in geometries {
                if let (Some(index), Some(part)) = (geometry_index, geometry) {
                    values[index] = Value::Blob(part);
                }
                if let Some(index) = geometry_index {
                    if let Value::Blob(blob) = &values[index] {
                        if let Some(rect) = wkb::decode_blob(blob).and_then(|d| d.geometry.bounding_rect()) {
                            extent = Some(match extent {
                                Some(e) => union_rect(e, rect),
                                None => rect,
                            });
                        }
                    }
                }

                insert.execute(params_from_iter(values.iter()))?;
                count += 1;
            }
        }
    }

    if let Some(rect) = extent {
        tx.execute(
            "UPDATE gpkg_contents SET
                min_x = min(coalesce(min_x, ?2), ?2),
                max_x = max(coalesce(max_x, ?3), ?3),
                min_y = min(coalesce(min_y, ?4), ?4),
                max_y = max(coalesce(max_y, ?5), ?5),
                last_change = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE table_name = ?1",
            params![layer, rect.min().x, rect.max().x, rect.min().y, rect.max().y],
        )?;
    }
    tx.commit()?;

    Ok(count)
}

/// Register a freshly created layer in the output's core tables.
fn register_layer(
    source: &GeoPackage,
    tx: &rusqlite::Transaction<'_>,
    layer: &str,
    contents: &ContentsRow,
    geometry_column: Option<&GeometryColumn>,
) -> Result<()> {
    let srs_ids: Vec<i32> = contents
        .srs_id
        .into_iter()
        .chain(geometry_column.map(|g| g.srs_id))
        .collect();
    for srs_id in srs_ids {
        let row = source
            .conn
            .query_row(
                "SELECT srs_name, organization, organization_coordsys_id, definition, description
                 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
                [srs_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        if let Some((name, organization, coordsys_id, definition, description)) = row {
            tx.execute(
                "INSERT OR IGNORE INTO gpkg_spatial_ref_sys VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![name, srs_id, organization, coordsys_id, definition, description],
            )?;
        }
    }

    tx.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, description, srs_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            layer,
            contents.data_type,
            contents.identifier,
            contents.description,
            contents.srs_id
        ],
    )?;

    if let Some(column) = geometry_column {
        tx.execute(
            "INSERT INTO gpkg_geometry_columns VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                layer,
                column.column,
                column.geometry_type,
                column.srs_id,
                column.z,
                column.m
            ],
        )?;
    }
    Ok(())
}

fn union_rect(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

/// Quote an SQL identifier.
fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
