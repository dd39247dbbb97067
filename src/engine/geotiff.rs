//! Native GeoTIFF reading, writing and mosaicking
//!
//! Supports single-band GeoTIFFs georeferenced with `ModelPixelScale` and
//! `ModelTiepoint` tags (or an unrotated `ModelTransformation`). Samples are
//! held as `f64` while mosaicking, which is exact for every supported sample
//! type up to 32-bit integers, and cast back to the raster's own type when
//! written.
//!
//! Mosaic rules:
//!
//! - The output grid is the union of the input extents at the first input's
//!   pixel size. All inputs must share that pixel size.
//! - Inputs are painted in order, so later inputs win where they overlap.
//! - A source pixel equal to that source's nodata value is transparent.
//! - Cells no input covers hold the requested nodata value, or 0.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::compression::{Compression, Deflate, Lzw};
use tiff::encoder::{colortype, DirectoryEncoder, TiffEncoder, TiffKindStandard, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType;

use super::{Codec, MosaicRequest, RasterDescription, SampleType};
use crate::error::{Error, Result};

// The decoder maps known tag numbers to their named variants, so lookups
// must use those rather than `Tag::Unknown`.
const MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const MODEL_TRANSFORMATION: Tag = Tag::ModelTransformationTag;
const GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;
const GEO_DOUBLE_PARAMS: Tag = Tag::GeoDoubleParamsTag;
const GEO_ASCII_PARAMS: Tag = Tag::GeoAsciiParamsTag;
const GDAL_NODATA: Tag = Tag::GdalNodata;

/// Relative tolerance when comparing pixel sizes of mosaic inputs.
const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

type FileDecoder = Decoder<BufReader<File>>;
type FileEncoder = TiffEncoder<BufWriter<File>>;

/// Placement of a raster on the map: a north-up grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoGrid {
    pub width: usize,
    pub height: usize,
    /// X of the upper-left corner.
    pub origin_x: f64,
    /// Y of the upper-left corner.
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive pixel height; rows run southwards.
    pub pixel_height: f64,
}

impl GeoGrid {
    pub fn max_x(&self) -> f64 {
        self.origin_x + self.width as f64 * self.pixel_width
    }

    pub fn min_y(&self) -> f64 {
        self.origin_y - self.height as f64 * self.pixel_height
    }

    /// Number of cells, or an error when it does not fit in memory.
    pub fn cell_count(&self) -> Result<usize> {
        self.width.checked_mul(self.height).ok_or_else(|| {
            Error::engine(
                "raster grid",
                format!("{}x{} cells do not fit in memory", self.width, self.height),
            )
        })
    }

    /// `(min_x, max_x, min_y, max_y)` of the grid.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.origin_x, self.max_x(), self.min_y(), self.origin_y)
    }
}

/// GeoTIFF tags copied verbatim from a source raster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoKeys {
    pub directory: Option<Vec<u16>>,
    pub doubles: Option<Vec<f64>>,
    pub ascii: Option<String>,
}

/// A single-band raster held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub grid: GeoGrid,
    pub sample_type: SampleType,
    pub nodata: Option<f64>,
    pub geokeys: GeoKeys,
    /// Row-major samples, `grid.width * grid.height` of them.
    pub data: Vec<f64>,
}

/// Everything about a raster except its samples.
#[derive(Debug, Clone)]
struct RasterHeader {
    grid: GeoGrid,
    sample_type: SampleType,
    nodata: Option<f64>,
    geokeys: GeoKeys,
}

impl Raster {
    /// Read a whole raster from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let (mut decoder, header) = open(path)?;
        let expected = header.grid.cell_count()?;
        let data = read_samples(&mut decoder, path)?;
        if data.len() != expected {
            return Err(Error::engine(
                "read raster",
                format!(
                    "{} holds {} samples, expected {} (multi-band rasters are not supported)",
                    path.display(),
                    data.len(),
                    expected
                ),
            ));
        }
        Ok(Self {
            grid: header.grid,
            sample_type: header.sample_type,
            nodata: header.nodata,
            geokeys: header.geokeys,
            data,
        })
    }

    /// Write the raster to `path` with the given codec.
    pub fn write(&self, path: &Path, codec: Codec) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::filesystem("create", path, e))?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        let data = &self.data;

        match self.sample_type {
            SampleType::U8 => encode::<colortype::Gray8>(&mut encoder, self, codec, cast(data, |v| v as u8)),
            SampleType::U16 => encode::<colortype::Gray16>(&mut encoder, self, codec, cast(data, |v| v as u16)),
            SampleType::U32 => encode::<colortype::Gray32>(&mut encoder, self, codec, cast(data, |v| v as u32)),
            SampleType::I8 => encode::<colortype::GrayI8>(&mut encoder, self, codec, cast(data, |v| v as i8)),
            SampleType::I16 => encode::<colortype::GrayI16>(&mut encoder, self, codec, cast(data, |v| v as i16)),
            SampleType::I32 => encode::<colortype::GrayI32>(&mut encoder, self, codec, cast(data, |v| v as i32)),
            SampleType::F32 => encode::<colortype::Gray32Float>(&mut encoder, self, codec, cast(data, |v| v as f32)),
            SampleType::F64 => encode::<colortype::Gray64Float>(&mut encoder, self, codec, data.clone()),
        }
    }

    /// Sample at `(row, col)`.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.grid.height || col >= self.grid.width {
            return None;
        }
        self.data.get(row * self.grid.width + col).copied()
    }
}

/// Describe a raster's sample type and nodata value without reading pixels.
pub fn describe(path: &Path) -> Result<RasterDescription> {
    let (_, header) = open(path)?;
    Ok(RasterDescription {
        sample_type: header.sample_type,
        nodata: header.nodata,
    })
}

/// Mosaic `request.inputs` into `request.output`.
pub fn mosaic(request: &MosaicRequest<'_>) -> Result<()> {
    let Some(first_path) = request.inputs.first() else {
        return Err(Error::engine("mosaic", "no input rasters"));
    };

    let headers = request
        .inputs
        .iter()
        .map(|path| open(path).map(|(_, header)| header))
        .collect::<Result<Vec<_>>>()?;
    let first = &headers[0];
    let pixel_width = first.grid.pixel_width;
    let pixel_height = first.grid.pixel_height;

    for (path, header) in request.inputs.iter().zip(&headers) {
        if !same_size(header.grid.pixel_width, pixel_width)
            || !same_size(header.grid.pixel_height, pixel_height)
        {
            return Err(Error::engine(
                "mosaic",
                format!(
                    "{} has pixel size {}x{}, expected {}x{} from {}",
                    path.display(),
                    header.grid.pixel_width,
                    header.grid.pixel_height,
                    pixel_width,
                    pixel_height,
                    first_path.display()
                ),
            ));
        }
    }

    let min_x = headers.iter().map(|h| h.grid.origin_x).fold(f64::INFINITY, f64::min);
    let max_x = headers.iter().map(|h| h.grid.max_x()).fold(f64::NEG_INFINITY, f64::max);
    let min_y = headers.iter().map(|h| h.grid.min_y()).fold(f64::INFINITY, f64::min);
    let max_y = headers.iter().map(|h| h.grid.origin_y).fold(f64::NEG_INFINITY, f64::max);

    let grid = GeoGrid {
        width: cell_span(max_x - min_x, pixel_width)?,
        height: cell_span(max_y - min_y, pixel_height)?,
        origin_x: min_x,
        origin_y: max_y,
        pixel_width,
        pixel_height,
    };

    let mut merged = Raster {
        grid,
        sample_type: first.sample_type,
        nodata: request.nodata,
        geokeys: first.geokeys.clone(),
        data: vec![request.nodata.unwrap_or(0.0); grid.cell_count()?],
    };

    for (path, header) in request.inputs.iter().zip(&headers) {
        let source = Raster::read(path)?;
        paint(&mut merged, &source, header.nodata);
    }

    merged.write(request.output, request.codec)
}

/// Copy every data pixel of `source` onto `target`.
fn paint(target: &mut Raster, source: &Raster, source_nodata: Option<f64>) {
    let col_offset = ((source.grid.origin_x - target.grid.origin_x) / target.grid.pixel_width).round() as i64;
    let row_offset = ((target.grid.origin_y - source.grid.origin_y) / target.grid.pixel_height).round() as i64;

    for row in 0..source.grid.height {
        let target_row = row_offset + row as i64;
        if target_row < 0 || target_row >= target.grid.height as i64 {
            continue;
        }
        for col in 0..source.grid.width {
            let target_col = col_offset + col as i64;
            if target_col < 0 || target_col >= target.grid.width as i64 {
                continue;
            }
            let value = source.data[row * source.grid.width + col];
            if is_nodata(value, source_nodata) {
                continue;
            }
            target.data[target_row as usize * target.grid.width + target_col as usize] = value;
        }
    }
}

fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    match nodata {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}

/// Whole cells of size `pixel` covering `extent`.
fn cell_span(extent: f64, pixel: f64) -> Result<usize> {
    let cells = (extent / pixel).round();
    if !cells.is_finite() || cells < 0.0 || cells > u32::MAX as f64 {
        return Err(Error::engine(
            "mosaic",
            format!("extent {} at pixel size {} gives an unusable grid", extent, pixel),
        ));
    }
    Ok(cells as usize)
}

fn same_size(a: f64, b: f64) -> bool {
    (a - b).abs() <= b.abs() * PIXEL_SIZE_TOLERANCE
}

fn open(path: &Path) -> Result<(FileDecoder, RasterHeader)> {
    let file = File::open(path).map_err(|e| Error::filesystem("open", path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let bits = match decoder.colortype()? {
        ColorType::Gray(bits) => bits,
        other => {
            return Err(Error::engine(
                "read raster",
                format!("{}: unsupported color type {:?}, expected one band", path.display(), other),
            ))
        }
    };
    // A single SHORT decodes as `Value::Unsigned`, so go through the
    // unsigned helpers rather than `into_u16_vec`.
    let format = decoder
        .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);
    let sample_type = match (format, bits) {
        (1, 8) => SampleType::U8,
        (1, 16) => SampleType::U16,
        (1, 32) => SampleType::U32,
        (2, 8) => SampleType::I8,
        (2, 16) => SampleType::I16,
        (2, 32) => SampleType::I32,
        (3, 32) => SampleType::F32,
        (3, 64) => SampleType::F64,
        _ => {
            return Err(Error::engine(
                "read raster",
                format!("{}: unsupported sample format {} with {} bits", path.display(), format, bits),
            ))
        }
    };

    let (width, height) = decoder.dimensions()?;
    let grid = read_grid(&mut decoder, path, width as usize, height as usize)?;
    let nodata = read_nodata(&mut decoder)?;
    let geokeys = GeoKeys {
        directory: decoder.find_tag_unsigned_vec::<u16>(GEO_KEY_DIRECTORY)?,
        doubles: optional(decoder.find_tag(GEO_DOUBLE_PARAMS)?, Value::into_f64_vec)?,
        ascii: optional(decoder.find_tag(GEO_ASCII_PARAMS)?, Value::into_string)?,
    };

    Ok((
        decoder,
        RasterHeader {
            grid,
            sample_type,
            nodata,
            geokeys,
        },
    ))
}

fn optional<T>(value: Option<Value>, convert: fn(Value) -> tiff::TiffResult<T>) -> Result<Option<T>> {
    match value {
        Some(v) => Ok(Some(convert(v)?)),
        None => Ok(None),
    }
}

fn read_grid(decoder: &mut FileDecoder, path: &Path, width: usize, height: usize) -> Result<GeoGrid> {
    let grid = locate_grid(decoder, path, width, height)?;
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if !usable(grid.pixel_width) || !usable(grid.pixel_height) {
        return Err(Error::engine(
            "read raster",
            format!(
                "{} has unusable pixel size {}x{}",
                path.display(),
                grid.pixel_width,
                grid.pixel_height
            ),
        ));
    }
    if !grid.origin_x.is_finite() || !grid.origin_y.is_finite() {
        return Err(Error::engine(
            "read raster",
            format!("{} has a non-finite origin", path.display()),
        ));
    }
    Ok(grid)
}

fn locate_grid(decoder: &mut FileDecoder, path: &Path, width: usize, height: usize) -> Result<GeoGrid> {
    let scale = optional(decoder.find_tag(MODEL_PIXEL_SCALE)?, Value::into_f64_vec)?;
    let tiepoint = optional(decoder.find_tag(MODEL_TIEPOINT)?, Value::into_f64_vec)?;

    if let (Some(scale), Some(tie)) = (&scale, &tiepoint) {
        if scale.len() >= 2 && tie.len() >= 6 {
            let (pixel_width, pixel_height) = (scale[0], scale[1]);
            return Ok(GeoGrid {
                width,
                height,
                origin_x: tie[3] - tie[0] * pixel_width,
                origin_y: tie[4] + tie[1] * pixel_height,
                pixel_width,
                pixel_height,
            });
        }
    }

    if let Some(m) = optional(decoder.find_tag(MODEL_TRANSFORMATION)?, Value::into_f64_vec)? {
        // Row-major 4x4 matrix; only north-up grids are supported.
        if m.len() >= 8 && m[1] == 0.0 && m[4] == 0.0 {
            return Ok(GeoGrid {
                width,
                height,
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: -m[5],
            });
        }
    }

    Err(Error::engine(
        "read raster",
        format!("{} is not georeferenced as a north-up grid", path.display()),
    ))
}

fn read_nodata(decoder: &mut FileDecoder) -> Result<Option<f64>> {
    let Some(value) = decoder.find_tag(GDAL_NODATA)? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    let text = text.trim_matches(char::from(0)).trim();
    match text.to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "nan" => Ok(Some(f64::NAN)),
        other => Ok(other.parse::<f64>().ok()),
    }
}

fn read_samples(decoder: &mut FileDecoder, path: &Path) -> Result<Vec<f64>> {
    let data = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(Error::engine(
                "read raster",
                format!("{}: 64-bit integer samples are not supported", path.display()),
            ))
        }
    };
    Ok(data)
}

fn cast<T>(data: &[f64], convert: fn(f64) -> T) -> Vec<T> {
    data.iter().map(|v| convert(*v)).collect()
}

fn encode<C>(encoder: &mut FileEncoder, raster: &Raster, codec: Codec, samples: Vec<C::Inner>) -> Result<()>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    match codec {
        Codec::Deflate => write_image::<C, _>(encoder, raster, &samples, Deflate::default()),
        Codec::Lzw => write_image::<C, _>(encoder, raster, &samples, Lzw::default()),
    }
}

fn write_image<C, D>(encoder: &mut FileEncoder, raster: &Raster, samples: &[C::Inner], compression: D) -> Result<()>
where
    C: colortype::ColorType,
    D: Compression,
    [C::Inner]: TiffValue,
{
    let width = raster.grid.width as u32;
    let height = raster.grid.height as u32;
    let mut image = encoder.new_image_with_compression::<C, D>(width, height, compression)?;
    write_geotags(image.encoder(), raster)?;
    image.write_data(samples)?;
    Ok(())
}

fn write_geotags(dir: &mut DirectoryEncoder<'_, BufWriter<File>, TiffKindStandard>, raster: &Raster) -> Result<()> {
    let grid = &raster.grid;
    let scale = [grid.pixel_width, grid.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, grid.origin_x, grid.origin_y, 0.0];
    dir.write_tag(MODEL_PIXEL_SCALE, &scale[..])?;
    dir.write_tag(MODEL_TIEPOINT, &tiepoint[..])?;

    if let Some(directory) = &raster.geokeys.directory {
        dir.write_tag(GEO_KEY_DIRECTORY, &directory[..])?;
    }
    if let Some(doubles) = &raster.geokeys.doubles {
        dir.write_tag(GEO_DOUBLE_PARAMS, &doubles[..])?;
    }
    if let Some(ascii) = &raster.geokeys.ascii {
        dir.write_tag(GEO_ASCII_PARAMS, ascii.as_str())?;
    }
    if let Some(nodata) = raster.nodata {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            nodata.to_string()
        };
        dir.write_tag(GDAL_NODATA, text.as_str())?;
    }
    Ok(())
}
