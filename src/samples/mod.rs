//! Random-access reader for the bulk-data (`.dat`) sub-resource.
//!
//! Each trace record points at an absolute file offset holding
//! `DataPoints` contiguous raw elements of the trace's `DataFormat`.
//! Physical values are `raw * DataScaler + ZeroData`.  Nothing is cached:
//! every read opens its own handle, so concurrent reads never share a
//! cursor.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::trace;

use crate::error::BundleError;
use crate::schema::Endian;
use crate::tree::{read_len, Level, TreeNode};

// ── SampleFormat ─────────────────────────────────────────────────────────────

/// Element type of a trace's raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Int32,
    Float16,
    Float32,
}

impl SampleFormat {
    /// Map the trace's `DataFormat` code.  Codes outside `0..=3` are rejected.
    pub fn from_code(code: i64) -> Result<Self, BundleError> {
        match code {
            0 => Ok(SampleFormat::Int16),
            1 => Ok(SampleFormat::Int32),
            2 => Ok(SampleFormat::Float16),
            3 => Ok(SampleFormat::Float32),
            _ => Err(BundleError::format(format!("unknown sample format code {code}"))),
        }
    }

    #[inline]
    pub fn width(self) -> usize {
        match self {
            SampleFormat::Int16 | SampleFormat::Float16 => 2,
            SampleFormat::Int32 | SampleFormat::Float32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::Int16   => "int16",
            SampleFormat::Int32   => "int32",
            SampleFormat::Float16 => "float16",
            SampleFormat::Float32 => "float32",
        }
    }
}

/// IEEE 754 binary16 to f32.  Every half value is exactly representable.
pub fn half_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = ((bits >> 10) & 0x1f) as i32;
    let frac = (bits & 0x03ff) as f32;
    let magnitude = match exp {
        0    => frac * 2f32.powi(-24),
        0x1f => if frac == 0.0 { f32::INFINITY } else { f32::NAN },
        _    => (1.0 + frac / 1024.0) * 2f32.powi(exp - 15),
    };
    sign * magnitude
}

/// Decode raw elements and apply `raw * scaler + zero`.
pub fn decode_samples(raw: &[u8], format: SampleFormat, endian: Endian, scaler: f64, zero: f64) -> Vec<f64> {
    match endian {
        Endian::Little => decode_with::<LittleEndian>(raw, format, scaler, zero),
        Endian::Big    => decode_with::<BigEndian>(raw, format, scaler, zero),
    }
}

fn decode_with<B: ByteOrder>(raw: &[u8], format: SampleFormat, scaler: f64, zero: f64) -> Vec<f64> {
    raw.chunks_exact(format.width())
        .map(|c| {
            let v = match format {
                SampleFormat::Int16   => B::read_i16(c) as f64,
                SampleFormat::Int32   => B::read_i32(c) as f64,
                SampleFormat::Float16 => half_to_f32(B::read_u16(c)) as f64,
                SampleFormat::Float32 => B::read_f32(c) as f64,
            };
            v * scaler + zero
        })
        .collect()
}

// ── TraceInfo ────────────────────────────────────────────────────────────────

/// The fields of a trace record needed to locate and scale its samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceInfo {
    pub label:       String,
    pub data_offset: u64,
    pub data_points: usize,
    pub format:      SampleFormat,
    pub scaler:      f64,
    pub zero:        f64,
    pub y_unit:      String,
    pub x_unit:      String,
    pub x_interval:  f64,
    pub x_start:     f64,
}

impl TraceInfo {
    pub fn from_node(node: &TreeNode) -> Result<Self, BundleError> {
        if node.level() != Level::Trace {
            return Err(BundleError::format(format!("{} node holds no samples", node.level())));
        }
        let r = node.record();
        let offset = r.i64("Data")?;
        let points = r.i64("DataPoints")?;
        Ok(Self {
            label:       r.str("Label")?.to_owned(),
            data_offset: u64::try_from(offset)
                .map_err(|_| BundleError::format(format!("negative data offset {offset}")))?,
            data_points: usize::try_from(points)
                .map_err(|_| BundleError::format(format!("negative data point count {points}")))?,
            format:      SampleFormat::from_code(r.i64("DataFormat")?)?,
            scaler:      r.f64("DataScaler")?,
            zero:        r.f64("ZeroData")?,
            y_unit:      r.str("YUnit")?.to_owned(),
            x_unit:      r.str("XUnit")?.to_owned(),
            x_interval:  r.f64("XInterval")?,
            x_start:     r.f64("XStart")?,
        })
    }

    /// Sample positions `x_start + i * x_interval`.
    pub fn time_axis(&self) -> Vec<f64> {
        (0..self.data_points).map(|i| self.x_start + i as f64 * self.x_interval).collect()
    }

    pub fn byte_len(&self) -> Result<usize, BundleError> {
        self.data_points.checked_mul(self.format.width()).ok_or_else(|| {
            BundleError::format(format!("{} points of {} overflow", self.data_points, self.format.name()))
        })
    }
}

// ── SampleData ───────────────────────────────────────────────────────────────

/// Handle on the bulk-data sub-resource of one bundle file.
#[derive(Debug, Clone)]
pub struct SampleData {
    path:   PathBuf,
    start:  u64,
    length: u64,
    endian: Endian,
}

impl SampleData {
    pub fn new<P: AsRef<Path>>(path: P, start: u64, length: u64, endian: Endian) -> Self {
        Self { path: path.as_ref().to_owned(), start, length, endian }
    }

    /// Offset of the sub-resource inside the bundle.  Trace offsets are
    /// absolute and do not depend on it.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Read and scale the samples of one trace.
    pub fn read_trace(&self, trace: &TraceInfo) -> Result<Vec<f64>, BundleError> {
        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(trace.data_offset))?;
        let raw = read_len(&mut f, trace.byte_len()?)?;
        trace!(
            "read {} {} samples of '{}' at offset {}",
            trace.data_points, trace.format.name(), trace.label, trace.data_offset,
        );
        Ok(decode_samples(&raw, trace.format, self.endian, trace.scaler, trace.zero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Record;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_int16_scaling() {
        let raw: Vec<u8> = [0i16, 100, -50].iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = decode_samples(&raw, SampleFormat::Int16, Endian::Little, 2.0, 1.0);
        assert_eq!(out, vec![1.0, 201.0, -99.0]);
    }

    #[test]
    fn test_big_endian_int32_and_float32() {
        let raw: Vec<u8> = [7i32, -3].iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(decode_samples(&raw, SampleFormat::Int32, Endian::Big, 0.5, 0.0), vec![3.5, -1.5]);

        let raw: Vec<u8> = [1.5f32, -0.25].iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(decode_samples(&raw, SampleFormat::Float32, Endian::Big, 1.0, 10.0), vec![11.5, 9.75]);
    }

    #[test]
    fn test_half_floats() {
        assert_eq!(half_to_f32(0x3c00), 1.0);
        assert_eq!(half_to_f32(0xc000), -2.0);
        assert_eq!(half_to_f32(0x3555), 0.333_251_95);
        assert_eq!(half_to_f32(0x0001), 2f32.powi(-24));
        assert_eq!(half_to_f32(0x7c00), f32::INFINITY);
        assert!(half_to_f32(0x7e00).is_nan());
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(SampleFormat::from_code(2).unwrap(), SampleFormat::Float16);
        assert!(matches!(SampleFormat::from_code(4), Err(BundleError::Format(_))));
        assert!(matches!(SampleFormat::from_code(-1), Err(BundleError::Format(_))));
    }

    fn trace_node(offset: i32, points: i32, format: u8) -> TreeNode {
        TreeNode::new(
            Level::Trace,
            Record::new()
                .with("Label", "Imon")
                .with("Data", offset)
                .with("DataPoints", points)
                .with("DataFormat", format)
                .with("DataScaler", 2.0)
                .with("ZeroData", 1.0)
                .with("YUnit", "A")
                .with("XUnit", "s")
                .with("XInterval", 0.5)
                .with("XStart", 0.0),
        )
    }

    #[test]
    fn test_trace_info_requires_trace_level() {
        let node = TreeNode::new(Level::Sweep, Record::new());
        assert!(matches!(TraceInfo::from_node(&node), Err(BundleError::Format(_))));
        let info = TraceInfo::from_node(&trace_node(8, 3, 0)).unwrap();
        assert_eq!(info.time_axis(), vec![0.0, 0.5, 1.0]);
        assert_eq!(info.byte_len().unwrap(), 6);
    }

    #[test]
    fn test_read_trace_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"padding!").unwrap();
        for v in [0i16, 100, -50] {
            tmp.write_all(&v.to_le_bytes()).unwrap();
        }
        tmp.flush().unwrap();

        let data = SampleData::new(tmp.path(), 0, 14, Endian::Little);
        let info = TraceInfo::from_node(&trace_node(8, 3, 0)).unwrap();
        assert_eq!(data.read_trace(&info).unwrap(), vec![1.0, 201.0, -99.0]);

        let past_end = TraceInfo::from_node(&trace_node(8, 4, 0)).unwrap();
        assert!(matches!(data.read_trace(&past_end), Err(BundleError::Io(_))));
    }

    #[test]
    fn test_huge_point_count_on_short_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();
        tmp.flush().unwrap();

        let data = SampleData::new(tmp.path(), 0, 64, Endian::Little);
        let mut info = TraceInfo::from_node(&trace_node(0, i32::MAX, 1)).unwrap();
        let err = data.read_trace(&info).unwrap_err();
        assert!(matches!(err, BundleError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));

        info.data_points = usize::MAX;
        assert!(matches!(data.read_trace(&info), Err(BundleError::Format(_))));
    }
}
