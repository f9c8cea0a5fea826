//! Binary field files for velocity data and reference FTLE fields.
//!
//! Generates deterministic synthetic velocity datasets (a sampled double gyre
//! with optional seeded noise) so the `data` cases and accuracy checks can run
//! without external tooling.
//!
//! # Binary Format
//!
//! ```text
//! Header:
//!   magic: [u8; 8]     = b"FTLEFLD1"
//!   version: u32       = 1
//!   ndim: u32          = number of axes
//!   shape: [u64; ndim] = extent of each axis
//!   seed: u64          = random seed used for generation (0 when not generated)
//!   reserved: [u8; 16] = zeros (future use)
//!
//! Body:
//!   values: [f64; product(shape)], row-major, little-endian
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::providers::flows::AnalyticFlow;

/// Magic bytes identifying the field format.
const MAGIC: &[u8; 8] = b"FTLEFLD1";

/// Current format version.
const FORMAT_VERSION: u32 = 1;

/// Upper bound on axes; anything larger is a corrupt header.
const MAX_DIMS: u32 = 8;

/// Dense row-major array of `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl Field {
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> io::Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "shape {:?} expects {} values, got {}",
                    shape,
                    expected,
                    values.len()
                ),
            ));
        }
        Ok(Self { shape, values })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            values: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Field metadata from the header.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    pub shape: Vec<u64>,
    pub seed: u64,
}

/// Configuration for synthetic velocity generation.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// `(nt, nx, ny)`.
    pub shape: [usize; 3],
    /// `((t0, t1), (x0, x1), (y0, y1))`.
    pub domain: [[f64; 2]; 3],
    /// Amplitude of uniform noise added to each sample; 0 disables it.
    pub noise: f64,
    pub seed: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            shape: [41, 101, 51],
            domain: [[0.0, 20.0], [0.0, 2.0], [0.0, 1.0]],
            noise: 0.0,
            seed: 42,
        }
    }
}

fn per_slice_seed(master_seed: u64, index: usize) -> u64 {
    master_seed
        .wrapping_add(index as u64)
        .wrapping_mul(0x517cc1b727220a95)
}

/// Evenly spaced samples over `[lo, hi]`, endpoints included.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

/// Sample the double gyre onto a `(nt, nx, ny)` grid, returning `(u, v)`.
///
/// Each time slice draws its noise from an RNG seeded by the master seed and the
/// slice index, so output does not depend on rayon scheduling.
pub fn generate_velocity(config: &GenerateConfig) -> (Field, Field) {
    let [nt, nx, ny] = config.shape;
    let t = linspace(config.domain[0][0], config.domain[0][1], nt);
    let x = linspace(config.domain[1][0], config.domain[1][1], nx);
    let y = linspace(config.domain[2][0], config.domain[2][1], ny);
    let flow = AnalyticFlow::DoubleGyre;

    let slices: Vec<(Vec<f64>, Vec<f64>)> = (0..nt)
        .into_par_iter()
        .map(|k| {
            let mut rng = ChaCha8Rng::seed_from_u64(per_slice_seed(config.seed, k));
            let mut u = Vec::with_capacity(nx * ny);
            let mut v = Vec::with_capacity(nx * ny);
            for &xi in &x {
                for &yj in &y {
                    let [mut du, mut dv] = flow.velocity(t[k], [xi, yj]);
                    if config.noise > 0.0 {
                        du += rng.gen_range(-config.noise..=config.noise);
                        dv += rng.gen_range(-config.noise..=config.noise);
                    }
                    u.push(du);
                    v.push(dv);
                }
            }
            (u, v)
        })
        .collect();

    let mut u = Vec::with_capacity(nt * nx * ny);
    let mut v = Vec::with_capacity(nt * nx * ny);
    for (su, sv) in slices {
        u.extend(su);
        v.extend(sv);
    }

    let shape = vec![nt, nx, ny];
    (
        Field {
            shape: shape.clone(),
            values: u,
        },
        Field { shape, values: v },
    )
}

/// Write a field to a binary file.
pub fn write_field<P: AsRef<Path>>(path: P, field: &Field, seed: u64) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(64 * 1024, file);

    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(field.shape.len() as u32).to_le_bytes())?;
    for &dim in &field.shape {
        writer.write_all(&(dim as u64).to_le_bytes())?;
    }
    writer.write_all(&seed.to_le_bytes())?;
    writer.write_all(&[0u8; 16])?; // reserved

    for value in &field.values {
        writer.write_all(&value.to_le_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

fn read_header<R: Read>(reader: &mut R) -> io::Result<FieldMeta> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid magic bytes: expected {:?}, got {:?}", MAGIC, magic),
        ));
    }

    let mut buf4 = [0u8; 4];
    let mut buf8 = [0u8; 8];

    reader.read_exact(&mut buf4)?;
    let version = u32::from_le_bytes(buf4);
    if version != FORMAT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported format version: {}", version),
        ));
    }

    reader.read_exact(&mut buf4)?;
    let ndim = u32::from_le_bytes(buf4);
    if ndim == 0 || ndim > MAX_DIMS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported number of axes: {}", ndim),
        ));
    }

    let mut shape = Vec::with_capacity(ndim as usize);
    for _ in 0..ndim {
        reader.read_exact(&mut buf8)?;
        shape.push(u64::from_le_bytes(buf8));
    }

    reader.read_exact(&mut buf8)?;
    let seed = u64::from_le_bytes(buf8);

    let mut reserved = [0u8; 16];
    reader.read_exact(&mut reserved)?;

    Ok(FieldMeta { shape, seed })
}

/// Read field metadata without loading the body.
pub fn read_field_meta<P: AsRef<Path>>(path: P) -> io::Result<FieldMeta> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_header(&mut reader)
}

/// Bytes before the value body for a header with `ndim` axes.
fn header_len(ndim: usize) -> u64 {
    (MAGIC.len() + 4 + 4 + 8 * ndim + 8 + 16) as u64
}

fn invalid_shape(shape: &[u64]) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Shape {:?} does not fit in memory", shape),
    )
}

/// Load a field from a binary file.
pub fn load_field<P: AsRef<Path>>(path: P) -> io::Result<(FieldMeta, Field)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let meta = read_header(&mut reader)?;

    let shape = meta
        .shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<Vec<usize>, _>>()
        .map_err(|_| invalid_shape(&meta.shape))?;
    let len = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| invalid_shape(&meta.shape))?;
    let body_len = file_len.saturating_sub(header_len(meta.shape.len()));
    if (len as u64).checked_mul(8) != Some(body_len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Shape {:?} needs {} value bytes, file holds {}",
                meta.shape,
                (len as u128) * 8,
                body_len
            ),
        ));
    }

    let mut values = Vec::with_capacity(len);
    let mut buf8 = [0u8; 8];
    for _ in 0..len {
        reader.read_exact(&mut buf8)?;
        values.push(f64::from_le_bytes(buf8));
    }

    Ok((meta, Field { shape, values }))
}
