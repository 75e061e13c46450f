//! OM format demo
//!
//! Generates a month of hourly temperature and precipitation for a grid of
//! locations, stores it as OM files and as whole-blob gzip / zstd / lz4
//! streams, then reads single-location time series back. The OM reader only
//! touches the chunks that hold the location; every blob format has to be
//! decompressed in full first.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use env_logger::Env;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;

use om_core::{write_whole_file, CompressionKind, OmFileReader};

// ── constants ──────────────────────────────────────────────────────────────

const LOCATIONS: u64 = 10_000;
const HOURS: u64 = 24 * 30;
const CHUNKS: [u64; 2] = [20, 240];
const PROBES: u64 = 50;

// ── data generator ──────────────────────────────────────────────────────────

/// Diurnal cycle plus a slow synoptic wave, shifted per location.
fn temperature(location: u64, hour: u64) -> f32 {
    let lat = (location / 100) as f32 / 100.0;
    let lon = (location % 100) as f32 / 100.0;
    let base = 25.0 - 30.0 * lat;
    let diurnal = 6.0 * ((hour as f32 + 24.0 * lon) / 24.0 * std::f32::consts::TAU).sin();
    let synoptic = 4.0 * (hour as f32 / 97.0 + location as f32 * 0.013).sin();
    base + diurnal + synoptic
}

/// Mostly dry, with occasional showers of a few mm.
fn precipitation(location: u64, hour: u64) -> f32 {
    let phase = ((hour * 7919 + location * 104_729) % 1000) as f32 / 1000.0;
    if phase < 0.85 {
        0.0
    } else {
        (phase - 0.85) * 40.0
    }
}

fn field(f: fn(u64, u64) -> f32) -> Vec<f32> {
    let mut values = Vec::with_capacity((LOCATIONS * HOURS) as usize);
    for location in 0..LOCATIONS {
        for hour in 0..HOURS {
            values.push(f(location, hour));
        }
    }
    values
}

fn to_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ── formatting ──────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 { v /= 1024.0; u += 1; }
    if u == 0 { format!("{n} B") } else { format!("{v:.2} {}", U[u]) }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn speedup(slow: Duration, fast: Duration) -> f64 {
    slow.as_secs_f64() / fast.as_secs_f64().max(1e-9)
}

fn section(title: &str) {
    println!();
    println!("── {title} {}", "─".repeat(66usize.saturating_sub(title.len())));
    println!();
}

// ── blob formats ────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Blob {
    Gzip,
    Zstd,
    Lz4,
}

impl Blob {
    fn name(self) -> &'static str {
        match self {
            Blob::Gzip => "gzip",
            Blob::Zstd => "zstd",
            Blob::Lz4 => "lz4",
        }
    }

    fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            Blob::Gzip => {
                let mut enc = GzEncoder::new(Vec::new(), GzCompression::default());
                enc.write_all(raw)?;
                enc.finish()?
            }
            Blob::Zstd => zstd::bulk::compress(raw, 3)?,
            Blob::Lz4 => lz4_flex::compress_prepend_size(raw),
        })
    }

    fn decompress(self, blob: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            Blob::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(blob).read_to_end(&mut out)?;
                out
            }
            Blob::Zstd => zstd::stream::decode_all(blob)?,
            Blob::Lz4 => lz4_flex::decompress_size_prepended(blob).context("lz4 block")?,
        })
    }
}

// ── demo runner ─────────────────────────────────────────────────────────────

struct Variable {
    name: &'static str,
    compression: CompressionKind,
    scale_factor: f32,
    values: Vec<f32>,
}

fn run_variable(out_dir: &Path, variable: &Variable) -> Result<()> {
    section(&format!("{} ({})", variable.name, variable.compression));
    let raw = to_le_bytes(&variable.values);
    let om_path = out_dir.join(format!("{}.om", variable.name));

    let t0 = Instant::now();
    write_whole_file(
        &om_path,
        &[LOCATIONS, HOURS],
        &CHUNKS,
        variable.compression,
        variable.scale_factor,
        0.0,
        &variable.values,
        true,
    )?;
    let om_write = t0.elapsed();
    let om_size = fs::metadata(&om_path)?.len();

    println!(
        "  {:<10} {:>12}  {:>12}  {:>8}  {:>10}",
        "Format", "Raw", "Stored", "Ratio", "Write"
    );
    println!("  {}", "─".repeat(60));
    println!(
        "  {:<10} {:>12}  {:>12}  {:>7.1}x  {:>10}",
        "om",
        human_bytes(raw.len() as u64),
        human_bytes(om_size),
        raw.len() as f64 / om_size as f64,
        fmt_duration(om_write)
    );

    let mut blobs = Vec::new();
    for kind in [Blob::Gzip, Blob::Zstd, Blob::Lz4] {
        let t0 = Instant::now();
        let blob = kind.compress(&raw)?;
        let elapsed = t0.elapsed();
        println!(
            "  {:<10} {:>12}  {:>12}  {:>7.1}x  {:>10}",
            kind.name(),
            human_bytes(raw.len() as u64),
            human_bytes(blob.len() as u64),
            raw.len() as f64 / blob.len() as f64,
            fmt_duration(elapsed)
        );
        blobs.push((kind, blob));
    }

    // Time series of single locations: the typical point-forecast access.
    println!();
    println!("  Reading {PROBES} single-location time series ({HOURS} hours each)");
    println!();
    let reader = OmFileReader::open_file(&om_path)?;
    let mut array = reader.array_at::<f32>("")?;
    let probes: Vec<u64> = (0..PROBES).map(|i| (i * 7_919) % LOCATIONS).collect();

    let t0 = Instant::now();
    let mut max_error = 0f32;
    for &location in &probes {
        let series = array.read(&[location..location + 1, 0..HOURS])?;
        let start = (location * HOURS) as usize;
        for (got, want) in series.iter().zip(&variable.values[start..start + HOURS as usize]) {
            max_error = max_error.max((got - want).abs());
        }
    }
    let om_read = t0.elapsed() / PROBES as u32;

    println!("  {:<34}  {:>12}  {:>12}", "Method", "Per series", "vs om");
    println!("  {}", "─".repeat(62));
    println!(
        "  {:<34}  {:>12}  {:>12}",
        "om partial read",
        fmt_duration(om_read),
        "1.0x"
    );
    for (kind, blob) in &blobs {
        let t0 = Instant::now();
        let decoded = from_le_bytes(&kind.decompress(blob)?);
        let location = probes[0] as usize * HOURS as usize;
        let _series = &decoded[location..location + HOURS as usize];
        let elapsed = t0.elapsed();
        println!(
            "  {:<34}  {:>12}  {:>11.0}x",
            format!("{} (decompress all, slice)", kind.name()),
            fmt_duration(elapsed),
            speedup(elapsed, om_read)
        );
    }
    println!();
    match variable.compression {
        CompressionKind::PforDelta2dInt16 => println!(
            "  largest absolute error of om reads: {max_error:.4} (bound {:.4})",
            0.5 / variable.scale_factor
        ),
        _ => println!("  largest absolute error of om reads: {max_error:.4}"),
    }
    Ok(())
}

fn run() -> Result<()> {
    let out_dir = std::env::temp_dir().join("om_demo");
    fs::create_dir_all(&out_dir)?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           OM — chunked array files  ·  partial read demo         ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("  grid     : {LOCATIONS} locations x {HOURS} hours");
    println!("  chunks   : {:?}", CHUNKS);

    let variables = [
        Variable {
            name: "temperature_2m",
            compression: CompressionKind::PforDelta2dInt16,
            scale_factor: 20.0,
            values: field(temperature),
        },
        Variable {
            name: "precipitation",
            compression: CompressionKind::PforDelta2dInt16Logarithmic,
            scale_factor: 1000.0,
            values: field(precipitation),
        },
    ];
    for variable in &variables {
        run_variable(&out_dir, variable)?;
    }
    println!();
    println!("  files left in {:?}", out_dir);
    Ok(())
}

fn main() {
    env_logger::init_from_env(Env::new().filter_or("OM_LOG", "warn"));
    if let Err(e) = run() {
        eprintln!("demo failed: {e:#}");
        std::process::exit(1);
    }
}
