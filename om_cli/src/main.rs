use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use om_core::{
    write_whole_file_with, ArrayDescriptor, ArrayElement, CompressionKind, DataType, IoLimits,
    MmapFile, OmFileReader, Variable, WriterOptions,
};

const ENV_OM_LOG: &str = "OM_LOG";

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "om",
    about = "Chunked, compressed array files: convert, inspect, and read sub-regions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct IoArgs {
    /// Merge reads separated by at most this many bytes
    #[arg(long, default_value_t = IoLimits::default().io_size_merge)]
    io_merge: u64,
    /// Never let a merged read grow beyond this many bytes
    #[arg(long, default_value_t = IoLimits::default().io_size_max)]
    io_max: u64,
}

impl From<IoArgs> for IoLimits {
    fn from(args: IoArgs) -> Self {
        IoLimits {
            io_size_merge: args.io_merge,
            io_size_max: args.io_max,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a raw little-endian f32 array into an OM file
    Convert {
        /// Raw f32 values in row-major order
        input: PathBuf,
        /// Destination OM file
        output: PathBuf,
        /// Array shape, slowest axis first, e.g. "10,1024"
        #[arg(short, long)]
        dims: String,
        /// Chunk shape, e.g. "8,128"
        #[arg(short, long)]
        chunks: String,
        /// Compression: int16 | log | xor
        #[arg(long, default_value = "int16")]
        compression: CompressionKind,
        /// Quantization scale factor (int16 and log only)
        #[arg(long, default_value_t = 20.0)]
        scale: f32,
        /// Value subtracted before quantization
        #[arg(long, default_value_t = 0.0)]
        offset: f32,
        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,
        /// JSON file with writer options
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the metadata tree and array layouts
    Inspect {
        /// OM file to inspect
        file: PathBuf,
        /// Print per-chunk offsets from the lookup table
        #[arg(long)]
        lut: bool,
    },
    /// Read a hyperrectangle out of one array
    Read {
        /// OM file
        file: PathBuf,
        /// Variable path, empty for the root array
        #[arg(long, default_value = "")]
        var: String,
        /// Per-axis ranges, e.g. "3..7,0..1024"; whole array when omitted
        #[arg(short, long)]
        range: Option<String>,
        /// Write raw little-endian values to a file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        io: IoArgs,
    },
    /// Benchmark random window reads
    Bench {
        /// OM file
        file: PathBuf,
        /// Variable path, empty for the root array
        #[arg(long, default_value = "")]
        var: String,
        /// Number of random windows to read
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Window extent along every axis
        #[arg(short, long, default_value_t = 16)]
        window: u64,
        #[command(flatten)]
        io: IoArgs,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_shape(text: &str) -> anyhow::Result<Vec<u64>> {
    text.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .with_context(|| format!("invalid extent '{part}' in '{text}'"))
        })
        .collect()
}

fn parse_ranges(text: &str) -> anyhow::Result<Vec<Range<u64>>> {
    text.split(',')
        .map(|part| {
            let (start, end) = part
                .trim()
                .split_once("..")
                .with_context(|| format!("range '{part}' must look like a..b"))?;
            let start = start.parse::<u64>().with_context(|| format!("invalid range start in '{part}'"))?;
            let end = end.parse::<u64>().with_context(|| format!("invalid range end in '{part}'"))?;
            Ok(start..end)
        })
        .collect()
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn open(file: &Path) -> anyhow::Result<OmFileReader<MmapFile>> {
    OmFileReader::open_file(file).with_context(|| format!("opening OM file {:?}", file))
}

fn find_array<'r>(reader: &'r OmFileReader<MmapFile>, var: &str) -> anyhow::Result<&'r Variable> {
    let variable = reader
        .variable(var)
        .with_context(|| format!("no variable '{var}'"))?;
    if variable.as_array().is_none() {
        anyhow::bail!("variable '{var}' holds no array");
    }
    Ok(variable)
}

/// Values that the CLI can print and dump.
trait CliElement: ArrayElement + std::fmt::Display {
    fn le_bytes(self) -> Vec<u8>;
}

impl CliElement for f32 {
    fn le_bytes(self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }
}

impl CliElement for f64 {
    fn le_bytes(self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_convert(
    input: PathBuf,
    output: PathBuf,
    dims: &str,
    chunks: &str,
    compression: CompressionKind,
    scale: f32,
    offset: f32,
    overwrite: bool,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dims = parse_shape(dims)?;
    let chunks = parse_shape(chunks)?;
    let options: WriterOptions = match config {
        Some(path) => {
            let text = fs::read(&path).with_context(|| format!("reading config {:?}", path))?;
            serde_json::from_slice(&text).with_context(|| format!("parsing config {:?}", path))?
        }
        None => WriterOptions::default(),
    };
    debug!("writer options: {options:?}");

    let raw = fs::read(&input).with_context(|| format!("reading input file {:?}", input))?;
    let expected: u64 = dims.iter().product::<u64>() * 4;
    if raw.len() as u64 != expected {
        anyhow::bail!(
            "input holds {} bytes but shape {:?} needs {} f32 values ({} bytes)",
            raw.len(),
            dims,
            expected / 4,
            expected
        );
    }
    let values: Vec<f32> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    let t0 = Instant::now();
    write_whole_file_with(
        &output,
        &dims,
        &chunks,
        compression,
        scale,
        offset,
        &values,
        overwrite,
        options,
    )
    .with_context(|| format!("writing {:?}", output))?;
    let elapsed = t0.elapsed();

    let compressed_size = fs::metadata(&output)?.len();
    eprintln!("  compression : {}", compression);
    eprintln!("  shape       : {:?} in chunks of {:?}", dims, chunks);
    eprintln!("  raw size    : {}", human_bytes(raw.len() as u64));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    eprintln!("  ratio       : {:.2}x", raw.len() as f64 / compressed_size as f64);
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn print_descriptor(path: &str, d: &ArrayDescriptor) {
    println!("  array '{}'", path);
    println!("    data type      : {}", d.data_type);
    println!("    dimensions     : {:?}", d.dimensions);
    if !d.dimension_names.is_empty() {
        println!("    dimension names: {:?}", d.dimension_names);
    }
    println!("    chunks         : {:?} ({} total)", d.chunks, d.chunk_count());
    println!("    compression    : {}", d.compression);
    if d.compression.is_quantized() {
        println!("    scale / offset : {} / {}", d.scale_factor, d.add_offset);
    }
    println!(
        "    LUT            : {} at offset {} ({} entries per group)",
        human_bytes(d.lut_size),
        d.lut_offset,
        d.lut_chunk_element_count
    );
}

fn print_lut(reader: &OmFileReader<MmapFile>, variable: &Variable) -> anyhow::Result<()> {
    let Some(descriptor) = variable.as_array() else {
        return Ok(());
    };
    let chunk_count = descriptor.chunk_count();
    let entries = match descriptor.data_type {
        DataType::Double => reader.array::<f64>(variable)?.read_lut_entries(0..chunk_count + 1)?,
        _ => reader.array::<f32>(variable)?.read_lut_entries(0..chunk_count + 1)?,
    };
    println!("    {:>8}  {:>14}  {:>12}", "chunk", "file offset", "compressed");
    println!("    {}", "-".repeat(38));
    for (i, pair) in entries.windows(2).enumerate() {
        println!("    {:>8}  {:>14}  {:>12}", i, pair[0], human_bytes(pair[1] - pair[0]));
    }
    Ok(())
}

fn print_tree(reader: &OmFileReader<MmapFile>, variable: &Variable, path: &str, show_lut: bool) -> anyhow::Result<()> {
    if let Some(descriptor) = variable.as_array() {
        print_descriptor(path, descriptor);
        if show_lut {
            print_lut(reader, variable)?;
        }
    } else if let Some(scalar) = variable.as_scalar() {
        println!("  scalar '{}' = {:?}", path, scalar);
    } else if !path.is_empty() {
        println!("  group '{}'", path);
    }
    for child in &variable.children {
        let child_path = if path.is_empty() {
            child.name.clone()
        } else {
            format!("{path}/{}", child.name)
        };
        print_tree(reader, child, &child_path, show_lut)?;
    }
    Ok(())
}

fn run_inspect(file: PathBuf, show_lut: bool) -> anyhow::Result<()> {
    let reader = open(&file)?;
    let file_size = fs::metadata(&file)?.len();

    println!("=== OM File: {:?} ===", file);
    println!();
    println!("  format version : {}{}", reader.version(), if reader.is_legacy() { " (legacy)" } else { "" });
    println!("  file on disk   : {}", human_bytes(file_size));
    println!();
    print_tree(&reader, reader.root(), "", show_lut)
}

fn read_typed<T: CliElement>(
    reader: &OmFileReader<MmapFile>,
    variable: &Variable,
    ranges: &[Range<u64>],
    io: IoLimits,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut array = reader.array::<T>(variable)?.with_io_limits(io);
    let t0 = Instant::now();
    let values = array.read(ranges)?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded {} values in {:.3}ms",
        values.len(),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            let mut bytes = Vec::with_capacity(values.len() * std::mem::size_of::<T>());
            for v in &values {
                bytes.extend_from_slice(&v.le_bytes());
            }
            fs::write(&path, &bytes)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            let row = ranges.last().map_or(1, |r| (r.end - r.start).max(1)) as usize;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for line in values.chunks(row) {
                let text: Vec<String> = line.iter().map(|v| v.to_string()).collect();
                writeln!(out, "{}", text.join(" "))?;
            }
        }
    }
    Ok(())
}

fn run_read(
    file: PathBuf,
    var: &str,
    range: Option<String>,
    output: Option<PathBuf>,
    io: IoLimits,
) -> anyhow::Result<()> {
    let reader = open(&file)?;
    let variable = find_array(&reader, var)?;
    let Some(descriptor) = variable.as_array() else {
        anyhow::bail!("variable '{var}' holds no array");
    };
    let ranges = match range {
        Some(text) => parse_ranges(&text)?,
        None => descriptor.dimensions.iter().map(|&d| 0..d).collect(),
    };
    match descriptor.data_type {
        DataType::Double => read_typed::<f64>(&reader, variable, &ranges, io, output),
        _ => read_typed::<f32>(&reader, variable, &ranges, io, output),
    }
}

/// `count` windows of up to `window` elements per axis, reproducible from `seed`.
fn random_windows(dims: &[u64], count: u64, window: u64, seed: u64) -> Vec<Vec<Range<u64>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            dims.iter()
                .map(|&d| {
                    let extent = window.clamp(1, d);
                    let start = rng.gen_range(0..=d - extent);
                    start..start + extent
                })
                .collect()
        })
        .collect()
}

fn run_bench(file: PathBuf, var: &str, count: u64, seed: u64, window: u64, io: IoLimits) -> anyhow::Result<()> {
    let reader = open(&file)?;
    let variable = find_array(&reader, var)?;
    let mut array = reader.array::<f32>(variable)?.with_io_limits(io);
    let dims = array.dims().to_vec();
    let windows = random_windows(&dims, count, window, seed);

    eprintln!(
        "benchmarking {} random {:?}-element windows in an array of {:?}...",
        count, window, dims
    );

    let t0 = Instant::now();
    let mut total_values = 0u64;
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);
    for ranges in &windows {
        let t = Instant::now();
        let values = array.read(ranges)?;
        latencies_us.push(t.elapsed().as_micros() as u64);
        total_values += values.len() as u64;
    }
    let elapsed = t0.elapsed();
    if latencies_us.is_empty() {
        anyhow::bail!("nothing to benchmark: --count is 0");
    }
    latencies_us.sort_unstable();

    let pick = |q: f64| latencies_us[((latencies_us.len() - 1) as f64 * q) as usize];
    println!();
    println!("=== Random Window Read Benchmark ===");
    println!("  windows read : {}", count);
    println!("  values       : {}", total_values);
    println!("  elapsed      : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput   : {}/s",
        human_bytes((total_values as f64 * 4.0 / elapsed.as_secs_f64()) as u64)
    );
    println!("  latency:");
    println!("    min  : {} µs", pick(0.0));
    println!("    p50  : {} µs", pick(0.5));
    println!("    p95  : {} µs", pick(0.95));
    println!("    p99  : {} µs", pick(0.99));
    println!("    max  : {} µs", pick(1.0));
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(Env::new().filter_or(ENV_OM_LOG, "warn"));
    let cli = Cli::parse();
    match cli.command {
        Commands::Convert {
            input,
            output,
            dims,
            chunks,
            compression,
            scale,
            offset,
            overwrite,
            config,
        } => run_convert(input, output, &dims, &chunks, compression, scale, offset, overwrite, config),
        Commands::Inspect { file, lut } => run_inspect(file, lut),
        Commands::Read {
            file,
            var,
            range,
            output,
            io,
        } => run_read(file, &var, range, output, io.into()),
        Commands::Bench {
            file,
            var,
            count,
            seed,
            window,
            io,
        } => run_bench(file, &var, count, seed, window, io.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shapes_and_ranges() {
        assert_eq!(parse_shape("10, 1024").unwrap(), vec![10, 1024]);
        assert!(parse_shape("10,x").is_err());
        assert_eq!(parse_ranges("3..7,0..1024").unwrap(), vec![3..7, 0..1024]);
        assert!(parse_ranges("3-7").is_err());
    }

    #[test]
    fn bench_windows_are_seeded_and_in_bounds() {
        let dims = [10, 1024, 3];
        let windows = random_windows(&dims, 40, 16, 7);
        assert_eq!(windows.len(), 40);
        assert_eq!(windows, random_windows(&dims, 40, 16, 7));
        assert_ne!(windows, random_windows(&dims, 40, 16, 8));
        for ranges in &windows {
            for (range, &d) in ranges.iter().zip(&dims) {
                assert_eq!(range.end - range.start, 16u64.min(d));
                assert!(range.end <= d);
            }
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
