/// End-to-end tests: write arrays, reopen them through every backend, and
/// check that partial reads return exactly the matching slice of the data.
use std::fs;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use om_core::format::LEGACY_VERSION_1;
use om_core::{
    write_legacy, write_whole_file, CompressionKind, FileBackend, IoLimits, LegacyHeader, MmapFile,
    OmError, OmFileReader, OmFileReaderBackend, OmFileWriter, Result, ScalarValue, Variable,
    WriterOptions,
};

// ── helpers ───────────────────────────────────────────────────────────────

/// Smooth field with a few sharp features, like a temperature grid.
fn temperature_field(dims: &[u64]) -> Vec<f32> {
    let n: u64 = dims.iter().product();
    (0..n)
        .map(|i| {
            let x = i as f32;
            15.0 + 20.0 * (x * 0.013).sin() + 3.0 * (x * 0.31).cos()
        })
        .collect()
}

fn write_in_memory(
    dims: &[u64],
    chunks: &[u64],
    compression: CompressionKind,
    scale_factor: f32,
    values: &[f32],
    options: WriterOptions,
) -> Vec<u8> {
    let mut writer = OmFileWriter::new(Vec::new(), options);
    let mut array = writer
        .prepare_array::<f32>(dims.to_vec(), chunks.to_vec(), compression, scale_factor, 0.0)
        .unwrap();
    array.write_data(values, dims, &vec![0; dims.len()], dims).unwrap();
    let descriptor = array.finalize().unwrap();
    writer.write_trailer(&Variable::array("", descriptor)).unwrap();
    writer.into_backend().unwrap()
}

/// Row-major slice of `values` (shape `dims`) selected by `ranges`.
fn slice<T: Copy>(values: &[T], dims: &[u64], ranges: &[Range<u64>]) -> Vec<T> {
    let mut out = Vec::new();
    let mut position: Vec<u64> = ranges.iter().map(|r| r.start).collect();
    if ranges.iter().any(|r| r.is_empty()) {
        return out;
    }
    loop {
        let index = position.iter().zip(dims).fold(0, |acc, (&p, &d)| acc * d + p);
        out.push(values[index as usize]);
        let mut axis = ranges.len();
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            position[axis] += 1;
            if position[axis] < ranges[axis].end {
                break;
            }
            position[axis] = ranges[axis].start;
        }
    }
}

fn random_ranges(rng: &mut StdRng, dims: &[u64]) -> Vec<Range<u64>> {
    dims.iter()
        .map(|&d| {
            let a = rng.gen_range(0..d);
            let b = rng.gen_range(a + 1..=d);
            a..b
        })
        .collect()
}

fn bits(values: &[f32]) -> Vec<u32> {
    values.iter().map(|v| v.to_bits()).collect()
}

/// In-memory backend that counts how many byte ranges were requested.
struct CountingReader {
    bytes: Vec<u8>,
    reads: AtomicUsize,
}

impl CountingReader {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            reads: AtomicUsize::new(0),
        }
    }

    fn take_reads(&self) -> usize {
        self.reads.swap(0, Ordering::Relaxed)
    }
}

impl OmFileReaderBackend for CountingReader {
    fn count(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes.with_bytes(offset, count, f)
    }
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_time_window_of_quantized_grid() {
    let dims = [10u64, 1024];
    let mut values = temperature_field(&dims);
    values[5 * 1024 + 17] = f32::NAN;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("temperature.om");
    write_whole_file(
        &path,
        &dims,
        &[8, 128],
        CompressionKind::PforDelta2dInt16,
        20.0,
        0.0,
        &values,
        false,
    )
    .unwrap();

    let reader = OmFileReader::open_file(&path).unwrap();
    let mut array = reader.array_at::<f32>("").unwrap();
    let read = array.read(&[3..7, 0..1024]).unwrap();
    let expected = slice(&values, &dims, &[3..7, 0..1024]);
    assert_eq!(read.len(), 4 * 1024);
    for (i, (got, want)) in read.iter().zip(&expected).enumerate() {
        if want.is_nan() {
            assert!(got.is_nan(), "index {i} should stay NaN");
        } else {
            assert!((got - want).abs() <= 0.025 + 1e-4, "index {i}: {got} vs {want}");
        }
    }
    assert!(read[2 * 1024 + 17].is_nan());
}

#[test]
fn test_short_boundary_chunks() {
    let dims = [10u64, 10];
    let values: Vec<f32> = (0..100).map(|v| v as f32 * 1.25 - 7.0).collect();
    let bytes = write_in_memory(
        &dims,
        &[3, 3],
        CompressionKind::FpxXor2d,
        1.0,
        &values,
        WriterOptions::default(),
    );
    let reader = OmFileReader::open(bytes).unwrap();
    let mut array = reader.array::<f32>(reader.root()).unwrap();

    assert_eq!(array.read(&[9..10, 9..10]).unwrap(), vec![values[99]]);
    assert_eq!(array.read(&[0..10, 0..10]).unwrap(), values);
    assert_eq!(
        array.read(&[2..8, 4..5]).unwrap(),
        slice(&values, &dims, &[2..8, 4..5])
    );
    assert!(array.read(&[4..4, 0..10]).unwrap().is_empty());
}

#[test]
fn test_empty_reads_touch_no_chunks() {
    let dims = [10u64, 10];
    let values: Vec<f32> = (0..100).map(|v| v as f32).collect();
    let bytes = write_in_memory(
        &dims,
        &[3, 3],
        CompressionKind::FpxXor2d,
        1.0,
        &values,
        WriterOptions::default(),
    );
    let reader = OmFileReader::open(CountingReader::new(bytes)).unwrap();
    let mut array = reader.array::<f32>(reader.root()).unwrap();
    reader.backend().take_reads();

    for ranges in [[4..4, 0..10], [0..10, 5..5], [9..9, 1..1]] {
        assert!(array.read(&ranges).unwrap().is_empty());
        assert_eq!(reader.backend().take_reads(), 0, "{ranges:?}");
    }
}

#[test]
fn test_partial_reads_match_full_read() {
    let dims = [7u64, 13, 17];
    let values = temperature_field(&dims);
    let mut rng = StdRng::seed_from_u64(7);

    for compression in [
        CompressionKind::PforDelta2dInt16,
        CompressionKind::FpxXor2d,
        CompressionKind::PforDelta2dInt16Logarithmic,
    ] {
        let bytes = write_in_memory(&dims, &[3, 4, 5], compression, 100.0, &values, WriterOptions::default());
        let reader = OmFileReader::open(bytes).unwrap();
        let mut array = reader.array_at::<f32>("").unwrap();
        let full = array.read(&[0..7, 0..13, 0..17]).unwrap();
        if compression == CompressionKind::FpxXor2d {
            assert_eq!(bits(&full), bits(&values));
        }
        for _ in 0..50 {
            let ranges = random_ranges(&mut rng, &dims);
            let part = array.read(&ranges).unwrap();
            assert_eq!(bits(&part), bits(&slice(&full, &dims, &ranges)), "{compression} {ranges:?}");
        }
    }
}

#[test]
fn test_logarithmic_precision() {
    let dims = [4u64, 50];
    let values: Vec<f32> = (0..200).map(|i| (i % 37) as f32 * 0.7).collect();
    let bytes = write_in_memory(
        &dims,
        &[2, 25],
        CompressionKind::PforDelta2dInt16Logarithmic,
        1000.0,
        &values,
        WriterOptions::default(),
    );
    let reader = OmFileReader::open(bytes).unwrap();
    let read = reader.array_at::<f32>("").unwrap().read(&[0..4, 0..50]).unwrap();
    for (got, want) in read.iter().zip(&values) {
        let err = ((1.0 + got).log10() - (1.0 + want).log10()).abs();
        assert!(err <= 0.0005 + 1e-6, "{got} vs {want}");
    }
}

#[test]
fn test_scatter_windows_into_one_cube() {
    let dims = [10u64, 10];
    let values: Vec<f32> = (0..100).map(|v| v as f32).collect();
    let bytes = write_in_memory(&dims, &[4, 3], CompressionKind::FpxXor2d, 1.0, &values, WriterOptions::default());
    let reader = OmFileReader::open(bytes).unwrap();
    let mut array = reader.array_at::<f32>("").unwrap();

    let mut cube = vec![0f32; 100];
    array.read_into(&[0..5, 0..10], &mut cube, &[0, 0], &[10, 10]).unwrap();
    array.read_into(&[5..10, 0..10], &mut cube, &[5, 0], &[10, 10]).unwrap();
    assert_eq!(cube, values);

    // a 3x4 window placed at (2, 3) of a larger, pre-filled destination
    let mut big = vec![-1f32; 12 * 15];
    array.read_into(&[6..9, 1..5], &mut big, &[2, 3], &[12, 15]).unwrap();
    for r in 0..12u64 {
        for c in 0..15u64 {
            let got = big[(r * 15 + c) as usize];
            if (2..5).contains(&r) && (3..7).contains(&c) {
                assert_eq!(got, values[((r - 2 + 6) * 10 + (c - 3 + 1)) as usize]);
            } else {
                assert_eq!(got, -1.0);
            }
        }
    }

    assert!(matches!(
        array.read_into(&[0..5, 0..10], &mut cube, &[6, 0], &[10, 10]),
        Err(OmError::ShapeMismatch(_))
    ));
    assert!(matches!(
        array.read_into(&[0..5, 0..10], &mut cube[..50], &[0, 0], &[10, 10]),
        Err(OmError::ShapeMismatch(_))
    ));
}

#[test]
fn test_merged_reads_equal_naive_reads() {
    let dims = [9u64, 40, 11];
    let values = temperature_field(&dims);
    let mut rng = StdRng::seed_from_u64(42);

    for lut_chunk_element_count in [1, 2, 3, 7, 256] {
        let options = WriterOptions {
            lut_chunk_element_count,
            buffer_capacity: 4096,
            ..WriterOptions::default()
        };
        let bytes = write_in_memory(&dims, &[2, 3, 4], CompressionKind::PforDelta2dInt16, 50.0, &values, options);
        let reader = OmFileReader::open(CountingReader::new(bytes)).unwrap();

        let mut naive = reader
            .array_at::<f32>("")
            .unwrap()
            .with_io_limits(IoLimits::unmerged());
        let entry_count = naive.descriptor().chunk_count() + 1;
        let naive_lut = naive.read_lut_entries(0..entry_count).unwrap();
        assert_eq!(naive_lut.len() as u64, entry_count);
        assert!(naive_lut.windows(2).all(|w| w[0] <= w[1]));

        for _ in 0..20 {
            let limits = IoLimits {
                io_size_merge: rng.gen_range(0..2048),
                io_size_max: rng.gen_range(0..65536),
            };
            let mut merged = reader.array_at::<f32>("").unwrap().with_io_limits(limits);
            let ranges = random_ranges(&mut rng, &dims);

            let expected = naive.read(&ranges).unwrap();
            let got = merged.read(&ranges).unwrap();
            assert_eq!(bits(&got), bits(&expected), "{limits:?} {ranges:?}");

            let a = rng.gen_range(0..entry_count);
            let b = rng.gen_range(a..=entry_count);
            assert_eq!(
                merged.read_lut_entries(a..b).unwrap(),
                naive_lut[a as usize..b as usize]
            );
        }

        // a full read collapses into a handful of requests with default limits
        let full = [0..9, 0..40, 0..11];
        let mut merged = reader.array_at::<f32>("").unwrap();
        reader.backend().take_reads();
        let expected = naive.read(&full).unwrap();
        let naive_reads = reader.backend().take_reads();
        assert_eq!(bits(&merged.read(&full).unwrap()), bits(&expected));
        let merged_reads = reader.backend().take_reads();
        assert!(naive_reads as u64 >= entry_count - 1);
        assert!(merged_reads < naive_reads, "{merged_reads} >= {naive_reads}");
    }
}

#[test]
fn test_whole_file_writes_are_identical() {
    let dims = [24u64, 300];
    let values = temperature_field(&dims);
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.om");
    let b = dir.path().join("b.om");
    for path in [&a, &b] {
        write_whole_file(&path, &dims, &[6, 64], CompressionKind::PforDelta2dInt16, 20.0, 0.0, &values, false)
            .unwrap();
    }
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    assert!(!dir.path().join("a.om~").exists());
}

#[test]
fn test_existing_file_is_not_touched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t2m.om");
    fs::write(&path, b"keep me").unwrap();
    let values = vec![1f32; 16];

    let err = write_whole_file(&path, &[4, 4], &[2, 2], CompressionKind::FpxXor2d, 1.0, 0.0, &values, false)
        .unwrap_err();
    assert!(matches!(err, OmError::FileExists(_)));
    assert_eq!(fs::read(&path).unwrap(), b"keep me");

    write_whole_file(&path, &[4, 4], &[2, 2], CompressionKind::FpxXor2d, 1.0, 0.0, &values, true).unwrap();
    let reader = OmFileReader::open(FileBackend::open(&path).unwrap()).unwrap();
    assert_eq!(reader.array_at::<f32>("").unwrap().read(&[0..4, 0..4]).unwrap(), values);
}

#[test]
fn test_construction_errors_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.om");
    let values = vec![0f32; 100];
    let err = write_whole_file(&path, &[10, 10], &[11, 3], CompressionKind::PforDelta2dInt16, 20.0, 0.0, &values, false)
        .unwrap_err();
    assert!(matches!(err, OmError::InvalidDimensions(_)));
    assert!(!path.exists());
    assert!(!dir.path().join("bad.om~").exists());

    let doubles = vec![0f64; 100];
    let err = write_whole_file(&path, &[10, 10], &[5, 5], CompressionKind::PforDelta2dInt16, 20.0, 0.0, &doubles, false)
        .unwrap_err();
    assert!(matches!(err, OmError::UnsupportedCompression { .. }));
}

#[test]
fn test_read_errors() {
    let values = vec![0f32; 30];
    let bytes = write_in_memory(&[5, 6], &[2, 2], CompressionKind::PforDelta2dInt16, 10.0, &values, WriterOptions::default());
    let reader = OmFileReader::open(bytes).unwrap();
    let mut array = reader.array_at::<f32>("").unwrap();

    assert!(matches!(
        array.read(&[0..6, 0..6]),
        Err(OmError::OutOfRange { axis: 0, .. })
    ));
    #[allow(clippy::reversed_empty_ranges)]
    let reversed = [3..2, 0..6];
    assert!(matches!(array.read(&reversed), Err(OmError::OutOfRange { .. })));
    assert!(matches!(array.read(&[0..5]), Err(OmError::ShapeMismatch(_))));
    // in-memory files skip prefetching but still validate the request
    assert!(matches!(
        array.prefetch(&[0..5, 0..7]),
        Err(OmError::OutOfRange { axis: 1, .. })
    ));
    assert!(matches!(
        reader.array_at::<f64>(""),
        Err(OmError::DataTypeMismatch { .. })
    ));
    assert!(matches!(
        reader.array_at::<f32>("missing"),
        Err(OmError::NotAnArray(_))
    ));
}

#[test]
fn test_streamed_slabs_match_whole_write() {
    let dims = [6u64, 1000];
    let chunks = [2u64, 100];
    let values = temperature_field(&dims);
    let whole = write_in_memory(&dims, &chunks, CompressionKind::PforDelta2dInt16, 20.0, &values, WriterOptions::default());

    // one chunk row at a time, each slab holding only its own rows
    let mut writer = OmFileWriter::new(Vec::new(), WriterOptions::default());
    let mut array = writer
        .prepare_array::<f32>(dims.to_vec(), chunks.to_vec(), CompressionKind::PforDelta2dInt16, 20.0, 0.0)
        .unwrap();
    for row in (0..6).step_by(2) {
        let slab = &values[row * 1000..(row + 2) * 1000];
        array.write_data(slab, &[2, 1000], &[0, 0], &[2, 1000]).unwrap();
    }
    let descriptor = array.finalize().unwrap();
    writer.write_trailer(&Variable::array("", descriptor)).unwrap();
    assert_eq!(writer.into_backend().unwrap(), whole);

    // single chunks sliced out of the full array
    let mut writer = OmFileWriter::new(Vec::new(), WriterOptions::default());
    let mut array = writer
        .prepare_array::<f32>(dims.to_vec(), chunks.to_vec(), CompressionKind::PforDelta2dInt16, 20.0, 0.0)
        .unwrap();
    for row in (0..6).step_by(2) {
        for col in (0..1000).step_by(100) {
            array.write_data(&values, &dims, &[row, col], &[2, 100]).unwrap();
        }
    }
    let descriptor = array.finalize().unwrap();
    writer.write_trailer(&Variable::array("", descriptor)).unwrap();
    assert_eq!(writer.into_backend().unwrap(), whole);
}

#[test]
fn test_legacy_files_read_through_same_path() {
    let dims = [20u64, 30];
    let values = temperature_field(&dims);
    for (version, compression) in [
        (LEGACY_VERSION_1, CompressionKind::PforDelta2dInt16),
        (2, CompressionKind::FpxXor2d),
    ] {
        let header = LegacyHeader {
            version,
            compression,
            scale_factor: 20.0,
            dims: [20, 30],
            chunks: [6, 7],
        };
        let bytes = write_legacy(Vec::new(), &header, &values).unwrap();
        let reader = OmFileReader::open(bytes).unwrap();
        assert!(reader.is_legacy());
        assert_eq!(reader.version(), version);

        let mut array = reader.array_at::<f32>("").unwrap();
        let full = array.read(&[0..20, 0..30]).unwrap();
        if compression == CompressionKind::FpxXor2d {
            assert_eq!(bits(&full), bits(&values));
        } else {
            for (got, want) in full.iter().zip(&values) {
                assert!((got - want).abs() <= 0.025 + 1e-4);
            }
        }
        let part = array.read(&[5..17, 3..29]).unwrap();
        assert_eq!(bits(&part), bits(&slice(&full, &dims, &[5..17, 3..29])));

        let entries = array.read_lut_entries(0..3).unwrap();
        assert_eq!(entries[0], 40 + 4 * 5 * 8);
    }
}

#[test]
fn test_backends_agree() {
    let dims = [12u64, 50];
    let values = temperature_field(&dims);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("field.om");
    write_whole_file(&path, &dims, &[5, 16], CompressionKind::FpxXor2d, 1.0, 0.0, &values, false).unwrap();
    let ranges = [2..11, 7..44];
    let expected = slice(&values, &dims, &ranges);

    let mmap = OmFileReader::open(MmapFile::open(&path).unwrap()).unwrap();
    let mut array = mmap.array_at::<f32>("").unwrap();
    array.prefetch(&ranges).unwrap();
    assert_eq!(array.read(&ranges).unwrap(), expected);

    let file = OmFileReader::open(FileBackend::open(&path).unwrap()).unwrap();
    assert_eq!(file.array_at::<f32>("").unwrap().read(&ranges).unwrap(), expected);

    #[cfg(unix)]
    {
        let cache = dir.path().join("field.om.cache");
        let backend = om_core::CachedMmapFile::with_block_size(&path, &cache, 64).unwrap();
        let cached = OmFileReader::open(backend).unwrap();
        let mut array = cached.array_at::<f32>("").unwrap();
        array.prefetch(&ranges).unwrap();
        assert_eq!(array.read(&ranges).unwrap(), expected);
        assert_eq!(fs::metadata(&cache).unwrap().len(), fs::metadata(&path).unwrap().len());
    }
}

#[test]
fn test_shared_reader_across_threads() {
    let dims = [8u64, 64];
    let values = temperature_field(&dims);
    let bytes = write_in_memory(&dims, &[3, 16], CompressionKind::FpxXor2d, 1.0, &values, WriterOptions::default());
    let reader = OmFileReader::open(bytes).unwrap();

    std::thread::scope(|s| {
        for row in 0..8u64 {
            let reader = &reader;
            let values = &values;
            s.spawn(move || {
                let mut array = reader.array_at::<f32>("").unwrap();
                let got = array.read(&[row..row + 1, 0..64]).unwrap();
                assert_eq!(got, slice(values, &dims, &[row..row + 1, 0..64]));
            });
        }
    });
}

#[test]
fn test_multi_array_file_with_attributes() {
    let temperature_dims = [4u64, 5, 6];
    let temperature = temperature_field(&temperature_dims);
    let elevation: Vec<f64> = (0..30).map(|v| v as f64 * 12.5 - 3.0).collect();

    let mut writer = OmFileWriter::new(Vec::new(), WriterOptions::default());
    let mut array = writer
        .prepare_array::<f32>(temperature_dims.to_vec(), vec![2, 5, 4], CompressionKind::PforDelta2dInt16, 20.0, 0.0)
        .unwrap();
    array.write_data(&temperature, &temperature_dims, &[0, 0, 0], &temperature_dims).unwrap();
    let mut temperature_descriptor = array.finalize().unwrap();
    temperature_descriptor.dimension_names = vec!["time".into(), "lat".into(), "lon".into()];

    let mut array = writer
        .prepare_array::<f64>(vec![5, 6], vec![5, 6], CompressionKind::FpxXor2d, 1.0, 0.0)
        .unwrap();
    array.write_data(&elevation, &[5, 6], &[0, 0], &[5, 6]).unwrap();
    let elevation_descriptor = array.finalize().unwrap();

    let root = Variable::group(
        "",
        vec![
            Variable::group(
                "surface",
                vec![Variable::array("temperature_2m", temperature_descriptor)
                    .with_children(vec![Variable::scalar("units", "celsius")])],
            ),
            Variable::array("elevation", elevation_descriptor),
            Variable::scalar("run", 2024031500u64),
        ],
    );
    writer.write_trailer(&root).unwrap();
    let reader = OmFileReader::open(writer.into_backend().unwrap()).unwrap();

    assert_eq!(reader.root(), &root);
    assert_eq!(
        reader.variable("run").and_then(Variable::as_scalar),
        Some(&ScalarValue::Uint64(2024031500))
    );
    let units = reader.variable("surface/temperature_2m/units").unwrap();
    assert_eq!(units.as_scalar(), Some(&ScalarValue::String("celsius".into())));

    let variable = reader.variable("surface/temperature_2m").unwrap();
    let got = reader.array::<f32>(variable).unwrap().read(&[1..3, 0..5, 2..6]).unwrap();
    let want = slice(&temperature, &temperature_dims, &[1..3, 0..5, 2..6]);
    for (g, w) in got.iter().zip(&want) {
        assert!((g - w).abs() <= 0.025 + 1e-4);
    }

    let got = reader.array_at::<f64>("elevation").unwrap().read(&[0..5, 0..6]).unwrap();
    assert_eq!(got, elevation);
    assert!(matches!(reader.array_at::<f32>("run"), Err(OmError::NotAnArray(_))));
}
