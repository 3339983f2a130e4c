//! End-to-end tests for CompressedVector reader/writer sessions
//!
//! These tests verify:
//! - Write / close / reopen / chunked read of bulk records
//! - Cursor semantics: end of stream, idempotent reads, seek
//! - Multi-packet sections driven by a small packet size target
//! - ScaledInteger scaling, numeric conversion, strided buffers
//! - String record fields through side storage
//! - Session and buffer error paths

use std::path::PathBuf;

use tempfile::TempDir;
use voxfile::{Config, ImageFile, NodeId, Precision, SourceDestBuffer, VoxError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_path() -> (TempDir, PathBuf) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("points.vox");
    (temp_dir, path)
}

/// Attach a CompressedVector with a three-float (single precision) prototype
/// at /points
fn make_xyz_vector(file: &mut ImageFile) -> NodeId {
    let root = file.root();
    let tree = file.tree_mut();
    let proto = tree.alloc_structure();
    for name in ["cartesianX", "cartesianY", "cartesianZ"] {
        let leaf = tree.alloc_float(0.0, Precision::Single);
        tree.set(proto, name, leaf).unwrap();
    }
    let points = tree.alloc_compressed_vector(proto).unwrap();
    tree.set(root, "points", points).unwrap();
    points
}

/// Write `n` records of (i+1, i+1+0.1, i+1+0.2) into /points and close the
/// file
fn write_xyz_file(path: &PathBuf, n: usize) {
    let mut file = ImageFile::create(path).unwrap();
    let points = make_xyz_vector(&mut file);

    let mut x = vec![0f32; n];
    let mut y = vec![0f32; n];
    let mut z = vec![0f32; n];
    for i in 0..n {
        x[i] = (i + 1) as f32;
        y[i] = (i + 1) as f32 + 0.1;
        z[i] = (i + 1) as f32 + 0.2;
    }
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut writer = file.writer(points, buffers).unwrap();
    writer.write(n).unwrap();
    writer.close().unwrap();
    file.close().unwrap();
}

// =============================================================================
// Core Round Trip
// =============================================================================

#[test]
fn test_write_then_chunked_read() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 10);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    assert_eq!(file.tree().child_count(points).unwrap(), 10);

    let mut x = vec![0f32; 4];
    let mut y = vec![0f32; 4];
    let mut z = vec![0f32; 4];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut reader = file.reader(points, buffers).unwrap();
    assert_eq!(reader.record_count(), 10);

    assert_eq!(reader.read().unwrap(), 4);
    assert_eq!(reader.read().unwrap(), 4);
    assert_eq!(reader.read().unwrap(), 2);
    // End of stream is terminal and idempotent
    assert_eq!(reader.read().unwrap(), 0);
    assert_eq!(reader.read().unwrap(), 0);
    reader.close().unwrap();

    // The last partial read left records 8 and 9 at the front
    assert_eq!(x[0], 9.0);
    assert_eq!(y[0], 9.0 + 0.1f32);
    assert_eq!(z[1], 10.0 + 0.2f32);
}

#[test]
fn test_read_values_match_written() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 10);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();

    let mut x = vec![0f32; 10];
    let mut y = vec![0f32; 10];
    let mut z = vec![0f32; 10];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut reader = file.reader(points, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 10);
    drop(reader);

    for i in 0..10 {
        assert_eq!(x[i], (i + 1) as f32);
        assert_eq!(y[i], (i + 1) as f32 + 0.1);
        assert_eq!(z[i], (i + 1) as f32 + 0.2);
    }
}

#[test]
fn test_seek() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 10);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();

    let mut x = vec![0f32; 4];
    let mut y = vec![0f32; 4];
    let mut z = vec![0f32; 4];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut reader = file.reader(points, buffers).unwrap();

    let err = reader.seek(1_000_000).unwrap_err();
    assert!(matches!(
        err,
        VoxError::OutOfRange {
            requested: 1_000_000,
            available: 10,
        }
    ));

    // The tail lands in a rebound buffer so the session's own set stays
    // untouched until the final read
    reader.seek(8).unwrap();
    let mut tail = vec![0f32; 4];
    let mut tail_buf = vec![SourceDestBuffer::f32s("cartesianX", &mut tail)];
    assert_eq!(reader.read_with(&mut tail_buf).unwrap(), 2);
    drop(tail_buf);
    assert_eq!(tail[0], 9.0);

    // Seeking to the record count positions at end of stream
    reader.seek(10).unwrap();
    assert_eq!(reader.read().unwrap(), 0);

    // Backwards seek rewinds
    reader.seek(0).unwrap();
    assert_eq!(reader.read().unwrap(), 4);
    drop(reader);
    assert_eq!(x[0], 1.0);
}

#[test]
fn test_multi_packet_section() {
    let (_temp, path) = setup_temp_path();
    let n = 500usize;
    {
        // Tiny packet budget forces many data packets
        let config = Config::builder().packet_size_target(64).build();
        let mut file = ImageFile::create_with_config(&path, config).unwrap();
        let root = file.root();
        let tree = file.tree_mut();
        let proto = tree.alloc_structure();
        let leaf = tree.alloc_integer(0, 0, 100_000).unwrap();
        tree.set(proto, "intensity", leaf).unwrap();
        let cv = tree.alloc_compressed_vector(proto).unwrap();
        tree.set(root, "samples", cv).unwrap();

        let mut values: Vec<i64> = (0..n as i64).map(|i| i * 3).collect();
        let buffers = vec![SourceDestBuffer::i64s("intensity", &mut values)];
        let mut writer = file.writer(cv, buffers).unwrap();
        writer.write(n).unwrap();
        assert_eq!(writer.record_count(), n as u64);
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let cv = file.tree().get(file.root(), "samples").unwrap();
    let mut back = vec![0i64; n];
    let buffers = vec![SourceDestBuffer::i64s("intensity", &mut back)];
    let mut reader = file.reader(cv, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), n);
    assert_eq!(reader.read().unwrap(), 0);
    drop(reader);
    for (i, v) in back.iter().enumerate() {
        assert_eq!(*v, i as i64 * 3);
    }
}

#[test]
fn test_zero_record_section() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let points = make_xyz_vector(&mut file);
        let mut x = vec![0f32; 1];
        let mut y = vec![0f32; 1];
        let mut z = vec![0f32; 1];
        let buffers = vec![
            SourceDestBuffer::f32s("cartesianX", &mut x),
            SourceDestBuffer::f32s("cartesianY", &mut y),
            SourceDestBuffer::f32s("cartesianZ", &mut z),
        ];
        let writer = file.writer(points, buffers).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    assert_eq!(file.tree().child_count(points).unwrap(), 0);
    let mut x = vec![0f32; 4];
    let mut y = vec![0f32; 4];
    let mut z = vec![0f32; 4];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut reader = file.reader(points, buffers).unwrap();
    assert_eq!(reader.record_count(), 0);
    assert_eq!(reader.read().unwrap(), 0);
}

// =============================================================================
// Scaling, Conversion, Stride
// =============================================================================

#[test]
fn test_scaled_integer_with_scaling() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let root = file.root();
        let tree = file.tree_mut();
        let proto = tree.alloc_structure();
        let leaf = tree.alloc_scaled_integer(0, 0, 1000, 0.01, 0.0).unwrap();
        tree.set(proto, "range", leaf).unwrap();
        let cv = tree.alloc_compressed_vector(proto).unwrap();
        tree.set(root, "measurements", cv).unwrap();

        let mut logical = vec![5.005f64, 3.14, 0.0, 9.999];
        let buffers =
            vec![SourceDestBuffer::f64s("range", &mut logical).with_scaling(true)];
        let mut writer = file.writer(cv, buffers).unwrap();
        writer.write(4).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let cv = file.tree().get(file.root(), "measurements").unwrap();
    let mut back = vec![0f64; 4];
    let buffers = vec![SourceDestBuffer::f64s("range", &mut back).with_scaling(true)];
    let mut reader = file.reader(cv, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 4);
    drop(reader);

    // Quantized to the nearest multiple of scale
    for (got, want) in back.iter().zip([5.005, 3.14, 0.0, 9.999]) {
        assert!((got - want).abs() <= 0.005 + 1e-9, "got {got}, want {want}");
    }
    assert!((back[1] - 3.14).abs() < 1e-9);
}

#[test]
fn test_scaled_integer_raw_without_scaling() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let root = file.root();
        let tree = file.tree_mut();
        let proto = tree.alloc_structure();
        let leaf = tree.alloc_scaled_integer(0, -500, 500, 0.01, 0.0).unwrap();
        tree.set(proto, "offset", leaf).unwrap();
        let cv = tree.alloc_compressed_vector(proto).unwrap();
        tree.set(root, "raw", cv).unwrap();

        let mut raw = vec![-500i64, -1, 0, 499];
        let buffers = vec![SourceDestBuffer::i64s("offset", &mut raw)];
        let mut writer = file.writer(cv, buffers).unwrap();
        writer.write(4).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let cv = file.tree().get(file.root(), "raw").unwrap();
    let mut back = vec![0i64; 4];
    let buffers = vec![SourceDestBuffer::i64s("offset", &mut back)];
    let mut reader = file.reader(cv, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 4);
    drop(reader);
    assert_eq!(back, vec![-500, -1, 0, 499]);
}

#[test]
fn test_numeric_conversion() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let root = file.root();
        let tree = file.tree_mut();
        let proto = tree.alloc_structure();
        let leaf = tree.alloc_integer(0, 0, 60_000).unwrap();
        tree.set(proto, "counts", leaf).unwrap();
        let cv = tree.alloc_compressed_vector(proto).unwrap();
        tree.set(root, "histogram", cv).unwrap();

        // u16 source memory, converted up to the field's i64 domain
        let mut counts: Vec<u16> = vec![0, 7, 60_000, 1234];
        let buffers = vec![SourceDestBuffer::new(
            "counts",
            voxfile::BufferData::U16(&mut counts),
        )
        .with_conversion(true)];
        let mut writer = file.writer(cv, buffers).unwrap();
        writer.write(4).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let cv = file.tree().get(file.root(), "histogram").unwrap();

    // Without doConversion an i32 destination is a type mismatch
    {
        let mut narrow = vec![0i32; 4];
        let buffers = vec![SourceDestBuffer::new(
            "counts",
            voxfile::BufferData::I32(&mut narrow),
        )];
        let mut reader = file.reader(cv, buffers).unwrap();
        let err = reader.read().unwrap_err();
        assert!(matches!(err, VoxError::TypeMismatch(_)));
    }

    // With doConversion the values fit an i32
    let mut narrow = vec![0i32; 4];
    let buffers = vec![SourceDestBuffer::new(
        "counts",
        voxfile::BufferData::I32(&mut narrow),
    )
    .with_conversion(true)];
    let mut reader = file.reader(cv, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 4);
    drop(reader);
    assert_eq!(narrow, vec![0, 7, 60_000, 1234]);

    // An i8 destination overflows and fails with Range, not truncation
    let mut tiny = vec![0i8; 4];
    let buffers = vec![SourceDestBuffer::new(
        "counts",
        voxfile::BufferData::I8(&mut tiny),
    )
    .with_conversion(true)];
    let mut reader = file.reader(cv, buffers).unwrap();
    let err = reader.read().unwrap_err();
    assert!(matches!(err, VoxError::Range(_)));
}

#[test]
fn test_strided_buffer() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let root = file.root();
        let tree = file.tree_mut();
        let proto = tree.alloc_structure();
        let leaf = tree.alloc_integer(0, 0, 1000).unwrap();
        tree.set(proto, "v", leaf).unwrap();
        let cv = tree.alloc_compressed_vector(proto).unwrap();
        tree.set(root, "strided", cv).unwrap();

        // Records live at elements 0, 3, 6 of a wider array
        let mut interleaved = vec![10i64, 0, 0, 20, 0, 0, 30];
        let buffers = vec![SourceDestBuffer::i64s("v", &mut interleaved).with_stride(3)];
        let mut writer = file.writer(cv, buffers).unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let cv = file.tree().get(file.root(), "strided").unwrap();
    let mut out = vec![0i64; 7];
    let buffers = vec![SourceDestBuffer::i64s("v", &mut out).with_stride(3)];
    let mut reader = file.reader(cv, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 3);
    drop(reader);
    assert_eq!(out[0], 10);
    assert_eq!(out[3], 20);
    assert_eq!(out[6], 30);
    assert_eq!(out[1], 0);
}

// =============================================================================
// Variable-Length Fields
// =============================================================================

#[test]
fn test_string_field_round_trip() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let root = file.root();
        let tree = file.tree_mut();
        let proto = tree.alloc_structure();
        let id = tree.alloc_integer(0, 0, 100).unwrap();
        tree.set(proto, "id", id).unwrap();
        let label = tree.alloc_string("");
        tree.set(proto, "label", label).unwrap();
        let cv = tree.alloc_compressed_vector(proto).unwrap();
        tree.set(root, "annotations", cv).unwrap();

        let mut ids = vec![1i64, 2, 3];
        let mut labels = vec![
            String::from("corner"),
            String::new(),
            String::from("späte Änderung"),
        ];
        let buffers = vec![
            SourceDestBuffer::i64s("id", &mut ids),
            SourceDestBuffer::strings("label", &mut labels),
        ];
        let mut writer = file.writer(cv, buffers).unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let cv = file.tree().get(file.root(), "annotations").unwrap();
    let mut ids = vec![0i64; 3];
    let mut labels = vec![String::new(), String::new(), String::new()];
    let buffers = vec![
        SourceDestBuffer::i64s("id", &mut ids),
        SourceDestBuffer::strings("label", &mut labels),
    ];
    let mut reader = file.reader(cv, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 3);
    drop(reader);
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(labels[0], "corner");
    assert_eq!(labels[1], "");
    assert_eq!(labels[2], "späte Änderung");
}

// =============================================================================
// Rebind Overloads and Subset Reads
// =============================================================================

#[test]
fn test_write_with_and_read_with() {
    let (_temp, path) = setup_temp_path();
    {
        let mut file = ImageFile::create(&path).unwrap();
        let points = make_xyz_vector(&mut file);
        let mut x = vec![1.0f32];
        let mut y = vec![2.0f32];
        let mut z = vec![3.0f32];
        let buffers = vec![
            SourceDestBuffer::f32s("cartesianX", &mut x),
            SourceDestBuffer::f32s("cartesianY", &mut y),
            SourceDestBuffer::f32s("cartesianZ", &mut z),
        ];
        let mut writer = file.writer(points, buffers).unwrap();
        writer.write(1).unwrap();

        // Second batch through a different buffer set
        let mut x2 = vec![4.0f32, 7.0];
        let mut y2 = vec![5.0f32, 8.0];
        let mut z2 = vec![6.0f32, 9.0];
        let batch = vec![
            SourceDestBuffer::f32s("cartesianX", &mut x2),
            SourceDestBuffer::f32s("cartesianY", &mut y2),
            SourceDestBuffer::f32s("cartesianZ", &mut z2),
        ];
        writer.write_with(&batch, 2).unwrap();
        writer.close().unwrap();
        file.close().unwrap();
    }

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    let mut x = vec![0f32; 3];
    let mut y = vec![0f32; 3];
    let mut z = vec![0f32; 3];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut reader = file.reader(points, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 3);

    // Reread record 2 through a rebind
    reader.seek(2).unwrap();
    let mut lone = vec![0f32; 1];
    let mut single = vec![SourceDestBuffer::f32s("cartesianX", &mut lone)];
    assert_eq!(reader.read_with(&mut single).unwrap(), 1);
    drop(reader);
    drop(single);
    assert_eq!(x, vec![1.0, 4.0, 7.0]);
    assert_eq!(y, vec![2.0, 5.0, 8.0]);
    assert_eq!(z, vec![3.0, 6.0, 9.0]);
    assert_eq!(lone[0], 7.0);
}

#[test]
fn test_reader_accepts_field_subset() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 5);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    let mut y = vec![0f32; 5];
    let buffers = vec![SourceDestBuffer::f32s("cartesianY", &mut y)];
    let mut reader = file.reader(points, buffers).unwrap();
    assert_eq!(reader.read().unwrap(), 5);
    drop(reader);
    assert_eq!(y[4], 5.0 + 0.1f32);
}

// =============================================================================
// Error Paths
// =============================================================================

#[test]
fn test_writer_requires_every_field_bound() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let points = make_xyz_vector(&mut file);
    let mut x = vec![0f32; 2];
    let buffers = vec![SourceDestBuffer::f32s("cartesianX", &mut x)];
    let err = file.writer(points, buffers).unwrap_err();
    assert!(matches!(err, VoxError::UndefinedPath(_)));
}

#[test]
fn test_buffer_naming_unknown_field_rejected() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 2);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    let mut bogus = vec![0f32; 2];
    let buffers = vec![SourceDestBuffer::f32s("noSuchField", &mut bogus)];
    let err = file.reader(points, buffers).unwrap_err();
    assert!(matches!(err, VoxError::UndefinedPath(_)));
}

#[test]
fn test_mismatched_buffer_capacities_rejected() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let points = make_xyz_vector(&mut file);
    let mut x = vec![0f32; 4];
    let mut y = vec![0f32; 5];
    let mut z = vec![0f32; 4];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let err = file.writer(points, buffers).unwrap_err();
    assert!(matches!(err, VoxError::BufferSizeMismatch { .. }));
}

#[test]
fn test_write_count_beyond_capacity_rejected() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let points = make_xyz_vector(&mut file);
    let mut x = vec![0f32; 4];
    let mut y = vec![0f32; 4];
    let mut z = vec![0f32; 4];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut writer = file.writer(points, buffers).unwrap();
    let err = writer.write(5).unwrap_err();
    assert!(matches!(
        err,
        VoxError::BufferSizeMismatch {
            expected: 4,
            actual: 5,
        }
    ));
    // The session survives a rejected call
    writer.write(4).unwrap();
    writer.close().unwrap();
}

#[test]
fn test_out_of_bounds_value_fails_write() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let root = file.root();
    let tree = file.tree_mut();
    let proto = tree.alloc_structure();
    let leaf = tree.alloc_integer(0, 0, 100).unwrap();
    tree.set(proto, "v", leaf).unwrap();
    let cv = tree.alloc_compressed_vector(proto).unwrap();
    tree.set(root, "bounded", cv).unwrap();

    let mut values = vec![50i64, 101, 60];
    let buffers = vec![SourceDestBuffer::i64s("v", &mut values)];
    let mut writer = file.writer(cv, buffers).unwrap();
    let err = writer.write(3).unwrap_err();
    assert!(matches!(err, VoxError::Range(_)));
    // Only the record before the failure was staged
    writer.close().unwrap();
    assert_eq!(file.tree().child_count(cv).unwrap(), 1);
}

#[test]
fn test_second_writer_on_committed_section_rejected() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let points = make_xyz_vector(&mut file);
    {
        let mut x = vec![1.0f32];
        let mut y = vec![2.0f32];
        let mut z = vec![3.0f32];
        let buffers = vec![
            SourceDestBuffer::f32s("cartesianX", &mut x),
            SourceDestBuffer::f32s("cartesianY", &mut y),
            SourceDestBuffer::f32s("cartesianZ", &mut z),
        ];
        let mut writer = file.writer(points, buffers).unwrap();
        writer.write(1).unwrap();
        writer.close().unwrap();
    }
    let mut x = vec![0f32];
    let mut y = vec![0f32];
    let mut z = vec![0f32];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let err = file.writer(points, buffers).unwrap_err();
    assert!(matches!(err, VoxError::SessionConflict(_)));
}

#[test]
fn test_writer_on_read_only_file_rejected() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 1);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    let mut x = vec![0f32];
    let mut y = vec![0f32];
    let mut z = vec![0f32];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let err = file.writer(points, buffers).unwrap_err();
    assert!(matches!(err, VoxError::ReadOnly(_)));
}

#[test]
fn test_reader_rejects_empty_buffer_set() {
    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 3);

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();

    // Without a bound buffer a read() returning 0 would be indistinguishable
    // from end of stream
    let err = file.reader(points, Vec::new()).unwrap_err();
    assert!(matches!(err, VoxError::TypeMismatch(_)));

    let mut x = vec![0f32; 3];
    let buffers = vec![SourceDestBuffer::f32s("cartesianX", &mut x)];
    let mut reader = file.reader(points, buffers).unwrap();
    let err = reader.read_with(&mut []).unwrap_err();
    assert!(matches!(err, VoxError::TypeMismatch(_)));
    assert_eq!(reader.read().unwrap(), 3);
}

#[test]
fn test_reader_rejects_oversized_index_length() {
    use voxfile::file::paged::{PAGE_PAYLOAD, PAGE_SIZE};

    let (_temp, path) = setup_temp_path();
    write_xyz_file(&path, 3);

    // Layout: 48-byte header, one 48-byte data packet (three 32-bit runs of
    // three records), index packet at logical 96; all within the first page,
    // so physical offsets match logical ones.
    let mut bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes[48], 1); // data packet kind
    assert_eq!(bytes[96], 0); // index packet kind
    bytes[98..102].copy_from_slice(&0x4000_0000u32.to_le_bytes());
    let crc = crc32fast::hash(&bytes[..PAGE_PAYLOAD as usize]);
    bytes[PAGE_PAYLOAD as usize..PAGE_SIZE as usize].copy_from_slice(&crc.to_le_bytes());
    std::fs::write(&path, &bytes).unwrap();

    let mut file = ImageFile::open(&path).unwrap();
    let points = file.tree().get(file.root(), "points").unwrap();
    let mut x = vec![0f32; 3];
    let buffers = vec![SourceDestBuffer::f32s("cartesianX", &mut x)];
    let err = file.reader(points, buffers).unwrap_err();
    assert!(matches!(err, VoxError::CorruptPacket(_)));
}

#[test]
fn test_session_handles_are_debug_printable() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let points = make_xyz_vector(&mut file);
    assert!(format!("{file:?}").contains("ImageFile"));

    let mut x = vec![1.0f32];
    let mut y = vec![2.0f32];
    let mut z = vec![3.0f32];
    let buffers = vec![
        SourceDestBuffer::f32s("cartesianX", &mut x),
        SourceDestBuffer::f32s("cartesianY", &mut y),
        SourceDestBuffer::f32s("cartesianZ", &mut z),
    ];
    let mut writer = file.writer(points, buffers).unwrap();
    writer.write(1).unwrap();
    assert!(format!("{writer:?}").contains("CompressedVectorWriter"));
    writer.close().unwrap();

    let mut out = vec![0f32; 1];
    let buffers = vec![SourceDestBuffer::f32s("cartesianX", &mut out)];
    let reader = file.reader(points, buffers).unwrap();
    assert!(format!("{reader:?}").contains("CompressedVectorReader"));
}

#[test]
fn test_strict_type_match_without_conversion() {
    let (_temp, path) = setup_temp_path();
    let mut file = ImageFile::create(&path).unwrap();
    let points = make_xyz_vector(&mut file);

    // Single-precision fields demand f32 memory when doConversion is off
    let mut x = vec![0f64; 2];
    let mut y = vec![0f64; 2];
    let mut z = vec![0f64; 2];
    let buffers = vec![
        SourceDestBuffer::f64s("cartesianX", &mut x),
        SourceDestBuffer::f64s("cartesianY", &mut y),
        SourceDestBuffer::f64s("cartesianZ", &mut z),
    ];
    let mut writer = file.writer(points, buffers).unwrap();
    let err = writer.write(2).unwrap_err();
    assert!(matches!(err, VoxError::TypeMismatch(_)));
}
