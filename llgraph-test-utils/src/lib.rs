//! Shared helpers for llgraph test suites.

use std::io::Write;
use std::sync::{Arc, Once};

use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tempfile::NamedTempFile;

static INIT: Once = Once::new();

/// Initialize tracing for test binaries. Safe to call multiple times.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let env = std::env::var("RUST_LOG").ok();
        let filter = match env {
            Some(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            None => EnvFilter::new("info"),
        };
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Build a batch from named columns; every field is nullable.
pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).expect("valid test batch")
}

/// `0..n` keys in a deterministic shuffled order, with every key in
/// `duplicates` appended once more at a random position.
pub fn shuffled_keys(n: i64, duplicates: &[i64], seed: u64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keys: Vec<i64> = (0..n).collect();
    keys.extend_from_slice(duplicates);
    keys.shuffle(&mut rng);
    keys
}

/// Write `contents` to a temporary `.csv` file that lives as long as the
/// returned handle.
pub fn csv_fixture(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .expect("create csv fixture");
    file.write_all(contents.as_bytes())
        .expect("write csv fixture");
    file.flush().expect("flush csv fixture");
    file
}
