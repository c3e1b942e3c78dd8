#![allow(dead_code)] // Each test binary uses a different subset

use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use oxsafe_core::crypto::RandomSource;
use oxsafe_core::format::field::FIELD_END;
use oxsafe_core::format::HeaderRecord;
use oxsafe_core::{EngineConfig, FileVersion, RwMode, VersionedFile, make_pws_file};
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use secrecy::SecretString;

pub const TEST_PASSPHRASE: &str = "test-passphrase-12345";

pub fn passkey() -> SecretString {
    SecretString::from(TEST_PASSPHRASE.to_string())
}

/// Deterministic randomness so failures reproduce
pub fn seeded_rng(seed: u64) -> Arc<dyn RandomSource> {
    Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed)))
}

/// Install a test-friendly subscriber once; honours RUST_LOG
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub type Record<'a> = &'a [(u8, &'a [u8])];

/// Write `records` to `path` in the given format and commit it.
pub fn write_database(path: &Path, version: FileVersion, header: HeaderRecord, records: &[Record<'_>]) {
    let (mut file, _) = make_pws_file(
        path,
        version,
        RwMode::Write,
        &EngineConfig::default(),
        seeded_rng(1),
    )
    .unwrap();
    file.set_header(header);
    file.open(&passkey()).unwrap();
    for record in records {
        for (field_type, data) in *record {
            file.write_field(*field_type, data).unwrap();
        }
        file.write_field(FIELD_END, &[]).unwrap();
    }
    file.close().unwrap();
}

/// Open `path` for reading with version probing.
pub fn open_database(path: &Path) -> Box<dyn VersionedFile> {
    let (mut file, _) = make_pws_file(
        path,
        FileVersion::Unknown,
        RwMode::Read,
        &EngineConfig::default(),
        seeded_rng(2),
    )
    .unwrap();
    file.open(&passkey()).unwrap();
    file
}

/// Every field up to end of stream, as (type, bytes).
pub fn read_all(file: &mut dyn VersionedFile) -> Vec<(u8, Vec<u8>)> {
    let mut fields = Vec::new();
    while let Some(field) = file.read_field().unwrap() {
        fields.push((field.field_type, field.data.to_vec()));
    }
    fields
}
