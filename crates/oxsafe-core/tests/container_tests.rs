//! End-to-end tests of the container codecs through the dispatcher.
//!
//! Covers version probing, password checks across generations, the
//! commit-on-close write policy and the damaged-file error taxonomy.

mod common;

use std::io::Cursor;

use common::{init_tracing, open_database, passkey, read_all, seeded_rng, write_database};
use oxsafe_core::crypto::{BlockCipher, BlowfishCipher, TwofishCipher};
use oxsafe_core::format::field::{FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_USER};
use oxsafe_core::format::{HeaderRecord, PwsFileError, read_version};
use oxsafe_core::fs::{CancelToken, CbcReader, CbcWriter, ReadOutcome, TruncationPolicy};
use oxsafe_core::{EngineConfig, FileVersion, RwMode, check_password, make_pws_file};
use proptest::prelude::*;
use secrecy::SecretString;
use tempfile::TempDir;

const MAIL: &[(u8, &[u8])] = &[
    (FIELD_TITLE, b"mail"),
    (FIELD_USER, b"alice"),
    (FIELD_PASSWORD, b"correct horse battery staple"),
];
const BANK: &[(u8, &[u8])] = &[(FIELD_TITLE, b"bank"), (FIELD_PASSWORD, b"1234")];

fn fields_of(records: &[&[(u8, &[u8])]]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    for record in records {
        out.extend(record.iter().map(|(t, d)| (*t, d.to_vec())));
        out.push((0xff, Vec::new()));
    }
    out
}

// =============================================================================
// Round trips per generation
// =============================================================================

#[test]
fn test_v3_round_trip_with_header() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");

    let mut header = HeaderRecord::new_v3();
    header.db_name = "Household".to_string();
    header.db_desc = "Shared accounts".to_string();
    header.prefs = "B 24 1 ".to_string();
    write_database(&path, FileVersion::V30, header, &[MAIL, BANK]);

    assert_eq!(read_version(&path).unwrap(), FileVersion::V30);

    let mut file = open_database(&path);
    assert_eq!(file.version(), FileVersion::V30);
    assert_eq!(read_all(file.as_mut()), fields_of(&[MAIL, BANK]));

    let header = file.header();
    assert_eq!(header.db_name, "Household");
    assert_eq!(header.db_desc, "Shared accounts");
    assert_eq!(header.prefs, "B 24 1 ");
    assert!(header.when_last_saved > 0);
    assert!(header.what_last_saved.starts_with("oxsafe V"));
    assert_ne!(header.file_uuid, [0u8; 16]);
    file.close().unwrap();
}

#[test]
fn test_legacy20_round_trip_hides_magic_record() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.dat");

    let header = HeaderRecord {
        prefs: "B 24 1".to_string(),
        ..HeaderRecord::default()
    };
    write_database(&path, FileVersion::Legacy20, header, &[MAIL]);

    assert_eq!(read_version(&path).unwrap(), FileVersion::Legacy20);

    let mut file = open_database(&path);
    assert_eq!(file.version(), FileVersion::Legacy20);
    assert_eq!(file.header().prefs, "B 24 1");
    assert_eq!(read_all(file.as_mut()), fields_of(&[MAIL]));
}

#[test]
fn test_legacy17_is_detected_after_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.dat");
    let record: &[(u8, &[u8])] = &[(FIELD_TITLE, b"old"), (FIELD_NOTES, b"from 1999")];
    write_database(&path, FileVersion::Legacy17, HeaderRecord::default(), &[record]);

    // Detection cannot tell 1.7 from 2.0 before decryption
    assert_eq!(read_version(&path).unwrap(), FileVersion::Legacy20);

    let mut file = open_database(&path);
    assert_eq!(file.version(), FileVersion::Legacy17);
    assert_eq!(read_all(file.as_mut()), fields_of(&[record]));
}

#[test]
fn test_unknown_hint_writes_v3() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new.psafe3");
    let (_, version) = make_pws_file(
        &path,
        FileVersion::Unknown,
        RwMode::Write,
        &EngineConfig::default(),
        seeded_rng(3),
    )
    .unwrap();
    assert_eq!(version, FileVersion::V30);
}

#[test]
fn test_unknown_fields_are_counted_per_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    let odd: &[(u8, &[u8])] = &[(FIELD_TITLE, b"odd"), (0x40, b"future"), (0x41, b"more")];
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL, odd, BANK]);

    let mut file = open_database(&path);
    let fields = read_all(file.as_mut());
    assert!(fields.contains(&(0x40, b"future".to_vec())));
    assert_eq!(file.records_with_unknown_fields(), 1);
}

// =============================================================================
// Passwords
// =============================================================================

#[test]
fn test_check_password_reports_version() {
    let dir = TempDir::new().unwrap();
    let v3 = dir.path().join("db.psafe3");
    let legacy = dir.path().join("db.dat");
    write_database(&v3, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL]);
    write_database(&legacy, FileVersion::Legacy20, HeaderRecord::default(), &[MAIL]);

    assert_eq!(check_password(&v3, &passkey()).unwrap(), FileVersion::V30);
    assert_eq!(check_password(&legacy, &passkey()).unwrap(), FileVersion::Legacy20);
}

#[test]
fn test_wrong_password_is_not_a_format_error() {
    let dir = TempDir::new().unwrap();
    let v3 = dir.path().join("db.psafe3");
    let legacy = dir.path().join("db.dat");
    write_database(&v3, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL]);
    write_database(&legacy, FileVersion::Legacy20, HeaderRecord::default(), &[MAIL]);

    let wrong = SecretString::from("Tr0ub4dor&3".to_string());
    for path in [&v3, &legacy] {
        let err = check_password(path, &wrong).unwrap_err();
        assert!(err.is_wrong_password(), "{}: {err}", path.display());

        let (mut file, _) = make_pws_file(
            path,
            FileVersion::Unknown,
            RwMode::Read,
            &EngineConfig::default(),
            seeded_rng(4),
        )
        .unwrap();
        assert!(file.open(&wrong).unwrap_err().is_wrong_password());
    }
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nothing.psafe3");
    let result = make_pws_file(
        &path,
        FileVersion::Unknown,
        RwMode::Read,
        &EngineConfig::default(),
        seeded_rng(5),
    );
    assert!(matches!(result, Err(PwsFileError::FileNotFound { .. })));
}

// =============================================================================
// Write policy
// =============================================================================

#[test]
fn test_unclosed_writer_leaves_original() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL]);
    let before = std::fs::read(&path).unwrap();

    {
        let (mut file, _) = make_pws_file(
            &path,
            FileVersion::V30,
            RwMode::Write,
            &EngineConfig::default(),
            seeded_rng(6),
        )
        .unwrap();
        file.open(&passkey()).unwrap();
        file.write_field(FIELD_TITLE, b"half written").unwrap();
        // dropped without close
    }

    assert_eq!(std::fs::read(&path).unwrap(), before);
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1, "temporary file must not survive");
}

#[test]
fn test_close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL]);

    let mut file = open_database(&path);
    file.close().unwrap();
    file.close().unwrap();
    assert!(matches!(file.read_field(), Err(PwsFileError::NotOpen)));
}

// =============================================================================
// Damaged files and cancellation
// =============================================================================

#[test]
fn test_flipped_hmac_is_integrity_violation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL, BANK]);

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let mut file = open_database(&path);
    let err = loop {
        match file.read_field() {
            Ok(Some(_)) => {}
            Ok(None) => panic!("tampered file read cleanly"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, PwsFileError::IntegrityViolation { .. }), "{err}");
}

#[test]
fn test_cut_file_is_corrupt_not_end_of_stream() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL, BANK]);

    let bytes = std::fs::read(&path).unwrap();
    // Drop the EOF marker and HMAC, plus a few bytes of the last block
    std::fs::write(&path, &bytes[..bytes.len() - 48 - 5]).unwrap();

    let mut file = open_database(&path);
    let err = loop {
        match file.read_field() {
            Ok(Some(_)) => {}
            Ok(None) => panic!("cut file read cleanly"),
            Err(e) => break e,
        }
    };
    assert!(err.is_corrupt(), "{err}");
}

#[test]
fn test_cancel_between_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL, BANK]);

    let token = CancelToken::new();
    let mut file = open_database(&path);
    file.set_cancel_token(Some(token.clone()));
    assert!(file.read_field().unwrap().is_some());

    token.cancel();
    assert!(matches!(file.read_field(), Err(PwsFileError::Cancelled)));
}

#[test]
fn test_read_field_into_small_buffer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.psafe3");
    write_database(&path, FileVersion::V30, HeaderRecord::new_v3(), &[MAIL]);

    let mut file = open_database(&path);
    assert_eq!(file.truncation_policy(), TruncationPolicy::Reject);
    let mut buf = [0u8; 2];
    assert!(matches!(
        file.read_field_into(&mut buf),
        Err(PwsFileError::BufferTooSmall {
            needed: 4,
            available: 2
        })
    ));

    let mut file = open_database(&path);
    file.set_truncation_policy(TruncationPolicy::Truncate);
    let (field_type, copied) = file.read_field_into(&mut buf).unwrap().unwrap();
    assert_eq!((field_type, copied), (FIELD_TITLE, 2));
    assert_eq!(&buf, b"ma");
}

#[test]
fn test_truncating_config_applies_to_read_field_into() {
    let dir = TempDir::new().unwrap();
    for (name, version, header) in [
        ("db.psafe3", FileVersion::V30, HeaderRecord::new_v3()),
        ("db.dat", FileVersion::Legacy20, HeaderRecord::default()),
    ] {
        let path = dir.path().join(name);
        write_database(&path, version, header, &[BANK]);

        let config = EngineConfig {
            truncate_oversized_reads: true,
            ..EngineConfig::default()
        };
        let (mut file, _) =
            make_pws_file(&path, FileVersion::Unknown, RwMode::Read, &config, seeded_rng(9)).unwrap();
        file.open(&passkey()).unwrap();

        let mut buf = [0u8; 3];
        let (field_type, copied) = file.read_field_into(&mut buf).unwrap().unwrap();
        assert_eq!((field_type, copied), (FIELD_TITLE, 3), "{version}");
        assert_eq!(&buf, b"ban");

        let mut file = open_database(&path);
        assert!(
            matches!(
                file.read_field_into(&mut buf),
                Err(PwsFileError::BufferTooSmall { needed: 4, available: 3 })
            ),
            "{version}"
        );
    }
}

// =============================================================================
// CBC block stream
// =============================================================================

fn cbc_round_trip(
    make_cipher: impl Fn() -> Box<dyn BlockCipher>,
    blocks: &[(u8, Vec<u8>)],
) -> Vec<(u8, Vec<u8>)> {
    let iv = vec![0x5a; make_cipher().block_size()];
    let mut writer = CbcWriter::new(Vec::new(), make_cipher(), &iv, seeded_rng(7));
    for (block_type, data) in blocks {
        writer.write_block(*block_type, data).unwrap();
    }
    let bytes = writer.into_inner();
    let len = bytes.len() as u64;

    let mut reader = CbcReader::new(Cursor::new(bytes), make_cipher(), &iv, 0, Some(len));
    let mut out = Vec::new();
    while let ReadOutcome::Block(block) = reader.read_block().unwrap() {
        out.push((block.block_type, block.data.to_vec()));
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_twofish_blocks_round_trip(
        blocks in prop::collection::vec((any::<u8>(), prop::collection::vec(any::<u8>(), 0..80)), 0..6)
    ) {
        let out = cbc_round_trip(
            || -> Box<dyn BlockCipher> { Box::new(TwofishCipher::new(&[0x11; 32]).unwrap()) },
            &blocks,
        );
        prop_assert_eq!(out, blocks);
    }

    #[test]
    fn prop_blowfish_blocks_round_trip(
        blocks in prop::collection::vec((any::<u8>(), prop::collection::vec(any::<u8>(), 0..40)), 0..6)
    ) {
        let out = cbc_round_trip(
            || -> Box<dyn BlockCipher> { Box::new(BlowfishCipher::new(&[0x22; 20]).unwrap()) },
            &blocks,
        );
        prop_assert_eq!(out, blocks);
    }
}
