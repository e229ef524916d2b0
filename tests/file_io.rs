//! File transform roundtrips for both algorithms, single-shot and chunk-framed.

use std::fs;
use std::path::Path;

use file_guard::{
    AeadAlg, CipherOptions, DerivedKey, GuardError, KEY_LEN, decrypt_file, encrypt_file,
};
use tempfile::tempdir;

const KIB: usize = 1024;
const ALGS: [AeadAlg; 2] = [AeadAlg::XChaCha20Poly1305, AeadAlg::Aes256GcmSiv];

fn key(b: u8) -> DerivedKey {
    DerivedKey::from_bytes([b; KEY_LEN])
}

fn write_blob(path: &Path, len: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..len)
        .map(|i| (i as u32).wrapping_mul(1664525).wrapping_add(1013904223) as u8)
        .collect();
    fs::write(path, &data).unwrap();
    data
}

/// Anything above 64 KiB is streamed in 16 KiB frames.
fn small_stream_opts(alg: AeadAlg) -> CipherOptions {
    CipherOptions::default()
        .with_alg(alg)
        .with_stream_threshold(64 * KIB as u64, 16 * KIB)
}

fn roundtrip(len: usize, opts: &CipherOptions) {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("in.bin");
    let data = write_blob(&plain, len);

    let artifact = encrypt_file(&plain, &key(7), opts).unwrap();
    assert_eq!(artifact, dir.path().join("in.bin.enc"));
    assert!(!plain.exists(), "source must be removed after encryption");
    assert_ne!(fs::read(&artifact).unwrap(), data);

    let back = decrypt_file(&artifact, &key(7), opts).unwrap();
    assert_eq!(back, plain);
    assert!(!artifact.exists(), "artifact must be removed after decryption");
    assert_eq!(fs::read(&back).unwrap(), data, "len={len} alg={:?}", opts.alg);
}

#[test]
fn empty_small_and_streamed_files_roundtrip_both_algs() {
    for alg in ALGS {
        let opts = small_stream_opts(alg);
        roundtrip(0, &opts);
        roundtrip(11, &opts);
        roundtrip(64 * KIB, &opts); // at the threshold: single-shot
        roundtrip(64 * KIB + 1, &opts); // just above: streamed
        roundtrip(300 * KIB + 5, &opts);
    }
}

#[test]
fn default_options_roundtrip() {
    roundtrip(4 * KIB, &CipherOptions::default());
}

#[test]
fn wrong_key_leaves_artifact_and_writes_nothing() {
    for alg in ALGS {
        for len in [100, 200 * KIB] {
            let dir = tempdir().unwrap();
            let plain = dir.path().join("secret.txt");
            write_blob(&plain, len);
            let opts = small_stream_opts(alg);
            let artifact = encrypt_file(&plain, &key(1), &opts).unwrap();
            let before = fs::read(&artifact).unwrap();

            let res = decrypt_file(&artifact, &key(2), &opts);
            assert!(matches!(res, Err(GuardError::NotAuthenticated)), "{res:?}");
            assert!(!plain.exists());
            assert_eq!(fs::read(&artifact).unwrap(), before);
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1, "no temp files left");
        }
    }
}

#[test]
fn missing_source_is_not_found() {
    let dir = tempdir().unwrap();
    let res = encrypt_file(&dir.path().join("nope"), &key(1), &CipherOptions::default());
    assert!(matches!(res, Err(GuardError::NotFound(_))));
}

#[test]
fn existing_artifact_is_never_clobbered() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("a.txt");
    fs::write(&plain, b"new").unwrap();
    fs::write(dir.path().join("a.txt.enc"), b"old artifact").unwrap();

    let res = encrypt_file(&plain, &key(1), &CipherOptions::default());
    assert!(matches!(res, Err(GuardError::DestinationExists(_))));
    assert_eq!(fs::read(&plain).unwrap(), b"new");
    assert_eq!(fs::read(dir.path().join("a.txt.enc")).unwrap(), b"old artifact");
}

#[test]
fn decrypt_requires_the_suffix() {
    let dir = tempdir().unwrap();
    let not_ours = dir.path().join("report.pdf");
    fs::write(&not_ours, b"whatever").unwrap();
    let res = decrypt_file(&not_ours, &key(1), &CipherOptions::default());
    assert!(matches!(res, Err(GuardError::Invalid(_))));
    assert!(not_ours.exists());
}

#[test]
fn custom_suffix_is_honored() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("notes.md");
    fs::write(&plain, b"# notes").unwrap();
    let opts = CipherOptions {
        encrypted_suffix: "locked".into(),
        ..Default::default()
    };
    let artifact = encrypt_file(&plain, &key(3), &opts).unwrap();
    assert_eq!(artifact, dir.path().join("notes.md.locked"));
    decrypt_file(&artifact, &key(3), &opts).unwrap();
    assert_eq!(fs::read(&plain).unwrap(), b"# notes");
}
