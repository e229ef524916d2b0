use std::fs;

use file_guard::{
    AeadAlg, CipherOptions, DerivedKey, GuardError, KEY_LEN, decrypt_bytes, decrypt_file,
    encrypt_bytes, encrypt_file,
};
use tempfile::tempdir;

fn key() -> DerivedKey {
    DerivedKey::from_bytes([0x42; KEY_LEN])
}

/// Flip one byte in the ciphertext body and expect an authentication failure.
#[test]
fn tamper_ciphertext_fails() {
    for alg in [AeadAlg::XChaCha20Poly1305, AeadAlg::Aes256GcmSiv] {
        let mut ct = encrypt_bytes(b"message to protect", &key(), alg).unwrap();
        if let Some(last) = ct.last_mut() {
            *last ^= 0x01;
        }
        assert!(matches!(
            decrypt_bytes(&ct, &key()),
            Err(GuardError::NotAuthenticated)
        ));
    }
}

/// Corrupt the length prefix and magic; expect a parse or authentication error.
#[test]
fn tamper_header_fails() {
    let mut ct = encrypt_bytes(b"header tamper", &key(), AeadAlg::Aes256GcmSiv).unwrap();
    for b in ct.iter_mut().take(4) {
        *b ^= 0xFF;
    }
    assert!(decrypt_bytes(&ct, &key()).is_err(), "tampered header should fail");

    let mut ct = encrypt_bytes(b"header tamper", &key(), AeadAlg::Aes256GcmSiv).unwrap();
    ct[5] ^= 0x20; // inside the CBOR header
    assert!(decrypt_bytes(&ct, &key()).is_err());
}

#[test]
fn truncated_artifacts_fail() {
    let ct = encrypt_bytes(b"some plaintext bytes", &key(), AeadAlg::default()).unwrap();
    for cut in [1, 8, 16, ct.len() - 2] {
        let short = &ct[..ct.len() - cut];
        assert!(decrypt_bytes(short, &key()).is_err(), "cut={cut}");
    }
    assert!(decrypt_bytes(&[], &key()).is_err());
}

/// A chunk-framed artifact on disk: dropping its tail must not yield a shorter plaintext.
#[test]
fn truncated_stream_file_is_rejected_and_kept() {
    for alg in [AeadAlg::XChaCha20Poly1305, AeadAlg::Aes256GcmSiv] {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("big.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&plain, &data).unwrap();
        let opts = CipherOptions::default()
            .with_alg(alg)
            .with_stream_threshold(1024, 4096);

        let artifact = encrypt_file(&plain, &key(), &opts).unwrap();
        let full = fs::read(&artifact).unwrap();
        // drop the whole final frame (flag + length + at most chunk+tag bytes)
        let final_frame_len = 1 + 4 + (100_000 % 4096) + 16;
        fs::write(&artifact, &full[..full.len() - final_frame_len]).unwrap();

        let res = decrypt_file(&artifact, &key(), &opts);
        assert!(matches!(res, Err(GuardError::NotAuthenticated)), "{res:?}");
        assert!(artifact.exists());
        assert!(!plain.exists());
    }
}

#[test]
fn appended_bytes_are_rejected() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("x.bin");
    fs::write(&plain, vec![9u8; 10_000]).unwrap();
    let opts = CipherOptions::default().with_stream_threshold(1024, 4096);
    let artifact = encrypt_file(&plain, &key(), &opts).unwrap();

    let mut bytes = fs::read(&artifact).unwrap();
    bytes.extend_from_slice(&[0, 0, 0, 0, 0]);
    fs::write(&artifact, &bytes).unwrap();
    assert!(decrypt_file(&artifact, &key(), &opts).is_err());
}
