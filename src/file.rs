//! File transform engine: authenticated encryption with atomic file replacement.
//!
//! Every transform writes into a temporary file in the destination directory,
//! syncs it, and renames it into place without clobbering. Only after the rename
//! succeeded is the source removed. A failure at any earlier point drops the
//! temporary file, so the source stays untouched and no output appears.

use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::crypto::{aead_decrypt, aead_encrypt, generate_nonce};
use crate::format::{ArtifactHeader, read_header, write_header};
use crate::streaming::{decrypt_stream, encrypt_stream};
use crate::types::{AeadAlg, CipherOptions, DerivedKey, GuardError, KdfParams, Result};

/// Path of the artifact for `plain`: the suffix is appended to the full file name.
///
/// `notes.txt` with suffix `enc` becomes `notes.txt.enc`.
pub fn encrypted_path(plain: &Path, suffix: &str) -> PathBuf {
    let mut name = plain
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    plain.with_file_name(name)
}

/// Inverse of [`encrypted_path`]. Fails unless `artifact` carries the suffix.
pub fn decrypted_path(artifact: &Path, suffix: &str) -> Result<PathBuf> {
    let name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(GuardError::Invalid("artifact path has no UTF-8 file name"))?;
    let stripped = name
        .strip_suffix(suffix)
        .and_then(|s| s.strip_suffix('.'))
        .filter(|s| !s.is_empty())
        .ok_or(GuardError::Invalid("artifact name lacks the encrypted suffix"))?;
    Ok(artifact.with_file_name(stripped))
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

pub(crate) fn new_temp_beside(path: &Path) -> Result<NamedTempFile> {
    let parent = parent_dir(path);
    NamedTempFile::new_in(parent).map_err(|e| GuardError::io_at(e, parent))
}

pub(crate) fn sync_temp(tmp: &mut NamedTempFile) -> Result<()> {
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    Ok(())
}

/// Atomically write `data` to `path`, replacing any previous content.
///
/// With `mode_600` the file is created owner-read/write only (Unix).
pub fn write_all_atomic(path: &Path, data: &[u8], mode_600: bool) -> Result<()> {
    fs::create_dir_all(parent_dir(path))?;
    let mut tmp = new_temp_beside(path)?;
    if mode_600 {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
    }
    tmp.write_all(data)?;
    sync_temp(&mut tmp)?;
    tmp.persist(path).map_err(|e| GuardError::io_at(e.error, path))?;
    Ok(())
}

/// Copy `src` to `dest` through a temporary file. Returns the number of bytes copied.
///
/// With `overwrite == false` an existing `dest` yields `GuardError::DestinationExists`.
pub fn copy_atomic(src: &Path, dest: &Path, overwrite: bool) -> Result<u64> {
    let mut input = File::open(src).map_err(|e| GuardError::io_at(e, src))?;
    let mut tmp = new_temp_beside(dest)?;
    let copied = io::copy(&mut input, tmp.as_file_mut())?;
    sync_temp(&mut tmp)?;
    persist(tmp, dest, overwrite)?;
    Ok(copied)
}

fn persist(tmp: NamedTempFile, dest: &Path, overwrite: bool) -> Result<()> {
    let res = if overwrite {
        tmp.persist(dest).map(drop)
    } else {
        tmp.persist_noclobber(dest).map(drop)
    };
    res.map_err(|e| match e.error.kind() {
        io::ErrorKind::AlreadyExists => GuardError::DestinationExists(dest.to_path_buf()),
        _ => GuardError::io_at(e.error, dest),
    })
}

/// Produce `dest` from `src` via `write`, then remove `src`.
///
/// Post-states: either `src` alone exists (any failure), or `dest` alone exists.
pub(crate) fn replace_with<F>(src: &Path, dest: &Path, write: F) -> Result<PathBuf>
where
    F: FnOnce(&mut NamedTempFile) -> Result<()>,
{
    if dest.exists() {
        return Err(GuardError::DestinationExists(dest.to_path_buf()));
    }
    let mut tmp = new_temp_beside(dest)?;
    write(&mut tmp)?;
    sync_temp(&mut tmp)?;
    persist(tmp, dest, false)?;

    match fs::remove_file(src) {
        Ok(()) => Ok(dest.to_path_buf()),
        // already gone: dest is the only copy, keep it
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(dest.to_path_buf()),
        Err(e) => {
            let _ = fs::remove_file(dest);
            Err(GuardError::io_at(e, src))
        }
    }
}

fn require_file(path: &Path) -> Result<fs::Metadata> {
    let meta = fs::metadata(path).map_err(|e| GuardError::io_at(e, path))?;
    if !meta.is_file() {
        return Err(GuardError::NotFound(path.to_path_buf()));
    }
    Ok(meta)
}

/// Encrypt `plaintext` into a complete single-shot artifact held in memory.
pub fn encrypt_bytes(plaintext: &[u8], key: &DerivedKey, alg: AeadAlg) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(plaintext.len() + 128);
    encrypt_single(plaintext, &mut out, key, alg, None)?;
    Ok(out)
}

/// Decrypt an in-memory artifact (single-shot or chunk-framed).
pub fn decrypt_bytes(data: &[u8], key: &DerivedKey) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    decrypt_to(Cursor::new(data), &mut out, key)?;
    Ok(out)
}

fn encrypt_single<W: Write>(
    plaintext: &[u8],
    mut w: W,
    key: &DerivedKey,
    alg: AeadAlg,
    kdf: Option<KdfParams>,
) -> Result<()> {
    let header = ArtifactHeader::new_single(alg, generate_nonce(alg)?, plaintext.len() as u64)
        .with_kdf(kdf);
    let aad = write_header(&mut w, &header)?;
    let ct = aead_encrypt(alg, key, &header.nonce, plaintext, &aad)?;
    w.write_all(&ct)?;
    Ok(())
}

/// Decrypt an artifact from `r` into `w`. Returns the plaintext length.
pub(crate) fn decrypt_to<R: Read, W: Write>(mut r: R, mut w: W, key: &DerivedKey) -> Result<u64> {
    let (header, aad) = read_header(&mut r)?;
    let alg = header.alg()?;
    if let Some(info) = &header.stream {
        return decrypt_stream(r, w, key, alg, info, &aad, header.plain_len);
    }
    let mut body = Vec::new();
    r.read_to_end(&mut body)?;
    let pt = Zeroizing::new(aead_decrypt(alg, key, &header.nonce, &body, &aad)?);
    if pt.len() as u64 != header.plain_len {
        return Err(GuardError::Malformed("plaintext length disagrees with header"));
    }
    w.write_all(&pt)?;
    Ok(pt.len() as u64)
}

/// Encrypt `path` into `path + "." + suffix`, then remove `path`.
///
/// Sources larger than `opts.stream_threshold` are encrypted in constant memory
/// with chunked framing.
///
/// # Errors
///
/// - `NotFound` if the source is missing or not a regular file
/// - `DestinationExists` if the artifact path is already taken
/// - `Io` / `PermissionDenied` for environment failures; the source is left intact
pub fn encrypt_file(path: &Path, key: &DerivedKey, opts: &CipherOptions) -> Result<PathBuf> {
    encrypt_file_with_kdf(path, key, opts, None)
}

/// [`encrypt_file`], recording in the header the KDF settings `key` was derived
/// with so that it can be re-derived after the configuration changed.
pub fn encrypt_file_with_kdf(
    path: &Path,
    key: &DerivedKey,
    opts: &CipherOptions,
    kdf: Option<KdfParams>,
) -> Result<PathBuf> {
    let meta = require_file(path)?;
    let dest = encrypted_path(path, &opts.encrypted_suffix);
    let plain_len = meta.len();

    replace_with(path, &dest, |tmp| {
        if plain_len > opts.stream_threshold {
            let src = File::open(path).map_err(|e| GuardError::io_at(e, path))?;
            encrypt_stream(src, tmp, key, opts.alg, opts.chunk_size, plain_len, kdf)
        } else {
            let data = Zeroizing::new(fs::read(path).map_err(|e| GuardError::io_at(e, path))?);
            encrypt_single(&data, tmp, key, opts.alg, kdf)
        }
    })
}

/// Read the header of an artifact on disk. Nothing in it is authenticated yet.
pub fn read_artifact_header(path: &Path) -> Result<ArtifactHeader> {
    require_file(path)?;
    let src = BufReader::new(File::open(path).map_err(|e| GuardError::io_at(e, path))?);
    read_header(src).map(|(header, _)| header)
}

/// Decrypt `path` (which must end in the encrypted suffix) back to the plaintext
/// path, then remove the artifact.
///
/// # Errors
///
/// - `NotFound` if the artifact is missing
/// - `NotAuthenticated` for a wrong key or corrupted/truncated ciphertext; nothing
///   is written and the artifact stays in place
/// - `DestinationExists` if the plaintext path is already taken
pub fn decrypt_file(path: &Path, key: &DerivedKey, opts: &CipherOptions) -> Result<PathBuf> {
    require_file(path)?;
    let dest = decrypted_path(path, &opts.encrypted_suffix)?;

    replace_with(path, &dest, |tmp| {
        let src = BufReader::new(File::open(path).map_err(|e| GuardError::io_at(e, path))?);
        decrypt_to(src, tmp, key).map(drop)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KEY_LEN;
    use tempfile::tempdir;

    fn key(b: u8) -> DerivedKey {
        DerivedKey::from_bytes([b; KEY_LEN])
    }

    #[test]
    fn artifact_names() {
        let p = Path::new("/tmp/data/report.txt");
        let enc = encrypted_path(p, "enc");
        assert_eq!(enc, Path::new("/tmp/data/report.txt.enc"));
        assert_eq!(decrypted_path(&enc, "enc").unwrap(), p);
        assert_eq!(encrypted_path(Path::new("README"), "enc"), Path::new("README.enc"));
        assert!(decrypted_path(Path::new("report.txt"), "enc").is_err());
        assert!(decrypted_path(Path::new(".enc"), "enc").is_err());
        assert!(decrypted_path(Path::new("xenc"), "enc").is_err());
    }

    #[test]
    fn interrupted_write_leaves_source_and_no_output() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("plain.txt");
        let dest = dir.path().join("plain.txt.enc");
        fs::write(&src, b"keep me").unwrap();

        let res = replace_with(&src, &dest, |tmp| {
            tmp.write_all(b"half a ciphert")?;
            Err(GuardError::Io(io::Error::other("disk full")))
        });

        assert!(matches!(res, Err(GuardError::Io(_))));
        assert_eq!(fs::read(&src).unwrap(), b"keep me");
        assert!(!dest.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temporary file must be cleaned up");
    }

    #[test]
    fn existing_destination_is_refused() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"plain").unwrap();
        fs::write(dir.path().join("a.txt.enc"), b"older artifact").unwrap();

        let res = encrypt_file(&src, &key(1), &CipherOptions::default());
        assert!(matches!(res, Err(GuardError::DestinationExists(_))));
        assert_eq!(fs::read(&src).unwrap(), b"plain");
    }

    #[test]
    fn bytes_roundtrip_and_wrong_key() {
        for alg in [AeadAlg::XChaCha20Poly1305, AeadAlg::Aes256GcmSiv] {
            let ct = encrypt_bytes(b"hello world", &key(7), alg).unwrap();
            assert_eq!(decrypt_bytes(&ct, &key(7)).unwrap(), b"hello world");
            assert!(matches!(
                decrypt_bytes(&ct, &key(8)),
                Err(GuardError::NotAuthenticated)
            ));
        }
    }

    #[test]
    fn header_edit_fails_authentication() {
        let mut ct = encrypt_bytes(b"ten bytes!", &key(3), AeadAlg::default()).unwrap();
        let (header, raw) = read_header(Cursor::new(&ct)).unwrap();
        let mut forged = header.clone();
        forged.plain_len += 1;
        let forged_raw = forged.encode().unwrap();
        // same encoded length, so the body offset is unchanged
        assert_eq!(forged_raw.len(), raw.len());
        ct[4..4 + raw.len()].copy_from_slice(&forged_raw);
        assert!(matches!(
            decrypt_bytes(&ct, &key(3)),
            Err(GuardError::NotAuthenticated)
        ));
    }

    #[test]
    fn recorded_kdf_is_readable_before_decryption() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("k.txt");
        fs::write(&src, b"kdf").unwrap();
        let kdf = KdfParams {
            iterations: 200_000,
            ..Default::default()
        };
        let opts = CipherOptions::default();
        let artifact = encrypt_file_with_kdf(&src, &key(4), &opts, Some(kdf)).unwrap();
        assert_eq!(read_artifact_header(&artifact).unwrap().kdf, Some(kdf));

        let plain = decrypt_file(&artifact, &key(4), &opts).unwrap();
        let bare = encrypt_file(&plain, &key(4), &opts).unwrap();
        assert_eq!(read_artifact_header(&bare).unwrap().kdf, None);
    }

    #[test]
    fn copy_atomic_respects_overwrite_flag() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"new").unwrap();
        fs::write(&b, b"old").unwrap();
        assert!(matches!(
            copy_atomic(&a, &b, false),
            Err(GuardError::DestinationExists(_))
        ));
        assert_eq!(copy_atomic(&a, &b, true).unwrap(), 3);
        assert_eq!(fs::read(&b).unwrap(), b"new");
    }
}
