//! Ice files: zipped, encrypted bundles of local secret files.

use chrono::{DateTime, TimeZone};
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::{ArchiveError, Result};

/// Default ice file name prefix.
pub const DEFAULT_ICE_PREFIX: &str = "aomi";

/// Encrypts and decrypts ice files.
pub trait Encryptor: Send + Sync {
    /// Encrypts `data` for the given recipients.
    ///
    /// # Errors
    ///
    /// Returns an encryption error if the collaborator fails.
    fn encrypt(&self, data: &[u8], keys: &[String]) -> Result<Vec<u8>>;

    /// Decrypts `data`.
    ///
    /// # Errors
    ///
    /// Returns an encryption error if the collaborator fails.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Leaves data as is. Used for tests and unencrypted transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEncryptor;

impl Encryptor for PassthroughEncryptor {
    fn encrypt(&self, data: &[u8], _keys: &[String]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Shells out to `gpg`.
#[derive(Debug, Clone)]
pub struct GpgEncryptor {
    binary: String,
}

impl Default for GpgEncryptor {
    fn default() -> Self {
        Self {
            binary: String::from("gpg"),
        }
    }
}

impl GpgEncryptor {
    /// Uses a specific gpg binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[String], input: &[u8]) -> Result<Vec<u8>> {
        let encryption = |message: String| ArchiveError::Encryption { message };

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| encryption(format!("unable to run {}: {e}", self.binary)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| encryption(String::from("gpg stdin unavailable")))?;
        let input = input.to_vec();
        let writer = thread::spawn(move || stdin.write_all(&input));

        let output = child
            .wait_with_output()
            .map_err(|e| encryption(e.to_string()))?;
        writer
            .join()
            .map_err(|_| encryption(String::from("gpg writer panicked")))?
            .map_err(|e| encryption(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(encryption(stderr.trim().to_string()).into());
        }
        Ok(output.stdout)
    }
}

impl Encryptor for GpgEncryptor {
    fn encrypt(&self, data: &[u8], keys: &[String]) -> Result<Vec<u8>> {
        if keys.is_empty() {
            return Err(ArchiveError::Encryption {
                message: String::from("no pgp_keys declared"),
            }
            .into());
        }

        let mut args: Vec<String> = ["--batch", "--yes", "--trust-model", "always", "--encrypt"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        for key in keys {
            args.push(String::from("--recipient"));
            args.push(key.clone());
        }
        self.run(&args, data)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let args = vec![String::from("--batch"), String::from("--decrypt")];
        self.run(&args, data)
    }
}

/// Names an ice file: `{prefix}-{handle}-{HHMMSS-MM-DD-YYYY}.ice`.
#[must_use]
pub fn ice_file_name<Tz: TimeZone>(prefix: &str, handle: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{prefix}-{handle}-{}.ice", at.format("%H%M%S-%m-%d-%Y"))
}

fn zip_error(e: zip::result::ZipError) -> ArchiveError {
    ArchiveError::ice(e.to_string())
}

/// Zips named files into memory.
///
/// # Errors
///
/// Returns an ice file error if the archive cannot be written.
pub fn build_archive(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().unix_permissions(0o600);

    for (name, data) in files {
        writer.start_file(name.as_str(), options).map_err(zip_error)?;
        writer.write_all(data)?;
    }

    Ok(writer.finish().map_err(zip_error)?.into_inner())
}

/// Extracts an archive into `dest`, restricting every file to its owner.
///
/// Members that would land outside `dest` are skipped.
///
/// # Errors
///
/// Returns an ice file error for a corrupt archive.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
    let mut extracted = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut member = archive.by_index(index).map_err(zip_error)?;
        let Some(relative) = member.enclosed_name() else {
            debug!("Skipping unsafe archive member {}", member.name());
            continue;
        };
        let target = dest.join(relative);

        if member.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut data = Vec::new();
        member.read_to_end(&mut data)?;
        fs::write(&target, data)?;
        restrict(&target)?;
        extracted.push(target);
    }

    Ok(extracted)
}

/// Makes a file readable and writable by its owner only.
///
/// # Errors
///
/// Returns an IO error if permissions cannot be changed.
pub fn restrict(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_ice_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(ice_file_name("aomi", "ops", &at), "aomi-ops-140507-03-09-2024.ice");
    }

    #[test]
    fn test_archive_round_trip_restricts_files() {
        let bytes = build_archive(&[
            (String::from("db.yml"), b"user: a\n".to_vec()),
            (String::from("tls/key.pem"), vec![0xff, 0x00]),
        ])
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let extracted = extract_archive(&bytes, dir.path()).unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(fs::read(dir.path().join("tls/key.pem")).unwrap(), vec![0xff, 0x00]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("db.yml")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_archive(b"not a zip", dir.path()).is_err());
    }

    #[test]
    fn test_gpg_requires_recipients() {
        assert!(GpgEncryptor::default().encrypt(b"x", &[]).is_err());
    }
}
