//! Pulling a single executable out of a release tarball.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether a payload looks like a gzip stream.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

/// Normalize an archive entry path into safe components.
///
/// Returns `None` if the path contains traversal (`..`) or absolute components.
pub fn normalize_archive_components(raw_path: &str) -> Option<Vec<String>> {
    let normalized = raw_path.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }
    let mut components = Vec::new();

    for part in normalized.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return None;
        }
        components.push(part.to_string());
    }

    Some(components)
}

fn open_entries(archive_path: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path).map_err(|error| AppError::io(error.to_string()))?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}

/// Locate the archive entry to extract: the file literally named `binary_name`,
/// otherwise the first regular file with an executable bit.
fn find_binary_entry(archive_path: &Path, binary_name: &str) -> Result<Option<PathBuf>> {
    let mut archive = open_entries(archive_path)?;
    let mut first_executable = None;

    for entry in archive
        .entries()
        .map_err(|error| AppError::io(error.to_string()))?
    {
        let entry = entry.map_err(|error| AppError::io(error.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry
            .path()
            .map_err(|error| AppError::io(error.to_string()))?
            .into_owned();
        let Some(components) = entry_path.to_str().and_then(normalize_archive_components)
        else {
            return Err(AppError::io(format!(
                "archive contains unsafe entry path: {entry_path:?}"
            )));
        };

        if components.last().map(String::as_str) == Some(binary_name) {
            return Ok(Some(entry_path));
        }
        let executable = entry.header().mode().map(|m| m & 0o111 != 0).unwrap_or(false);
        if executable && first_executable.is_none() {
            first_executable = Some(entry_path);
        }
    }

    Ok(first_executable)
}

/// Extract the executable named `binary_name` from a tar.gz archive to `dest`.
pub fn extract_binary_from_tar_gz(archive_path: &Path, binary_name: &str, dest: &Path) -> Result<()> {
    let target = find_binary_entry(archive_path, binary_name)?
        .ok_or_else(|| AppError::io("在压缩包中未找到可执行文件"))?;

    let mut archive = open_entries(archive_path)?;
    for entry in archive
        .entries()
        .map_err(|error| AppError::io(error.to_string()))?
    {
        let mut entry = entry.map_err(|error| AppError::io(error.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|error| AppError::io(error.to_string()))?
            .into_owned();
        if entry_path != target {
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io(format!("failed to create directory {parent:?}: {e}")))?;
        }
        let mut outfile =
            fs::File::create(dest).map_err(|error| AppError::io(error.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|error| AppError::io(error.to_string()))?;
        return Ok(());
    }

    Err(AppError::io("在压缩包中未找到可执行文件"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tar_gz(path: &Path, entries: &[(&str, &[u8], u32)]) {
        let file = fs::File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn detects_gzip_magic() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(b"#!/bin/bash"));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn rejects_traversal_components() {
        assert_eq!(
            normalize_archive_components("./pkg//fisco-bcos"),
            Some(vec!["pkg".to_string(), "fisco-bcos".to_string()])
        );
        assert_eq!(normalize_archive_components("../etc/passwd"), None);
        assert_eq!(normalize_archive_components("/etc/passwd"), None);
    }

    #[test]
    fn extracts_named_binary_before_other_executables() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("release.tar.gz");
        build_tar_gz(
            &archive,
            &[
                ("pkg/helper", b"helper", 0o755),
                ("pkg/fisco-bcos", b"real-binary", 0o755),
            ],
        );

        let dest = dir.path().join("out").join("fisco-bcos");
        extract_binary_from_tar_gz(&archive, "fisco-bcos", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"real-binary");
    }

    #[test]
    fn falls_back_to_first_executable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("release.tar.gz");
        build_tar_gz(
            &archive,
            &[("README", b"docs", 0o644), ("bcos", b"exe", 0o755)],
        );

        let dest = dir.path().join("fisco-bcos");
        extract_binary_from_tar_gz(&archive, "fisco-bcos", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"exe");
    }

    #[test]
    fn archive_without_executables_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("release.tar.gz");
        build_tar_gz(&archive, &[("README", b"docs", 0o644)]);

        let err = extract_binary_from_tar_gz(&archive, "fisco-bcos", &dir.path().join("x"))
            .unwrap_err();
        assert!(err.to_string().contains("未找到可执行文件"));
    }
}
