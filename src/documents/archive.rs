//! Archive Unpacker
//!
//! Walks a zip buffer and admits entries by a coarse size/count gate.
//! Per-file type support is decided later by the orchestrator.

use crate::config::{MAX_FILES, MAX_FILE_SIZE_BYTES};
use crate::error::ArchiveError;
use crate::pipeline::types::RawEntry;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Entries admitted from an archive plus notes on what was left out
#[derive(Debug, Default)]
pub struct UnpackedArchive {
    pub entries: Vec<RawEntry>,
    /// Human-readable reasons for entries skipped by size or count
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Unpacker {
    max_file_size: u64,
    max_files: usize,
}

impl Default for Unpacker {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE_BYTES, MAX_FILES)
    }
}

impl Unpacker {
    pub fn new(max_file_size: u64, max_files: usize) -> Self {
        Self {
            max_file_size,
            max_files,
        }
    }

    /// Unpack an archive buffer.
    ///
    /// Fails when the archive cannot be read or no eligible entry remains.
    pub fn unpack(&self, archive_bytes: &[u8]) -> Result<UnpackedArchive, ArchiveError> {
        let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
        let mut unpacked = UnpackedArchive::default();
        let mut limit_noted = false;

        tracing::info!("[Unpacker] Archive has {} entries", archive.len());

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let name = file.name().to_string();

            if file.is_dir() || is_hidden(&name) {
                tracing::debug!("[Unpacker] Skipping {}", name);
                continue;
            }

            let declared_size = file.size();
            if declared_size > self.max_file_size {
                tracing::warn!(
                    "[Unpacker] {} exceeds size limit ({} > {} bytes)",
                    name,
                    declared_size,
                    self.max_file_size
                );
                unpacked.skipped.push(format!(
                    "{}: skipped, {} exceeds the {} per-file limit",
                    name,
                    format_bytes(declared_size),
                    format_bytes(self.max_file_size)
                ));
                continue;
            }

            if unpacked.entries.len() >= self.max_files {
                if !limit_noted {
                    tracing::warn!("[Unpacker] File limit of {} reached", self.max_files);
                    limit_noted = true;
                }
                unpacked.skipped.push(format!(
                    "{}: skipped, archive file limit of {} reached",
                    name, self.max_files
                ));
                continue;
            }

            // Declared sizes can lie; never read past the ceiling.
            let mut bytes = Vec::with_capacity(declared_size as usize);
            (&mut file)
                .take(self.max_file_size + 1)
                .read_to_end(&mut bytes)
                .map_err(|e| ArchiveError::EntryRead {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            if bytes.len() as u64 > self.max_file_size {
                unpacked.skipped.push(format!(
                    "{}: skipped, decompressed size exceeds the {} per-file limit",
                    name,
                    format_bytes(self.max_file_size)
                ));
                continue;
            }

            let size = bytes.len() as u64;
            unpacked.entries.push(RawEntry { name, bytes, size });
        }

        if unpacked.entries.is_empty() {
            return Err(ArchiveError::NoEligibleFiles);
        }
        if unpacked.entries.len() > self.max_files {
            return Err(ArchiveError::TooManyFiles {
                admitted: unpacked.entries.len(),
                limit: self.max_files,
            });
        }

        tracing::info!(
            "[Unpacker] Admitted {} files, skipped {}",
            unpacked.entries.len(),
            unpacked.skipped.len()
        );

        Ok(unpacked)
    }
}

/// Dotfiles, files in dot-directories and macOS resource forks
fn is_hidden(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name
            .split('/')
            .any(|segment| segment.starts_with('.') && segment.len() > 1)
}

fn format_bytes(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Build a zip buffer from `(name, contents)` pairs. Test helper.
#[cfg(test)]
pub(crate) fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        if name.ends_with('/') {
            writer
                .add_directory(name.trim_end_matches('/'), SimpleFileOptions::default())
                .unwrap();
        } else {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}
