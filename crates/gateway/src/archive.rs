use crate::{error::ApiError, metrics::PipelineMetrics};
use std::collections::HashSet;
use std::io::{self, Cursor, Read, Write};
use std::time::Instant;
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

pub const SUPPORTED_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".webp", ".bmp"];

/// Default cap on a single member's decompressed size.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

// Cap on the up-front allocation for a member, its declared size is untrusted.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

pub fn is_zip_filename(name: &str) -> bool {
    name.to_lowercase().ends_with(".zip")
}

/// Last path component; archives written on Windows may use backslashes.
fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Split `name` into stem and extension. Leading dots belong to the stem, so
/// `.png` has no extension.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if name[..dot].chars().any(|c| c != '.') => name.split_at(dot),
        _ => (name, ""),
    }
}

pub fn is_supported_image(member: &str) -> bool {
    if member.ends_with('/') {
        return false;
    }
    let ext = split_ext(base_name(member)).1.to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

pub fn cutout_name(member: &str) -> String {
    format!("{}_cutout.png", split_ext(base_name(member)).0)
}

pub fn error_name(member: &str) -> String {
    format!("{}.ERROR.txt", base_name(member))
}

/// Hands out unique entry names; a repeat gets `_2`, `_3`, ... before its extension.
#[derive(Default)]
struct OutputNames {
    used: HashSet<String>,
}

impl OutputNames {
    fn claim(&mut self, name: String) -> String {
        if self.used.insert(name.clone()) {
            return name;
        }
        let (stem, ext) = split_ext(&name);
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}{}", stem, n, ext);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

pub struct BatchReport {
    pub archive: Vec<u8>,
    pub images: usize,
    pub failed: usize,
}

/// An uploaded archive that passed validation: it parses, holds at least one
/// supported image and every entry's checksum matches.
pub struct UploadedArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    /// (entry index, entry name) in archive order
    members: Vec<(usize, String)>,
    max_entry_bytes: u64,
}

impl UploadedArchive {
    pub fn open(raw: Vec<u8>) -> Result<Self, ApiError> {
        let mut archive = ZipArchive::new(Cursor::new(raw))
            .map_err(|_| ApiError::BadRequest("Invalid ZIP file".to_string()))?;

        let mut members = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|_| ApiError::BadRequest("Invalid ZIP file".to_string()))?;
            if is_supported_image(entry.name()) {
                members.push((index, entry.name().to_string()));
            }
        }

        if members.is_empty() {
            return Err(ApiError::BadRequest(
                "ZIP contains no supported images".to_string(),
            ));
        }

        if let Some(name) = first_corrupt_entry(&mut archive) {
            return Err(ApiError::BadRequest(format!(
                "ZIP integrity check failed for: {}",
                name
            )));
        }

        Ok(Self {
            archive,
            members,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        })
    }

    /// Members that inflate past `limit` bytes fail with an error marker.
    pub fn with_max_entry_bytes(mut self, limit: u64) -> Self {
        self.max_entry_bytes = limit;
        self
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(_, name)| name.as_str())
    }

    /// Run `convert` over every image member and pack the results. A failed
    /// member becomes a text entry holding the error; the batch carries on.
    pub fn cutout_all<F>(
        mut self,
        upload_name: &str,
        metrics: &PipelineMetrics,
        mut convert: F,
    ) -> Result<BatchReport, ApiError>
    where
        F: FnMut(&str, &[u8]) -> anyhow::Result<Vec<u8>>,
    {
        tracing::info!(
            upload = upload_name,
            images = self.members.len(),
            "Processing archive"
        );

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut names = OutputNames::default();
        let mut failed = 0usize;

        for (index, name) in &self.members {
            let start = Instant::now();

            let result = read_entry(&mut self.archive, *index, self.max_entry_bytes).and_then(|bytes| {
                tracing::info!(name = %name, bytes = bytes.len(), "Processing image");
                convert(name, &bytes)
            });

            let elapsed = start.elapsed().as_secs_f64();
            metrics.images.add(1, &[]);
            metrics.image_duration.record(elapsed, &[]);

            match result {
                Ok(png) => {
                    let out_name = names.claim(cutout_name(name));
                    write_entry(&mut writer, &out_name, &png, options)?;
                    tracing::info!(name = %name, output = %out_name, elapsed_s = elapsed, "Image completed");
                }
                Err(e) => {
                    failed += 1;
                    metrics.failed_images.add(1, &[]);
                    let out_name = names.claim(error_name(name));
                    tracing::warn!(name = %name, error = %e, "Error processing image");
                    write_entry(&mut writer, &out_name, format!("{:#}", e).as_bytes(), options)?;
                }
            }
        }

        let archive = writer
            .finish()
            .map_err(|e| ApiError::Internal(format!("Failed to finish output ZIP: {}", e)))?
            .into_inner();

        metrics.batches.add(1, &[]);
        tracing::info!(
            upload = upload_name,
            output_bytes = archive.len(),
            images = self.members.len(),
            failed,
            "Archive completed"
        );

        Ok(BatchReport {
            archive,
            images: self.members.len(),
            failed,
        })
    }
}

/// Reads every entry to the end so its CRC is verified; returns the first
/// entry that fails.
fn first_corrupt_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>) -> Option<String> {
    for index in 0..archive.len() {
        let name = archive
            .by_index_raw(index)
            .map(|entry| entry.name().to_string())
            .unwrap_or_else(|_| format!("entry #{}", index));

        let ok = match archive.by_index(index) {
            Ok(mut entry) => io::copy(&mut entry, &mut io::sink()).is_ok(),
            Err(_) => false,
        };
        if !ok {
            return Some(name);
        }
    }
    None
}

/// The declared size is not trusted; reading stops one byte past `limit`.
fn read_entry(
    archive: &mut ZipArchive<Cursor<Vec<u8>>>,
    index: usize,
    limit: u64,
) -> anyhow::Result<Vec<u8>> {
    let entry = archive.by_index(index)?;
    let mut bytes = Vec::with_capacity(entry.size().min(limit).min(MAX_PREALLOC) as usize);
    entry.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        anyhow::bail!("Entry inflates past the {} byte limit", limit);
    }
    Ok(bytes)
}

fn write_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<(), ApiError> {
    writer
        .start_file(name, options)
        .and_then(|_| writer.write_all(data).map_err(Into::into))
        .map_err(|e| ApiError::Internal(format!("Failed to write {}: {}", name, e)))
}
