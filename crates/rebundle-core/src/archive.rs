//! Bundle and member package archives
//!
//! Bundles and packages are zip containers. Extraction stages only the member
//! packages of a bundle; the bundle's own footprint files (bundle manifest,
//! block map, signature) are regenerated when it is repackaged.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;
use crate::manifest::{patch_publisher, remove_content_type_override, update_block_map};

/// Package manifest entry
pub const MANIFEST_ENTRY: &str = "AppxManifest.xml";

/// Package block map entry
pub const BLOCK_MAP_ENTRY: &str = "AppxBlockMap.xml";

/// Package signature entry
pub const SIGNATURE_ENTRY: &str = "AppxSignature.p7x";

/// Package content types entry
pub const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";

/// Extensions of packages nested in a bundle
pub const MEMBER_EXTENSIONS: &[&str] = &["appx", "msix", "eappx", "emsix"];

type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Whether `path` names a package that can be nested in a bundle
pub fn is_member_package(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| MEMBER_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext)))
}

/// Extract the member packages of `bundle` into `dest`
///
/// Returns the staged member paths in archive order. Fails when an entry
/// would land outside `dest` or when the bundle has no members.
pub fn extract_members(bundle: &Path, dest: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let file = File::open(bundle)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ArchiveError::zip(bundle, e))?;
    let mut members = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ArchiveError::zip(bundle, e))?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            return Err(ArchiveError::UnsafeEntry {
                archive: bundle.to_path_buf(),
                entry: entry.name().to_string(),
            });
        };
        if !is_member_package(&relative) {
            debug!(entry = entry.name(), "skipping bundle footprint entry");
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        debug!(member = %target.display(), "staged member package");
        members.push(target);
    }

    if members.is_empty() {
        return Err(ArchiveError::NoMembers(bundle.to_path_buf()));
    }
    Ok(members)
}

/// Rewrite `package` in place with its manifest identity set to `publisher`
///
/// The stale signature is dropped and the block map entry for the manifest
/// is recomputed. Returns false, leaving the package untouched, when the
/// manifest or block map cannot be patched.
pub fn rewrite_member_identity(package: &Path, publisher: &str) -> ArchiveResult<bool> {
    let file = File::open(package)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ArchiveError::zip(package, e))?;

    let mut manifest = read_entry(&mut archive, package, MANIFEST_ENTRY)?.ok_or_else(|| {
        ArchiveError::MissingEntry {
            archive: package.to_path_buf(),
            entry: MANIFEST_ENTRY.to_string(),
        }
    })?;
    if !patch_publisher(&mut manifest, publisher) {
        return Ok(false);
    }

    let block_map = match read_entry(&mut archive, package, BLOCK_MAP_ENTRY)? {
        Some(mut block_map) => {
            if !update_block_map(&mut block_map, MANIFEST_ENTRY, manifest.as_bytes()) {
                return Ok(false);
            }
            Some(block_map)
        }
        None => None,
    };

    let content_types = read_entry(&mut archive, package, CONTENT_TYPES_ENTRY)?.map(|mut types| {
        remove_content_type_override(&mut types, &format!("/{}", SIGNATURE_ENTRY));
        types
    });

    let staging = package.with_extension("rebundle-tmp");
    let written = write_rewritten(
        &mut archive,
        package,
        &staging,
        &manifest,
        block_map.as_deref(),
        content_types.as_deref(),
    );
    if let Err(e) = written {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }

    drop(archive);
    std::fs::rename(&staging, package)?;
    Ok(true)
}

fn write_rewritten(
    archive: &mut ZipArchive<File>,
    package: &Path,
    staging: &Path,
    manifest: &str,
    block_map: Option<&str>,
    content_types: Option<&str>,
) -> ArchiveResult<()> {
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut writer = ZipWriter::new(File::create(staging)?);

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(|e| ArchiveError::zip(package, e))?;
        let name = entry.name().to_string();

        let replacement = if name == SIGNATURE_ENTRY {
            continue;
        } else if name == MANIFEST_ENTRY {
            Some(manifest)
        } else if name == BLOCK_MAP_ENTRY {
            block_map
        } else if name == CONTENT_TYPES_ENTRY {
            content_types
        } else {
            None
        };

        match replacement {
            Some(content) => {
                drop(entry);
                writer
                    .start_file(name, stored)
                    .map_err(|e| ArchiveError::zip(package, e))?;
                writer.write_all(content.as_bytes())?;
            }
            None => writer
                .raw_copy_file(entry)
                .map_err(|e| ArchiveError::zip(package, e))?,
        }
    }

    writer.finish().map_err(|e| ArchiveError::zip(package, e))?;
    Ok(())
}

fn read_entry(
    archive: &mut ZipArchive<File>,
    path: &Path,
    name: &str,
) -> ArchiveResult<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ArchiveError::zip(path, e)),
    };
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}
