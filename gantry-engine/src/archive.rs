//! Archive packing for cache blobs
//!
//! The cache store deals in opaque byte payloads; the executor packs a job's
//! declared paths into a zip archive before saving and unpacks a restored
//! blob into the job workspace. All archive entry names are relative to the
//! workspace root.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::StoreError;

/// Pack the declared paths (files or directories, relative to `root`) into
/// an archive blob.
pub fn pack(root: &Path, paths: &[String]) -> Result<Vec<u8>, StoreError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for declared in paths {
        let full = root.join(declared);
        let metadata = std::fs::metadata(&full)
            .map_err(|err| StoreError::io(format!("declared path '{declared}'"), err))?;
        if metadata.is_dir() {
            pack_dir(&mut writer, root, &full, options)?;
        } else {
            pack_file(&mut writer, root, &full, options)?;
        }
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

fn pack_dir(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    dir: &Path,
    options: FileOptions,
) -> Result<(), StoreError> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|err| StoreError::io(format!("reading directory {}", dir.display()), err))?
        .collect::<Result<_, _>>()
        .map_err(|err| StoreError::io(format!("reading directory {}", dir.display()), err))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            pack_dir(writer, root, &path, options)?;
        } else {
            pack_file(writer, root, &path, options)?;
        }
    }
    Ok(())
}

fn pack_file(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    file: &Path,
    options: FileOptions,
) -> Result<(), StoreError> {
    let relative = file
        .strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned();

    let mut source = std::fs::File::open(file)
        .map_err(|err| StoreError::io(format!("opening {}", file.display()), err))?;

    writer.start_file(relative, options)?;
    let mut buffer = Vec::new();
    source
        .read_to_end(&mut buffer)
        .map_err(|err| StoreError::io(format!("reading {}", file.display()), err))?;
    writer
        .write_all(&buffer)
        .map_err(|err| StoreError::io(format!("archiving {}", file.display()), err))?;
    Ok(())
}

/// Unpack an archive blob into `root`, creating directories as needed.
///
/// Entry names that would escape `root` are skipped.
pub fn unpack(root: &Path, blob: &[u8]) -> Result<(), StoreError> {
    let mut archive = ZipArchive::new(Cursor::new(blob))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let destination = root.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&destination).map_err(|err| {
                StoreError::io(format!("creating {}", destination.display()), err)
            })?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::io(format!("creating {}", parent.display()), err))?;
        }
        let mut target = std::fs::File::create(&destination)
            .map_err(|err| StoreError::io(format!("creating {}", destination.display()), err))?;
        std::io::copy(&mut entry, &mut target)
            .map_err(|err| StoreError::io(format!("writing {}", destination.display()), err))?;
    }

    Ok(())
}
