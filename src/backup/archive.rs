// Archive creation and tamper-resistant extraction.
//
// Extraction rejects any entry that could write outside the destination:
// absolute paths, parent-directory components, links and special files.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, EntryType};
use tracing::debug;

use super::{METADATA_FILE, RESOURCES_DIR};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive entry '{0}' escapes the extraction directory")]
    InvalidTarPath(String),
    #[error("archive entry '{0}' is a link; links are not allowed")]
    LinkEntry(String),
    #[error("archive entry '{0}' has an unsupported type")]
    UnsupportedEntry(String),
}

/// Whether a tar entry path may be materialized: relative, and never
/// pointing above the extraction root.
pub fn is_safe_entry_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Stream a prepared backup directory into a gzip-compressed tar. The
/// metadata file goes first, then the resources tree. Compression level -1
/// selects the library default; 0..=9 are passed through.
pub fn create_archive(source: &Path, dest: &Path, compression: i32) -> Result<()> {
    let level = match compression {
        -1 => Compression::default(),
        n => Compression::new(n.clamp(0, 9) as u32),
    };
    let file = File::create(dest)
        .with_context(|| format!("failed to create archive '{}'", dest.display()))?;
    let encoder = GzEncoder::new(file, level);
    let mut builder = tar::Builder::new(encoder);

    let metadata_path = source.join(METADATA_FILE);
    builder
        .append_path_with_name(&metadata_path, METADATA_FILE)
        .context("failed to add backup metadata to archive")?;

    let resources = source.join(RESOURCES_DIR);
    if resources.is_dir() {
        builder
            .append_dir_all(RESOURCES_DIR, &resources)
            .context("failed to add resources to archive")?;
    }

    let encoder = builder.into_inner().context("failed to finish archive")?;
    encoder.finish().context("failed to finish gzip stream")?;
    Ok(())
}

/// Extract an archive into `dest`, enforcing the entry-safety rules
/// irrespective of the destination directory.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive '{}'", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    for entry in archive.entries().context("failed to read archive entries")? {
        let mut entry = entry.context("failed to read archive entry")?;
        let raw_path: PathBuf = entry
            .path()
            .context("archive entry has an unreadable path")?
            .into_owned();
        let entry_display = raw_path.display().to_string();

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Directory => {}
            EntryType::Symlink | EntryType::Link => {
                return Err(ArchiveError::LinkEntry(entry_display).into());
            }
            _ => return Err(ArchiveError::UnsupportedEntry(entry_display).into()),
        }

        if !is_safe_entry_path(&raw_path) {
            return Err(ArchiveError::InvalidTarPath(entry_display).into());
        }
        let target = dest.join(&raw_path);
        // Belt and braces: the joined path must stay inside the root.
        if !target.starts_with(dest) {
            return Err(ArchiveError::InvalidTarPath(entry_display).into());
        }

        if entry.header().entry_type() == EntryType::Directory {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("failed to create '{}'", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create '{}'", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract '{entry_display}'"))?;
        debug!(entry = %entry_display, "extracted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_entry_paths() {
        assert!(is_safe_entry_path(Path::new("resources/pods/pods.yaml")));
        assert!(is_safe_entry_path(Path::new("backup-metadata.json")));
        assert!(is_safe_entry_path(Path::new("./a/b")));

        assert!(!is_safe_entry_path(Path::new("../x")));
        assert!(!is_safe_entry_path(Path::new("/abs/x")));
        assert!(!is_safe_entry_path(Path::new("a/../../b")));
        assert!(!is_safe_entry_path(Path::new("..")));
        assert!(!is_safe_entry_path(Path::new("")));
    }

    fn prepare_backup_dir(dir: &Path) {
        std::fs::write(
            dir.join(METADATA_FILE),
            r#"{"version":"v1","timestamp":"t","clusterName":"dev","ksailVersion":"0","resourceCount":1}"#,
        )
        .unwrap();
        let pods = dir.join(RESOURCES_DIR).join("pods");
        std::fs::create_dir_all(&pods).unwrap();
        std::fs::write(pods.join("pods.yaml"), "kind: Pod\n").unwrap();
    }

    #[test]
    fn test_create_and_extract_round_trip() {
        let src = tempfile::tempdir().unwrap();
        prepare_backup_dir(src.path());
        let archive = src.path().join("backup.tar.gz");
        create_archive(src.path(), &archive, 6).unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract_archive(&archive, dest.path()).unwrap();
        assert!(dest.path().join(METADATA_FILE).exists());
        let yaml =
            std::fs::read_to_string(dest.path().join("resources").join("pods").join("pods.yaml"))
                .unwrap();
        assert_eq!(yaml, "kind: Pod\n");
    }

    #[test]
    fn test_extract_rejects_symlink_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.tar.gz");
        let file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, "innocent.yaml", "/etc/passwd")
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = extract_archive(&archive_path, dest.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::LinkEntry(_))
        ));
    }

    #[test]
    fn test_extract_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.tar.gz");
        let file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let payload = b"kind: Pod\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        // `Builder::append_data`/`Header::set_path` reject `..` components, so write the
        // malicious path straight into the raw header bytes to simulate a crafted archive.
        let raw_path = b"a/../../b.yaml";
        let gnu = header.as_gnu_mut().unwrap();
        gnu.name[..raw_path.len()].copy_from_slice(raw_path);
        header.set_cksum();
        builder.append(&header, &payload[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = extract_archive(&archive_path, dest.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::InvalidTarPath(_))
        ));
    }
}
