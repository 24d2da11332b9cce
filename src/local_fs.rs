//! Capability-scoped reads of local files.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} does not name a file"),
        )
    })?;
    Ok((parent, file_name))
}

/// Reads a UTF-8 file.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.read_to_string(file_name)
}

/// Returns `true` when `path` names an existing regular file.
pub(crate) fn is_file(path: &Utf8Path) -> io::Result<bool> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => match dir.metadata(file_name) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn reads_existing_file_and_reports_missing_ones() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
        let file = root.join("key.pub");
        std::fs::write(&file, "ssh-ed25519 AAAA").unwrap_or_else(|err| panic!("write: {err}"));

        assert_eq!(
            read_to_string(&file).unwrap_or_else(|err| panic!("read: {err}")),
            "ssh-ed25519 AAAA"
        );
        assert!(is_file(&file).unwrap_or_else(|err| panic!("stat: {err}")));
        assert!(!is_file(&root.join("missing.sh")).unwrap_or_else(|err| panic!("stat: {err}")));
        assert!(!is_file(&root.join("nope/missing.sh")).unwrap_or_else(|err| panic!("stat: {err}")));
        assert!(read_to_string(&root.join("missing.sh")).is_err());
    }
}
