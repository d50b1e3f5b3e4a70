//! Classpath entries: a directory or a compressed archive, each able to
//! produce the raw bytes for `<internal-name>.class` (§4.2, §6 "Classpath").

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::{VmError, VmResult};

pub enum ClassPathEntry {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl ClassPathEntry {
    fn from_path(path: PathBuf) -> Self {
        let is_archive = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("jar") | Some("zip")
        );
        if is_archive {
            ClassPathEntry::Archive(path)
        } else {
            ClassPathEntry::Directory(path)
        }
    }

    /// Resolve `<internal-name>.class` within this entry. `None` means a
    /// plain miss (try the next entry); `Some(Err(_))` means the entry
    /// exists but is unreadable.
    fn find(&self, internal_name: &str) -> Option<VmResult<Vec<u8>>> {
        match self {
            ClassPathEntry::Directory(dir) => {
                let path = dir.join(format!("{}.class", internal_name));
                if !path.is_file() {
                    return None;
                }
                Some(fs::read(&path).map_err(VmError::from))
            }
            ClassPathEntry::Archive(archive_path) => {
                let file = match fs::File::open(archive_path) {
                    Ok(f) => f,
                    Err(e) => return Some(Err(VmError::from(e))),
                };
                let mut zip = match ZipArchive::new(file) {
                    Ok(z) => z,
                    Err(e) => return Some(Err(VmError::from(e))),
                };

                let entry_name = format!("{}.class", internal_name);
                match zip.by_name(&entry_name) {
                    Ok(mut entry) => {
                        let mut bytes = Vec::with_capacity(entry.size() as usize);
                        Some(entry.read_to_end(&mut bytes).map(|_| bytes).map_err(VmError::from))
                    }
                    Err(zip::result::ZipError::FileNotFound) => None,
                    Err(e) => Some(Err(VmError::from(e))),
                }
            }
        }
    }
}

/// The `-cp`/`-classpath`/`--class-path` entry list, walked in order (§4.2).
pub struct ClassPath {
    entries: Vec<ClassPathEntry>,
}

impl ClassPath {
    pub fn parse(spec: &str) -> Self {
        let separator = if cfg!(windows) { ';' } else { ':' };
        let entries = spec
            .split(separator)
            .filter(|s| !s.is_empty())
            .map(|s| ClassPathEntry::from_path(PathBuf::from(s)))
            .collect();
        ClassPath { entries }
    }

    pub fn with_entry(mut self, path: impl AsRef<Path>) -> Self {
        self.entries.push(ClassPathEntry::from_path(path.as_ref().to_path_buf()));
        self
    }

    /// Walk entries in order; the first entry that yields a readable
    /// `<name>.class` wins (§4.2 "On the first entry that yields a readable
    /// class").
    pub fn find(&self, internal_name: &str) -> VmResult<Option<Vec<u8>>> {
        for entry in &self.entries {
            if let Some(result) = entry.find(internal_name) {
                return result.map(Some);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn finds_class_in_directory_entry() {
        let dir = std::env::temp_dir().join(format!("javacore-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let class_path = dir.join("Main.class");
        fs::File::create(&class_path).unwrap().write_all(b"\xCA\xFE\xBA\xBE").unwrap();

        let classpath = ClassPath::parse(dir.to_str().unwrap());
        let bytes = classpath.find("Main").unwrap().unwrap();
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_class_is_none() {
        let dir = std::env::temp_dir();
        let classpath = ClassPath::parse(dir.to_str().unwrap());
        assert!(classpath.find("NoSuchClassXYZ").unwrap().is_none());
    }
}
