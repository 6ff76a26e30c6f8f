//! The archive-store boundary
//!
//! Reading and repackaging archives is an external collaborator's job; this
//! module pins down the shape both sides agree on: an ordered list of
//! (class model, origin entry) pairs, the untouched resource entries, and
//! the two repackaging options (certificate stripping, manifest
//! watermarking). [`MemoryArchive`] implements both directions for tests
//! and in-process drivers.

use crate::jvm::model::ClassModel;
use std::error;
use std::fmt;

/// Where an entry came from, carried through so repackaging can preserve it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginEntry {
    /// Archive-relative entry name, e.g. `foo/bar/Baz.class`
    pub name: String,
}

impl OriginEntry {
    pub fn new(name: impl Into<String>) -> OriginEntry {
        OriginEntry { name: name.into() }
    }
}

/// A non-class entry, passed through verbatim aside from requested edits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceEntry {
    pub origin: OriginEntry,
    pub bytes: Vec<u8>,
}

/// Everything an archive contributes to one run
#[derive(Clone, Debug, Default)]
pub struct ArchiveContents {
    /// Parsed classes with their origin entries, in archive order
    pub classes: Vec<(ClassModel, OriginEntry)>,
    /// Non-class entries, in archive order
    pub resources: Vec<ResourceEntry>,
}

/// Repackaging options
#[derive(Copy, Clone, Debug, Default)]
pub struct SaveOptions {
    /// Drop signature files and digest entries from the manifest
    pub strip_signatures: bool,
    /// Stamp the manifest with a processing marker
    pub watermark: bool,
}

#[derive(Debug)]
pub enum ArchiveError {
    Unreadable(String),
    Unwritable(String),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Unreadable(what) => write!(f, "failed to read archive: {}", what),
            ArchiveError::Unwritable(what) => write!(f, "failed to write archive: {}", what),
        }
    }
}

impl error::Error for ArchiveError {}

/// Supplies classes and resources for a run
pub trait ArchiveSource {
    fn load(&mut self) -> Result<ArchiveContents, ArchiveError>;
}

/// Accepts the transformed contents back for repackaging
pub trait ArchiveSink {
    fn save(&mut self, contents: &ArchiveContents, options: &SaveOptions)
        -> Result<(), ArchiveError>;
}

/// Signature-related entries dropped when stripping certificates
pub fn is_certificate_entry(name: &str) -> bool {
    match name.strip_prefix("META-INF/") {
        Some(rest) => {
            !rest.is_empty()
                && (rest.ends_with(".SF") || rest.ends_with(".RSA") || rest.ends_with(".DSA"))
        }
        None => false,
    }
}

/// The manifest entry name
pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

/// Drop per-entry digest sections from a manifest, keeping the main section
pub fn patch_manifest(manifest: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(manifest);
    let mut out = String::new();
    for section in text.split("\r\n\r\n").flat_map(|s| s.split("\n\n")) {
        let is_digest_section = section
            .lines()
            .any(|line| line.starts_with("Name:") || line.contains("-Digest:"));
        if !is_digest_section && !section.trim().is_empty() {
            out.push_str(section.trim_end());
            out.push('\n');
        }
    }
    out.push('\n');
    out.into_bytes()
}

/// Stamp a manifest with a processing marker
pub fn watermark_manifest(manifest: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(manifest);
    let mut out = text.trim_end().to_owned();
    out.push_str("\nDeobfuscated-By: unshade\n\n");
    out.into_bytes()
}

/// In-memory archive store, for tests and in-process drivers
#[derive(Clone, Debug, Default)]
pub struct MemoryArchive {
    pub contents: ArchiveContents,
    pub options_seen: Option<SaveOptions>,
}

impl MemoryArchive {
    pub fn new(contents: ArchiveContents) -> MemoryArchive {
        MemoryArchive {
            contents,
            options_seen: None,
        }
    }
}

impl ArchiveSource for MemoryArchive {
    fn load(&mut self) -> Result<ArchiveContents, ArchiveError> {
        Ok(self.contents.clone())
    }
}

impl ArchiveSink for MemoryArchive {
    fn save(
        &mut self,
        contents: &ArchiveContents,
        options: &SaveOptions,
    ) -> Result<(), ArchiveError> {
        let mut saved = contents.clone();
        if options.strip_signatures {
            saved
                .resources
                .retain(|resource| !is_certificate_entry(&resource.origin.name));
        }
        for resource in &mut saved.resources {
            if resource.origin.name == MANIFEST_NAME {
                if options.strip_signatures {
                    resource.bytes = patch_manifest(&resource.bytes);
                }
                if options.watermark {
                    resource.bytes = watermark_manifest(&resource.bytes);
                }
            }
        }
        self.contents = saved;
        self.options_seen = Some(*options);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::ClassAccessFlags;

    #[test]
    fn certificate_entries_match_the_fixed_suffixes() {
        assert!(is_certificate_entry("META-INF/SIGNER.SF"));
        assert!(is_certificate_entry("META-INF/SIGNER.RSA"));
        assert!(is_certificate_entry("META-INF/SIGNER.DSA"));
        assert!(!is_certificate_entry("META-INF/MANIFEST.MF"));
        assert!(!is_certificate_entry("foo/SIGNER.SF"));
    }

    #[test]
    fn stripping_removes_certificates_and_digests() {
        let manifest = b"Manifest-Version: 1.0\n\
                         Main-Class: a\n\
                         \n\
                         Name: foo/Bar.class\n\
                         SHA-256-Digest: AAAA\n\
                         \n"
        .to_vec();
        let contents = ArchiveContents {
            classes: vec![(
                ClassModel::new("a", ClassAccessFlags::PUBLIC),
                OriginEntry::new("a.class"),
            )],
            resources: vec![
                ResourceEntry {
                    origin: OriginEntry::new(MANIFEST_NAME),
                    bytes: manifest,
                },
                ResourceEntry {
                    origin: OriginEntry::new("META-INF/SIGNER.SF"),
                    bytes: vec![1],
                },
                ResourceEntry {
                    origin: OriginEntry::new("data.bin"),
                    bytes: vec![2],
                },
            ],
        };

        let mut sink = MemoryArchive::default();
        sink.save(
            &contents,
            &SaveOptions {
                strip_signatures: true,
                watermark: true,
            },
        )
        .unwrap();

        let names: Vec<&str> = sink
            .contents
            .resources
            .iter()
            .map(|resource| resource.origin.name.as_str())
            .collect();
        assert_eq!(names, vec![MANIFEST_NAME, "data.bin"]);

        let manifest = String::from_utf8(sink.contents.resources[0].bytes.clone()).unwrap();
        assert!(manifest.contains("Main-Class: a"));
        assert!(!manifest.contains("SHA-256-Digest"));
        assert!(manifest.contains("Deobfuscated-By: unshade"));
    }
}
