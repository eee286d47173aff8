// src/packages/deb.rs

//! Debian binary package writer
//!
//! Reassembles an installed package into a `.deb`: an AR archive holding
//! - `debian-binary` with the format version `2.0`
//! - `control.tar.*` with the control file, `md5sums` and maintainer scripts
//! - `data.tar.*` with the installed files, read from the live filesystem
//!
//! The control block is deterministic: every member carries mtime 0 and
//! root ownership, so identical inputs give byte-identical control members.
//! The data member is streamed through an anonymous spool file in the output
//! directory, so package size never bounds memory use. The archive is
//! written to a temporary file there and renamed into place, so a failed
//! build never leaves a partial `.deb`.

use crate::error::{Error, Result};
use crate::packages::compression::{Compression, Encoder};
use crate::packages::manifest::{FileKind, FileManifest};
use crate::packages::record::PackageRecord;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};
use tracing::{debug, info};

/// Contents of the `debian-binary` member
pub const DEBIAN_BINARY: &[u8] = b"2.0\n";

const CONTROL_MODE: u32 = 0o644;
const DIRECTORY_MODE: u32 = 0o755;

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    /// Final location of the archive
    pub path: PathBuf,
    /// Hex SHA-256 of the whole `.deb`
    pub sha256: String,
    pub size: u64,
    /// Entries that were skipped, one message each
    pub warnings: Vec<String>,
}

/// Builds one `.deb` from a package record and its resolved manifest
pub struct DebBuilder<'a> {
    record: &'a PackageRecord,
    manifest: &'a FileManifest,
    root: &'a Path,
    compression: Compression,
}

impl<'a> DebBuilder<'a> {
    /// `root` is the filesystem root the manifest paths are read from
    pub fn new(record: &'a PackageRecord, manifest: &'a FileManifest, root: &'a Path) -> Self {
        Self {
            record,
            manifest,
            root,
            compression: Compression::default(),
        }
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Write the archive into `output_dir`
    ///
    /// The file name is [`PackageRecord::deb_file_name`]; an existing file of
    /// that name is replaced.
    pub fn build(&self, output_dir: &Path) -> Result<BuiltPackage> {
        let package = self.record.identifier();

        if self.record.version().is_empty() {
            return Err(self.error("package has no Version field"));
        }

        let total = self.manifest.entries.len();
        if total > 0 && self.manifest.present().count() == 0 {
            return Err(self.error(format!("none of the {} listed files exist", total)));
        }

        debug!("Building {} from {} entries", package, total);

        let mut warnings = Vec::new();
        let (data, data_len, md5sums) = self.data_block(output_dir, &mut warnings)?;
        let control = self.control_block(&md5sums)?;

        let path = output_dir.join(self.record.deb_file_name());
        let (sha256, size) = self.write_archive(output_dir, &path, &control, data, data_len)?;

        info!("Built {} ({} bytes)", path.display(), size);

        Ok(BuiltPackage {
            path,
            sha256,
            size,
            warnings,
        })
    }

    /// Compressed `control.tar` member
    ///
    /// `md5sums` is the text of the md5sums file; it is omitted when empty.
    pub fn control_block(&self, md5sums: &str) -> Result<Vec<u8>> {
        let encoder = Encoder::new(Vec::new(), self.compression).map_err(|e| self.io_error(e))?;
        let mut tar = tar::Builder::new(encoder);

        let mut root = control_header(EntryType::Directory, DIRECTORY_MODE, 0);
        tar.append_data(&mut root, "./", io::empty())
            .map_err(|e| self.io_error(e))?;

        let control = self.record.to_control();
        let mut header = control_header(EntryType::Regular, CONTROL_MODE, control.len() as u64);
        tar.append_data(&mut header, "./control", control.as_bytes())
            .map_err(|e| self.io_error(e))?;

        if !md5sums.is_empty() {
            let mut header =
                control_header(EntryType::Regular, CONTROL_MODE, md5sums.len() as u64);
            tar.append_data(&mut header, "./md5sums", md5sums.as_bytes())
                .map_err(|e| self.io_error(e))?;
        }

        for side_file in &self.manifest.control_files {
            let content = fs::read(&side_file.path).map_err(|e| {
                self.error(format!("cannot read {}: {}", side_file.path.display(), e))
            })?;
            let mode = fs::metadata(&side_file.path)
                .map(|m| m.permissions().mode() & 0o7777)
                .unwrap_or(CONTROL_MODE);

            let mut header = control_header(EntryType::Regular, mode, content.len() as u64);
            tar.append_data(&mut header, format!("./{}", side_file.name), &content[..])
                .map_err(|e| self.io_error(e))?;
        }

        let encoder = tar.into_inner().map_err(|e| self.io_error(e))?;
        encoder.finish().map_err(|e| self.io_error(e))
    }

    /// Compressed `data.tar` member, its length and the matching md5sums text
    ///
    /// The member is spooled to an unnamed file in `output_dir`, rewound
    /// and ready to be copied into the archive.
    fn data_block(
        &self,
        output_dir: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<(File, u64, String)> {
        let spool = tempfile::tempfile_in(output_dir).map_err(|e| {
            self.error(format!("cannot write to {}: {}", output_dir.display(), e))
        })?;
        let encoder = Encoder::new(BufWriter::new(spool), self.compression)
            .map_err(|e| self.io_error(e))?;
        let mut tar = tar::Builder::new(encoder);
        let mut md5sums = String::new();

        let mut root = control_header(EntryType::Directory, DIRECTORY_MODE, 0);
        tar.append_data(&mut root, "./", io::empty())
            .map_err(|e| self.io_error(e))?;

        for entry in &self.manifest.entries {
            let Some(metadata) = entry.metadata() else {
                warnings.push(format!("{}: missing on disk, skipped", entry.path.display()));
                continue;
            };

            let mut header = Header::new_gnu();
            header.set_mode(metadata.mode);
            header.set_uid(u64::from(metadata.uid));
            header.set_gid(u64::from(metadata.gid));
            header.set_mtime(metadata.mtime);
            header.set_size(0);

            let relative = entry.relative_path();

            match &metadata.kind {
                FileKind::Directory => {
                    header.set_entry_type(EntryType::Directory);
                    let mut name = relative.as_os_str().to_owned();
                    name.push("/");
                    tar.append_data(&mut header, Path::new(&name), io::empty())
                        .map_err(|e| self.io_error(e))?;
                }
                FileKind::Symlink { target } => {
                    header.set_entry_type(EntryType::Symlink);
                    tar.append_link(&mut header, relative, target)
                        .map_err(|e| self.io_error(e))?;
                }
                FileKind::Regular => {
                    let on_disk = self.root.join(relative);
                    let file = match File::open(&on_disk) {
                        Ok(file) => file,
                        Err(e) => {
                            warnings.push(format!(
                                "{}: cannot be read ({}), skipped",
                                entry.path.display(),
                                e
                            ));
                            continue;
                        }
                    };

                    header.set_entry_type(EntryType::Regular);
                    header.set_size(metadata.size);

                    let mut reader = HashingReader::new(file.take(metadata.size));
                    tar.append_data(&mut header, relative, &mut reader)
                        .map_err(|e| self.io_error(e))?;

                    if reader.count != metadata.size {
                        return Err(self.error(format!(
                            "{} shrank while archiving ({} of {} bytes)",
                            entry.path.display(),
                            reader.count,
                            metadata.size
                        )));
                    }

                    md5sums.push_str(&format!("{}  {}\n", reader.hex_digest(), relative.display()));
                }
                FileKind::Other => {
                    warnings.push(format!(
                        "{}: not a regular file, directory or symlink, skipped",
                        entry.path.display()
                    ));
                }
            }
        }

        let encoder = tar.into_inner().map_err(|e| self.io_error(e))?;
        let mut data = encoder
            .finish()
            .map_err(|e| self.io_error(e))?
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;
        let data_len = data.seek(SeekFrom::End(0)).map_err(|e| self.io_error(e))?;
        data.rewind().map_err(|e| self.io_error(e))?;
        Ok((data, data_len, md5sums))
    }

    /// Write the AR container through a temporary file and rename it to `path`
    fn write_archive(
        &self,
        output_dir: &Path,
        path: &Path,
        control: &[u8],
        data: File,
        data_len: u64,
    ) -> Result<(String, u64)> {
        let mut temp = tempfile::Builder::new()
            .prefix(".debforge-")
            .suffix(".partial")
            .tempfile_in(output_dir)
            .map_err(|e| {
                self.error(format!("cannot write to {}: {}", output_dir.display(), e))
            })?;

        let suffix = self.compression.format.suffix();
        let mut writer = HashingWriter::new(temp.as_file_mut());
        {
            let mut archive = ar::Builder::new(&mut writer);
            let members: [(String, &[u8]); 2] = [
                ("debian-binary".to_string(), DEBIAN_BINARY),
                (format!("control.tar{}", suffix), control),
            ];

            for (name, content) in members {
                archive
                    .append(&member_header(name, content.len() as u64), content)
                    .map_err(|e| self.io_error(e))?;
            }
            archive
                .append(&member_header(format!("data.tar{}", suffix), data_len), data)
                .map_err(|e| self.io_error(e))?;
        }

        writer.flush().map_err(|e| self.io_error(e))?;
        let sha256 = format!("{:x}", writer.hasher.finalize_reset());
        let size = writer.count;

        temp.as_file()
            .sync_all()
            .map_err(|e| self.io_error(e))?;
        temp.persist(path)
            .map_err(|e| self.error(format!("cannot move archive into place: {}", e.error)))?;

        Ok((sha256, size))
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::Build {
            package: self.record.identifier().to_string(),
            reason: reason.into(),
        }
    }

    fn io_error(&self, e: io::Error) -> Error {
        self.error(e.to_string())
    }
}

/// Build `record` into `output_dir` with default compression
pub fn build(
    record: &PackageRecord,
    manifest: &FileManifest,
    root: &Path,
    output_dir: &Path,
) -> Result<BuiltPackage> {
    DebBuilder::new(record, manifest, root).build(output_dir)
}

/// AR member header with root ownership and mtime 0
fn member_header(name: String, size: u64) -> ar::Header {
    let mut header = ar::Header::new(name.into_bytes(), size);
    header.set_mode(0o100644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

fn control_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(size);
    header
}

/// Reader that computes the MD5 of everything passing through it
struct HashingReader<R> {
    inner: R,
    hasher: Md5,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
            count: 0,
        }
    }

    fn hex_digest(&mut self) -> String {
        format!("{:x}", self.hasher.finalize_reset())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Writer that computes the SHA-256 of everything written through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    count: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
