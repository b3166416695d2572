use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;

use crate::planner;

/// Pages read per positioned call when loading a whole file.
const PRELOAD_PAGES: usize = 64;

#[derive(Error, Debug)]
pub(crate) enum SourceError {
    #[error("empty input path")]
    EmptyPath,
    #[error("source is already open")]
    AlreadyOpen,
    #[error("source is not open")]
    NotOpen,
    #[error("can't open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("read failed at offset {offset}: {source}")]
    Read { offset: u64, source: io::Error },
    #[error("can't map {path}: {source}")]
    Map { path: PathBuf, source: io::Error },
    #[error("source holds no in-memory image, preload it first")]
    NotLoaded,
}

/// Read-only access to the input file, shared by every worker of a run.
///
/// `read_at` copies into a caller buffer; `slice` borrows straight from an
/// in-memory image and only works once the whole file is resident.
pub(crate) trait ByteSource: Send + Sync {
    fn open(&mut self, path: &Path) -> Result<(), SourceError>;
    fn close(&mut self) -> Result<(), SourceError>;
    fn is_open(&self) -> bool;
    fn path(&self) -> Option<&Path>;
    fn size(&self) -> u64;

    /// Fills as much of `buffer` as the file allows from `offset` on.
    /// Returns 0 at or past end of file.
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, SourceError>;

    /// Makes the whole file resident so `slice` can serve it.
    fn preload(&mut self) -> Result<u64, SourceError>;

    /// Borrows up to `length` bytes at `offset`; empty past end of file.
    fn slice(&self, offset: u64, length: usize) -> Result<&[u8], SourceError>;
}

fn open_file(path: &Path) -> Result<(File, u64), SourceError> {
    if path.as_os_str().is_empty() {
        return Err(SourceError::EmptyPath);
    }
    let open_error = |source| SourceError::Open {
        path: path.to_owned(),
        source,
    };
    let file = File::open(path).map_err(open_error)?;
    let size = file.metadata().map_err(open_error)?.len();
    Ok((file, size))
}

fn slice_image(image: &[u8], offset: u64, length: usize) -> &[u8] {
    if offset >= image.len() as u64 {
        return &[];
    }
    let start = offset as usize;
    let end = start.saturating_add(length).min(image.len());
    &image[start..end]
}

#[cfg(unix)]
fn pread(file: &File, buffer: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buffer, offset)
}

#[cfg(windows)]
fn pread(file: &File, buffer: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buffer, offset)
}

/// Positioned reads against an open file handle, plus an optional owned
/// copy of the whole file for the preload strategy.
#[derive(Debug, Default)]
pub(crate) struct DiskSource {
    path: Option<PathBuf>,
    file: Option<File>,
    size: u64,
    image: Option<Vec<u8>>,
}

impl DiskSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl ByteSource for DiskSource {
    fn open(&mut self, path: &Path) -> Result<(), SourceError> {
        if self.file.is_some() {
            return Err(SourceError::AlreadyOpen);
        }
        let (file, size) = open_file(path)?;
        debug!("opened {} ({size} bytes) for positioned reads", path.display());
        self.path = Some(path.to_owned());
        self.file = Some(file);
        self.size = size;
        self.image = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        if self.file.take().is_none() {
            return Err(SourceError::NotOpen);
        }
        self.image = None;
        self.size = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        let file = self.file.as_ref().ok_or(SourceError::NotOpen)?;
        if offset >= self.size || buffer.is_empty() {
            return Ok(0);
        }
        // pread may come back short before EOF; a short result must only mean EOF
        let mut filled = 0;
        while filled < buffer.len() {
            let at = offset + filled as u64;
            let n = pread(file, &mut buffer[filled..], at)
                .map_err(|source| SourceError::Read { offset: at, source })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn preload(&mut self) -> Result<u64, SourceError> {
        if self.file.is_none() {
            return Err(SourceError::NotOpen);
        }
        if self.image.is_some() {
            return Ok(self.size);
        }
        let step = planner::page_size() * PRELOAD_PAGES;
        let mut image = vec![0u8; self.size as usize];
        let mut total = 0;
        while total < image.len() {
            let end = (total + step).min(image.len());
            let n = self.read_at(&mut image[total..end], total as u64)?;
            if n == 0 {
                // file shrank under us
                image.truncate(total);
                break;
            }
            total += n;
        }
        debug!("preloaded {total} bytes into memory");
        self.image = Some(image);
        Ok(total as u64)
    }

    fn slice(&self, offset: u64, length: usize) -> Result<&[u8], SourceError> {
        if self.file.is_none() {
            return Err(SourceError::NotOpen);
        }
        let image = self.image.as_deref().ok_or(SourceError::NotLoaded)?;
        Ok(slice_image(image, offset, length))
    }
}

/// Read-only memory map of the whole file, established once at open.
#[derive(Debug, Default)]
pub(crate) struct MmapSource {
    path: Option<PathBuf>,
    // `None` while open means the file is empty: nothing to map.
    map: Option<Mmap>,
    size: u64,
    open: bool,
}

impl MmapSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn image(&self) -> Result<&[u8], SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }
        Ok(self.map.as_deref().unwrap_or(&[]))
    }
}

impl ByteSource for MmapSource {
    fn open(&mut self, path: &Path) -> Result<(), SourceError> {
        if self.open {
            return Err(SourceError::AlreadyOpen);
        }
        let (file, size) = open_file(path)?;
        let map = if size == 0 {
            None
        } else {
            // SAFETY: the map is read-only and the input is not expected to be
            // modified while a run is in progress.
            let map = unsafe { Mmap::map(&file) }.map_err(|source| SourceError::Map {
                path: path.to_owned(),
                source,
            })?;
            Some(map)
        };
        debug!("mapped {} ({size} bytes)", path.display());
        self.path = Some(path.to_owned());
        self.map = map;
        self.size = size;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        if !self.open {
            return Err(SourceError::NotOpen);
        }
        self.map = None;
        self.size = 0;
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, SourceError> {
        let view = slice_image(self.image()?, offset, buffer.len());
        buffer[..view.len()].copy_from_slice(view);
        Ok(view.len())
    }

    fn preload(&mut self) -> Result<u64, SourceError> {
        self.image()?;
        Ok(self.size)
    }

    fn slice(&self, offset: u64, length: usize) -> Result<&[u8], SourceError> {
        Ok(slice_image(self.image()?, offset, length))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CONTENT: &[u8] = b"Hamburg;12.0\nBerlin;5.0\nA;-0.1\n";

    fn input_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn check_lifecycle<S: ByteSource>(mut source: S) {
        let file = input_file(CONTENT);
        assert!(!source.is_open());
        assert!(matches!(
            source.read_at(&mut [0u8; 4], 0),
            Err(SourceError::NotOpen)
        ));

        source.open(file.path()).unwrap();
        assert!(source.is_open());
        assert_eq!(source.path(), Some(file.path()));
        assert_eq!(source.size(), CONTENT.len() as u64);
        assert!(matches!(
            source.open(file.path()),
            Err(SourceError::AlreadyOpen)
        ));

        let mut buffer = [0u8; 7];
        assert_eq!(source.read_at(&mut buffer, 0).unwrap(), 7);
        assert_eq!(&buffer, b"Hamburg");
        let mut tail = [0u8; 64];
        let n = source.read_at(&mut tail, 24).unwrap();
        assert_eq!(&tail[..n], b"A;-0.1\n");
        assert_eq!(source.read_at(&mut tail, 1_000).unwrap(), 0);

        assert_eq!(source.preload().unwrap(), CONTENT.len() as u64);
        assert_eq!(source.slice(13, 6).unwrap(), b"Berlin");
        assert_eq!(source.slice(24, 100).unwrap(), b"A;-0.1\n");
        assert!(source.slice(500, 10).unwrap().is_empty());

        source.close().unwrap();
        assert!(!source.is_open());
        assert!(matches!(source.close(), Err(SourceError::NotOpen)));
        assert!(matches!(source.slice(0, 1), Err(SourceError::NotOpen)));
    }

    #[test]
    fn disk_source_lifecycle() {
        check_lifecycle(DiskSource::new());
    }

    #[test]
    fn mmap_source_lifecycle() {
        check_lifecycle(MmapSource::new());
    }

    #[test]
    fn disk_source_slices_only_after_preload() {
        let file = input_file(CONTENT);
        let mut source = DiskSource::new();
        source.open(file.path()).unwrap();
        assert!(matches!(source.slice(0, 4), Err(SourceError::NotLoaded)));
        source.preload().unwrap();
        assert_eq!(source.slice(0, 4).unwrap(), b"Hamb");
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            DiskSource::new().open(&missing),
            Err(SourceError::Open { .. })
        ));
        assert!(matches!(
            MmapSource::new().open(&missing),
            Err(SourceError::Open { .. })
        ));
        assert!(matches!(
            DiskSource::new().open(Path::new("")),
            Err(SourceError::EmptyPath)
        ));
    }

    #[test]
    fn empty_file_is_served_as_empty() {
        let file = input_file(b"");
        let mut mapped = MmapSource::new();
        mapped.open(file.path()).unwrap();
        assert_eq!(mapped.size(), 0);
        assert!(mapped.slice(0, 16).unwrap().is_empty());
        assert_eq!(mapped.read_at(&mut [0u8; 16], 0).unwrap(), 0);

        let mut disk = DiskSource::new();
        disk.open(file.path()).unwrap();
        assert_eq!(disk.preload().unwrap(), 0);
        assert!(disk.slice(0, 16).unwrap().is_empty());
    }
}
