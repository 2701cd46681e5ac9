//! Page store for block-level file I/O.
//!
//! A page store knows nothing about tree semantics: it reads and writes
//! fixed-size blocks at byte offsets of one backing file. Short transfers and
//! interrupted calls are retried up to [`BT_MAXRETRIES`] attempts.

use bindex_common::page::BT_MAXRETRIES;
use bindex_common::{BindexError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Backing device for a page store.
///
/// Implemented for [`File`]. Tests substitute in-memory devices that fail
/// on demand.
pub trait BlockDevice: Read + Write + Seek + Send {
    /// Resizes the device to exactly `len` bytes, zero-filling growth.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Returns the device length in bytes.
    fn len(&mut self) -> io::Result<u64>;

    /// Forces written data to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl BlockDevice for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Reads and writes fixed-size blocks of one index file.
pub struct PageStore {
    /// Backing device.
    device: Box<dyn BlockDevice>,
    /// Path of the backing file, for diagnostics.
    path: PathBuf,
    /// Rejects writes when true.
    read_only: bool,
}

impl PageStore {
    /// Creates (or truncates) the backing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self::from_device(Box::new(file), path, false))
    }

    /// Opens an existing backing file.
    ///
    /// A missing file is reported as `IndexNotFound`.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BindexError::IndexNotFound(path.display().to_string()),
                _ => BindexError::Io(e),
            })?;

        Ok(Self::from_device(Box::new(file), path, read_only))
    }

    /// Wraps an arbitrary device.
    pub fn from_device(device: Box<dyn BlockDevice>, path: impl AsRef<Path>, read_only: bool) -> Self {
        Self {
            device,
            path: path.as_ref().to_path_buf(),
            read_only,
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        let mut attempts = 0;

        while done < buf.len() {
            if attempts >= BT_MAXRETRIES {
                return Err(BindexError::RetriesExhausted {
                    op: "read",
                    offset,
                    attempts,
                });
            }
            attempts += 1;

            self.device.seek(SeekFrom::Start(offset + done as u64))?;
            match self.device.read(&mut buf[done..]) {
                Ok(n) if n > 0 => done += n,
                Ok(_) => self.note_retry("read", offset, attempts, done, buf.len()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    self.note_retry("read", offset, attempts, done, buf.len())
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Writes all of `data` at `offset`.
    pub fn write_block(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(BindexError::ReadOnly);
        }

        let mut done = 0;
        let mut attempts = 0;

        while done < data.len() {
            if attempts >= BT_MAXRETRIES {
                return Err(BindexError::RetriesExhausted {
                    op: "write",
                    offset,
                    attempts,
                });
            }
            attempts += 1;

            self.device.seek(SeekFrom::Start(offset + done as u64))?;
            match self.device.write(&data[done..]) {
                Ok(n) if n > 0 => done += n,
                Ok(_) => self.note_retry("write", offset, attempts, done, data.len()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    self.note_retry("write", offset, attempts, done, data.len())
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn note_retry(&self, op: &'static str, offset: u64, attempt: u32, done: usize, want: usize) {
        tracing::warn!(
            path = %self.path.display(),
            op,
            offset,
            attempt,
            done,
            want,
            "short block transfer, retrying"
        );
    }

    /// Grows the file to `new_size` bytes. Never shrinks it.
    pub fn extend_file(&mut self, new_size: u64) -> Result<()> {
        if self.read_only {
            return Err(BindexError::ReadOnly);
        }
        if new_size > self.device.len()? {
            self.device.set_len(new_size)?;
        }
        Ok(())
    }

    /// Returns the file size in bytes.
    pub fn file_size(&mut self) -> Result<u64> {
        Ok(self.device.len()?)
    }

    /// Forces written blocks to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.device.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// In-memory device that misbehaves for a configured number of calls.
    pub(crate) struct FlakyDevice {
        pub inner: Cursor<Vec<u8>>,
        /// Calls returning `Interrupted` before behaving.
        pub interrupts: u32,
        /// Cap on bytes moved per call.
        pub chunk: usize,
        /// Fail every call with a hard error.
        pub broken: bool,
    }

    impl FlakyDevice {
        pub(crate) fn new(len: usize) -> Self {
            Self {
                inner: Cursor::new(vec![0u8; len]),
                interrupts: 0,
                chunk: usize::MAX,
                broken: false,
            }
        }

        fn trip(&mut self) -> io::Result<()> {
            if self.broken {
                return Err(io::Error::other("device gone"));
            }
            if self.interrupts > 0 {
                self.interrupts -= 1;
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    impl Read for FlakyDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.trip()?;
            let n = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..n])
        }
    }

    impl Write for FlakyDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.trip()?;
            let n = buf.len().min(self.chunk);
            self.inner.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakyDevice {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl BlockDevice for FlakyDevice {
        fn set_len(&mut self, len: u64) -> io::Result<()> {
            self.inner.get_mut().resize(len as usize, 0);
            Ok(())
        }

        fn len(&mut self) -> io::Result<u64> {
            Ok(self.inner.get_ref().len() as u64)
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_page_store_create_write_read() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.xid")).unwrap();
        assert_eq!(store.file_size().unwrap(), 0);

        store.extend_file(1024).unwrap();
        assert_eq!(store.file_size().unwrap(), 1024);

        let mut data = [0u8; 512];
        data[0] = 0xAB;
        data[511] = 0xCD;
        store.write_block(512, &data).unwrap();

        let mut buf = [0u8; 512];
        store.read_block(512, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[511], 0xCD);

        store.read_block(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_store_extend_never_shrinks() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.xid")).unwrap();
        store.extend_file(2048).unwrap();
        store.extend_file(512).unwrap();
        assert_eq!(store.file_size().unwrap(), 2048);
    }

    #[test]
    fn test_page_store_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");
        {
            let mut store = PageStore::create(&path).unwrap();
            store.extend_file(256).unwrap();
            store.write_block(128, &[0x5A; 128]).unwrap();
            store.sync().unwrap();
        }

        let mut store = PageStore::open(&path, true).unwrap();
        assert!(store.is_read_only());
        let mut buf = [0u8; 128];
        store.read_block(128, &mut buf).unwrap();
        assert_eq!(buf, [0x5A; 128]);
    }

    #[test]
    fn test_page_store_open_missing() {
        let dir = tempdir().unwrap();
        let err = PageStore::open(dir.path().join("nope.xid"), false).unwrap_err();
        assert!(matches!(err, BindexError::IndexNotFound(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_page_store_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");
        PageStore::create(&path).unwrap();

        let mut store = PageStore::open(&path, true).unwrap();
        assert!(matches!(
            store.write_block(0, &[1u8; 8]),
            Err(BindexError::ReadOnly)
        ));
        assert!(matches!(store.extend_file(64), Err(BindexError::ReadOnly)));
    }

    #[test]
    fn test_page_store_retries_interrupted() {
        let mut device = FlakyDevice::new(256);
        device.interrupts = 5;
        let mut store = PageStore::from_device(Box::new(device), "mem", false);

        store.write_block(0, &[9u8; 128]).unwrap();
        let mut buf = [0u8; 128];
        store.read_block(0, &mut buf).unwrap();
        assert_eq!(buf, [9u8; 128]);
    }

    #[test]
    fn test_page_store_completes_short_transfers() {
        let mut device = FlakyDevice::new(512);
        device.chunk = 7;
        let mut store = PageStore::from_device(Box::new(device), "mem", false);

        let data: Vec<u8> = (0..200u8).collect();
        store.write_block(100, &data).unwrap();
        let mut buf = vec![0u8; 200];
        store.read_block(100, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_page_store_retries_exhausted() {
        let mut device = FlakyDevice::new(256);
        device.interrupts = BT_MAXRETRIES + 1;
        let mut store = PageStore::from_device(Box::new(device), "mem", false);

        let mut buf = [0u8; 64];
        let err = store.read_block(64, &mut buf).unwrap_err();
        match err {
            BindexError::RetriesExhausted {
                op,
                offset,
                attempts,
            } => {
                assert_eq!(op, "read");
                assert_eq!(offset, 64);
                assert_eq!(attempts, BT_MAXRETRIES);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_page_store_read_past_eof_exhausts() {
        let device = FlakyDevice::new(64);
        let mut store = PageStore::from_device(Box::new(device), "mem", false);

        let mut buf = [0u8; 128];
        let err = store.read_block(0, &mut buf).unwrap_err();
        assert!(matches!(err, BindexError::RetriesExhausted { op: "read", .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_page_store_hard_error_is_not_retried() {
        let mut device = FlakyDevice::new(64);
        device.broken = true;
        let mut store = PageStore::from_device(Box::new(device), "mem", false);

        let err = store.write_block(0, &[1u8; 8]).unwrap_err();
        assert!(matches!(err, BindexError::Io(_)));
    }
}
