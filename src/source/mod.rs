//! Byte-stream input sources
//!
//! [`InputSource`] abstracts the byte stream a decoder reads from. The
//! engine core never touches sources directly; the shipped implementations
//! ([`MemoryInputSource`], [`FileInputSource`]) back the reference decoder
//! and the test suite.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A seekable stream of bytes feeding a decoder.
pub trait InputSource: Send {
    /// Open the source for reading.
    fn open(&mut self) -> Result<()>;

    /// Close the source.
    fn close(&mut self) -> Result<()>;

    /// Whether the source is open.
    fn is_open(&self) -> bool;

    /// Read up to `buf.len()` bytes, returning the number read. Zero means
    /// end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Whether the read position is at the end of the stream.
    fn at_eof(&self) -> bool;

    /// Current read offset in bytes.
    fn offset(&self) -> i64;

    /// Total length in bytes, or -1 if unknown.
    fn length(&self) -> i64;

    /// Whether `seek_to_offset` is supported.
    fn supports_seeking(&self) -> bool {
        false
    }

    /// Seek to an absolute byte offset.
    fn seek_to_offset(&mut self, _offset: i64) -> Result<()> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "source does not support seeking",
        )))
    }

    /// Read exactly `buf.len()` bytes.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream",
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Read a big-endian u16.
    fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Read a little-endian u16.
    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a big-endian u32.
    fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a little-endian u32.
    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a big-endian u64.
    fn read_u64_be(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Read a little-endian u64.
    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// An input source backed by an in-memory byte buffer.
pub struct MemoryInputSource {
    bytes: Vec<u8>,
    position: usize,
    open: bool,
}

impl MemoryInputSource {
    /// Create a source over `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryInputSource {
            bytes,
            position: 0,
            open: false,
        }
    }
}

impl InputSource for MemoryInputSource {
    fn open(&mut self) -> Result<()> {
        self.position = 0;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.bytes.len() - self.position;
        let count = buf.len().min(remaining);
        buf[..count].copy_from_slice(&self.bytes[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn at_eof(&self) -> bool {
        self.position >= self.bytes.len()
    }

    fn offset(&self) -> i64 {
        self.position as i64
    }

    fn length(&self) -> i64 {
        self.bytes.len() as i64
    }

    fn supports_seeking(&self) -> bool {
        true
    }

    fn seek_to_offset(&mut self, offset: i64) -> Result<()> {
        if offset < 0 || offset as usize > self.bytes.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("offset {offset} outside stream"),
            )));
        }
        self.position = offset as usize;
        Ok(())
    }
}

/// An input source backed by a file on disk.
pub struct FileInputSource {
    path: PathBuf,
    file: Option<File>,
    length: i64,
    offset: i64,
}

impl FileInputSource {
    /// Create a source for the file at `path`. The file is opened by
    /// [`InputSource::open`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileInputSource {
            path: path.as_ref().to_path_buf(),
            file: None,
            length: -1,
            offset: 0,
        }
    }

    /// The path this source reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InputSource for FileInputSource {
    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.length = file.metadata().map(|m| m.len() as i64).unwrap_or(-1);
        self.offset = 0;
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file = None;
        self.offset = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "source is not open",
            ))
        })?;
        let count = file.read(buf)?;
        self.offset += count as i64;
        Ok(count)
    }

    fn at_eof(&self) -> bool {
        self.length >= 0 && self.offset >= self.length
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn length(&self) -> i64 {
        self.length
    }

    fn supports_seeking(&self) -> bool {
        true
    }

    fn seek_to_offset(&mut self, offset: i64) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "source is not open",
            ))
        })?;
        file.seek(SeekFrom::Start(offset as u64))?;
        self.offset = offset;
        Ok(())
    }
}

/// Adapter exposing a boxed [`InputSource`] as `std::io::Read + Seek`, for
/// handing a source to byte-oriented parser crates.
pub struct SourceReader {
    source: Box<dyn InputSource>,
}

impl SourceReader {
    /// Wrap `source`, opening it if necessary.
    pub fn new(mut source: Box<dyn InputSource>) -> Result<Self> {
        if !source.is_open() {
            source.open()?;
        }
        Ok(SourceReader { source })
    }

    /// Recover the wrapped source.
    pub fn into_inner(self) -> Box<dyn InputSource> {
        self.source
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.source
            .read(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.source.offset() + delta,
            SeekFrom::End(delta) => {
                let length = self.source.length();
                if length < 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "stream length unknown",
                    ));
                }
                length + delta
            }
        };
        self.source
            .seek_to_offset(target)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(target as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads() {
        let mut source = MemoryInputSource::new(vec![1, 2, 3, 4, 5]);
        source.open().unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, &[1, 2, 3]);
        assert_eq!(source.offset(), 3);
        assert!(!source.at_eof());

        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert!(source.at_eof());
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_source_seek() {
        let mut source = MemoryInputSource::new((0u8..16).collect());
        source.open().unwrap();
        source.seek_to_offset(8).unwrap();

        let mut buf = [0u8; 2];
        source.read(&mut buf).unwrap();
        assert_eq!(&buf, &[8, 9]);

        assert!(source.seek_to_offset(17).is_err());
        assert!(source.seek_to_offset(-1).is_err());
    }

    #[test]
    fn test_typed_reads() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x1234u16.to_be_bytes());
        bytes.extend_from_slice(&0x5678u16.to_le_bytes());
        bytes.extend_from_slice(&0xDEADBEEFu32.to_be_bytes());
        bytes.extend_from_slice(&0xC0FFEEu64.to_le_bytes());

        let mut source = MemoryInputSource::new(bytes);
        source.open().unwrap();
        assert_eq!(source.read_u16_be().unwrap(), 0x1234);
        assert_eq!(source.read_u16_le().unwrap(), 0x5678);
        assert_eq!(source.read_u32_be().unwrap(), 0xDEADBEEF);
        assert_eq!(source.read_u64_le().unwrap(), 0xC0FFEE);
        assert!(source.read_u16_be().is_err());
    }

    #[test]
    fn test_file_source() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abcdef").unwrap();

        let mut source = FileInputSource::new(file.path());
        assert!(!source.is_open());
        source.open().unwrap();
        assert_eq!(source.length(), 6);

        let mut buf = [0u8; 6];
        source.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
        assert!(source.at_eof());

        source.seek_to_offset(2).unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"cdef");
    }

    #[test]
    fn test_source_reader_adapter() {
        let source = Box::new(MemoryInputSource::new((0u8..32).collect()));
        let mut reader = SourceReader::new(source).unwrap();

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[0, 1, 2, 3]);

        reader.seek(SeekFrom::End(-4)).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[28, 29, 30, 31]);
    }
}
