use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A seekable, readable and writable byte stream that can also be resized.
///
/// This is the backing store for a MOBI container. `std` has no trait for
/// truncation, so implementors provide `set_len` themselves.
pub trait ContainerStream: Read + Write + Seek {
    /// Hard-set the stream length, truncating or zero-extending.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Total length of the stream. Restores the current position.
    fn stream_len(&mut self) -> io::Result<u64> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if current != end {
            self.seek(SeekFrom::Start(current))?;
        }
        Ok(end)
    }
}

impl ContainerStream for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl ContainerStream for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl ContainerStream for Cursor<&mut Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl<S: ContainerStream + ?Sized> ContainerStream for &mut S {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn stream_len(&mut self) -> io::Result<u64> {
        (**self).stream_len()
    }
}
