use std::io::{Read, SeekFrom};
use std::ops::Range;

use super::stream::ContainerStream;
use crate::error::{Error, Result};

/// A `(start, stop)` window onto a [`ContainerStream`].
///
/// The slice owns no data. Every operation borrows the stream for the
/// duration of the call and translates slice-relative offsets into absolute
/// stream positions, so reading a record never materializes the rest of the
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSlice {
    start: u64,
    stop: u64,
}

impl RecordSlice {
    /// A slice over `start..stop`. A `stop` before `start` gives an empty slice.
    pub fn new(start: u64, stop: u64) -> Self {
        Self {
            start,
            stop: stop.max(start),
        }
    }

    /// A slice from `start` to the current end of the stream.
    pub fn to_end<S: ContainerStream + ?Sized>(stream: &mut S, start: u64) -> Result<Self> {
        let stop = stream.stream_len()?;
        Ok(Self::new(start, stop))
    }

    /// A slice covering the whole stream.
    pub fn whole<S: ContainerStream + ?Sized>(stream: &mut S) -> Result<Self> {
        Self::to_end(stream, 0)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn stop(&self) -> u64 {
        self.stop
    }

    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the byte at `index`, or `None` past the end of the slice.
    pub fn get<S: ContainerStream + ?Sized>(&self, stream: &mut S, index: u64) -> Result<Option<u8>> {
        if index >= self.len() {
            return Ok(None);
        }
        stream.seek(SeekFrom::Start(self.start + index))?;
        let mut byte = [0u8; 1];
        match stream.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Read `range` with the given stride.
    ///
    /// The range is clamped to the slice. Empty or inverted ranges give an
    /// empty vector rather than an error. A negative stride walks the range
    /// backwards from its last byte.
    pub fn read<S: ContainerStream + ?Sized>(
        &self,
        stream: &mut S,
        range: Range<u64>,
        stride: i64,
    ) -> Result<Vec<u8>> {
        if stride == 0 {
            return Err(Error::InvalidMobi("slice step cannot be zero".into()));
        }
        let (lo, hi) = self.clamp(range);
        if hi <= lo {
            return Ok(Vec::new());
        }

        stream.seek(SeekFrom::Start(self.start + lo))?;
        let mut data = Vec::with_capacity((hi - lo) as usize);
        (&mut *stream).take(hi - lo).read_to_end(&mut data)?;

        if stride == 1 {
            return Ok(data);
        }
        let step = stride.unsigned_abs() as usize;
        if stride > 0 {
            Ok(data.into_iter().step_by(step).collect())
        } else {
            Ok(data.into_iter().rev().step_by(step).collect())
        }
    }

    /// Read the entire slice.
    pub fn read_all<S: ContainerStream + ?Sized>(&self, stream: &mut S) -> Result<Vec<u8>> {
        self.read(stream, 0..self.len(), 1)
    }

    /// Write `value` over `range` with the given stride.
    ///
    /// `value` must supply exactly one byte per target position, otherwise
    /// nothing is written and [`Error::LengthMismatch`] is returned.
    pub fn write<S: ContainerStream + ?Sized>(
        &self,
        stream: &mut S,
        range: Range<u64>,
        stride: i64,
        value: &[u8],
    ) -> Result<()> {
        if stride == 0 {
            return Err(Error::InvalidMobi("slice step cannot be zero".into()));
        }
        let (lo, hi) = self.clamp(range);
        let size = hi.saturating_sub(lo);
        let step = stride.unsigned_abs();
        let positions = size.div_ceil(step) as usize;

        if value.len() != positions {
            return Err(Error::LengthMismatch {
                expected: positions,
                found: value.len(),
            });
        }
        if positions == 0 {
            return Ok(());
        }

        if stride == 1 {
            stream.seek(SeekFrom::Start(self.start + lo))?;
            stream.write_all(value)?;
            return Ok(());
        }

        for (i, &byte) in value.iter().enumerate() {
            let offset = if stride > 0 {
                lo + i as u64 * step
            } else {
                hi - 1 - i as u64 * step
            };
            stream.seek(SeekFrom::Start(self.start + offset))?;
            stream.write_all(&[byte])?;
        }
        Ok(())
    }

    /// Overwrite the entire slice. `value` must be exactly `len()` bytes.
    pub fn write_all<S: ContainerStream + ?Sized>(&self, stream: &mut S, value: &[u8]) -> Result<()> {
        self.write(stream, 0..self.len(), 1, value)
    }

    /// Truncate the stream at `start` and write `blocks` back to back.
    ///
    /// This replaces everything from the start of the slice to the end of
    /// the stream in one pass.
    pub fn update<S, B>(&self, stream: &mut S, blocks: &[B]) -> Result<()>
    where
        S: ContainerStream + ?Sized,
        B: AsRef<[u8]>,
    {
        stream.seek(SeekFrom::Start(self.start))?;
        stream.set_len(self.start)?;
        for block in blocks {
            stream.write_all(block.as_ref())?;
        }
        stream.flush()?;
        Ok(())
    }

    /// Hard-set the length of the underlying stream.
    pub fn truncate<S: ContainerStream + ?Sized>(&self, stream: &mut S, len: u64) -> Result<()> {
        stream.set_len(len)?;
        Ok(())
    }

    fn clamp(&self, range: Range<u64>) -> (u64, u64) {
        let len = self.len();
        (range.start.min(len), range.end.min(len))
    }
}
