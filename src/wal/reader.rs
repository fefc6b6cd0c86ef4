//! WAL Reader
//!
//! Handles reading records from the WAL file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{Result, TideError};

use super::entry::{WalEntry, HEADER_SIZE, MAX_RECORD_SIZE};

/// Reads records from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last record returned
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next record from the WAL
    ///
    /// Returns `Ok(None)` at a clean end of file. A record cut short by the
    /// end of file is reported as `WalTruncated`; a CRC mismatch or an
    /// implausible length as `WalCorruption`. Either way `position()` still
    /// points at the start of that record.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_fully(&mut self.reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(TideError::WalTruncated(format!(
                "header at offset {} ({} of {} bytes)",
                self.position, got, HEADER_SIZE
            )));
        }

        let (lsn, crc, len) = WalEntry::decode_header(&header);
        if len > MAX_RECORD_SIZE {
            return Err(TideError::WalCorruption(format!(
                "implausible record length {} at offset {}",
                len, self.position
            )));
        }

        let mut body = vec![0u8; len as usize];
        let got = read_fully(&mut self.reader, &mut body)?;
        if got < body.len() {
            return Err(TideError::WalTruncated(format!(
                "record at offset {} ({} of {} bytes)",
                self.position,
                got,
                body.len()
            )));
        }

        let entry = WalEntry::deserialize(lsn, crc, &body)?;
        self.position += (HEADER_SIZE + body.len()) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last successfully read record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all valid records, stopping after the first error
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL records
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or EOF, returning the number of bytes read
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
