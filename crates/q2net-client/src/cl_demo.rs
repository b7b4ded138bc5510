// cl_demo.rs — reading recorded server messages
//
// A demo is a flat run of blocks: a little-endian i32 length followed by
// that many bytes of a server message. A length of -1 ends the recording.

use std::io::{self, Read, Write};

use thiserror::Error;

use q2net_common::qcommon::MAX_MSGLEN;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("demo read failed: {0}")]
    Io(#[from] io::Error),
    #[error("demo file truncated")]
    Truncated,
    #[error("demo message length {0} out of range")]
    BadLength(i32),
}

/// Pulls message blocks out of a demo stream one at a time.
pub struct DemoReader<R: Read> {
    reader: R,
    finished: bool,
    blocks: usize,
}

impl<R: Read> DemoReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
            blocks: 0,
        }
    }

    /// Number of blocks returned so far.
    pub fn blocks_read(&self) -> usize {
        self.blocks
    }

    /// Next message, or `None` once the end marker or a clean end of
    /// file at a block boundary has been reached.
    pub fn next_block(&mut self) -> Result<Option<Vec<u8>>, DemoError> {
        if self.finished {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        let got = read_full(&mut self.reader, &mut len_bytes)?;
        if got == 0 {
            self.finished = true;
            return Ok(None);
        }
        if got < len_bytes.len() {
            self.finished = true;
            return Err(DemoError::Truncated);
        }

        let len = i32::from_le_bytes(len_bytes);
        if len == -1 {
            self.finished = true;
            return Ok(None);
        }
        if len < 0 || len as usize > MAX_MSGLEN {
            self.finished = true;
            return Err(DemoError::BadLength(len));
        }

        let mut data = vec![0u8; len as usize];
        if read_full(&mut self.reader, &mut data)? < data.len() {
            self.finished = true;
            return Err(DemoError::Truncated);
        }

        self.blocks += 1;
        Ok(Some(data))
    }
}

impl<R: Read> Iterator for DemoReader<R> {
    type Item = Result<Vec<u8>, DemoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

// Like read_exact, but reports how much arrived before end of file.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Appends one message block.
pub fn write_demo_block<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = i32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "demo block too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)
}

/// Writes the end-of-demo marker.
pub fn write_demo_end<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&(-1i32).to_le_bytes())
}
