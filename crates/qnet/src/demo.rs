//! Recorded server message streams: each message is a little-endian `i32`
//! length and the bytes, and a length of -1 ends the recording.

use std::io::{self, Read, Write};

use crate::protocol::MAX_MSGLEN;

const END_OF_DEMO: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("demo message length {0} out of range")]
    BadLength(i32),
    #[error("you must be in a level to record")]
    NotActive,
    #[error("already recording")]
    AlreadyRecording,
}

pub struct DemoWriter<W: Write> {
    out: W,
    messages: usize,
}

impl<W: Write> DemoWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, messages: 0 }
    }

    pub fn write_message(&mut self, data: &[u8]) -> Result<(), DemoError> {
        if data.len() > MAX_MSGLEN {
            return Err(DemoError::BadLength(data.len() as i32));
        }
        self.out.write_all(&(data.len() as i32).to_le_bytes())?;
        self.out.write_all(data)?;
        self.messages += 1;
        Ok(())
    }

    pub fn messages(&self) -> usize {
        self.messages
    }

    /// Writes the end marker and hands back the sink.
    pub fn finish(mut self) -> Result<W, DemoError> {
        self.out.write_all(&END_OF_DEMO.to_le_bytes())?;
        self.out.flush()?;
        Ok(self.out)
    }
}

pub struct DemoReader<R: Read> {
    input: R,
    done: bool,
}

impl<R: Read> DemoReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    /// Next recorded message. A recording cut off without its end marker
    /// ends cleanly at a message boundary.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>, DemoError> {
        if self.done {
            return Ok(None);
        }

        let mut len = [0u8; 4];
        match self.input.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let len = i32::from_le_bytes(len);
        if len == END_OF_DEMO {
            self.done = true;
            return Ok(None);
        }
        if len < 0 || len as usize > MAX_MSGLEN {
            self.done = true;
            return Err(DemoError::BadLength(len));
        }

        let mut data = vec![0u8; len as usize];
        self.input.read_exact(&mut data)?;
        Ok(Some(data))
    }
}

impl<R: Read> Iterator for DemoReader<R> {
    type Item = Result<Vec<u8>, DemoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_play_back() {
        let mut writer = DemoWriter::new(Vec::new());
        writer.write_message(b"first").unwrap();
        writer.write_message(&[]).unwrap();
        writer.write_message(b"third").unwrap();
        assert_eq!(writer.messages(), 3);
        let bytes = writer.finish().unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], &[0xff; 4]);

        let messages: Vec<Vec<u8>> = DemoReader::new(bytes.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(messages, vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]);
    }

    #[test]
    fn test_bad_length() {
        let mut bytes = 5000i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut reader = DemoReader::new(bytes.as_slice());
        assert!(matches!(reader.next_message(), Err(DemoError::BadLength(5000))));
        assert!(reader.next().is_none());
    }
}
