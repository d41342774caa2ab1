use glam::Vec3;

use super::anorms;

/// Longest string the reader will return, excluding the terminator.
pub const MAX_STRING_CHARS: usize = 2047;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MsgError {
    #[error("write of {requested} bytes overflows buffer of {max} bytes")]
    Overflow { requested: usize, max: usize },
    #[error("read of {needed} bytes past end of message ({remaining} remaining)")]
    ReadPastEnd { needed: usize, remaining: usize },
    #[error("direction index {0} out of range")]
    BadDirection(u8),
}

/// What a write past `max_size` does to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the write with [`MsgError::Overflow`].
    Fatal,
    /// Clear the buffer, raise the overflow flag and keep going. The owner
    /// checks [`SizeBuf::overflowed`] and discards the contents.
    Flag,
}

/// Fixed-capacity message buffer with a write cursor (the data length) and a
/// read cursor. Everything on the wire is little-endian.
#[derive(Debug, Clone)]
pub struct SizeBuf {
    data: Vec<u8>,
    max_size: usize,
    read_count: usize,
    policy: OverflowPolicy,
    overflowed: bool,
}

impl SizeBuf {
    pub fn new(max_size: usize) -> Self {
        Self::with_policy(max_size, OverflowPolicy::Fatal)
    }

    pub fn with_policy(max_size: usize, policy: OverflowPolicy) -> Self {
        Self {
            data: Vec::with_capacity(max_size),
            max_size,
            read_count: 0,
            policy,
            overflowed: false,
        }
    }

    /// Wraps a received datagram for reading.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            max_size: bytes.len(),
            read_count: 0,
            policy: OverflowPolicy::Fatal,
            overflowed: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn remaining_space(&self) -> usize {
        self.max_size - self.data.len()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }

    /// Bytes not yet consumed by the read cursor.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_count..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.read_count >= self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_count = 0;
        self.overflowed = false;
    }

    pub fn begin_reading(&mut self) {
        self.read_count = 0;
    }

    fn reserve(&mut self, n: usize) -> Result<bool, MsgError> {
        if self.data.len() + n <= self.max_size {
            return Ok(true);
        }

        match self.policy {
            OverflowPolicy::Fatal => Err(MsgError::Overflow {
                requested: n,
                max: self.max_size,
            }),
            OverflowPolicy::Flag => {
                log::warn!(
                    "SizeBuf overflow: {} + {} > {}, clearing",
                    self.data.len(),
                    n,
                    self.max_size
                );
                self.data.clear();
                self.overflowed = true;
                Ok(false)
            }
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), MsgError> {
        if self.reserve(bytes.len())? {
            self.data.extend_from_slice(bytes);
        }
        Ok(())
    }

    pub fn write_char(&mut self, value: i8) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), MsgError> {
        self.write(&[value])
    }

    pub fn write_short(&mut self, value: i16) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_long(&mut self, value: i32) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_float(&mut self, value: f32) -> Result<(), MsgError> {
        self.write(&value.to_le_bytes())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), MsgError> {
        let bytes = value.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        if self.reserve(end + 1)? {
            self.data.extend_from_slice(&bytes[..end]);
            self.data.push(0);
        }
        Ok(())
    }

    /// 1/8 unit precision, rounded half away from zero.
    pub fn write_coord(&mut self, value: f32) -> Result<(), MsgError> {
        self.write_short((value * 8.0).round() as i16)
    }

    pub fn write_pos(&mut self, pos: Vec3) -> Result<(), MsgError> {
        self.write_coord(pos.x)?;
        self.write_coord(pos.y)?;
        self.write_coord(pos.z)
    }

    pub fn write_angle(&mut self, degrees: f32) -> Result<(), MsgError> {
        self.write_byte(((degrees * 256.0 / 360.0).round() as i32 & 255) as u8)
    }

    pub fn write_angle16(&mut self, degrees: f32) -> Result<(), MsgError> {
        self.write_short(((degrees * 65536.0 / 360.0).round() as i32 & 65535) as u16 as i16)
    }

    pub fn write_dir(&mut self, dir: Vec3) -> Result<(), MsgError> {
        self.write_byte(anorms::closest_index(dir))
    }

    fn take(&mut self, n: usize) -> Result<&[u8], MsgError> {
        let remaining = self.data.len() - self.read_count;
        if n > remaining {
            self.read_count = self.data.len();
            return Err(MsgError::ReadPastEnd {
                needed: n,
                remaining,
            });
        }
        let start = self.read_count;
        self.read_count += n;
        Ok(&self.data[start..start + n])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], MsgError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_data(&mut self, n: usize) -> Result<Vec<u8>, MsgError> {
        self.take(n).map(<[u8]>::to_vec)
    }

    pub fn read_char(&mut self) -> Result<i8, MsgError> {
        self.take_array::<1>().map(i8::from_le_bytes)
    }

    pub fn read_byte(&mut self) -> Result<u8, MsgError> {
        self.take_array::<1>().map(|b| b[0])
    }

    pub fn read_short(&mut self) -> Result<i16, MsgError> {
        self.take_array::<2>().map(i16::from_le_bytes)
    }

    pub fn read_long(&mut self) -> Result<i32, MsgError> {
        self.take_array::<4>().map(i32::from_le_bytes)
    }

    pub fn read_float(&mut self) -> Result<f32, MsgError> {
        self.take_array::<4>().map(f32::from_le_bytes)
    }

    /// Reads up to a nul terminator. Running off the end yields whatever was
    /// read so far, which may be empty.
    pub fn read_string(&mut self) -> String {
        self.read_terminated(|b| b == 0)
    }

    /// Like [`read_string`](Self::read_string) but also stops at a newline.
    pub fn read_string_line(&mut self) -> String {
        self.read_terminated(|b| b == 0 || b == b'\n')
    }

    fn read_terminated(&mut self, stop: impl Fn(u8) -> bool) -> String {
        let mut out = Vec::new();
        while out.len() < MAX_STRING_CHARS {
            let Some(&b) = self.data.get(self.read_count) else {
                break;
            };
            self.read_count += 1;
            if stop(b) {
                break;
            }
            out.push(b);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    pub fn read_coord(&mut self) -> Result<f32, MsgError> {
        Ok(self.read_short()? as f32 * 0.125)
    }

    pub fn read_pos(&mut self) -> Result<Vec3, MsgError> {
        Ok(Vec3::new(
            self.read_coord()?,
            self.read_coord()?,
            self.read_coord()?,
        ))
    }

    pub fn read_angle(&mut self) -> Result<f32, MsgError> {
        Ok(self.read_char()? as f32 * (360.0 / 256.0))
    }

    pub fn read_angle16(&mut self) -> Result<f32, MsgError> {
        Ok(self.read_short()? as f32 * (360.0 / 65536.0))
    }

    pub fn read_dir(&mut self) -> Result<Vec3, MsgError> {
        let index = self.read_byte()?;
        anorms::direction(index).ok_or(MsgError::BadDirection(index))
    }
}

/// Smallest difference between two angles in degrees.
pub fn angle_delta(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}
