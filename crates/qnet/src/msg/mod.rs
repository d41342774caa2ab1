pub mod anorms;
mod sizebuf;

pub use sizebuf::{MAX_STRING_CHARS, MsgError, OverflowPolicy, SizeBuf, angle_delta};
