//! Connectionless packets: four 0xff bytes followed by a text command.

use super::address::NetAddr;
use super::transport::{NetSrc, Transport};

pub const OOB_MARKER: [u8; 4] = [0xff; 4];

pub fn is_connectionless(data: &[u8]) -> bool {
    data.len() >= OOB_MARKER.len() && data[..OOB_MARKER.len()] == OOB_MARKER
}

pub fn out_of_band(net: &mut impl Transport, sock: NetSrc, to: &NetAddr, text: &str) {
    let mut packet = Vec::with_capacity(OOB_MARKER.len() + text.len());
    packet.extend_from_slice(&OOB_MARKER);
    packet.extend_from_slice(text.as_bytes());
    net.send(sock, to, &packet);
}

/// Splits a command line on whitespace. Double quotes group words and are
/// removed.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    tokens
}

/// Everything after the first token, as typed.
pub fn args(line: &str) -> &str {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(i) => line[i..].trim_start(),
        None => "",
    }
}

/// Looks up `key` in a `\key\value\key\value` info string.
pub fn info_value<'a>(info: &'a str, key: &str) -> Option<&'a str> {
    let mut parts = info.strip_prefix('\\').unwrap_or(info).split('\\');
    while let Some(k) = parts.next() {
        let v = parts.next()?;
        if k == key {
            return Some(v);
        }
    }
    None
}
