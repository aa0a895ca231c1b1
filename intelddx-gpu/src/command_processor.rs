// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Batch command-stream parser.
//!
//! Splits a submitted batch into commands using the length rules of each
//! command client. Used by the simulated device to validate submissions and
//! by debug dumps.
//!
//! ## Length rules
//!
//! | Client | Header bits   | Dwords                                   |
//! |--------|---------------|------------------------------------------|
//! | MI     | 31:29 = 0     | 1 for opcodes < 0x10, else (len & 0x3F)+2 |
//! | 2D     | 31:29 = 2     | (len & 0xFF) + 2                         |
//! | 3D     | 31:29 = 3     | inline prim: (len & 0xFFFF)+2, else (len & 0xFF)+2 |

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::regs::MI_BATCH_BUFFER_END;

/// Command client from header bits [31:29].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Client {
    Mi,
    Blt,
    Render,
    Unknown(u32),
}

impl Client {
    fn from_header(header: u32) -> Self {
        match header >> 29 {
            0 => Self::Mi,
            2 => Self::Blt,
            3 => Self::Render,
            other => Self::Unknown(other),
        }
    }
}

/// One parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Word offset of the header within the batch.
    pub offset: usize,
    pub client: Client,
    pub header: u32,
    /// Header plus payload.
    pub dwords: Vec<u32>,
}

impl Command {
    /// MI opcode (bits [28:23]).
    pub fn mi_opcode(&self) -> u32 {
        (self.header >> 23) & 0x3F
    }

    /// 2D opcode (bits [28:22]).
    pub fn blt_opcode(&self) -> u32 {
        (self.header >> 22) & 0x7F
    }

    pub fn is_batch_end(&self) -> bool {
        self.header == MI_BATCH_BUFFER_END
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("command at word {offset} needs {needed} words, batch ends first")]
    Truncated { offset: usize, needed: usize },
    #[error("unknown command client in header 0x{header:08X} at word {offset}")]
    UnknownClient { offset: usize, header: u32 },
}

/// Number of dwords in the command starting with `header`.
pub fn command_length(header: u32) -> Option<usize> {
    match Client::from_header(header) {
        Client::Mi => {
            let opcode = (header >> 23) & 0x3F;
            if opcode < 0x10 {
                Some(1)
            } else {
                Some((header & 0x3F) as usize + 2)
            }
        }
        Client::Blt => Some((header & 0xFF) as usize + 2),
        Client::Render => {
            let opcode = (header >> 24) & 0x1F;
            if opcode == 0x1F {
                Some((header & 0xFFFF) as usize + 2)
            } else {
                Some((header & 0xFF) as usize + 2)
            }
        }
        Client::Unknown(_) => None,
    }
}

/// Split `words` into commands.
pub fn parse_batch(words: &[u32]) -> Result<Vec<Command>, ParseError> {
    let mut commands = Vec::new();
    let mut pos = 0;

    while pos < words.len() {
        let header = words[pos];
        let len = command_length(header).ok_or(ParseError::UnknownClient {
            offset: pos,
            header,
        })?;
        if pos + len > words.len() {
            return Err(ParseError::Truncated {
                offset: pos,
                needed: len,
            });
        }
        commands.push(Command {
            offset: pos,
            client: Client::from_header(header),
            header,
            dwords: words[pos..pos + len].to_vec(),
        });
        pos += len;
    }

    Ok(commands)
}

/// Decode a little-endian byte image of a batch into words.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    let mut cursor = Cursor::new(bytes);
    let mut words = Vec::with_capacity(bytes.len() / 4);
    while let Ok(w) = cursor.read_u32::<LittleEndian>() {
        words.push(w);
    }
    words
}

/// Render a batch as one line per command, for debug logging.
pub fn dump_batch(words: &[u32]) -> String {
    match parse_batch(words) {
        Ok(commands) => commands
            .iter()
            .map(|c| {
                let payload: Vec<String> = c.dwords.iter().map(|w| format!("{:08x}", w)).collect();
                format!("{:04}: {:?} {}", c.offset, c.client, payload.join(" "))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => format!("<unparseable batch: {}>", e),
    }
}
