//! Minimal telnet layer for the backend stream.
//!
//! ICS-style servers speak telnet: they may interleave option negotiation with
//! text and terminate lines with `\r\n`. The decoder drops every command
//! sequence without answering it and normalises line endings, so the session
//! only ever sees plain text split on `\n`.

use std::borrow::Cow;

const IAC: u8 = 255;
const DONT: u8 = 254;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    /// Saw `\r`; the next byte decides what it meant.
    Cr,
    Iac,
    /// Saw `IAC WILL|WONT|DO|DONT`; the next byte is the option code.
    Option,
    Sub,
    SubIac,
}

/// Streaming decoder. State survives between calls so sequences split across
/// reads decode the same as if they arrived in one piece.
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: State,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `input` and append the resulting text bytes to `out`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            self.state = match self.state {
                State::Data => match b {
                    IAC => State::Iac,
                    b'\r' => State::Cr,
                    _ => {
                        out.push(b);
                        State::Data
                    }
                },
                State::Cr => match b {
                    b'\n' => {
                        out.push(b'\n');
                        State::Data
                    }
                    0 => {
                        out.push(b'\r');
                        State::Data
                    }
                    b'\r' => {
                        out.push(b'\r');
                        State::Cr
                    }
                    IAC => {
                        out.push(b'\r');
                        State::Iac
                    }
                    _ => {
                        out.push(b'\r');
                        out.push(b);
                        State::Data
                    }
                },
                State::Iac => match b {
                    IAC => {
                        out.push(IAC);
                        State::Data
                    }
                    WILL..=DONT => State::Option,
                    SB => State::Sub,
                    _ => State::Data,
                },
                State::Option => State::Data,
                State::Sub => match b {
                    IAC => State::SubIac,
                    _ => State::Sub,
                },
                State::SubIac => match b {
                    SE => State::Data,
                    _ => State::Sub,
                },
            };
        }
    }
}

/// Escape outbound data: a literal `0xFF` must be sent as `IAC IAC`.
pub fn escape_iac(bytes: &[u8]) -> Cow<'_, [u8]> {
    if !bytes.contains(&IAC) {
        return Cow::Borrowed(bytes);
    }
    let mut out = Vec::with_capacity(bytes.len() + 4);
    for &b in bytes {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    Cow::Owned(out)
}
