// Cadenza
// Copyright (c) 2024 The Cadenza Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` enumerates all failures reported by the Cadenza decoders and
/// writers. Every error is fatal to the decoder instance that produced it:
/// there is no resynchronization and no retry.
#[derive(Debug)]
pub enum Error {
    /// The stream does not begin with the `fLaC` stream marker.
    BadMarker(u32),
    /// A frame does not begin with the 14-bit frame synchronization code.
    BadSync(u16),
    /// A reserved bit that must be zero was set.
    BadReserved(&'static str),
    /// A reserved code point appeared in the stream.
    Reserved(&'static str),
    /// The stream contained malformed data that fits no more specific kind.
    DecodeError(&'static str),
    /// The stream uses a feature this decoder does not support.
    Unsupported(&'static str),
    /// The stream declares blocks larger than the decoder's sample buffer.
    BufferTooSmall { required: u16, capacity: usize },
    /// The residual partition count does not evenly divide the block size.
    BadPartitioning { block_size: u16, partitions: u32 },
    /// The byte source was exhausted in the middle of a field.
    UnexpectedEnd,
    /// A facade call was made in the wrong lifecycle state.
    IllegalState(&'static str),
    /// An IO error occurred while reading or writing a stream.
    IoError(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::BadMarker(marker) => {
                write!(f, "flac: unexpected stream marker {:#010x}", marker)
            }
            Error::BadSync(sync) => {
                write!(f, "flac: unexpected frame sync code {:#06x}", sync)
            }
            Error::BadReserved(desc) => {
                write!(f, "flac: reserved bit is not zero: {}", desc)
            }
            Error::Reserved(desc) => {
                write!(f, "reserved code point: {}", desc)
            }
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            Error::BufferTooSmall { required, capacity } => write!(
                f,
                "flac: stream blocks of {} samples exceed the buffer capacity of {} samples",
                required, capacity
            ),
            Error::BadPartitioning { block_size, partitions } => write!(
                f,
                "flac: {} residual partitions do not evenly divide a block of {} samples",
                partitions, block_size
            ),
            Error::UnexpectedEnd => {
                write!(f, "unexpected end of stream")
            }
            Error::IllegalState(call) => {
                write!(f, "illegal decoder state for call: {}", call)
            }
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEnd,
            _ => Error::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a general decode error.
pub fn decode_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::DecodeError(msg))
}

/// Convenience function to create a reserved code point error.
pub fn reserved_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::Reserved(desc))
}

/// Convenience function to create a reserved bit error.
pub fn bad_reserved_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::BadReserved(desc))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create an illegal state error.
pub fn illegal_state_error<T>(call: &'static str) -> Result<T> {
    Err(Error::IllegalState(call))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::UnexpectedEnd)
}
