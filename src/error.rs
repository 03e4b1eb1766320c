//! Errors produced while parsing or rewriting tagged binaries.

use core::fmt;
use core::result;

#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// The leading bytes are neither an `MZ` executable nor an MS-CFB
    /// compound file.
    NotASupportedContainer,
    /// Truncation or inconsistent offsets inside a PE or MSI container.
    Malformed(String),
    /// The container carries no Authenticode signature: the certificate
    /// table is empty, or the digital-signature stream is absent.
    NoSignature,
    /// DER parse failure inside the PKCS#7 blob.
    MalformedPkcs7(String),
    /// The requested operation is not valid for this container or payload.
    Unsupported(String),
    /// The superfluous-cert marker matched this many times instead of
    /// exactly once.
    MarkerNotFound(usize),
    /// Primitive read/write error from scroll.
    Scroll(scroll::Error),
    /// An IO error, forwarded from the file boundary.
    IO(std::io::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(io) => Some(io),
            Error::Scroll(scroll) => Some(scroll),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IO(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotASupportedContainer => {
                write!(fmt, "Not a PE or MSI container")
            }
            Error::Malformed(msg) => write!(fmt, "Malformed container: {msg}"),
            Error::NoSignature => write!(fmt, "Binary is not Authenticode-signed"),
            Error::MalformedPkcs7(msg) => write!(fmt, "Malformed PKCS#7: {msg}"),
            Error::Unsupported(msg) => write!(fmt, "Unsupported operation: {msg}"),
            Error::MarkerNotFound(matches) => {
                write!(fmt, "Expected exactly one tag marker, found {matches}")
            }
            Error::Scroll(err) => write!(fmt, "{err}"),
            Error::IO(err) => write!(fmt, "{err}"),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
