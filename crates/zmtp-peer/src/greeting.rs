//! The fixed 64-byte ZMTP greeting.
//!
//! ```text
//! offset  size  field
//!      0    10  signature  FF 00 00 00 00 00 00 00 01 7F
//!     10     1  major version
//!     11     1  minor version
//!     12    20  mechanism, ASCII, NUL padded
//!     32     1  as-server
//!     33    31  filler (zero)
//! ```

use std::fmt;

pub const SIGNATURE: [u8; SIGNATURE_SIZE] = [0xFF, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x7F];
pub const SIGNATURE_SIZE: usize = 10;
pub const GREETING_SIZE: usize = 64;
pub const MECHANISM_SIZE: usize = 20;
pub const FILLER_SIZE: usize = 31;

pub const VERSION_MAJOR: u8 = 3;
pub const VERSION_MINOR: u8 = 0;

/// The only security mechanism supported.
pub const NULL_MECHANISM: &[u8] = b"NULL";

pub(crate) const MAJOR_OFFSET: usize = SIGNATURE_SIZE;
pub(crate) const MINOR_OFFSET: usize = MAJOR_OFFSET + 1;
pub(crate) const MECHANISM_OFFSET: usize = MINOR_OFFSET + 1;
pub(crate) const AS_SERVER_OFFSET: usize = MECHANISM_OFFSET + MECHANISM_SIZE;
const FILLER_OFFSET: usize = AS_SERVER_OFFSET + 1;

const _: () = assert!(FILLER_OFFSET + FILLER_SIZE == GREETING_SIZE);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    bytes: [u8; GREETING_SIZE],
}

impl Greeting {
    /// Local greeting advertising the NULL mechanism.
    pub fn new(major: u8, minor: u8, as_server: bool) -> Self {
        let mut bytes = [0u8; GREETING_SIZE];
        bytes[..SIGNATURE_SIZE].copy_from_slice(&SIGNATURE);
        bytes[MAJOR_OFFSET] = major;
        bytes[MINOR_OFFSET] = minor;
        bytes[MECHANISM_OFFSET..MECHANISM_OFFSET + NULL_MECHANISM.len()]
            .copy_from_slice(NULL_MECHANISM);
        bytes[AS_SERVER_OFFSET] = u8::from(as_server);
        Self { bytes }
    }

    /// Wrap bytes received from a peer. No validation is done here.
    pub fn from_bytes(bytes: [u8; GREETING_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; GREETING_SIZE] {
        &self.bytes
    }

    pub fn signature(&self) -> &[u8] {
        &self.bytes[..SIGNATURE_SIZE]
    }

    pub fn major(&self) -> u8 {
        self.bytes[MAJOR_OFFSET]
    }

    pub fn minor(&self) -> u8 {
        self.bytes[MINOR_OFFSET]
    }

    /// Mechanism name with the NUL padding stripped.
    pub fn mechanism(&self) -> &[u8] {
        let field = &self.bytes[MECHANISM_OFFSET..AS_SERVER_OFFSET];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        &field[..end]
    }

    pub fn as_server(&self) -> bool {
        self.bytes[AS_SERVER_OFFSET] != 0
    }
}

impl Default for Greeting {
    fn default() -> Self {
        Self::new(VERSION_MAJOR, VERSION_MINOR, false)
    }
}

impl fmt::Debug for Greeting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Greeting")
            .field("version", &format_args!("{}.{}", self.major(), self.minor()))
            .field("mechanism", &String::from_utf8_lossy(self.mechanism()))
            .field("as_server", &self.as_server())
            .finish()
    }
}
