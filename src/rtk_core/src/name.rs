//! Object names (§3 "Object registry", §4.B).
//!
//! Names are byte strings up to 15 bytes (§4.B). Stored inline so the
//! registry never allocates for a lookup-by-name.
use arrayvec::ArrayVec;
use core::fmt;
use core::str;

pub const MAX_NAME_LEN: usize = 15;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectName(ArrayVec<u8, MAX_NAME_LEN>);

impl ObjectName {
    #[inline]
    pub fn new(bytes: &[u8]) -> Self {
        let mut v = ArrayVec::new();
        let n = bytes.len().min(MAX_NAME_LEN);
        v.try_extend_from_slice(&bytes[..n]).ok();
        Self(v)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for ObjectName {
    fn default() -> Self {
        Self(ArrayVec::new())
    }
}

impl From<&str> for ObjectName {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match str::from_utf8(self.as_bytes()) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "{:?}", self.as_bytes()),
        }
    }
}
