//! User message reassembly.
//!
//! Fragments of one message arrive back to back: every fragment except the
//! last carries the "more fragments" flag. Only one message is in flight at a
//! time, so there is no message identifier to key on.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Concatenates user fragments until the terminal one arrives.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: BytesMut,
    max_message_size: Option<usize>,
    /// Set after an overflow; cleared by the next terminal fragment.
    discarding: bool,
}

impl Reassembler {
    /// Create a reassembler with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reassembler that refuses messages larger than `max` bytes.
    pub fn with_max_message_size(max: Option<usize>) -> Self {
        Self {
            max_message_size: max,
            ..Self::default()
        }
    }

    /// Feed one fragment.
    ///
    /// Returns the complete message when `more_fragments` is false. A message
    /// that grows past the size limit is dropped: the call that crosses the
    /// limit returns [`PipelineError::ReassemblyOverflow`] and the remaining
    /// fragments of that message are swallowed silently.
    pub fn accept(&mut self, fragment: Bytes, more_fragments: bool) -> Result<Option<Bytes>> {
        if self.discarding {
            if !more_fragments {
                self.discarding = false;
            }
            return Ok(None);
        }

        let size = self.buf.len() + fragment.len();
        if let Some(max) = self.max_message_size {
            if size > max {
                warn!(size, max, "user message exceeds size limit, discarding");
                self.buf.clear();
                self.discarding = more_fragments;
                return Err(PipelineError::ReassemblyOverflow { size, max });
            }
        }

        if !more_fragments && self.buf.is_empty() {
            return Ok(Some(fragment));
        }

        self.buf.extend_from_slice(&fragment);
        if more_fragments {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }

    /// Bytes accumulated for the message in flight.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// True while dropping the tail of an oversized message.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Forget any partial message.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &'static [u8]) -> Bytes {
        Bytes::from_static(s)
    }

    #[test]
    fn single_fragment_passes_through() {
        let mut r = Reassembler::new();
        let fragment = b(b"whole");
        let msg = r.accept(fragment.clone(), false).unwrap().unwrap();
        assert_eq!(msg, fragment);
        assert_eq!(msg.as_ptr(), fragment.as_ptr(), "no copy");
    }

    #[test]
    fn fragments_concatenate_in_order() {
        let mut r = Reassembler::new();
        assert!(r.accept(b(b"ABC"), true).unwrap().is_none());
        assert!(r.accept(b(b"DE"), true).unwrap().is_none());
        assert_eq!(r.pending_len(), 5);
        let msg = r.accept(b(b"F"), false).unwrap().unwrap();
        assert_eq!(msg.as_ref(), b"ABCDEF");
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn empty_terminal_fragment_completes_message() {
        let mut r = Reassembler::new();
        r.accept(b(b"body"), true).unwrap();
        assert_eq!(r.accept(b(b""), false).unwrap().unwrap().as_ref(), b"body");
        assert!(r.accept(b(b""), false).unwrap().unwrap().is_empty());
    }

    #[test]
    fn consecutive_messages_are_independent() {
        let mut r = Reassembler::new();
        r.accept(b(b"one-"), true).unwrap();
        assert_eq!(r.accept(b(b"a"), false).unwrap().unwrap().as_ref(), b"one-a");
        r.accept(b(b"two-"), true).unwrap();
        assert_eq!(r.accept(b(b"b"), false).unwrap().unwrap().as_ref(), b"two-b");
    }

    #[test]
    fn overflow_discards_whole_message() {
        let mut r = Reassembler::with_max_message_size(Some(4));
        r.accept(b(b"abc"), true).unwrap();

        let err = r.accept(b(b"de"), true).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ReassemblyOverflow { size: 5, max: 4 }
        ));
        assert!(r.is_discarding());

        assert!(r.accept(b(b"fgh"), true).unwrap().is_none());
        assert!(r.accept(b(b"i"), false).unwrap().is_none());
        assert!(!r.is_discarding());

        assert_eq!(r.accept(b(b"ok"), false).unwrap().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn overflow_on_terminal_fragment_needs_no_discard() {
        let mut r = Reassembler::with_max_message_size(Some(2));
        assert!(r.accept(b(b"xyz"), false).is_err());
        assert!(!r.is_discarding());
        assert_eq!(r.accept(b(b"ab"), false).unwrap().unwrap().as_ref(), b"ab");
    }

    #[test]
    fn reset_drops_partial_message() {
        let mut r = Reassembler::new();
        r.accept(b(b"partial"), true).unwrap();
        r.reset();
        assert_eq!(r.accept(b(b"next"), false).unwrap().unwrap().as_ref(), b"next");
    }
}
