//! Captured child output buffered for the duration of one job.

use bytes::BytesMut;

use super::job::FinishReport;

/// Raw bytes read from the child's standard output, in read order.
///
/// Owned by the outbound pump while the job runs and handed to the state
/// machine when that pump is joined. Growth is unbounded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    bytes: BytesMut,
}

impl CapturedOutput {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk read from the child.
    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Captured bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of captured bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drain the buffer into a finish report, leaving it empty.
    pub fn take_report(&mut self) -> FinishReport {
        let bytes = self.bytes.split();
        FinishReport {
            out: String::from_utf8_lossy(&bytes).into_owned(),
            error: String::new(),
        }
    }
}
