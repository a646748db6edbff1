//! The opaque data set artifact exchanged by DIMSE services.
//!
//! The DIMSE layer does not interpret data set content:
//! a [`Dataset`] is a block of already-encoded bytes
//! tagged with the transfer syntax UID it was encoded under.
//! Encoding and decoding of attributes, pixel data and so on
//! is the responsibility of an external data set codec.

use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// This crate does not transcode between transfer syntaxes:
    /// a data set can only travel over a presentation context
    /// negotiated for the syntax it is already encoded in.
    #[snafu(display(
        "data set is encoded in `{}`, cannot be sent as `{}`",
        encoded,
        requested
    ))]
    TransferSyntaxMismatch { encoded: String, requested: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An encoded DICOM data set, keyed by its transfer syntax UID.
///
/// The bytes are opaque to this crate.
/// They are produced and consumed by an external data set codec;
/// the DIMSE layer only moves them across the wire
/// over a presentation context accepted for the matching transfer syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dataset {
    transfer_syntax: String,
    data: Vec<u8>,
}

impl Dataset {
    /// Tag a block of encoded bytes with the transfer syntax
    /// they were encoded under.
    pub fn new(transfer_syntax: impl Into<String>, data: Vec<u8>) -> Self {
        Dataset {
            transfer_syntax: transfer_syntax.into(),
            data,
        }
    }

    /// Reconstruct a data set artifact from bytes received over a
    /// presentation context negotiated for `transfer_syntax`.
    pub fn decode(data: Vec<u8>, transfer_syntax: impl Into<String>) -> Self {
        Dataset::new(transfer_syntax, data)
    }

    /// The transfer syntax UID this data set is encoded under.
    pub fn transfer_syntax(&self) -> &str {
        &self.transfer_syntax
    }

    /// The encoded bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The number of encoded bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the data set has no encoded bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Obtain the encoded bytes for transmission under `transfer_syntax`.
    ///
    /// Fails if the requested transfer syntax differs from the one
    /// this artifact is encoded in.
    pub fn encode(&self, transfer_syntax: &str) -> Result<&[u8]> {
        ensure!(
            self.transfer_syntax == transfer_syntax,
            TransferSyntaxMismatchSnafu {
                encoded: self.transfer_syntax.clone(),
                requested: transfer_syntax,
            }
        );
        Ok(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uids;
    use matches::assert_matches;

    #[test]
    fn encode_checks_transfer_syntax() {
        let ds = Dataset::new(uids::IMPLICIT_VR_LITTLE_ENDIAN, vec![8, 0, 0x18, 0]);

        assert_eq!(
            ds.encode(uids::IMPLICIT_VR_LITTLE_ENDIAN).unwrap(),
            &[8, 0, 0x18, 0]
        );
        assert_matches!(
            ds.encode(uids::EXPLICIT_VR_LITTLE_ENDIAN),
            Err(Error::TransferSyntaxMismatch { .. })
        );
    }

    #[test]
    fn decode_tags_received_bytes() {
        let ds = Dataset::decode(vec![1, 2, 3], uids::EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(ds.transfer_syntax(), uids::EXPLICIT_VR_LITTLE_ENDIAN);
        assert_eq!(ds.len(), 3);
    }
}
