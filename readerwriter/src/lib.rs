mod reader;
mod writer;

pub use reader::{ReadError, Reader};
pub use writer::{varint_len, WriteError, Writer};

/// A trait for encoding structures into a [Writer].
///
/// [Writer]: crate::Writer
pub trait Encodable {
    /// Appends the encoding of the receiver to the writer.
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError>;

    /// Encoded size in bytes, if cheaply known, used to size buffers.
    /// Types with a fixed-layout encoding implement [ExactSizeEncodable]
    /// instead and get this for free.
    ///
    /// [ExactSizeEncodable]: crate::ExactSizeEncodable
    fn encoded_size_hint(&self) -> Option<usize> {
        None
    }

    /// Encodes the receiver into a freshly allocated vector of bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size_hint().unwrap_or(0));
        self.encode(&mut buf)
            .expect("Writing to a Vec never fails.");
        buf
    }
}

/// An [Encodable] whose exact encoded length is known up front, letting
/// callers check reported byte counts against bytes actually produced.
///
/// [Encodable]: crate::Encodable
pub trait ExactSizeEncodable: Encodable {
    /// Exact encoded size in bytes of the object.
    fn encoded_size(&self) -> usize;

    /// Exact size doubles as the hint.
    fn encoded_size_hint(&self) -> Option<usize> {
        Some(self.encoded_size())
    }
}

/// A trait for decoding structures out of a [Reader].
///
/// [Reader]: crate::Reader
pub trait Decodable: Sized {
    /// Parses the receiver from the reader, consuming exactly its encoding.
    fn decode(buf: &mut impl Reader) -> Result<Self, ReadError>;
}

/// Marker for types that round-trip: implemented for everything that is
/// both [Encodable] and [Decodable].
///
/// [Encodable]: crate::Encodable
/// [Decodable]: crate::Decodable
pub trait Codable: Encodable + Decodable {}

impl<T: Decodable + Encodable> Codable for T {}
