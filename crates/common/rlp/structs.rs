use super::{
    decode::{RLPDecode, decode_rlp_item, get_item_with_prefix},
    encode::{RLPEncode, encode_length},
    error::RLPDecodeError,
};
use bytes::{BufMut, Bytes};

/// # Struct decoding helper
///
/// Walks the fields of an RLP list one at a time. The struct is expected as
/// a list, with its values being the fields in the order they are passed to
/// [`Decoder::decode_field`].
///
/// ```
/// # use etherscope_rlp::structs::Decoder;
/// # use etherscope_rlp::error::RLPDecodeError;
/// # use etherscope_rlp::decode::RLPDecode;
/// #[derive(Debug, PartialEq, Eq)]
/// struct Simple {
///     pub a: u8,
///     pub b: u16,
/// }
///
/// impl RLPDecode for Simple {
///     fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
///         let decoder = Decoder::new(buf)?;
///         let (a, decoder) = decoder.decode_field("a")?;
///         let (b, decoder) = decoder.decode_field("b")?;
///         let rest = decoder.finish()?;
///         Ok((Simple { a, b }, rest))
///     }
/// }
///
/// let bytes = [0xc2, 61, 75];
/// assert_eq!(Simple::decode(&bytes).unwrap(), Simple { a: 61, b: 75 });
/// ```
#[derive(Debug)]
#[must_use = "`Decoder` must be consumed with `finish` to perform decoding checks"]
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        match decode_rlp_item(buf)? {
            (true, payload, remaining) => Ok(Self { payload, remaining }),
            (false, _, _) => Err(RLPDecodeError::UnexpectedString),
        }
    }

    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (field, rest) = <T as RLPDecode>::decode_unfinished(self.payload)
            .map_err(|err| field_decode_error::<T>(name, err))?;
        Ok((
            field,
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    /// Returns Some(field) if the next item decodes as T, otherwise leaves
    /// the payload untouched and returns None.
    pub fn decode_optional_field<T: RLPDecode>(self) -> (Option<T>, Self) {
        match <T as RLPDecode>::decode_unfinished(self.payload) {
            Ok((field, rest)) => (
                Some(field),
                Self {
                    payload: rest,
                    ..self
                },
            ),
            Err(_) => (None, self),
        }
    }

    /// Returns the next field without decoding it, i.e. its payload bytes
    /// including the prefix.
    pub fn get_encoded_item(self) -> Result<(Vec<u8>, Self), RLPDecodeError> {
        let (field, rest) = get_item_with_prefix(self.payload)?;
        Ok((
            field.to_vec(),
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    /// Byte length of the list payload being decoded.
    pub const fn get_payload_len(&self) -> usize {
        self.payload.len()
    }

    /// True once every item of the list has been consumed.
    pub const fn is_done(&self) -> bool {
        self.payload.is_empty()
    }

    /// Finishes decoding and returns the bytes after the list.
    /// Errors if the list still has unconsumed items.
    pub const fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if self.payload.is_empty() {
            Ok(self.remaining)
        } else {
            Err(RLPDecodeError::MalformedData)
        }
    }

    /// Same as [`finish`](Self::finish), but discards any unconsumed items
    /// instead of failing.
    pub const fn finish_unchecked(self) -> &'a [u8] {
        self.remaining
    }
}

fn field_decode_error<T>(field_name: &str, err: RLPDecodeError) -> RLPDecodeError {
    let typ = std::any::type_name::<T>();
    RLPDecodeError::Custom(format!(
        "Error decoding field '{field_name}' of type {typ}: {err}"
    ))
}

/// # Struct encoding helper
///
/// Mirror of [`Decoder`]: fields are buffered in order and the list prefix
/// is computed on [`Encoder::finish`].
///
/// ```
/// # use etherscope_rlp::structs::Encoder;
/// # use etherscope_rlp::encode::RLPEncode;
/// # use bytes::BufMut;
/// #[derive(Debug, PartialEq, Eq)]
/// struct Simple {
///     pub a: u8,
///     pub b: u16,
/// }
///
/// impl RLPEncode for Simple {
///     fn encode(&self, buf: &mut dyn BufMut) {
///         Encoder::new(buf)
///             .encode_field(&self.a)
///             .encode_field(&self.b)
///             .finish();
///     }
/// }
///
/// let mut buf = vec![];
/// Simple { a: 61, b: 75 }.encode(&mut buf);
/// assert_eq!(&buf, &[0xc2, 61, 75]);
/// ```
#[must_use = "`Encoder` must be consumed with `finish` to perform the encoding"]
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Default::default(),
        }
    }

    /// Stores a field to be encoded.
    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        <T as RLPEncode>::encode(value, &mut self.temp_buf);
        self
    }

    /// If `Some`, stores a field to be encoded, else does nothing.
    pub fn encode_optional_field<T: RLPEncode>(mut self, opt_value: &Option<T>) -> Self {
        if let Some(value) = opt_value {
            <T as RLPEncode>::encode(value, &mut self.temp_buf);
        }
        self
    }

    /// Stores a field to be encoded as a byte string.
    /// Bypasses the conflict between the Vec<T> list impl and byte payloads.
    pub fn encode_bytes(mut self, value: &[u8]) -> Self {
        <[u8] as RLPEncode>::encode(value, &mut self.temp_buf);
        self
    }

    /// Appends an already-encoded item (prefix included) verbatim.
    pub fn encode_raw(mut self, value: &[u8]) -> Self {
        self.temp_buf.put_slice(value);
        self
    }

    /// Stores a (key, value) sequence where values are already encoded
    /// (value = RLP prefix || payload) but keys are not.
    pub fn encode_key_value_list(mut self, list: &[(Bytes, Bytes)]) -> Self {
        for (key, value) in list {
            <Bytes as RLPEncode>::encode(key, &mut self.temp_buf);
            self.temp_buf.put_slice(value);
        }
        self
    }

    /// Writes the list prefix and the buffered fields out.
    pub fn finish(self) {
        encode_length(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}

impl core::fmt::Debug for Encoder<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Encoder")
            .field("buf", &"...")
            .field("temp_buf", &self.temp_buf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoder, Encoder};
    use crate::{decode::RLPDecode, encode::RLPEncode};
    use bytes::Bytes;

    #[test]
    fn decoder_walks_fields_in_order() {
        let mut buf = Vec::new();
        (61u8, 75u16).encode(&mut buf);

        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder): (u8, _) = decoder.decode_field("a").unwrap();
        let (b, decoder): (u16, _) = decoder.decode_field("b").unwrap();
        let rest = decoder.finish().unwrap();

        assert!(rest.is_empty());
        assert_eq!((a, b), (61, 75));
    }

    #[test]
    fn decoder_optional_field_absent() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).encode_field(&61u8).finish();

        let decoder = Decoder::new(&buf).unwrap();
        let (a, decoder): (u8, _) = decoder.decode_field("a").unwrap();
        let (missing, decoder): (Option<u64>, _) = decoder.decode_optional_field();
        assert_eq!(a, 61);
        assert_eq!(missing, None);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn decoder_finish_rejects_leftover_items() {
        let mut buf = Vec::new();
        (61u8, 75u16).encode(&mut buf);

        let decoder = Decoder::new(&buf).unwrap();
        let (_, decoder): (u8, _) = decoder.decode_field("a").unwrap();
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn encoded_items_survive_raw_reemission() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&61u8)
            .encode_field(&30303u16)
            .finish();

        // pull both items out raw, re-emit them, expect identity
        let decoder = Decoder::new(&buf).unwrap();
        let (first, decoder) = decoder.get_encoded_item().unwrap();
        let (second, decoder) = decoder.get_encoded_item().unwrap();
        assert!(decoder.is_done());

        let mut rebuilt = Vec::new();
        Encoder::new(&mut rebuilt)
            .encode_raw(&first)
            .encode_raw(&second)
            .finish();
        assert_eq!(buf, rebuilt);
    }

    #[test]
    fn key_value_list_matches_manual_encoding() {
        let value = 30303u16.encode_to_vec();
        let pairs = vec![(Bytes::from("udp"), Bytes::from(value.clone()))];

        let mut buf = Vec::new();
        Encoder::new(&mut buf).encode_key_value_list(&pairs).finish();

        let mut expected = Vec::new();
        let mut payload = Vec::new();
        Bytes::from("udp").encode(&mut payload);
        payload.extend_from_slice(&value);
        crate::encode::encode_length(payload.len(), &mut expected);
        expected.extend_from_slice(&payload);

        assert_eq!(buf, expected);
    }
}
