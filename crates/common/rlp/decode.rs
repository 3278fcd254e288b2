use super::{
    constants::{RLP_EMPTY_LIST, RLP_NULL},
    error::RLPDecodeError,
};
use bytes::Bytes;
use ethereum_types::{H256, H264, H512};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Max payload size accepted when decoding.
/// Discovery datagrams are bounded at 1280 bytes; any declared length past
/// this cap is a bug or an attack, never a well-formed message.
const MAX_RLP_BYTES: usize = 16 * 1024 * 1024;

/// Trait for decoding RLP encoded slices of data.
/// Implementors provide [`RLPDecode::decode_unfinished`], which decodes one
/// item and returns it along with the remaining bytes. Consumers usually call
/// [`RLPDecode::decode`], which additionally requires the input to be fully
/// consumed.
pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match first {
            &RLP_NULL => false,
            0x01 => true,
            b => return Err(RLPDecodeError::MalformedBoolean(*b)),
        };
        Ok((value, &rlp[1..]))
    }
}

impl RLPDecode for u8 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let padded: [u8; 1] = static_left_pad(bytes)?;
        Ok((padded[0], rest))
    }
}

impl RLPDecode for u16 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((u16::from_be_bytes(static_left_pad(bytes)?), rest))
    }
}

impl RLPDecode for u32 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((u32::from_be_bytes(static_left_pad(bytes)?), rest))
    }
}

impl RLPDecode for u64 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((u64::from_be_bytes(static_left_pad(bytes)?), rest))
    }
}

// Fixed-width byte strings. Lists of same-typed items go through the Vec<T>
// impl, heterogeneous ones through the tuple impls.
impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (decoded, rest) = decode_bytes(rlp)?;
        let value = decoded
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((value, rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (decoded, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(decoded), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value =
            String::from_utf8(bytes.to_vec()).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value, rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H256(value), rest))
    }
}

impl RLPDecode for H264 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H264(value), rest))
    }
}

impl RLPDecode for H512 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H512(value), rest))
    }
}

impl RLPDecode for Ipv4Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let octets: [u8; 4] = bytes
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((Ipv4Addr::from(octets), rest))
    }
}

impl RLPDecode for Ipv6Addr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let octets: [u8; 16] = bytes
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((Ipv6Addr::from(octets), rest))
    }
}

// An IP address is 4 or 16 bytes on the wire; any other width is rejected.
impl RLPDecode for IpAddr {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        match bytes.len() {
            4 => {
                let octets: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| RLPDecodeError::InvalidLength)?;
                Ok((IpAddr::V4(Ipv4Addr::from(octets)), rest))
            }
            16 => {
                let octets: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| RLPDecodeError::InvalidLength)?;
                // to_canonical in case it's an IPv4-mapped IPv6 address
                Ok((IpAddr::V6(Ipv6Addr::from(octets)).to_canonical(), rest))
            }
            _ => Err(RLPDecodeError::InvalidLength),
        }
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        if rlp[0] == RLP_EMPTY_LIST {
            return Ok((Vec::new(), &rlp[1..]));
        }

        let (is_list, payload, input_rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }

        let mut result = Vec::new();
        let mut current = payload;
        while !current.is_empty() {
            let (item, rest) = T::decode_unfinished(current)?;
            result.push(item);
            current = rest;
        }
        Ok((result, input_rest))
    }
}

impl<T1: RLPDecode, T2: RLPDecode> RLPDecode for (T1, T2) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, payload, input_rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let (first, rest) = T1::decode_unfinished(payload)?;
        let (second, rest) = T2::decode_unfinished(rest)?;
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second), input_rest))
    }
}

impl<T1: RLPDecode, T2: RLPDecode, T3: RLPDecode> RLPDecode for (T1, T2, T3) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, payload, input_rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let (first, rest) = T1::decode_unfinished(payload)?;
        let (second, rest) = T2::decode_unfinished(rest)?;
        let (third, rest) = T3::decode_unfinished(rest)?;
        if !rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second, third), input_rest))
    }
}

/// Decodes the prefix of an RLP item.
/// Returns whether the item is a list, its payload without the prefix, and
/// the remaining bytes after the item. Every offset is checked against the
/// real buffer length before slicing.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first_byte = *data.first().ok_or(RLPDecodeError::InvalidLength)?;

    match first_byte {
        0..=0x7F => Ok((false, &data[..1], &data[1..])),
        0x80..=0xB7 => {
            let length = (first_byte - 0x80) as usize;
            if data.len() < length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((false, &data[1..length + 1], &data[length + 1..]))
        }
        0xB8..=0xBF => {
            let length_of_length = (first_byte - 0xB7) as usize;
            if data.len() < length_of_length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            let length = usize::from_be_bytes(static_left_pad(&data[1..length_of_length + 1])?);
            if length > MAX_RLP_BYTES || data.len() < length_of_length + length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((
                false,
                &data[length_of_length + 1..length_of_length + length + 1],
                &data[length_of_length + length + 1..],
            ))
        }
        RLP_EMPTY_LIST..=0xF7 => {
            let length = (first_byte - RLP_EMPTY_LIST) as usize;
            if data.len() < length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((true, &data[1..length + 1], &data[length + 1..]))
        }
        0xF8..=0xFF => {
            let length_of_length = (first_byte - 0xF7) as usize;
            if data.len() < length_of_length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            let length = usize::from_be_bytes(static_left_pad(&data[1..length_of_length + 1])?);
            if length > MAX_RLP_BYTES || data.len() < length_of_length + length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((
                true,
                &data[length_of_length + 1..length_of_length + length + 1],
                &data[length_of_length + length + 1..],
            ))
        }
    }
}

/// Splits off one RLP item, prefix included.
/// Returns the full encoded item and the remaining bytes after it.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (_, _, rest) = decode_rlp_item(data)?;
    let item_len = data.len() - rest.len();
    Ok((&data[..item_len], rest))
}

/// Decodes the payload of a byte-string item.
pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(data)?;
    if is_list {
        return Err(RLPDecodeError::UnexpectedList);
    }
    Ok((payload, rest))
}

/// Pads a big-endian integer on the left with zeros up to a fixed width.
/// Leading zero bytes on the wire are rejected: canonical RLP integers never
/// carry them.
#[inline]
pub fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    let mut result = [0; N];

    if data.is_empty() {
        return Ok(result);
    }
    if data[0] == 0 {
        return Err(RLPDecodeError::MalformedData);
    }
    if data.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    result[N - data.len()..].copy_from_slice(data);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::RLPEncode;

    #[test]
    fn decode_integers_roundtrip() {
        for value in [0u64, 1, 0x7f, 0x80, 255, 30303, u64::MAX] {
            let encoded = value.encode_to_vec();
            assert_eq!(u64::decode(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn decode_rejects_leading_zeros() {
        // 0x0100 encoded with a spurious leading zero byte
        let malformed = [0x82, 0x00, 0x01];
        assert_eq!(
            u16::decode(&malformed),
            Err(RLPDecodeError::MalformedData)
        );
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        // declares 5 payload bytes, carries 2
        let truncated = [0x85, 1, 2];
        assert_eq!(
            Bytes::decode(&truncated),
            Err(RLPDecodeError::InvalidLength)
        );
    }

    #[test]
    fn decode_rejects_oversized_declared_length() {
        // long-form string declaring a ridiculous length
        let bogus = [0xbb, 0xff, 0xff, 0xff, 0xff];
        assert!(Bytes::decode(&bogus).is_err());
    }

    #[test]
    fn decode_fixed_width_mismatch() {
        let three = [0x83, 1, 2, 3];
        assert_eq!(
            <[u8; 4]>::decode(&three),
            Err(RLPDecodeError::InvalidLength)
        );
    }

    #[test]
    fn decode_vec_of_integers() {
        let values = vec![1u64, 2, 3, 30303];
        let encoded = values.encode_to_vec();
        assert_eq!(Vec::<u64>::decode(&encoded).unwrap(), values);
    }

    #[test]
    fn decode_string_not_list() {
        let list = [0xc2, 1, 2];
        assert_eq!(u64::decode(&list), Err(RLPDecodeError::UnexpectedList));
    }

    #[test]
    fn decode_list_not_string() {
        let string = [0x83, b'd', b'o', b'g'];
        assert_eq!(
            Vec::<u8>::decode(&string),
            Err(RLPDecodeError::UnexpectedString)
        );
    }

    #[test]
    fn item_with_prefix_splits_cleanly() {
        let mut buf = Vec::new();
        30303u16.encode(&mut buf);
        b"tail".as_slice().encode(&mut buf);

        let (item, rest) = get_item_with_prefix(&buf).unwrap();
        assert_eq!(item, &[0x82, 0x76, 0x5f]);
        assert_eq!(u16::decode(item).unwrap(), 30303);
        assert_eq!(rest, &[0x84, b't', b'a', b'i', b'l']);
    }

    #[test]
    fn decode_empty_input() {
        assert_eq!(u64::decode(&[]), Err(RLPDecodeError::InvalidLength));
        assert!(decode_rlp_item(&[]).is_err());
    }
}
