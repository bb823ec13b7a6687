// offchain/spm_client/src/decoder.rs
//! Borsh-layout primitive readers over raw account bytes.
//!
//! Each reader takes the buffer and an offset and returns the value together with the offset
//! just past it. Readers never touch the source and only fail on under-run (or bad UTF-8 for
//! strings). Record decoders thread the offset through [`Cursor`].

use solana_sdk::pubkey::Pubkey;

use crate::error::DecodeError;
use crate::types::Side;

pub const DISCRIMINATOR_LEN: usize = 8;
pub const PUBKEY_LEN: usize = 32;

/// A decoded value plus the offset of the next field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Read<T> {
    pub value: T,
    pub next: usize,
}

fn take(data: &[u8], offset: usize, n: usize) -> Result<&[u8], DecodeError> {
    let end = offset.checked_add(n).ok_or(DecodeError::UnexpectedEnd {
        offset,
        needed: n,
        len: data.len(),
    })?;
    data.get(offset..end).ok_or(DecodeError::UnexpectedEnd {
        offset,
        needed: n,
        len: data.len(),
    })
}

fn take_array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(data, offset, N)?);
    Ok(out)
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<Read<u8>, DecodeError> {
    let [b] = take_array::<1>(data, offset)?;
    Ok(Read { value: b, next: offset + 1 })
}

pub fn read_u16(data: &[u8], offset: usize) -> Result<Read<u16>, DecodeError> {
    let value = u16::from_le_bytes(take_array(data, offset)?);
    Ok(Read { value, next: offset + 2 })
}

pub fn read_u32(data: &[u8], offset: usize) -> Result<Read<u32>, DecodeError> {
    let value = u32::from_le_bytes(take_array(data, offset)?);
    Ok(Read { value, next: offset + 4 })
}

/// Exact over the whole u64 range. Precision only becomes a concern when callers convert
/// to `f64` for display (anything above 2^53 lamports).
pub fn read_u64(data: &[u8], offset: usize) -> Result<Read<u64>, DecodeError> {
    let value = u64::from_le_bytes(take_array(data, offset)?);
    Ok(Read { value, next: offset + 8 })
}

pub fn read_i64(data: &[u8], offset: usize) -> Result<Read<i64>, DecodeError> {
    let value = i64::from_le_bytes(take_array(data, offset)?);
    Ok(Read { value, next: offset + 8 })
}

pub fn read_bool(data: &[u8], offset: usize) -> Result<Read<bool>, DecodeError> {
    let Read { value, next } = read_u8(data, offset)?;
    Ok(Read { value: value != 0, next })
}

/// u32 length prefix followed by that many UTF-8 bytes. No length cap at this layer.
pub fn read_string(data: &[u8], offset: usize) -> Result<Read<String>, DecodeError> {
    let len = read_u32(data, offset)?;
    let bytes = take(data, len.next, len.value as usize)?;
    let value = std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::InvalidUtf8 { offset: len.next })?
        .to_owned();
    Ok(Read {
        value,
        next: len.next + len.value as usize,
    })
}

pub fn read_pubkey(data: &[u8], offset: usize) -> Result<Read<Pubkey>, DecodeError> {
    let bytes: [u8; PUBKEY_LEN] = take_array(data, offset)?;
    Ok(Read {
        value: Pubkey::new_from_array(bytes),
        next: offset + PUBKEY_LEN,
    })
}

/// `Option<Side>`: tag byte (0 = none) then the side ordinal when present.
pub fn read_option_side(data: &[u8], offset: usize) -> Result<Read<Option<Side>>, DecodeError> {
    let tag = read_u8(data, offset)?;
    if tag.value == 0 {
        return Ok(Read { value: None, next: tag.next });
    }
    let side = read_u8(data, tag.next)?;
    Ok(Read {
        value: Some(Side::from_ordinal(side.value)),
        next: side.next,
    })
}

/// First 8 bytes, if there are that many.
pub fn discriminator(data: &[u8]) -> Option<[u8; DISCRIMINATOR_LEN]> {
    take_array(data, 0).ok()
}

// ---------- Cursor ----------

/// Threads the offset through a fixed field sequence.
pub struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Positioned just past the discriminator.
    pub fn after_discriminator(data: &'a [u8]) -> Self {
        Self::new(data, DISCRIMINATOR_LEN)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn step<T>(
        &mut self,
        f: fn(&[u8], usize) -> Result<Read<T>, DecodeError>,
    ) -> Result<T, DecodeError> {
        let Read { value, next } = f(self.data, self.offset)?;
        self.offset = next;
        Ok(value)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.step(read_u8)
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        self.step(read_u16)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.step(read_u32)
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        self.step(read_u64)
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        self.step(read_i64)
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        self.step(read_bool)
    }

    pub fn string(&mut self) -> Result<String, DecodeError> {
        self.step(read_string)
    }

    pub fn pubkey(&mut self) -> Result<Pubkey, DecodeError> {
        self.step(read_pubkey)
    }

    pub fn option_side(&mut self) -> Result<Option<Side>, DecodeError> {
        self.step(read_option_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_little_endian() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(read_u8(&data, 0).unwrap(), Read { value: 1, next: 1 });
        assert_eq!(read_u16(&data, 1).unwrap().value, 0x1234);
        assert_eq!(read_u32(&data, 3).unwrap(), Read { value: 0x1234_5678, next: 7 });
    }

    #[test]
    fn u64_is_exact_above_2_pow_53() {
        let v: u64 = (1 << 53) + 1;
        let r = read_u64(&v.to_le_bytes(), 0).unwrap();
        assert_eq!(r.value, v);
        assert_eq!(r.next, 8);
    }

    #[test]
    fn i64_reads_negative_values() {
        let r = read_i64(&(-42i64).to_le_bytes(), 0).unwrap();
        assert_eq!(r.value, -42);
        let r = read_i64(&i64::MIN.to_le_bytes(), 0).unwrap();
        assert_eq!(r.value, i64::MIN);
    }

    #[test]
    fn string_with_length_prefix() {
        let mut data = 5u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"hello");
        data.push(0xff);
        let r = read_string(&data, 0).unwrap();
        assert_eq!(r.value, "hello");
        assert_eq!(r.next, 9);
    }

    #[test]
    fn string_length_past_end_is_underrun() {
        let mut data = 100u32.to_le_bytes().to_vec();
        data.extend_from_slice(b"short");
        assert!(matches!(
            read_string(&data, 0),
            Err(DecodeError::UnexpectedEnd { offset: 4, needed: 100, .. })
        ));
    }

    #[test]
    fn string_rejects_bad_utf8() {
        let mut data = 2u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xc3, 0x28]);
        assert_eq!(read_string(&data, 0), Err(DecodeError::InvalidUtf8 { offset: 4 }));
    }

    #[test]
    fn bool_is_any_nonzero() {
        assert!(!read_bool(&[0], 0).unwrap().value);
        assert!(read_bool(&[1], 0).unwrap().value);
        assert!(read_bool(&[7], 0).unwrap().value);
    }

    #[test]
    fn option_side_tags() {
        assert_eq!(read_option_side(&[0], 0).unwrap(), Read { value: None, next: 1 });
        assert_eq!(
            read_option_side(&[1, 0], 0).unwrap(),
            Read { value: Some(Side::A), next: 2 }
        );
        assert_eq!(read_option_side(&[1, 1], 0).unwrap().value, Some(Side::B));
        assert!(read_option_side(&[1], 0).is_err());
    }

    #[test]
    fn pubkey_is_32_raw_bytes() {
        let key = Pubkey::new_unique();
        let mut data = vec![9u8];
        data.extend_from_slice(key.as_ref());
        let r = read_pubkey(&data, 1).unwrap();
        assert_eq!(r.value, key);
        assert_eq!(r.next, 33);
        assert!(read_pubkey(&data, 2).is_err());
    }

    #[test]
    fn offset_overflow_is_underrun_not_panic() {
        assert!(read_u64(&[0u8; 8], usize::MAX).is_err());
    }

    #[test]
    fn cursor_threads_offsets() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&7u32.to_le_bytes());
        data.push(1);
        let mut c = Cursor::after_discriminator(&data);
        assert_eq!(c.u32().unwrap(), 7);
        assert!(c.bool().unwrap());
        assert_eq!(c.offset(), 13);
        assert!(c.u8().is_err());
    }
}
