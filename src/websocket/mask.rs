//! Payload masking (RFC 6455 §5.3).

use std::borrow::Cow;

/// XOR `data` with `key`, returning a fresh copy.
///
/// Without a key the input is returned unchanged and nothing is copied.
/// Applying the same key twice yields the original bytes.
pub fn apply_mask(data: &[u8], key: Option<[u8; 4]>) -> Cow<'_, [u8]> {
    match key {
        None => Cow::Borrowed(data),
        Some(key) => {
            let mut out = data.to_vec();
            mask_in_place(&mut out, key, 0);
            Cow::Owned(out)
        }
    }
}

/// XOR a buffer the codec owns, continuing from `offset` into the payload.
pub fn mask_in_place(buf: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[(offset + i) & 3];
    }
}

/// A fresh random masking key for client-sent frames.
pub fn generate_key() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_is_an_involution() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1031).collect();
        for key in [[0, 0, 0, 0], [1, 2, 3, 4], [0xFF, 0x00, 0xAA, 0x55], generate_key()] {
            let masked = apply_mask(&data, Some(key));
            let unmasked = apply_mask(&masked, Some(key));
            assert_eq!(unmasked.as_ref(), data.as_slice());
        }
    }

    #[test]
    fn caller_buffer_is_untouched() {
        let data = b"Hello".to_vec();
        let masked = apply_mask(&data, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(data, b"Hello");
        // RFC 6455 §5.7 example
        assert_eq!(masked.as_ref(), &[0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn no_key_borrows() {
        let data = [1u8, 2, 3];
        assert!(matches!(apply_mask(&data, None), Cow::Borrowed(_)));
    }

    #[test]
    fn offset_continues_the_key_cycle() {
        let key = [1, 2, 3, 4];
        let mut whole = [0u8; 6];
        mask_in_place(&mut whole, key, 0);
        let mut tail = [0u8; 3];
        mask_in_place(&mut tail, key, 3);
        assert_eq!(&whole[3..], &tail);
    }
}
