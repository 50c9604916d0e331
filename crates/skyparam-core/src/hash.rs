//! Parameter-set fingerprint used by the cache fast path.
//!
//! CRC-32 (ISO-HDLC) over every parameter in ascending (component, name)
//! order. Each parameter contributes its name bytes followed by the
//! little-endian bytes of its value in the declared type. The hash-check
//! pseudo parameter is never part of the set.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::types::{ComponentId, ParamValue};
use crate::HASH_CHECK_PARAM;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Computes the fingerprint of a parameter set. Input order does not matter.
pub fn parameter_set_hash<'a, I>(params: I) -> u32
where
    I: IntoIterator<Item = (ComponentId, &'a str, ParamValue)>,
{
    let mut sorted: Vec<(ComponentId, &'a str, ParamValue)> = params
        .into_iter()
        .filter(|(_, name, _)| *name != HASH_CHECK_PARAM)
        .collect();
    sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut digest = CRC32.digest();
    for (_, name, value) in &sorted {
        digest.update(name.as_bytes());
        digest.update(&value.to_le_bytes());
    }
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_order_independent() {
        let a = [
            (ComponentId(1), "A", ParamValue::Int32(1)),
            (ComponentId(1), "B", ParamValue::Float(2.0)),
        ];
        let b = [a[1], a[0]];
        assert_eq!(parameter_set_hash(a), parameter_set_hash(b));
    }

    #[test]
    fn test_hash_changes_with_value() {
        let a = [(ComponentId(1), "A", ParamValue::Int32(1))];
        let b = [(ComponentId(1), "A", ParamValue::Int32(2))];
        assert_ne!(parameter_set_hash(a), parameter_set_hash(b));
    }

    #[test]
    fn test_hash_ignores_hash_check_param() {
        let a = [(ComponentId(1), "A", ParamValue::Int32(1))];
        let b = [
            (ComponentId(1), "A", ParamValue::Int32(1)),
            (ComponentId(1), HASH_CHECK_PARAM, ParamValue::Uint32(99)),
        ];
        assert_eq!(parameter_set_hash(a), parameter_set_hash(b));
    }

    #[test]
    fn test_empty_set_matches_crc_of_nothing() {
        let empty: [(ComponentId, &str, ParamValue); 0] = [];
        assert_eq!(parameter_set_hash(empty), CRC32.checksum(&[]));
    }
}
