use primitive_types::U256;
use spv_consensus::params::{consensus_params, Network};
use spv_pow::difficulty::{compact_to_u256, hash_meets_target, max_target, u256_to_compact};

#[test]
fn compact_bits_roundtrip_is_idempotent() {
    for bits in [0x1d00ffffu32, 0x1b0404cb, 0x1c0168fd, 0x207fffff, 0x1a05db8b] {
        let target = compact_to_u256(bits).expect("target");
        assert_eq!(u256_to_compact(target), bits);
    }
}

#[test]
fn target_to_compact_keeps_mantissa_precision() {
    let original = U256::from_dec_str(
        "26959535291011309493156476344723991336010898738574164086137773096960",
    )
    .expect("decimal")
        + U256::from(0x1234_5678u64);
    let bits = u256_to_compact(original);
    let decoded = compact_to_u256(bits).expect("target");
    assert!(decoded <= original);
    let size = bits >> 24;
    let ulp = U256::one() << (8 * (size - 3));
    assert!(original - decoded < ulp);
}

#[test]
fn regtest_limit_layout() {
    let params = consensus_params(Network::Regtest);
    let target = compact_to_u256(params.max_bits).expect("target");
    assert_eq!(target, max_target(&params));

    let bytes = target.to_little_endian();
    assert!(bytes[..29].iter().all(|b| *b == 0));
    assert_eq!(&bytes[29..], &[0xff, 0xff, 0x7f]);
}

#[test]
fn hash_meets_target_is_strict() {
    let target = U256::from_little_endian(&[0x10u8; 32]);
    assert!(hash_meets_target(&[0x00u8; 32], &target));
    assert!(!hash_meets_target(&[0x10u8; 32], &target));
    assert!(!hash_meets_target(&[0xffu8; 32], &target));
}
