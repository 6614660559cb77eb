use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn malformed(result: Result<Value, BencodeError>) -> MalformedKind {
    match result {
        Err(BencodeError::Malformed { kind, .. }) => kind,
        other => panic!("expected malformed encoding, got {:?}", other),
    }
}

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_large_integer() {
    // File lengths routinely exceed 32 bits.
    assert_eq!(
        decode(b"i9223372036854775807e").unwrap(),
        Value::Integer(i64::MAX)
    );
    assert_eq!(decode(b"i8589934592e").unwrap(), Value::Integer(1 << 33));
}

#[test]
fn test_decode_integer_invalid() {
    for input in [&b"i-0e"[..], b"i03e", b"ie", b"i-e", b"i1x2e", b"i99999999999999999999e"] {
        assert!(
            matches!(malformed(decode(input)), MalformedKind::InvalidInteger(_)),
            "{:?}",
            String::from_utf8_lossy(input)
        );
    }
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(
        decode(b"0:").unwrap(),
        Value::Bytes(Bytes::from_static(b""))
    );
}

#[test]
fn test_decode_binary_bytes() {
    let value = decode(b"3:\x00\xff\x13").unwrap();
    assert_eq!(value.as_bytes().unwrap().as_ref(), &[0x00, 0xff, 0x13]);
    assert_eq!(value.as_str(), None);
}

#[test]
fn test_reject_bad_string_lengths() {
    assert_eq!(malformed(decode(b"-1:a")), MalformedKind::InvalidStringLength);
    assert_eq!(malformed(decode(b"4x:spam")), MalformedKind::InvalidStringLength);
    assert_eq!(malformed(decode(b"04:spam")), MalformedKind::InvalidStringLength);
}

#[test]
fn test_reject_truncated_input() {
    // Truncated length prefix.
    assert_eq!(malformed(decode(b"4")), MalformedKind::UnexpectedEof);
    // Length longer than the remaining data.
    assert_eq!(malformed(decode(b"10:short")), MalformedKind::UnexpectedEof);
    // Unterminated integer and containers.
    assert_eq!(malformed(decode(b"i42")), MalformedKind::UnexpectedEof);
    assert_eq!(malformed(decode(b"l4:spam")), MalformedKind::UnexpectedEof);
    assert_eq!(malformed(decode(b"d3:cow3:moo")), MalformedKind::UnexpectedEof);
    assert_eq!(malformed(decode(b"d3:cow")), MalformedKind::UnexpectedEof);
    assert_eq!(malformed(decode(b"")), MalformedKind::UnexpectedEof);
}

#[test]
fn test_decode_list() {
    let result = decode(b"l4:spami42ee").unwrap();
    match result {
        Value::List(l) => {
            assert_eq!(l.len(), 2);
            assert_eq!(l[0], Value::Bytes(Bytes::from_static(b"spam")));
            assert_eq!(l[1], Value::Integer(42));
        }
        _ => panic!("expected list"),
    }
}

#[test]
fn test_decode_dict() {
    let result = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    match result {
        Value::Dict(d) => {
            assert_eq!(d.len(), 2);
            assert_eq!(
                d.get(b"cow"),
                Some(&Value::Bytes(Bytes::from_static(b"moo")))
            );
        }
        _ => panic!("expected dict"),
    }
}

#[test]
fn test_dict_key_rules() {
    assert_eq!(malformed(decode(b"di1ei2ee")), MalformedKind::NonStringKey);
    assert_eq!(
        malformed(decode(b"d1:ai1e1:ai2ee")),
        MalformedKind::DuplicateKey
    );
    assert_eq!(
        malformed(decode(b"d1:bi1e1:ai2e1:bi3ee")),
        MalformedKind::DuplicateKey
    );

    let unsorted = b"d1:bi1e1:ai2ee";
    assert!(decode(unsorted).is_ok());
    assert_eq!(
        malformed(Decoder::new(unsorted).strict(true).decode_next()),
        MalformedKind::UnsortedKey
    );
}

#[test]
fn test_unsorted_keys_roundtrip_exactly() {
    let data = b"d4:spami1e3:cow3:mooe";
    let value = decode(data).unwrap();
    assert_eq!(encode(&value), data);
}

#[test]
fn test_depth_limit() {
    let mut deep = vec![b'l'; 70];
    deep.extend(vec![b'e'; 70]);
    assert_eq!(decode(&deep), Err(BencodeError::DepthExceeded(DEFAULT_MAX_DEPTH)));

    let shallow = b"llleee";
    assert!(Decoder::new(shallow).max_depth(3).decode_next().is_ok());
    assert_eq!(
        Decoder::new(shallow).max_depth(2).decode_next(),
        Err(BencodeError::DepthExceeded(2))
    );
    assert!(Decoder::new(b"i1e").max_depth(0).decode_next().is_ok());
}

fn reversed_dict(count: usize, duplicate_last: bool) -> Vec<u8> {
    let mut data = b"d".to_vec();
    let mut keys: Vec<String> = (0..count).rev().map(|i| format!("k{:08}", i)).collect();
    if duplicate_last {
        keys.push(format!("k{:08}", count - 1));
    }
    for key in keys {
        data.extend_from_slice(format!("{}:{}i0e", key.len(), key).as_bytes());
    }
    data.push(b'e');
    data
}

#[test]
fn test_unsorted_dict_decodes_in_linear_time() {
    let data = reversed_dict(50_000, false);
    let started = std::time::Instant::now();
    let value = decode(&data).unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(3));
    assert_eq!(value.as_dict().unwrap().len(), 50_000);
}

#[test]
fn test_duplicate_key_found_after_unsorted_keys() {
    let data = reversed_dict(1_000, true);
    assert_eq!(malformed(decode(&data)), MalformedKind::DuplicateKey);
}

#[test]
fn test_length_limit() {
    let result = Decoder::new(b"11:hello world").max_length(5).decode_next();
    assert!(matches!(result, Err(BencodeError::LengthExceeded { len: 11, limit: 5 })));

    let result = Decoder::new(b"li1ei2ei3ee").max_length(2).decode_next();
    assert!(matches!(result, Err(BencodeError::LengthExceeded { .. })));

    // A huge declared length is rejected before any allocation.
    let result = decode(b"99999999999:x");
    assert!(matches!(result, Err(BencodeError::LengthExceeded { .. })));
}

#[test]
fn test_decode_prefix_reports_consumed() {
    let (value, consumed) = decode_prefix(b"i42eextra").unwrap();
    assert_eq!(value, Value::Integer(42));
    assert_eq!(consumed, 4);

    let (_, consumed) = decode_prefix(b"d1:al1:b1:cee").unwrap();
    assert_eq!(consumed, 13);
}

#[test]
fn test_trailing_data_error() {
    assert_eq!(malformed(decode(b"i42eextra")), MalformedKind::TrailingData);
}

#[test]
fn test_raw_dict_entry() {
    let data = b"d8:announce3:url4:infod4:name1:x6:lengthi3ee5:zlasti0ee";
    let raw = raw_dict_entry(data, b"info").unwrap().unwrap();
    assert_eq!(raw, b"d4:name1:x6:lengthi3ee");
    assert_eq!(raw_dict_entry(data, b"missing").unwrap(), None);
    assert!(raw_dict_entry(b"i1e", b"info").is_err());
}

#[test]
fn test_encode_integer() {
    assert_eq!(encode(&Value::Integer(42)), b"i42e");
    assert_eq!(encode(&Value::Integer(-42)), b"i-42e");
    assert_eq!(encode(&Value::Integer(0)), b"i0e");
}

#[test]
fn test_encode_dict() {
    let mut dict = Dict::new();
    dict.insert(&b"cow"[..], Value::string("moo"));
    assert_eq!(encode(&Value::Dict(dict)), b"d3:cow3:mooe");
}

#[test]
fn test_roundtrip() {
    let original = b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee";
    let decoded = decode(original).unwrap();
    assert_eq!(encode(&decoded), original);
}

fn random_value(rng: &mut StdRng, depth: usize) -> Value {
    let kind = if depth >= 4 { rng.random_range(0..2) } else { rng.random_range(0..4) };
    match kind {
        0 => Value::Integer(rng.random_range(i64::MIN..=i64::MAX)),
        1 => {
            let len = rng.random_range(0..24);
            let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            Value::Bytes(Bytes::from(bytes))
        }
        2 => {
            let len = rng.random_range(0..5);
            Value::List((0..len).map(|_| random_value(rng, depth + 1)).collect())
        }
        _ => {
            let len = rng.random_range(0..5);
            let mut dict = Dict::new();
            for _ in 0..len {
                let key_len = rng.random_range(0..8);
                let key: Vec<u8> = (0..key_len).map(|_| rng.random()).collect();
                dict.insert(key, random_value(rng, depth + 1));
            }
            Value::Dict(dict)
        }
    }
}

#[test]
fn test_generated_trees_roundtrip() {
    let mut rng = StdRng::seed_from_u64(0x6c65_6563_68);
    for _ in 0..500 {
        let value = random_value(&mut rng, 0);
        let encoded = encode(&value);
        assert_eq!(decode(&encoded).unwrap(), value);
    }
}

#[test]
fn test_value_accessors() {
    let value = Value::Integer(42);
    assert_eq!(value.as_integer(), Some(42));
    assert!(value.as_bytes().is_none());

    let value = Value::Bytes(Bytes::from_static(b"test"));
    assert_eq!(value.as_str(), Some("test"));
    assert!(value.as_integer().is_none());

    let value = Value::List(vec![]);
    assert!(value.as_list().is_some());
    assert!(value.as_dict().is_none());
}
