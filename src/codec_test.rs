use super::*;

fn str_schema() -> Schema {
    Schema::new(vec![ColumnKind::Str])
}

fn enc(schema: &Schema, values: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_row(schema, values, &mut buf).unwrap();
    buf
}

#[test]
fn test_u64_order_preserving() {
    let schema = Schema::new(vec![ColumnKind::U64]);
    let a = enc(&schema, &[Value::U64(5)]);
    let b = enc(&schema, &[Value::U64(200)]);
    assert!(a < b);
}

#[test]
fn test_f64_order_preserving() {
    let schema = Schema::new(vec![ColumnKind::F64]);
    let values = [
        f64::NEG_INFINITY,
        -1e300,
        -1.0,
        -0.0001,
        0.0,
        0.0001,
        1.0,
        1e300,
        f64::INFINITY,
    ];
    let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| enc(&schema, &[Value::F64(*v)])).collect();
    let sorted = {
        let mut s = encoded.clone();
        s.sort();
        s
    };
    assert_eq!(encoded, sorted, "encodings must already be in ascending order");

    // round trip
    for v in values {
        let bytes = enc(&schema, &[Value::F64(v)]);
        let (decoded, n) = decode_row(&schema, &bytes).unwrap();
        assert_eq!(n, bytes.len());
        match decoded.as_slice() {
            [Value::F64(got)] => assert_eq!(*got, v),
            _ => panic!("unexpected decode"),
        }
    }

    encoded.sort();
    assert_eq!(encoded, sorted);
}

#[test]
fn test_str_round_trip_and_order() {
    let schema = str_schema();
    for s in ["", "a", "hello world", "z"] {
        let bytes = enc(&schema, &[Value::Str(s.to_string())]);
        let (decoded, n) = decode_row(&schema, &bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded, vec![Value::Str(s.to_string())]);
    }

    let a = enc(&schema, &[Value::Str("alpha".to_string())]);
    let b = enc(&schema, &[Value::Str("alphabet".to_string())]);
    let c = enc(&schema, &[Value::Str("beta".to_string())]);
    assert!(a < b);
    assert!(b < c);
}

#[test]
fn test_str_embedded_control_bytes_round_trip() {
    let schema = str_schema();
    let s = "a\u{0}b\u{1}c";
    let bytes = enc(&schema, &[Value::Str(s.to_string())]);
    let (decoded, n) = decode_row(&schema, &bytes).unwrap();
    assert_eq!(n, bytes.len());
    assert_eq!(decoded, vec![Value::Str(s.to_string())]);

    // ordering survives escaping: "a\x00b" < "ab"
    let lhs = enc(&schema, &[Value::Str("a\u{0}b".to_string())]);
    let rhs = enc(&schema, &[Value::Str("ab".to_string())]);
    assert!(lhs < rhs);
}

#[test]
fn test_multi_column_composite_order() {
    let schema = Schema::new(vec![ColumnKind::Str, ColumnKind::U32]);
    let a = enc(&schema, &[Value::Str("alpha".to_string()), Value::U32(1)]);
    let b = enc(&schema, &[Value::Str("alpha".to_string()), Value::U32(2)]);
    let c = enc(&schema, &[Value::Str("beta".to_string()), Value::U32(0)]);
    assert!(a < b);
    assert!(b < c);
}

#[test]
fn test_nested_row_and_variant_round_trip() {
    let inner = Schema::new(vec![ColumnKind::U8, ColumnKind::Str]);
    let schema = Schema::new(vec![
        ColumnKind::Row(inner),
        ColumnKind::Variant(vec![Schema::new(vec![ColumnKind::U32]), Schema::new(vec![ColumnKind::Str])]),
    ]);
    let values = vec![
        Value::Row(vec![Value::U8(9), Value::Str("nested".to_string())]),
        Value::Variant(1, Box::new(Value::Str("picked".to_string()))),
    ];
    let bytes = enc(&schema, &values);
    let (decoded, n) = decode_row(&schema, &bytes).unwrap();
    assert_eq!(n, bytes.len());
    assert_eq!(decoded, values);
}

#[test]
fn test_blob_consumes_tail() {
    let schema = Schema::new(vec![ColumnKind::U8, ColumnKind::Blob]);
    let values = vec![Value::U8(7), Value::Blob(vec![0, 1, 2, 255])];
    let bytes = enc(&schema, &values);
    let (decoded, n) = decode_row(&schema, &bytes).unwrap();
    assert_eq!(n, bytes.len());
    assert_eq!(decoded, values);
}

#[test]
fn test_schema_rejects_non_terminal_blob() {
    let schema = Schema::new(vec![ColumnKind::Blob, ColumnKind::U8]);
    assert!(schema.validate().is_err());
}

#[test]
fn test_prefix_end_bounds_prefix_scans() {
    let key = vec![0x10, 0x20];
    let end = prefix_end(&key).unwrap();
    assert!(end.as_slice() > key.as_slice());

    let mut extended = key.clone();
    extended.push(0x00);
    assert!(extended.as_slice() < end.as_slice());

    let mut sibling = key.clone();
    *sibling.last_mut().unwrap() += 1;
    assert!(end.as_slice() <= sibling.as_slice());
}

#[test]
fn test_prefix_end_all_ff_is_unbounded() {
    assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
    assert_eq!(prefix_end(&[]), None);
}

#[test]
fn test_prefix_end_strips_trailing_ff() {
    let key = vec![0x01, 0xFF, 0xFF];
    let end = prefix_end(&key).unwrap();
    assert_eq!(end, vec![0x02]);
}
