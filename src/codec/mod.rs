//! The document codec (storage-core component C1): a BSON-style tagged-union
//! value type with a deterministic, field-order-preserving wire format.

mod decode;
mod encode;
mod order;
mod value;

pub use decode::decode_document;
pub use encode::encode_document;
pub use order::{cmp_value, eq_value};
pub use value::{tag, BinarySubtype, Decimal128, Document, ObjectId, Value, MAX_DEPTH};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_document() -> Document {
        let mut inner = Document::new();
        inner.insert("x", Value::Int32(7));
        inner.insert("y", Value::Null);

        let mut doc = Document::new();
        doc.insert("name", Value::String("alice".to_owned()));
        doc.insert("age", Value::Int32(30));
        doc.insert("balance", Value::Double(12.5));
        doc.insert("active", Value::Bool(true));
        doc.insert("tags", Value::Array(vec![Value::String("a".into()), Value::String("b".into())]));
        doc.insert("nested", Value::Document(inner));
        doc.insert("nothing", Value::Null);
        doc.insert("big", Value::Int64(9_000_000_000));
        doc.insert("oid", Value::ObjectId(ObjectId([1; 12])));
        doc.insert("blob", Value::Binary(0, vec![1, 2, 3]));
        doc.insert("when", Value::DateTime(1_700_000_000_000));
        doc
    }

    #[test]
    fn round_trips_a_representative_document() {
        let doc = sample_document();
        let bytes = encode_document(&doc).unwrap();
        let (decoded, consumed) = decode_document(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, doc);
        // Field order must survive the round trip too.
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "age", "balance", "active", "tags", "nested", "nothing", "big", "oid", "blob", "when"]);
    }

    #[test]
    fn rejects_truncated_length_prefix() {
        let err = decode_document(&[1, 2]).unwrap_err();
        assert!(matches!(err, crate::errors::DbError::FormatError { .. }));
    }

    #[test]
    fn rejects_declared_length_past_buffer_end() {
        let mut bytes = encode_document(&sample_document()).unwrap();
        let bad_len = (bytes.len() as u32 + 1000).to_le_bytes();
        bytes[0..4].copy_from_slice(&bad_len);
        let err = decode_document(&bytes).unwrap_err();
        assert!(matches!(err, crate::errors::DbError::FormatError { .. }));
    }

    #[test]
    fn rejects_nesting_past_the_depth_cap() {
        let mut v = Value::Int32(0);
        for _ in 0..(MAX_DEPTH as usize + 5) {
            let mut d = Document::new();
            d.insert("inner", v);
            v = Value::Document(d);
        }
        let mut top = Document::new();
        top.insert("chain", v);
        let err = encode_document(&top).unwrap_err();
        assert!(matches!(err, crate::errors::DbError::FormatError { .. }));
    }

    #[test]
    fn nan_is_self_equal_but_greater_than_finite_numbers() {
        let nan = Value::Double(f64::NAN);
        assert!(eq_value(&nan, &Value::Double(f64::NAN)));
        assert_eq!(cmp_value(&nan, &Value::Int32(i32::MAX)), std::cmp::Ordering::Greater);
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(cmp_value(&Value::Int32(5), &Value::Double(5.0)), std::cmp::Ordering::Equal);
        assert_eq!(cmp_value(&Value::Int64(4), &Value::Int32(5)), std::cmp::Ordering::Less);
    }

    #[test]
    fn type_rank_orders_null_before_bool_before_numbers_before_strings() {
        assert_eq!(cmp_value(&Value::Null, &Value::Bool(false)), std::cmp::Ordering::Less);
        assert_eq!(cmp_value(&Value::Bool(true), &Value::Int32(0)), std::cmp::Ordering::Less);
        assert_eq!(cmp_value(&Value::Int32(1_000_000), &Value::String("a".into())), std::cmp::Ordering::Less);
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_scalar_documents(
            s in "[a-zA-Z0-9]{0,16}",
            i in any::<i32>(),
            d in any::<f64>().prop_filter("finite", |x| x.is_finite()),
            b in any::<bool>(),
        ) {
            let mut doc = Document::new();
            doc.insert("s", Value::String(s));
            doc.insert("i", Value::Int32(i));
            doc.insert("d", Value::Double(d));
            doc.insert("b", Value::Bool(b));
            let bytes = encode_document(&doc).unwrap();
            let (decoded, consumed) = decode_document(&bytes).unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(decoded, doc);
        }
    }
}
