use crate::*;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;

fn roundtrip(packer: &Packer, value: &Value) -> Result<Value> {
    let bytes = packer.pack_to_vec(value)?;
    let mut cursor = bytes.as_slice();
    let out = packer.unpack(&mut cursor)?;
    assert!(cursor.is_empty(), "packer {} left {} bytes unread", packer.id(), cursor.len());
    Ok(out)
}

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_scalars_are_big_endian() -> Result<()> {
    assert_eq!(Packer::Int16.pack_to_vec(&Value::Int16(0x0102))?, vec![0x01, 0x02]);
    assert_eq!(Packer::Int32.pack_to_vec(&Value::Int32(1))?, vec![0, 0, 0, 1]);
    assert_eq!(
        Packer::Int64.pack_to_vec(&Value::Int64(-2))?,
        vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]
    );
    assert_eq!(Packer::Bool.pack_to_vec(&Value::Bool(true))?, vec![1]);
    Ok(())
}

#[test]
fn test_integer_extremes_roundtrip() -> Result<()> {
    for (packer, value) in [
        (Packer::Int8, Value::Int8(i8::MIN)),
        (Packer::Int16, Value::Int16(i16::MAX)),
        (Packer::Int32, Value::Int32(i32::MIN)),
        (Packer::Int64, Value::Int64(i64::MAX)),
    ] {
        assert_eq!(roundtrip(&packer, &value)?, value);
    }
    Ok(())
}

#[test]
fn test_float_is_bit_exact() -> Result<()> {
    let weird = f64::from_bits(0x7ff8_0000_dead_beef);
    let out = roundtrip(&Packer::Float, &Value::Float(weird))?;
    assert_eq!(out.as_f64().map(f64::to_bits), Some(weird.to_bits()));

    let neg_zero = roundtrip(&Packer::Float, &Value::Float(-0.0))?;
    assert_eq!(neg_zero.as_f64().map(f64::to_bits), Some((-0.0f64).to_bits()));
    Ok(())
}

#[test]
fn test_nonzero_byte_reads_as_true() -> Result<()> {
    assert_eq!(Packer::Bool.unpack_from_slice(&[7])?, Value::Bool(true));
    assert_eq!(Packer::Bool.unpack_from_slice(&[0])?, Value::Bool(false));
    Ok(())
}

#[test]
fn test_null_scalar_packs_as_zero() -> Result<()> {
    assert_eq!(Packer::Int32.pack_to_vec(&Value::Null)?, vec![0, 0, 0, 0]);
    assert_eq!(Packer::Null.pack_to_vec(&Value::Int32(5))?, Vec::<u8>::new());
    assert_eq!(Packer::Null.unpack_from_slice(&[])?, Value::Null);
    Ok(())
}

#[test]
fn test_type_mismatch_is_reported() {
    let err = Packer::Int32.pack_to_vec(&Value::Str("x".into())).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { packer: ids::INT32, found: "str" });
}

// ============================================================================
//  BLOBS
// ============================================================================

#[test]
fn test_null_and_empty_buffer_are_distinct() -> Result<()> {
    let null = Packer::Buffer.pack_to_vec(&Value::Null)?;
    let empty = Packer::Buffer.pack_to_vec(&Value::Buffer(vec![]))?;
    assert_eq!(null, vec![0xff, 0xff, 0xff, 0xff]);
    assert_eq!(empty, vec![0, 0, 0, 0]);

    assert_eq!(Packer::Buffer.unpack_from_slice(&null)?, Value::Null);
    assert_eq!(Packer::Buffer.unpack_from_slice(&empty)?, Value::Buffer(vec![]));
    Ok(())
}

#[test]
fn test_string_is_utf8_with_length_prefix() -> Result<()> {
    let bytes = Packer::Str.pack_to_vec(&Value::from("héllo"))?;
    assert_eq!(&bytes[..4], &[0, 0, 0, 6]);
    assert_eq!(Packer::Str.unpack_from_slice(&bytes)?, Value::from("héllo"));
    assert_eq!(roundtrip(&Packer::Str, &Value::Null)?, Value::Null);
    Ok(())
}

#[test]
fn test_invalid_utf8_rejected() {
    let bytes = [0, 0, 0, 2, 0xc3, 0x28];
    assert_eq!(Packer::Str.unpack_from_slice(&bytes), Err(Error::InvalidUtf8));
}

#[test]
fn test_truncated_blob_is_unexpected_end() {
    let bytes = [0, 0, 0, 10, 1, 2, 3];
    assert_eq!(Packer::Buffer.unpack_from_slice(&bytes), Err(Error::UnexpectedEnd));
    assert_eq!(Packer::Int64.unpack_from_slice(&[1, 2]), Err(Error::UnexpectedEnd));
}

#[test]
fn test_huge_claimed_length_does_not_allocate_up_front() {
    let bytes = [0x7f, 0xff, 0xff, 0xff, 1];
    assert_eq!(Packer::Buffer.unpack_from_slice(&bytes), Err(Error::UnexpectedEnd));
}

#[test]
fn test_negative_length_below_sentinel() {
    let bytes = (-5i32).to_be_bytes();
    assert_eq!(Packer::Str.unpack_from_slice(&bytes), Err(Error::NegativeLength(-5)));
}

// ============================================================================
//  DATES
// ============================================================================

#[test]
fn test_unix_epoch_offset() -> Result<()> {
    let epoch = Date::from(std::time::UNIX_EPOCH);
    assert_eq!(epoch.as_micros(), 62_135_596_800_000_000);

    let bytes = Packer::Date.pack_to_vec(&Value::Date(epoch))?;
    assert_eq!(bytes, 62_135_596_800_000_000i64.to_be_bytes().to_vec());
    Ok(())
}

#[test]
fn test_date_before_unix_epoch() {
    let t = std::time::UNIX_EPOCH - std::time::Duration::from_micros(1_500_000);
    let d = Date::from(t);
    assert_eq!(d.unix_micros(), -1_500_000);
    assert_eq!(std::time::SystemTime::from(d), t);
}

#[cfg(feature = "chrono")]
#[test]
fn test_chrono_conversion() -> Result<()> {
    use chrono::TimeZone;
    let t = chrono::Utc.with_ymd_and_hms(2001, 9, 9, 1, 46, 40).unwrap();
    let d = Date::from(t);
    assert_eq!(d.unix_micros(), 1_000_000_000_000_000);
    assert_eq!(chrono::DateTime::<chrono::Utc>::try_from(d)?, t);
    Ok(())
}

// ============================================================================
//  CONTAINERS
// ============================================================================

#[test]
fn test_builtin_table() {
    assert_eq!(Packer::builtin(808).map(|p| p.id()), Some(ids::LIST_OF_STR));
    assert_eq!(Packer::builtin(820).map(|p| p.id()), Some(ids::SET_OF_INT8));
    assert_eq!(Packer::builtin(853).map(|p| p.id()), Some(ids::MAP_OF_STR_STR));
    assert_eq!(Packer::builtin(998).map(|p| p.id()), Some(ids::HETERO_MAP));
    assert!(Packer::builtin(11).is_none());
    assert!(Packer::builtin(809).is_none());
    assert!(Packer::builtin(2000).is_none());
}

#[test]
fn test_list_of_str_layout() -> Result<()> {
    let packer = Packer::builtin(ids::LIST_OF_STR).unwrap();
    let value = Value::List(vec!["a".into(), "bc".into()]);
    let bytes = packer.pack_to_vec(&value)?;
    assert_eq!(bytes, vec![0, 0, 0, 2, 0, 0, 0, 1, b'a', 0, 0, 0, 2, b'b', b'c']);
    assert_eq!(packer.unpack_from_slice(&bytes)?, value);
    Ok(())
}

#[test]
fn test_null_container_packs_as_empty() -> Result<()> {
    let packer = Packer::builtin(ids::SET_OF_INT32).unwrap();
    let bytes = packer.pack_to_vec(&Value::Null)?;
    assert_eq!(bytes, vec![0, 0, 0, 0]);
    assert_eq!(packer.unpack_from_slice(&bytes)?, Value::Set(vec![]));
    Ok(())
}

#[test]
fn test_map_keeps_entry_order() -> Result<()> {
    let packer = Packer::builtin(ids::MAP_OF_STR_INT32).unwrap();
    let value = Value::Map(vec![
        ("z".into(), Value::Int32(1)),
        ("a".into(), Value::Int32(2)),
    ]);
    assert_eq!(roundtrip(&packer, &value)?, value);
    Ok(())
}

#[test]
fn test_nested_user_containers() -> Result<()> {
    let packer = Packer::list_of(2100, Packer::builtin(ids::LIST_OF_INT64).unwrap());
    let value = Value::List(vec![
        Value::List(vec![Value::Int64(1), Value::Int64(2)]),
        Value::List(vec![]),
    ]);
    assert_eq!(roundtrip(&packer, &value)?, value);
    Ok(())
}

#[test]
fn test_container_rejects_wrong_shape() {
    let packer = Packer::builtin(ids::LIST_OF_INT32).unwrap();
    let err = packer.pack_to_vec(&Value::Set(vec![])).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { packer: ids::LIST_OF_INT32, found: "set" });
}

// ============================================================================
//  HETEROGENEOUS MAPS
// ============================================================================

#[test]
fn test_heteromap_wire_layout() -> Result<()> {
    let mut map = HeteroMap::new();
    map.insert("k", 7i32)?;
    let bytes = Packer::HeteroMap(Registry::new()).pack_to_vec(&Value::HeteroMap(map))?;
    assert_eq!(
        bytes,
        vec![
            0, 0, 0, 1, // count
            0, 0, 0, 9, 0, 0, 0, 1, b'k', // str key
            0, 0, 0, 4, 0, 0, 0, 7, // int32 value
        ]
    );
    Ok(())
}

#[test]
fn test_heteromap_nested_roundtrip() -> Result<()> {
    let mut map = HeteroMap::new();
    map.insert("name", "svc")?;
    map.insert(42i32, 1.5f64)?;
    map.insert("tags", Value::List(vec!["a".into(), "b".into()]))?;
    let inner = map.new_map("inner")?;
    inner.insert("deep", true)?;

    let packer = Packer::HeteroMap(Registry::new());
    let out = roundtrip(&packer, &Value::HeteroMap(map.clone()))?;
    let out = out.as_hetero_map().unwrap();

    assert_eq!(out, &map);
    assert_eq!(out.get_str("name"), Some("svc"));
    assert_eq!(out.get(42i32), Some(&Value::Float(1.5)));
    assert_eq!(out.get_map("inner").and_then(|m| m.get("deep")), Some(&Value::Bool(true)));
    let (_, tags) = out.packers("tags").unwrap();
    assert_eq!(tags.id(), ids::LIST_OF_STR);
    Ok(())
}

#[test]
fn test_heteromap_unknown_packer_id() -> Result<()> {
    let mut bytes = Vec::new();
    write_i32(&mut bytes, 1)?;
    write_i32(&mut bytes, ids::STR)?;
    write_str(&mut bytes, "k")?;
    write_i32(&mut bytes, 4242)?;

    let err = Packer::HeteroMap(Registry::new()).unpack_from_slice(&bytes).unwrap_err();
    assert_eq!(err, Error::UnknownPackerId(4242));
    Ok(())
}

#[test]
fn test_registry_reaches_nested_maps() -> Result<()> {
    let point = Packer::custom(RecordPacker::new(2001, vec![Packer::Int32, Packer::Int32]));
    let registry = Registry::new().with(point.clone());

    let mut inner = HeteroMap::new();
    inner.put("p", Packer::Str, Value::Record(vec![1i32.into(), 2i32.into()]), point);
    let mut outer = HeteroMap::new();
    outer.insert("inner", inner)?;

    let packer = Packer::HeteroMap(registry);
    let out = roundtrip(&packer, &Value::HeteroMap(outer))?;
    let p = out
        .as_hetero_map()
        .and_then(|m| m.get_map("inner"))
        .and_then(|m| m.get("p"))
        .cloned();
    assert_eq!(p, Some(Value::Record(vec![Value::Int32(1), Value::Int32(2)])));
    Ok(())
}

#[test]
fn test_heteromap_put_replaces_and_remove_drops_packers() -> Result<()> {
    let mut map = HeteroMap::new();
    map.insert("k", 1i32)?;
    let old = map.put("k", Packer::Str, "two", Packer::Str);
    assert_eq!(old, Some(Value::Int32(1)));
    assert_eq!(map.len(), 1);
    assert_eq!(map.packers("k").map(|(_, v)| v.id()), Some(ids::STR));

    assert_eq!(map.remove("k"), Some(Value::from("two")));
    assert!(map.packers("k").is_none());
    assert!(map.is_empty());
    Ok(())
}

#[test]
fn test_heteromap_put_all_and_equality_ignore_order() -> Result<()> {
    let mut a = HeteroMap::new();
    a.insert("x", 1i32)?;
    a.insert("y", 2i64)?;

    let mut b = HeteroMap::new();
    b.insert("y", 2i64)?;
    b.put_all(&a);
    assert_eq!(a, b);

    b.put("x", Packer::Int64, 1i64, Packer::Int64);
    assert_ne!(a, b);
    Ok(())
}

#[test]
fn test_heteromap_inference_limits() {
    let mut map = HeteroMap::new();
    assert_eq!(
        map.insert("mixed", Value::List(vec![1i32.into(), "a".into()])),
        Err(Error::CannotInferPacker("list"))
    );
    assert_eq!(map.insert("empty", Value::Set(vec![])), Err(Error::CannotInferPacker("set")));
    assert!(map.is_empty());
}

// ============================================================================
//  OBJECT REFERENCES
// ============================================================================

#[derive(Default)]
struct VecSerializer {
    objects: Mutex<Vec<ObjectRef>>,
}

impl Serializer for VecSerializer {
    fn store(&self, obj: Option<&ObjectRef>) -> Result<i64> {
        let Some(obj) = obj else { return Ok(-1) };
        let mut objects = self.objects.lock().unwrap();
        objects.push(obj.clone());
        Ok(objects.len() as i64 - 1)
    }

    fn load(&self, id: i64) -> Result<Option<ObjectRef>> {
        if id == -1 {
            return Ok(None);
        }
        let objects = self.objects.lock().unwrap();
        usize::try_from(id)
            .ok()
            .and_then(|i| objects.get(i).cloned())
            .map(Some)
            .ok_or(Error::UnknownHandle(id))
    }
}

#[test]
fn test_obj_ref_goes_through_serializer() -> Result<()> {
    let serializer = Arc::new(VecSerializer::default());
    let packer = Packer::obj_ref(2500, serializer.clone());

    let obj = ObjectRef::new(String::from("file"));
    let bytes = packer.pack_to_vec(&Value::Object(obj.clone()))?;
    assert_eq!(bytes, 0i64.to_be_bytes().to_vec());

    let back = packer.unpack_from_slice(&bytes)?;
    assert!(back.as_object().is_some_and(|o| o.ptr_eq(&obj)));
    assert_eq!(back.as_object().and_then(|o| o.downcast_ref::<String>()).map(String::as_str), Some("file"));

    assert_eq!(roundtrip(&packer, &Value::Null)?, Value::Null);
    assert_eq!(packer.unpack_from_slice(&9i64.to_be_bytes()), Err(Error::UnknownHandle(9)));
    Ok(())
}

// ============================================================================
//  CUSTOM PACKERS
// ============================================================================

struct Celsius;

impl CustomPacker for Celsius {
    fn id(&self) -> i32 {
        2042
    }

    fn pack(&self, value: &Value, w: &mut dyn Write) -> Result<()> {
        let v = value.as_f64().ok_or(Error::TypeMismatch { packer: 2042, found: value.kind() })?;
        write_i32(w, (v * 100.0).round() as i32)
    }

    fn unpack(&self, r: &mut dyn Read) -> Result<Value> {
        Ok(Value::Float(read_i32(r)? as f64 / 100.0))
    }
}

#[test]
fn test_custom_packer_is_resolvable() -> Result<()> {
    let registry = Registry::new().with(Packer::custom(Celsius));
    let packer = registry.resolve(2042)?;
    assert_eq!(packer.id(), 2042);
    assert_eq!(roundtrip(&packer, &Value::Float(21.5))?, Value::Float(21.5));
    assert_eq!(registry.resolve(2043).unwrap_err(), Error::UnknownPackerId(2043));
    Ok(())
}

#[test]
fn test_record_arity_is_checked() {
    let packer = Packer::custom(RecordPacker::new(2001, vec![Packer::Int32, Packer::Str]));
    let err = packer.pack_to_vec(&Value::Record(vec![Value::Int32(1)])).unwrap_err();
    assert_eq!(err, Error::TypeMismatch { packer: 2001, found: "record" });
}
