use std::collections::HashMap;

use crate::*;

#[derive(Debug, Clone, PartialEq)]
struct Template {
    prefix: String,
    name: String,
    priority: i32,
    tags: Vec<String>,
}

crate::record!(Template { prefix, name; priority, tags });

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_scalars_in_sequence() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bool(true)?;
    enc.u8(255)?;
    enc.i16(i16::MIN)?;
    enc.u32(u32::MAX)?;
    enc.i64(-42)?;
    enc.f64(std::f64::consts::PI)?;
    enc.char('🦀')?;
    enc.str("survival-1")?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert!(dec.bool()?);
    assert_eq!(dec.u8()?, 255);
    assert_eq!(dec.i16()?, i16::MIN);
    assert_eq!(dec.u32()?, u32::MAX);
    assert_eq!(dec.i64()?, -42);
    assert_eq!(dec.f64()?, std::f64::consts::PI);
    assert_eq!(dec.char()?, '🦀');
    assert_eq!(dec.str()?, "survival-1");
    assert!(dec.is_empty());
    Ok(())
}

#[test]
fn test_with_capacity_preallocates() -> Result<()> {
    let mut enc = Encoder::with_capacity(2);
    enc.bool(true)?;
    enc.bool(false)?;
    assert_eq!(enc.into_bytes()?, vec![Tag::BoolTrue as u8, Tag::BoolFalse as u8]);
    Ok(())
}

// ============================================================================
//  ERROR CONDITIONS
// ============================================================================

#[test]
fn test_truncated_buffer_is_unexpected_end() -> Result<()> {
    let mut enc = Encoder::new();
    enc.u64(7)?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes[..4]);
    assert_eq!(dec.u64(), Err(Error::UnexpectedEnd));

    let nothing: [u8; 0] = [];
    let mut empty = Decoder::new(&nothing);
    assert_eq!(empty.str(), Err(Error::UnexpectedEnd));
    Ok(())
}

#[test]
fn test_unknown_tag() {
    let mut dec = Decoder::new(&[0xEE, 0x00]);
    assert_eq!(dec.peek_tag(), Err(Error::UnknownTag(0xEE)));
    assert_eq!(dec.skip(), Err(Error::UnknownTag(0xEE)));
}

#[test]
fn test_type_mismatch_does_not_advance() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("lobby")?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes);
    assert!(matches!(dec.i32(), Err(Error::TypeMismatch { expected: "i32", found: Tag::String })));
    assert_eq!(dec.str()?, "lobby");
    Ok(())
}

#[test]
fn test_open_scope_cannot_finalize() -> Result<()> {
    let mut enc = Encoder::new();
    enc.list_begin()?;
    assert!(matches!(enc.into_bytes(), Err(Error::ScopeStillOpen)));

    let mut enc = Encoder::new();
    enc.list_begin()?;
    assert_eq!(enc.map_end(), Err(Error::ScopeMismatch { expected: Scope::Map, actual: Scope::List }));
    assert_eq!(Encoder::new().list_end(), Err(Error::ScopeUnderflow));
    Ok(())
}

#[test]
fn test_key_outside_map_is_rejected() -> Result<()> {
    let mut enc = Encoder::new();
    assert_eq!(enc.key("name"), Err(Error::ScopeUnderflow));
    enc.list_begin()?;
    assert!(enc.key("name").is_err());
    Ok(())
}

// ============================================================================
//  CONTAINERS & SKIPPING
// ============================================================================

#[test]
fn test_skip_and_item_bytes() -> Result<()> {
    let mut enc = Encoder::new();
    enc.list_begin()?;
    enc.str("a")?;
    enc.list_begin()?;
    enc.u32(1)?;
    enc.list_end()?;
    enc.list_end()?;
    enc.i32(99)?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes);
    let item = dec.item_bytes()?;
    assert_eq!(item.len(), bytes.len() - 5);
    assert_eq!(dec.i32()?, 99);

    let mut dec = Decoder::new(&bytes);
    dec.skip()?;
    assert_eq!(dec.remaining(), 5);
    Ok(())
}

#[test]
fn test_count_items_leaves_cursor() -> Result<()> {
    let mut enc = Encoder::new();
    enc.list_begin()?;
    enc.str("x")?;
    enc.bool(false)?;
    enc.f32(1.5)?;
    enc.list_end()?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes);
    let list = dec.list()?;
    assert_eq!(list.count_items()?, 3);
    assert_eq!(list.remaining(), bytes.len() - 5);
    Ok(())
}

#[test]
fn test_raw_embeds_encoded_items() -> Result<()> {
    let mut inner = Encoder::new();
    inner.str("embedded")?;
    let inner = inner.into_bytes()?;

    let mut enc = Encoder::new();
    enc.list_begin()?;
    enc.raw(&inner)?;
    enc.list_end()?;
    let bytes = enc.into_bytes()?;

    let mut dec = Decoder::new(&bytes);
    let mut list = dec.list()?;
    assert_eq!(list.str()?, "embedded");
    Ok(())
}

// ============================================================================
//  PACK / UNPACK
// ============================================================================

#[test]
fn test_option_is_a_single_item() -> Result<()> {
    let mut enc = Encoder::new();
    enc.pack(&None::<String>)?;
    enc.pack(&Some(12u16))?;
    enc.pack(&Some(Some("x".to_string())))?;
    let bytes = enc.into_bytes()?;
    assert_eq!(bytes[0], Tag::List as u8);

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.count_items()?, 3);
    assert_eq!(dec.unpack::<Option<String>>()?, None);
    assert_eq!(dec.unpack::<Option<u16>>()?, Some(12));
    assert_eq!(dec.unpack::<Option<Option<String>>>()?, Some(Some("x".to_string())));
    assert!(dec.is_empty());
    Ok(())
}

#[test]
fn test_option_rejects_extra_items() -> Result<()> {
    let mut enc = Encoder::new();
    enc.pack(&vec![1u8, 2])?;
    let bytes = enc.into_bytes()?;

    let decoded = Decoder::new(&bytes).unpack::<Option<u8>>();
    assert!(matches!(decoded, Err(Error::TrailingBytes(_))), "{:?}", decoded);
    Ok(())
}

#[test]
fn test_record_macro() -> Result<()> {
    let template = Template {
        prefix: "Lobby".into(),
        name: "default".into(),
        priority: 3,
        tags: vec!["a".into(), "b".into()],
    };

    let mut enc = Encoder::new();
    enc.pack(&template)?;
    let bytes = enc.into_bytes()?;
    let decoded: Template = Decoder::new(&bytes).unpack()?;
    assert_eq!(decoded, template);
    Ok(())
}

#[test]
fn test_record_skips_unknown_and_defaults_optional() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.field("name", "global")?;
    enc.field("from_the_future", &vec![1u8, 2, 3])?;
    enc.field("prefix", "Global")?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    let decoded: Template = Decoder::new(&bytes).unpack()?;
    assert_eq!(decoded.prefix, "Global");
    assert_eq!(decoded.name, "global");
    assert_eq!(decoded.priority, 0);
    assert!(decoded.tags.is_empty());
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Older {
    name: String,
}

crate::record!(Older { name });

#[derive(Debug, Clone, PartialEq)]
struct Newer {
    label: Option<String>,
    name: String,
    fallback: Option<u32>,
}

crate::record!(Newer { label, name; fallback });

#[test]
fn test_record_skips_unknown_optional_fields() -> Result<()> {
    for newer in [
        Newer { label: Some("b".into()), name: "a".into(), fallback: None },
        Newer { label: None, name: "a".into(), fallback: Some(7) },
    ] {
        let mut enc = Encoder::new();
        enc.pack(&newer)?;
        let bytes = enc.into_bytes()?;

        let older: Older = Decoder::new(&bytes).unpack()?;
        assert_eq!(older.name, "a");
        assert_eq!(Decoder::new(&bytes).unpack::<Newer>()?, newer);
    }
    Ok(())
}

#[test]
fn test_record_missing_required_field() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.field("prefix", "Lobby")?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    let decoded = Decoder::new(&bytes).unpack::<Template>();
    assert_eq!(decoded, Err(Error::MissingField("name")));
    Ok(())
}

#[test]
fn test_string_map() -> Result<()> {
    let mut props = HashMap::new();
    props.insert("motd".to_string(), "hello".to_string());
    props.insert("maxPlayers".to_string(), "20".to_string());

    let mut enc = Encoder::new();
    enc.pack(&props)?;
    let bytes = enc.into_bytes()?;
    let decoded: HashMap<String, String> = Decoder::new(&bytes).unpack()?;
    assert_eq!(decoded, props);
    Ok(())
}

// ============================================================================
//  NORMALIZATION
// ============================================================================

#[test]
fn test_normalized_integers_widen_and_narrow() -> Result<()> {
    let mut enc = Encoder::new();
    enc.u8(200)?;
    enc.i64(70_000)?;
    enc.i64(-1)?;
    enc.i32(5)?;
    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert_eq!(i64::unpack_normalized(&mut dec)?, 200);
    assert_eq!(i32::unpack_normalized(&mut dec)?, 70_000);
    assert_eq!(u32::unpack_normalized(&mut dec), Err(Error::OutOfRange { target: "u32" }));
    assert_eq!(f64::unpack_normalized(&mut dec)?, 5.0);
    Ok(())
}

#[test]
fn test_strict_integers_reject_other_widths() -> Result<()> {
    let mut enc = Encoder::new();
    enc.u8(1)?;
    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);
    assert!(i32::unpack(&mut dec).is_err());
    Ok(())
}
