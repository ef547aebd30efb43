//! Variant values and their self-describing binary encoding.
//!
//! Every encoded value starts with a one-byte kind tag followed by a
//! kind-specific payload. Integers and reals are fixed 8-byte little-endian
//! fields; text, arrays and maps carry an explicit 4-byte length or count.
//! There is no padding or alignment.
//!
//! ```text
//! Null       [0]
//! Integer    [1][i64 LE]
//! Real       [2][f64 LE]
//! Text       [3][u32 LE len][bytes]
//! Array      [4][u32 LE count][value]*
//! Map        [5][u32 LE count]([u8 key len][key][value])*
//! Exception  [6][u32 LE len][text]
//! ObjectRef  [8][u32 LE object id]
//! ```

use crate::error::{WireError, WireResult};
use crate::registry::{ExposedObject, LocalObject, ObjectHandle, ObjectRegistry};
use crate::remote::RemoteRef;
use crate::SessionId;
use bytes::{Buf, BufMut};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Longest map key the wire format can carry.
pub const MAX_KEY_LEN: usize = 255;

/// Maximum nesting of arrays and maps accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 64;

/// One-byte kind tags of the variant encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VariantKind {
    Null = 0,
    Integer = 1,
    Real = 2,
    Text = 3,
    Array = 4,
    Map = 5,
    Exception = 6,
    ObjectRef = 8,
    /// Reserved, never produced or consumed.
    Future = 9,
}

impl VariantKind {
    /// Map a tag byte to its kind; `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => VariantKind::Null,
            1 => VariantKind::Integer,
            2 => VariantKind::Real,
            3 => VariantKind::Text,
            4 => VariantKind::Array,
            5 => VariantKind::Map,
            6 => VariantKind::Exception,
            8 => VariantKind::ObjectRef,
            9 => VariantKind::Future,
            _ => return None,
        })
    }
}

/// The value type carried by calls and results.
///
/// `Object` holds a local object that gets registered (and replaced by its
/// new ID) when encoded. `Remote` is what the decoder produces for a received
/// object reference.
#[derive(Clone)]
pub enum Variant {
    Null,
    Integer(i64),
    Real(f64),
    Text(Vec<u8>),
    Array(Vec<Variant>),
    Map(VariantMap),
    Exception(String),
    Object(ObjectHandle),
    Remote(RemoteRef),
}

impl Variant {
    /// Text from raw bytes (the wire's text kind is a byte string).
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Variant::Text(data.into())
    }

    /// Render an error into an Exception value.
    pub fn exception(err: impl fmt::Display) -> Self {
        Variant::Exception(err.to_string())
    }

    /// Expose a local object.
    pub fn object<T: ExposedObject>(obj: T) -> Self {
        Variant::Object(Arc::new(obj))
    }

    /// The wire kind this value encodes as.
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Null => VariantKind::Null,
            Variant::Integer(_) => VariantKind::Integer,
            Variant::Real(_) => VariantKind::Real,
            Variant::Text(_) => VariantKind::Text,
            Variant::Array(_) => VariantKind::Array,
            Variant::Map(_) => VariantKind::Map,
            Variant::Exception(_) => VariantKind::Exception,
            Variant::Object(_) | Variant::Remote(_) => VariantKind::ObjectRef,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    /// Integer value, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Reals, or integers widened to `f64`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Variant::Real(f) => Some(*f),
            Variant::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Raw text bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Variant::Text(b) => Some(b),
            _ => None,
        }
    }

    /// Text that happens to be valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Array elements.
    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Map entries.
    pub fn as_map(&self) -> Option<&VariantMap> {
        match self {
            Variant::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Exception text.
    pub fn as_exception(&self) -> Option<&str> {
        match self {
            Variant::Exception(e) => Some(e),
            _ => None,
        }
    }

    /// Reference to an object owned by the peer.
    pub fn as_remote(&self) -> Option<&RemoteRef> {
        match self {
            Variant::Remote(r) => Some(r),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn item(&self, key: &str) -> Option<&Variant> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Human-readable rendering cut to `max_len` characters, for logs.
    pub fn repr(&self, max_len: usize) -> String {
        let full = self.to_string();
        if full.chars().count() <= max_len {
            return full;
        }
        let mut cut: String = full.chars().take(max_len).collect();
        cut.push_str("...");
        cut
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Null, Variant::Null) => true,
            (Variant::Integer(a), Variant::Integer(b)) => a == b,
            // Bitwise, so NaN equals itself after a round trip.
            (Variant::Real(a), Variant::Real(b)) => a.to_bits() == b.to_bits(),
            (Variant::Text(a), Variant::Text(b)) => a == b,
            (Variant::Array(a), Variant::Array(b)) => a == b,
            (Variant::Map(a), Variant::Map(b)) => a == b,
            (Variant::Exception(a), Variant::Exception(b)) => a == b,
            (Variant::Object(a), Variant::Object(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Variant::Remote(a), Variant::Remote(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => write!(f, "Null"),
            Variant::Integer(i) => write!(f, "Integer({i})"),
            Variant::Real(r) => write!(f, "Real({r})"),
            Variant::Text(b) => write!(f, "Text({:?})", String::from_utf8_lossy(b)),
            Variant::Array(a) => f.debug_tuple("Array").field(a).finish(),
            Variant::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Variant::Exception(e) => write!(f, "Exception({e:?})"),
            Variant::Object(_) => write!(f, "Object(..)"),
            Variant::Remote(r) => write!(f, "Remote({r:?})"),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => write!(f, "null"),
            Variant::Integer(i) => write!(f, "{i}"),
            Variant::Real(r) => write!(f, "{r}"),
            Variant::Text(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Variant::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Variant::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {value}", String::from_utf8_lossy(key))?;
                }
                write!(f, "}}")
            }
            Variant::Exception(e) => write!(f, "Exception({e:?})"),
            Variant::Object(_) => write!(f, "<local object>"),
            Variant::Remote(r) => write!(f, "<remote object #{}>", r.object_id()),
        }
    }
}

// JSON-friendly view, used by the CLI to print results.
impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Variant::Null => serializer.serialize_unit(),
            Variant::Integer(i) => serializer.serialize_i64(*i),
            Variant::Real(r) => serializer.serialize_f64(*r),
            Variant::Text(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Variant::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Variant::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(&String::from_utf8_lossy(key), value)?;
                }
                map.end()
            }
            Variant::Exception(e) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("exception", e)?;
                map.end()
            }
            Variant::Object(_) => serializer.serialize_str("<local object>"),
            Variant::Remote(r) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("remote_object", &r.object_id())?;
                map.end()
            }
        }
    }
}

/// Byte-keyed map that keeps insertion order for encoding.
///
/// Keys are raw byte strings like text values; the `&str` convenience
/// methods work for the common UTF-8 case. Lookups go through a hash index.
/// Equality compares key sets and values, ignoring order.
#[derive(Clone, Default)]
pub struct VariantMap {
    entries: Vec<(Vec<u8>, Variant)>,
    index: HashMap<Vec<u8>, usize>,
}

impl VariantMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert or replace; returns the previous value for the key.
    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: impl Into<Variant>) -> Option<Variant> {
        let key = key.as_ref();
        let value = value.into();
        if let Some(&slot) = self.index.get(key) {
            return Some(std::mem::replace(&mut self.entries[slot].1, value));
        }
        self.index.insert(key.to_vec(), self.entries.len());
        self.entries.push((key.to_vec(), value));
        None
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl AsRef<[u8]>, value: impl Into<Variant>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value stored under `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&Variant> {
        self.index
            .get(key.as_ref())
            .map(|&slot| &self.entries[slot].1)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.index.contains_key(key.as_ref())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order, keys as raw bytes.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Variant)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|(k, _)| k.as_slice())
    }
}

impl fmt::Debug for VariantMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
            .finish()
    }
}

impl PartialEq for VariantMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl IntoIterator for VariantMap {
    type Item = (Vec<u8>, Variant);
    type IntoIter = std::vec::IntoIter<(Vec<u8>, Variant)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: AsRef<[u8]>, V: Into<Variant>> FromIterator<(K, V)> for VariantMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = VariantMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// --- Conversions: the classification policy for local values. ---

impl From<()> for Variant {
    fn from(_: ()) -> Self {
        Variant::Null
    }
}

impl From<bool> for Variant {
    fn from(b: bool) -> Self {
        Variant::Integer(b as i64)
    }
}

macro_rules! integer_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Variant {
            fn from(i: $t) -> Self {
                Variant::Integer(i64::from(i))
            }
        })*
    };
}

integer_from!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Variant {
    fn from(f: f32) -> Self {
        Variant::Real(f64::from(f))
    }
}

impl From<f64> for Variant {
    fn from(f: f64) -> Self {
        Variant::Real(f)
    }
}

impl From<&str> for Variant {
    fn from(s: &str) -> Self {
        Variant::Text(s.as_bytes().to_vec())
    }
}

impl From<String> for Variant {
    fn from(s: String) -> Self {
        Variant::Text(s.into_bytes())
    }
}

impl From<&[u8]> for Variant {
    fn from(b: &[u8]) -> Self {
        Variant::Text(b.to_vec())
    }
}

impl<T: Into<Variant>> From<Vec<T>> for Variant {
    fn from(items: Vec<T>) -> Self {
        Variant::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Variant>> From<Option<T>> for Variant {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Variant::Null, Into::into)
    }
}

impl From<VariantMap> for Variant {
    fn from(map: VariantMap) -> Self {
        Variant::Map(map)
    }
}

impl<K: AsRef<[u8]>, V: Into<Variant>> From<HashMap<K, V>> for Variant {
    fn from(map: HashMap<K, V>) -> Self {
        Variant::Map(map.into_iter().collect())
    }
}

impl<K: AsRef<[u8]>, V: Into<Variant>> From<BTreeMap<K, V>> for Variant {
    fn from(map: BTreeMap<K, V>) -> Self {
        Variant::Map(map.into_iter().collect())
    }
}

impl From<RemoteRef> for Variant {
    fn from(r: RemoteRef) -> Self {
        Variant::Remote(r)
    }
}

impl<T: ExposedObject> From<Arc<T>> for Variant {
    fn from(obj: Arc<T>) -> Self {
        Variant::Object(obj)
    }
}

impl From<LocalObject> for Variant {
    fn from(obj: LocalObject) -> Self {
        Variant::object(obj)
    }
}

// --- Encoding ---

/// Encode `value` onto `out`, registering any local objects it contains.
///
/// Each encoded object gets a fresh ID, even if it was registered before.
/// A remote reference being passed on is registered as a forwarding proxy,
/// so the receiver can call it like any other object of ours.
pub fn encode(value: &Variant, registry: &mut ObjectRegistry, out: &mut Vec<u8>) -> WireResult<()> {
    match value {
        Variant::Null => out.put_u8(VariantKind::Null as u8),
        Variant::Integer(i) => {
            out.put_u8(VariantKind::Integer as u8);
            out.put_i64_le(*i);
        }
        Variant::Real(r) => {
            out.put_u8(VariantKind::Real as u8);
            out.put_f64_le(*r);
        }
        Variant::Text(bytes) => {
            out.put_u8(VariantKind::Text as u8);
            put_len_prefixed(out, bytes)?;
        }
        Variant::Array(items) => {
            out.put_u8(VariantKind::Array as u8);
            out.put_u32_le(wire_len(items.len())?);
            for item in items {
                encode(item, registry, out)?;
            }
        }
        Variant::Map(map) => {
            out.put_u8(VariantKind::Map as u8);
            out.put_u32_le(wire_len(map.len())?);
            for (key, item) in map.iter() {
                let key = truncate_key(key);
                out.put_u8(key.len() as u8);
                out.put_slice(key);
                encode(item, registry, out)?;
            }
        }
        Variant::Exception(text) => {
            out.put_u8(VariantKind::Exception as u8);
            put_len_prefixed(out, text.as_bytes())?;
        }
        Variant::Object(obj) => {
            let id = registry.register(Arc::clone(obj))?;
            out.put_u8(VariantKind::ObjectRef as u8);
            out.put_u32_le(id);
        }
        Variant::Remote(remote) => {
            let id = registry.register(Arc::new(*remote))?;
            out.put_u8(VariantKind::ObjectRef as u8);
            out.put_u32_le(id);
        }
    }
    Ok(())
}

/// Encode into a fresh buffer.
pub fn encode_to_vec(value: &Variant, registry: &mut ObjectRegistry) -> WireResult<Vec<u8>> {
    let mut out = Vec::new();
    encode(value, registry, &mut out)?;
    Ok(out)
}

fn wire_len(len: usize) -> WireResult<u32> {
    u32::try_from(len).map_err(|_| WireError::ValueTooLarge(len))
}

fn put_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> WireResult<()> {
    out.put_u32_le(wire_len(bytes.len())?);
    out.put_slice(bytes);
    Ok(())
}

/// Cut a map key to [`MAX_KEY_LEN`] bytes, on a character boundary when the
/// key is UTF-8.
fn truncate_key(key: &[u8]) -> &[u8] {
    match std::str::from_utf8(key) {
        Ok(text) => truncate_utf8(text, MAX_KEY_LEN).as_bytes(),
        Err(_) => &key[..key.len().min(MAX_KEY_LEN)],
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// --- Decoding ---

/// Decode one value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed. Object references
/// become [`RemoteRef`]s bound to `session_id`.
pub fn decode(bytes: &[u8], session_id: SessionId) -> WireResult<(Variant, usize)> {
    let mut buf = bytes;
    let value = decode_value(&mut buf, session_id, 0)?;
    Ok((value, bytes.len() - buf.len()))
}

fn decode_value(buf: &mut &[u8], session_id: SessionId, depth: usize) -> WireResult<Variant> {
    if depth > MAX_NESTING_DEPTH {
        return Err(WireError::InvalidEncoding(format!(
            "nesting deeper than {MAX_NESTING_DEPTH} levels"
        )));
    }

    ensure(buf, 1, "kind tag")?;
    let tag = buf.get_u8();
    let kind = VariantKind::from_tag(tag)
        .ok_or_else(|| WireError::InvalidEncoding(format!("unknown variant tag {tag}")))?;

    let value = match kind {
        VariantKind::Null => Variant::Null,
        VariantKind::Integer => {
            ensure(buf, 8, "integer")?;
            Variant::Integer(buf.get_i64_le())
        }
        VariantKind::Real => {
            ensure(buf, 8, "real")?;
            Variant::Real(buf.get_f64_le())
        }
        VariantKind::Text => Variant::Text(take_len_prefixed(buf, "text")?),
        VariantKind::Array => {
            ensure(buf, 4, "array count")?;
            let count = buf.get_u32_le() as usize;
            // Every element needs at least its tag byte.
            let mut items = Vec::with_capacity(count.min(buf.remaining()));
            for _ in 0..count {
                items.push(decode_value(buf, session_id, depth + 1)?);
            }
            Variant::Array(items)
        }
        VariantKind::Map => {
            ensure(buf, 4, "map count")?;
            let count = buf.get_u32_le() as usize;
            // Every entry needs at least a key length and a tag byte.
            let mut map = VariantMap::with_capacity(count.min(buf.remaining() / 2));
            for _ in 0..count {
                ensure(buf, 1, "map key length")?;
                let key_len = buf.get_u8() as usize;
                ensure(buf, key_len, "map key")?;
                let key = buf[..key_len].to_vec();
                buf.advance(key_len);
                let item = decode_value(buf, session_id, depth + 1)?;
                map.insert(key, item);
            }
            Variant::Map(map)
        }
        VariantKind::Exception => {
            let text = take_len_prefixed(buf, "exception")?;
            Variant::Exception(String::from_utf8_lossy(&text).into_owned())
        }
        VariantKind::ObjectRef => {
            ensure(buf, 4, "object id")?;
            Variant::Remote(RemoteRef::new(session_id, buf.get_u32_le()))
        }
        VariantKind::Future => {
            return Err(WireError::InvalidEncoding(
                "future values are not supported".to_string(),
            ))
        }
    };
    Ok(value)
}

fn ensure(buf: &[u8], needed: usize, what: &str) -> WireResult<()> {
    if buf.remaining() < needed {
        return Err(WireError::InvalidEncoding(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_len_prefixed(buf: &mut &[u8], what: &str) -> WireResult<Vec<u8>> {
    ensure(buf, 4, what)?;
    let len = buf.get_u32_le() as usize;
    ensure(buf, len, what)?;
    let data = buf[..len].to_vec();
    buf.advance(len);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: SessionId = 77;

    fn round_trip(value: &Variant) -> Variant {
        let mut registry = ObjectRegistry::new();
        let bytes = encode_to_vec(value, &mut registry).unwrap();
        let (decoded, consumed) = decode(&bytes, SESSION).unwrap();
        assert_eq!(consumed, bytes.len());
        decoded
    }

    #[test]
    fn test_round_trip_each_kind() {
        let values = vec![
            Variant::Null,
            Variant::Integer(-42),
            Variant::Integer(i64::MAX),
            Variant::Real(3.25),
            Variant::from("hello"),
            Variant::bytes(vec![0u8, 255, 10]),
            Variant::from(vec![Variant::from(1), Variant::from("two"), Variant::Null]),
            Variant::Map(VariantMap::new().with("a", 1).with("b", vec![1.5, 2.5])),
            Variant::Exception("boom".to_string()),
        ];
        for value in values {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn test_object_becomes_remote_reference() {
        let mut registry = ObjectRegistry::new();
        let bytes = encode_to_vec(&Variant::object(LocalObject::new()), &mut registry).unwrap();
        assert_eq!(bytes, vec![8, 1, 0, 0, 0]);

        let (decoded, _) = decode(&bytes, SESSION).unwrap();
        assert_eq!(decoded, Variant::Remote(RemoteRef::new(SESSION, 1)));
        assert!(registry.resolve(1).is_ok());
    }

    #[test]
    fn test_same_object_registered_twice() {
        let mut registry = ObjectRegistry::new();
        let obj = Variant::object(LocalObject::new());
        let value = Variant::Array(vec![obj.clone(), obj]);
        let bytes = encode_to_vec(&value, &mut registry).unwrap();
        let (decoded, _) = decode(&bytes, SESSION).unwrap();

        let ids: Vec<_> = decoded
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_remote().unwrap().object_id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remote_reference_is_forwarded_not_echoed() {
        let mut registry = ObjectRegistry::new();
        let remote = Variant::Remote(RemoteRef::new(SESSION, 40));
        let bytes = encode_to_vec(&remote, &mut registry).unwrap();
        // The peer must see an ID from our registry, not its own 40.
        assert_eq!(bytes, vec![8, 1, 0, 0, 0]);
        let proxy = registry.resolve(1).unwrap();
        assert!(proxy.has_method("anything"));
    }

    #[test]
    fn test_wire_layout() {
        let mut registry = ObjectRegistry::new();
        let value = Variant::Map(VariantMap::new().with("k", "v"));
        let bytes = encode_to_vec(&value, &mut registry).unwrap();
        assert_eq!(
            bytes,
            vec![5, 1, 0, 0, 0, 1, b'k', 3, 1, 0, 0, 0, b'v']
        );

        let bytes = encode_to_vec(&Variant::Integer(1), &mut registry).unwrap();
        assert_eq!(bytes, vec![1, 1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_reports_consumed_prefix() {
        let mut registry = ObjectRegistry::new();
        let mut bytes = encode_to_vec(&Variant::from("abc"), &mut registry).unwrap();
        bytes.extend_from_slice(&[0xde, 0xad]);
        let (value, consumed) = decode(&bytes, SESSION).unwrap();
        assert_eq!(value, Variant::from("abc"));
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_unknown_tag_is_invalid_encoding() {
        let err = decode(&[42], SESSION).unwrap_err();
        assert!(matches!(err, WireError::InvalidEncoding(_)));

        let err = decode(&[VariantKind::Future as u8], SESSION).unwrap_err();
        assert!(matches!(err, WireError::InvalidEncoding(_)));

        // Tag 7 is the in-memory object kind and never valid on the wire.
        assert!(decode(&[7, 0, 0, 0, 0], SESSION).is_err());
    }

    #[test]
    fn test_truncated_input_is_invalid_encoding() {
        assert!(matches!(
            decode(&[3, 10, 0, 0, 0, b'a'], SESSION),
            Err(WireError::InvalidEncoding(_))
        ));
        assert!(matches!(
            decode(&[1, 0, 0], SESSION),
            Err(WireError::InvalidEncoding(_))
        ));
        assert!(decode(&[], SESSION).is_err());
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            bytes.extend_from_slice(&[4, 1, 0, 0, 0]);
        }
        bytes.push(0);
        assert!(matches!(
            decode(&bytes, SESSION),
            Err(WireError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = VariantMap::new().with("name", "Ivan").with("fam", "Smirnov");
        let b = VariantMap::new().with("fam", "Smirnov").with("name", "Ivan");
        assert_eq!(a, b);
        assert_ne!(a, VariantMap::new().with("name", "Ivan"));
    }

    #[test]
    fn test_map_keys_truncated_to_255_bytes() {
        let long_key = "é".repeat(200); // 400 bytes
        let value = Variant::Map(VariantMap::new().with(long_key.clone(), 1));
        let decoded = round_trip(&value);
        let key = decoded.as_map().unwrap().keys().next().unwrap().to_vec();
        assert_eq!(key.len(), 254);
        assert!(long_key.as_bytes().starts_with(&key));

        let raw_key = vec![0xffu8; 300];
        let decoded = round_trip(&Variant::Map(VariantMap::new().with(&raw_key, 1)));
        let key = decoded.as_map().unwrap().keys().next().unwrap();
        assert_eq!(key, &raw_key[..MAX_KEY_LEN]);
    }

    #[test]
    fn test_non_utf8_keys_stay_distinct() {
        let mut bytes = vec![5, 2, 0, 0, 0];
        bytes.extend_from_slice(&[1, 0xff, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[1, 0xfe, 1, 2, 0, 0, 0, 0, 0, 0, 0]);

        let (value, consumed) = decode(&bytes, SESSION).unwrap();
        assert_eq!(consumed, bytes.len());
        let map = value.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get([0xffu8]), Some(&Variant::Integer(1)));
        assert_eq!(map.get([0xfeu8]), Some(&Variant::Integer(2)));

        let mut registry = ObjectRegistry::new();
        assert_eq!(encode_to_vec(&value, &mut registry).unwrap(), bytes);
    }

    #[test]
    fn test_large_map_decodes_quickly() {
        let count: u32 = 200_000;
        let mut bytes = vec![5];
        bytes.extend_from_slice(&count.to_le_bytes());
        for i in 0..count {
            bytes.push(3);
            bytes.extend_from_slice(&i.to_le_bytes()[..3]);
            bytes.push(VariantKind::Null as u8);
        }

        let started = std::time::Instant::now();
        let (value, consumed) = decode(&bytes, SESSION).unwrap();
        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "decode took {:?}",
            started.elapsed()
        );
        assert_eq!(consumed, bytes.len());
        assert_eq!(value.as_map().unwrap().len(), count as usize);
    }

    #[test]
    fn test_nan_round_trips_equal() {
        let value = Variant::Real(f64::NAN);
        assert_eq!(round_trip(&value), value);
        assert_ne!(Variant::Real(0.0), Variant::Real(-0.0));
    }

    #[test]
    fn test_classification_of_local_values() {
        assert_eq!(Variant::from(()), Variant::Null);
        assert_eq!(Variant::from(None::<i32>), Variant::Null);
        assert_eq!(Variant::from(7u8), Variant::Integer(7));
        assert_eq!(Variant::from(true), Variant::Integer(1));
        assert_eq!(Variant::from(0.5f32), Variant::Real(0.5));
        assert_eq!(Variant::from("x").kind(), VariantKind::Text);
        assert_eq!(Variant::from(vec![1, 2]).kind(), VariantKind::Array);
        let mut map = HashMap::new();
        map.insert("k", 1);
        assert_eq!(Variant::from(map).kind(), VariantKind::Map);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        assert_eq!(Variant::exception(&err), Variant::Exception("disk on fire".into()));
        assert_eq!(Variant::object(LocalObject::new()).kind(), VariantKind::ObjectRef);
    }

    #[test]
    fn test_repr_truncates() {
        let value = Variant::from("a".repeat(50));
        let repr = value.repr(10);
        assert_eq!(repr, "\"aaaaaaaaa...");
        assert_eq!(Variant::Integer(5).repr(10), "5");
    }

    #[test]
    fn test_serialize_to_json() {
        let value = Variant::Map(
            VariantMap::new()
                .with("name", "Ivan")
                .with("ids", vec![1, 2])
                .with("ref", RemoteRef::new(SESSION, 3)),
        );
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Ivan", "ids": [1, 2], "ref": {"remote_object": 3}})
        );
    }
}
