//! Object registry — the local objects a session exposes to its peer.
//!
//! Each [`Session`] owns one [`ObjectRegistry`]. Objects enter it when they
//! are encoded into a call or a result and stay for the life of the session:
//! IDs are allocated sequentially from 1 and never reused. ID 0 is reserved
//! for the session's root object.
//!
//! Exposed objects are capability tables rather than reflected types: a
//! [`LocalObject`] maps method names to closures registered up front, and
//! anything else can implement [`ExposedObject`] directly.

use crate::error::{WireError, WireResult};
use crate::session::Session;
use crate::variant::{Variant, VariantMap};
use crate::ObjectId;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// ID of the root object every peer may expose.
pub const ROOT_OBJECT_ID: ObjectId = 0;

/// Shared handle to an exposed object.
pub type ObjectHandle = Arc<dyn ExposedObject>;

/// An object whose methods can be invoked by the peer.
///
/// An empty method name denotes the object's default call behaviour.
#[async_trait]
pub trait ExposedObject: Send + Sync + 'static {
    /// Whether `name` can be invoked on this object.
    fn has_method(&self, name: &str) -> bool;

    /// Invoke `name` with already-adapted arguments.
    ///
    /// `session` is the session the call arrived on; implementations may use
    /// it to call back into the peer before answering.
    async fn invoke(&self, session: &mut Session, name: &str, args: Args) -> WireResult<Variant>;
}

/// Arguments of a call, split into positional and named parts.
///
/// On the way out they are packed into a single variant: one positional
/// argument travels as itself, several as an array, named ones as a map,
/// none as null. Positional arguments win when both are present. On the way
/// in the rule is reversed: an array spreads into positional arguments, a map
/// into named ones, null into nothing, anything else is the sole argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Variant>,
    named: VariantMap,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Variant>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    /// Positional arguments in order.
    pub fn positional(&self) -> &[Variant] {
        &self.positional
    }

    /// Named arguments.
    pub fn named(&self) -> &VariantMap {
        &self.named
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Positional argument `index`.
    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.positional.get(index)
    }

    /// Named argument `name`.
    pub fn kw(&self, name: &str) -> Option<&Variant> {
        self.named.get(name)
    }

    /// Positional argument `index`, or the named argument `name`.
    pub fn lookup(&self, index: usize, name: &str) -> Option<&Variant> {
        self.get(index).or_else(|| self.kw(name))
    }

    /// Like [`Args::lookup`], failing with `InvalidArgument` when absent.
    pub fn require(&self, index: usize, name: &str) -> WireResult<&Variant> {
        self.lookup(index, name).ok_or_else(|| {
            WireError::InvalidArgument(format!("missing argument #{index} ({name})"))
        })
    }

    /// Pack into the single variant carried by a call message.
    pub fn pack(self) -> Variant {
        let Args {
            mut positional,
            named,
        } = self;
        match positional.len() {
            0 if named.is_empty() => Variant::Null,
            0 => Variant::Map(named),
            1 => positional.pop().unwrap_or(Variant::Null),
            _ => Variant::Array(positional),
        }
    }

    /// Adapt a received argument variant.
    pub fn from_variant(value: Variant) -> Self {
        match value {
            Variant::Null => Args::new(),
            Variant::Array(items) => Args {
                positional: items,
                named: VariantMap::new(),
            },
            Variant::Map(named) => Args {
                positional: Vec::new(),
                named,
            },
            other => Args::new().arg(other),
        }
    }
}

impl From<Vec<Variant>> for Args {
    fn from(positional: Vec<Variant>) -> Self {
        Args {
            positional,
            named: VariantMap::new(),
        }
    }
}

type PlainMethod = dyn Fn(Args) -> WireResult<Variant> + Send + Sync;
type SessionMethod =
    dyn for<'a> Fn(&'a mut Session, Args) -> BoxFuture<'a, WireResult<Variant>> + Send + Sync;

enum Method {
    Plain(Box<PlainMethod>),
    WithSession(Box<SessionMethod>),
}

/// An exposed object built from named closures.
///
/// ```no_run
/// use dualrpc_wire::{Args, LocalObject, Variant, VariantMap};
///
/// let person = LocalObject::new().method("boo", |args: Args| {
///     let name = args.lookup(0, "name").cloned().unwrap_or(Variant::Null);
///     Ok(VariantMap::new().with("name", name).with("fam", "Smirnov").into())
/// });
/// ```
#[derive(Default)]
pub struct LocalObject {
    methods: HashMap<String, Method>,
}

impl LocalObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method that only needs its arguments.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> WireResult<Variant> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Method::Plain(Box::new(f)));
        self
    }

    /// Register a method that may call back into the peer through the session.
    pub fn session_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Session, Args) -> BoxFuture<'a, WireResult<Variant>>
            + Send
            + Sync
            + 'static,
    {
        self.methods
            .insert(name.into(), Method::WithSession(Box::new(f)));
        self
    }

    /// Behaviour when the object itself is called (empty method name).
    pub fn on_call<F>(self, f: F) -> Self
    where
        F: Fn(Args) -> WireResult<Variant> + Send + Sync + 'static,
    {
        self.method("", f)
    }

    /// Names of the registered methods.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.method_names().collect();
        names.sort_unstable();
        f.debug_struct("LocalObject").field("methods", &names).finish()
    }
}

#[async_trait]
impl ExposedObject for LocalObject {
    fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    async fn invoke(&self, session: &mut Session, name: &str, args: Args) -> WireResult<Variant> {
        match self.methods.get(name) {
            Some(Method::Plain(f)) => f(args),
            Some(Method::WithSession(f)) => f(session, args).await,
            None => Err(WireError::MethodNotFound(name.to_string())),
        }
    }
}

/// Per-session table of exposed objects.
pub struct ObjectRegistry {
    objects: HashMap<ObjectId, ObjectHandle>,
    next_id: ObjectId,
}

impl ObjectRegistry {
    /// Create an empty registry; the first registered object gets ID 1.
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    /// Install the root object under [`ROOT_OBJECT_ID`].
    pub fn set_root(&mut self, root: ObjectHandle) {
        self.objects.insert(ROOT_OBJECT_ID, root);
    }

    /// Store `object` under a newly allocated ID.
    ///
    /// Registering the same object twice yields two IDs. After the counter
    /// wraps, IDs still held by live objects are skipped, never overwritten.
    pub fn register(&mut self, object: ObjectHandle) -> WireResult<ObjectId> {
        let registered = self.objects.len() - usize::from(self.contains(ROOT_OBJECT_ID));
        if registered >= ObjectId::MAX as usize {
            return Err(WireError::RegistryExhausted);
        }
        let mut id = self.next_id;
        while self.objects.contains_key(&id) {
            id = id.wrapping_add(1).max(1);
        }
        self.next_id = id.wrapping_add(1).max(1);
        self.objects.insert(id, object);
        Ok(id)
    }

    /// Look up an object, failing with `UnresolvedTarget`.
    pub fn resolve(&self, id: ObjectId) -> WireResult<ObjectHandle> {
        self.objects
            .get(&id)
            .cloned()
            .ok_or(WireError::UnresolvedTarget(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Number of registered objects, root included.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("objects", &self.objects.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
