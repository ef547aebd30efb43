//! Remote references — handles to objects living on the peer.

use crate::error::WireResult;
use crate::registry::{Args, ExposedObject};
use crate::session::Session;
use crate::variant::Variant;
use crate::{ObjectId, SessionId};

use async_trait::async_trait;

/// An object in the peer's registry, reachable through one session.
///
/// The session ID is a routing key: a reference is only valid with the
/// session that decoded it, and [`Session::call`] rejects any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteRef {
    session_id: SessionId,
    object_id: ObjectId,
}

impl RemoteRef {
    /// Reference object `object_id` owned by the peer of `session_id`.
    pub fn new(session_id: SessionId, object_id: ObjectId) -> Self {
        Self {
            session_id,
            object_id,
        }
    }

    /// Session the reference was received on.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// ID in the peer's registry.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// A callable bound to `name` on this object.
    pub fn method(&self, name: impl Into<String>) -> RemoteMethod {
        RemoteMethod {
            target: *self,
            name: name.into(),
        }
    }

    /// Call `method` on the remote object and wait for its result.
    pub async fn call(
        &self,
        session: &mut Session,
        method: &str,
        args: Args,
    ) -> WireResult<Variant> {
        session.call(self, method, args).await
    }
}

/// A method looked up on a [`RemoteRef`], ready to be called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMethod {
    target: RemoteRef,
    name: String,
}

impl RemoteMethod {
    pub fn target(&self) -> &RemoteRef {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the method and wait for its result.
    pub async fn call(&self, session: &mut Session, args: Args) -> WireResult<Variant> {
        session.call(&self.target, &self.name, args).await
    }
}

// Registered when a reference we hold is passed back out: the peer then
// calls us, and we relay the call to the real owner.
#[async_trait]
impl ExposedObject for RemoteRef {
    fn has_method(&self, _name: &str) -> bool {
        true
    }

    async fn invoke(&self, session: &mut Session, name: &str, args: Args) -> WireResult<Variant> {
        session.call(self, name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality() {
        assert_eq!(RemoteRef::new(1, 2), RemoteRef::new(1, 2));
        assert_ne!(RemoteRef::new(1, 2), RemoteRef::new(3, 2));
        assert_ne!(RemoteRef::new(1, 2), RemoteRef::new(1, 3));
    }

    #[test]
    fn test_method_lookup() {
        let remote = RemoteRef::new(4, 9);
        let method = remote.method("boo");
        assert_eq!(method.name(), "boo");
        assert_eq!(method.target(), &remote);
    }
}
