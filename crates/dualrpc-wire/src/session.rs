//! RPC session — one connection, its object registry and its dispatch loop.
//!
//! A session has a single thread of control. An outbound two-way call writes
//! its CALL_FUNC and then keeps reading frames until the matching RETURN
//! arrives; every inbound call read in the meantime is dispatched on the spot,
//! and a handler may itself call back into the peer. Pending request IDs form
//! a stack: only the innermost await is completed by a RETURN, anything else
//! is stale and discarded.

use crate::config::SessionConfig;
use crate::error::{WireError, WireResult};
use crate::message::{decode_message, encode_message, CallMessage, ReturnMessage, WireMessage};
use crate::registry::{Args, ObjectHandle, ObjectRegistry, ROOT_OBJECT_ID};
use crate::remote::RemoteRef;
use crate::transport::{client_handshake, server_handshake, Duplex, FrameTransport};
use crate::variant::Variant;
use crate::{ObjectId, RequestId, SessionId};

use tracing::{debug, info, warn};

/// Longest argument/result rendering written to debug logs.
const LOG_VALUE_LEN: usize = 120;

/// What the session is currently blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Waiting for the RETURN of this request (the innermost one when
    /// calls are nested).
    AwaitingReturn(RequestId),
}

enum Step {
    Continue,
    Completed(Variant),
}

/// A connected peer.
pub struct Session {
    id: SessionId,
    transport: FrameTransport,
    registry: ObjectRegistry,
    next_request_id: RequestId,
    oneway: bool,
    reply_dispatch_errors: bool,
    awaiting: Vec<RequestId>,
}

impl Session {
    /// Client side: run the handshake over `stream` and start a fresh session.
    ///
    /// `root` becomes object 0, reachable by the peer without being passed.
    pub async fn connect<S>(
        mut stream: S,
        config: &SessionConfig,
        root: Option<ObjectHandle>,
    ) -> WireResult<Self>
    where
        S: Duplex + 'static,
    {
        let id = client_handshake(&mut stream, 0).await?;
        info!("RPC: session {} established", id);
        Ok(Self::new(id, Box::new(stream), config, root))
    }

    /// Server side: greet the peer and assign it `assigned` as session ID.
    pub async fn accept<S>(
        mut stream: S,
        config: &SessionConfig,
        root: Option<ObjectHandle>,
        assigned: SessionId,
    ) -> WireResult<Self>
    where
        S: Duplex + 'static,
    {
        let requested = server_handshake(&mut stream, assigned).await?;
        if requested != 0 && requested != assigned {
            info!(
                "RPC: peer asked to resume session {}, assigned {} instead",
                requested, assigned
            );
        }
        info!("RPC: session {} accepted", assigned);
        Ok(Self::new(assigned, Box::new(stream), config, root))
    }

    fn new(
        id: SessionId,
        stream: Box<dyn Duplex>,
        config: &SessionConfig,
        root: Option<ObjectHandle>,
    ) -> Self {
        let mut registry = ObjectRegistry::new();
        if let Some(root) = root {
            registry.set_root(root);
        }
        Self {
            id,
            transport: FrameTransport::new(stream, config.max_frame_size),
            registry,
            next_request_id: 1,
            oneway: config.oneway,
            reply_dispatch_errors: config.reply_dispatch_errors,
            awaiting: Vec::new(),
        }
    }

    /// Session ID assigned by the server.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether a call is waiting for its RETURN.
    pub fn state(&self) -> CallState {
        match self.awaiting.last() {
            Some(&id) => CallState::AwaitingReturn(id),
            None => CallState::Idle,
        }
    }

    /// Whether calls skip waiting for results.
    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Switch between CALL_FUNC (wait for a result) and CALL_PROC calls.
    pub fn set_oneway(&mut self, oneway: bool) {
        self.oneway = oneway;
    }

    /// Change the cap on incoming frames.
    pub fn set_max_frame_size(&mut self, max: u32) {
        self.transport.set_max_frame_size(max);
    }

    /// The peer's root object.
    pub fn root(&self) -> RemoteRef {
        RemoteRef::new(self.id, ROOT_OBJECT_ID)
    }

    /// Objects exposed to the peer.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Register an object up front; the returned ID is valid for the peer.
    pub fn expose(&mut self, object: ObjectHandle) -> WireResult<ObjectId> {
        self.registry.register(object)
    }

    /// Call `method` on a remote object and wait for the result.
    ///
    /// In oneway mode this returns Null as soon as the call is written.
    pub async fn call(
        &mut self,
        target: &RemoteRef,
        method: &str,
        args: Args,
    ) -> WireResult<Variant> {
        self.check_owner(target)?;
        self.call_object(target.object_id(), method, args).await
    }

    /// Like [`Session::call`] but addressed by raw object ID.
    pub async fn call_object(
        &mut self,
        object_id: ObjectId,
        method: &str,
        args: Args,
    ) -> WireResult<Variant> {
        let oneway = self.oneway;
        let request_id = self.send_call(object_id, method, args, oneway).await?;
        if oneway {
            return Ok(Variant::Null);
        }
        self.await_return(request_id).await
    }

    /// Send a CALL_PROC regardless of the session's oneway flag.
    pub async fn notify(&mut self, target: &RemoteRef, method: &str, args: Args) -> WireResult<()> {
        self.check_owner(target)?;
        self.send_call(target.object_id(), method, args, true)
            .await
            .map(|_| ())
    }

    /// Send a RETURN for an inbound request.
    pub async fn send_result(&mut self, request_id: RequestId, value: Variant) -> WireResult<()> {
        debug!(
            "RPC: session {} return #{} {}",
            self.id,
            request_id,
            value.repr(LOG_VALUE_LEN)
        );
        self.send(&WireMessage::Return(ReturnMessage { request_id, value }))
            .await
    }

    /// Dispatch inbound calls until the peer disconnects.
    pub async fn serve(&mut self) -> WireResult<()> {
        loop {
            match self.next_step().await {
                Ok(_) => {}
                Err(WireError::ConnectionClosed) => {
                    info!("RPC: session {} closed by peer", self.id);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Shut down our side of the connection.
    pub async fn close(&mut self) -> WireResult<()> {
        self.transport.shutdown().await
    }

    fn check_owner(&self, target: &RemoteRef) -> WireResult<()> {
        if target.session_id() != self.id {
            return Err(WireError::ForeignReference {
                owner: target.session_id(),
                session: self.id,
            });
        }
        Ok(())
    }

    /// Next request ID, skipping 0 and any ID still awaiting its RETURN.
    fn allocate_request_id(&mut self) -> RequestId {
        let mut id = self.next_request_id;
        while self.awaiting.contains(&id) {
            id = id.wrapping_add(1).max(1);
        }
        self.next_request_id = id.wrapping_add(1).max(1);
        id
    }

    async fn send_call(
        &mut self,
        object_id: ObjectId,
        method: &str,
        args: Args,
        oneway: bool,
    ) -> WireResult<RequestId> {
        let request_id = self.allocate_request_id();
        let args = args.pack();
        debug!(
            "RPC: session {} {} #{} -> #{}.{}({})",
            self.id,
            if oneway { "proc" } else { "func" },
            request_id,
            object_id,
            method,
            args.repr(LOG_VALUE_LEN)
        );
        self.send(&WireMessage::Call(CallMessage {
            oneway,
            request_id,
            object_id,
            method: method.to_string(),
            args,
        }))
        .await?;
        Ok(request_id)
    }

    async fn send(&mut self, msg: &WireMessage) -> WireResult<()> {
        let payload = encode_message(msg, &mut self.registry)?;
        self.transport.write_frame(&payload).await
    }

    async fn await_return(&mut self, request_id: RequestId) -> WireResult<Variant> {
        self.awaiting.push(request_id);
        let result = loop {
            match self.next_step().await {
                Ok(Step::Completed(value)) => break Ok(value),
                Ok(Step::Continue) => {}
                Err(e) => break Err(e),
            }
        };
        self.awaiting.pop();

        match result? {
            Variant::Exception(text) => Err(WireError::RemoteException(text)),
            value => Ok(value),
        }
    }

    /// Read and handle one frame.
    async fn next_step(&mut self) -> WireResult<Step> {
        let payload = self.transport.read_frame().await?;
        let msg = decode_message(&payload, self.id).map_err(|e| {
            warn!("RPC: session {} received malformed frame: {}", self.id, e);
            e
        })?;

        match msg {
            WireMessage::Return(ret) => match self.awaiting.last() {
                Some(&awaiting) if awaiting == ret.request_id => Ok(Step::Completed(ret.value)),
                awaiting => {
                    let stale = WireError::StaleResponse {
                        received: ret.request_id,
                        awaiting: awaiting.copied(),
                    };
                    warn!("RPC: session {}: {}, discarded", self.id, stale);
                    Ok(Step::Continue)
                }
            },
            WireMessage::Call(call) => {
                self.dispatch_inbound(call).await?;
                Ok(Step::Continue)
            }
            WireMessage::Reserved(kind) => {
                debug!("RPC: session {} ignoring {:?} message", self.id, kind);
                Ok(Step::Continue)
            }
        }
    }

    async fn dispatch_inbound(&mut self, call: CallMessage) -> WireResult<()> {
        let CallMessage {
            oneway,
            request_id,
            object_id,
            method,
            args,
        } = call;
        debug!(
            "RPC: session {} <- #{} #{}.{}({})",
            self.id,
            request_id,
            object_id,
            method,
            args.repr(LOG_VALUE_LEN)
        );

        let target = match self.lookup(object_id, &method) {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    "RPC: session {} cannot dispatch #{} to #{}.{}: {}",
                    self.id, request_id, object_id, method, e
                );
                if !oneway && self.reply_dispatch_errors {
                    self.send_result(request_id, Variant::exception(&e)).await?;
                }
                return Ok(());
            }
        };

        let result = match target
            .invoke(self, &method, Args::from_variant(args))
            .await
        {
            Ok(value) => value,
            Err(e) if e.is_fatal() => return Err(e),
            // Pass peer exceptions through without wrapping them again.
            Err(WireError::RemoteException(text)) => Variant::Exception(text),
            Err(e) => {
                debug!("RPC: session {} #{} failed: {}", self.id, request_id, e);
                Variant::exception(&e)
            }
        };

        if !oneway {
            self.send_result(request_id, result).await?;
        }
        Ok(())
    }

    fn lookup(&self, object_id: ObjectId, method: &str) -> WireResult<ObjectHandle> {
        let target = self.registry.resolve(object_id)?;
        if !target.has_method(method) {
            return Err(WireError::MethodNotFound(method.to_string()));
        }
        Ok(target)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("oneway", &self.oneway)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
