//! # Client Protocol Engine
//!
//! Issues requests and matches replies to them by sequence number.
//!
//! ## Philosophy
//!
//! - **Pipelining**: Any number of calls may be in flight. Replies are matched by
//!   sequence, so they may arrive in any order relative to issue order.
//! - **Cooperative Pump**: There is no background reader. Whoever waits on a reply
//!   reads frames off the wire and files every reply it meets into its slot, so one
//!   waiter may resolve another's call.
//!
//! ## Reply Slots
//!
//! - `Empty` when the call is issued, holding what the reply should decode to.
//! - A ready state (`Value`, `PackedException`, `GenericException`, `ProtocolError`)
//!   once its reply is read. Taking the reply removes the slot.
//! - `Discarded` when the caller gives up first. The late reply is then dropped.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;

use agnopack::HeteroMap;
use agnopack::Packer;
use agnopack::Registry;
use agnopack::Value;
use agnopack::read_i8;
use agnopack::read_i32;
use agnopack::read_str;
use agnopack::write_i8;
use agnopack::write_i32;
use agnopack::write_i64;
use agnopack::write_str;
use agnowire::ReadTransaction;
use agnowire::Transport;
use agnowire::TransportConfig;
use agnowire::WriteTransaction;

use crate::codes::AGNOS_PROTOCOL_VERSION;
use crate::codes::Command;
use crate::codes::InfoCode;
use crate::codes::ReplyCode;
use crate::error::Error;
use crate::error::GenericException;
use crate::error::PackedException;
use crate::error::Result;
use crate::proxy::ProxySerializer;
use crate::proxy::RemoteHandle;

/// What a successful reply carries.
#[derive(Clone)]
enum Expect {
    Void,
    Packer(Packer),
    /// The raw rest of the reply payload, for tunnelled requests.
    Raw,
}

enum ReplySlot {
    Empty(Expect),
    Discarded,
    Value(Value),
    PackedException(PackedException),
    GenericException(GenericException),
    ProtocolError(String),
}

impl ReplySlot {
    fn is_ready(&self) -> bool {
        !matches!(self, ReplySlot::Empty(_) | ReplySlot::Discarded)
    }

    fn into_result(self) -> Result<Value> {
        match self {
            ReplySlot::Value(value) => Ok(value),
            ReplySlot::PackedException(e) => Err(Error::Packed(e)),
            ReplySlot::GenericException(e) => Err(Error::Generic(e)),
            ReplySlot::ProtocolError(msg) => Err(Error::Protocol(msg)),
            ReplySlot::Empty(_) | ReplySlot::Discarded => {
                Err(Error::Protocol("reply slot is not ready".to_string()))
            }
        }
    }
}

pub struct ClientUtils {
    transport: Arc<Transport>,
    seq: AtomicI32,
    replies: DashMap<i32, ReplySlot>,
    types: Registry,
    proxies: Arc<ProxySerializer>,
    pump: Mutex<()>,
}

impl ClientUtils {
    /// `types` holds the service's custom packers, exception classes included. They
    /// resolve class ids in exception replies and packer ids in service info maps.
    pub fn new(transport: Arc<Transport>, types: Registry) -> Self {
        Self {
            transport,
            seq: AtomicI32::new(0),
            replies: DashMap::new(),
            types,
            proxies: Arc::new(ProxySerializer::new()),
            pump: Mutex::new(()),
        }
    }

    pub async fn connect(host: &str, port: u16, config: TransportConfig, types: Registry) -> Result<Self> {
        let transport = Transport::connect(host, port, config).await?;
        Ok(Self::new(Arc::new(transport), types))
    }

    /// Talks to a service behind an `http://` endpoint, one POST per request.
    pub async fn connect_url(url: &str, config: TransportConfig, types: Registry) -> Result<Self> {
        let transport = Transport::connect_url(url, config).await?;
        Ok(Self::new(Arc::new(transport), types))
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await?;
        Ok(())
    }

    fn next_seq(&self) -> i32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of calls awaiting or holding a reply.
    pub fn outstanding(&self) -> usize {
        self.replies.len()
    }

    // ========================================================================
    // Issuing
    // ========================================================================

    /// Opens an INVOKE request. Pack the arguments into the returned [`Call`], then end it.
    pub async fn begin_call(&self, func_id: i32, result: Option<Packer>) -> Result<Call<'_>> {
        let seq = self.next_seq();
        let mut tx = self.transport.begin_write(seq).await;
        write_i8(&mut tx, Command::Invoke as i8)?;
        write_i32(&mut tx, func_id)?;
        self.replies.insert(seq, ReplySlot::Empty(result.map_or(Expect::Void, Expect::Packer)));
        Ok(Call { client: self, seq, tx: Some(tx) })
    }

    /// Calls a function and waits for its result.
    pub async fn invoke(&self, func_id: i32, args: &[(Packer, Value)], result: Option<Packer>) -> Result<Value> {
        let mut call = self.begin_call(func_id, result).await?;
        for (packer, value) in args {
            call.pack(packer, value)?;
        }
        let seq = call.end().await?;
        self.get_reply(seq, None).await
    }

    /// Sends a request whose body is written by `body` and registers a slot for its reply.
    async fn request<F>(&self, expect: Expect, body: F) -> Result<i32>
    where
        F: FnOnce(&mut dyn Write) -> agnopack::Result<()>,
    {
        let seq = self.next_seq();
        let mut tx = self.transport.begin_write(seq).await;
        body(&mut tx)?;
        self.replies.insert(seq, ReplySlot::Empty(expect));
        if let Err(e) = tx.commit().await {
            self.replies.remove(&seq);
            return Err(e.into());
        }
        Ok(seq)
    }

    /// Sends a request that gets no reply.
    async fn notify<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> agnopack::Result<()>,
    {
        let mut tx = self.transport.begin_write(self.next_seq()).await;
        body(&mut tx)?;
        tx.commit().await?;
        Ok(())
    }

    /// Round-trips `payload` and returns how long it took.
    pub async fn ping(&self, payload: &str, timeout: Option<Duration>) -> Result<Duration> {
        let start = Instant::now();
        let seq = self
            .request(Expect::Packer(Packer::Str), |w| {
                write_i8(w, Command::Ping as i8)?;
                write_str(w, payload)
            })
            .await?;
        let echo = self.get_reply(seq, timeout).await?;
        if echo.as_str() != Some(payload) {
            return Err(Error::Protocol("ping reply does not match payload".to_string()));
        }
        Ok(start.elapsed())
    }

    pub async fn get_service_info(&self, code: InfoCode) -> Result<HeteroMap> {
        let seq = self
            .request(Expect::Packer(Packer::HeteroMap(self.types.clone())), |w| {
                write_i8(w, Command::GetInfo as i8)?;
                write_i32(w, code as i32)
            })
            .await?;
        match self.get_reply(seq, None).await? {
            Value::HeteroMap(info) => Ok(info),
            other => Err(Error::Protocol(format!("service info came back as {}", other.kind()))),
        }
    }

    /// Fails unless the peer speaks this protocol version, is the named service, and
    /// (when given) supports `client_version`.
    pub async fn check_service(&self, name: &str, client_version: Option<&str>) -> Result<HeteroMap> {
        let info = self.get_service_info(InfoCode::Service).await?;

        let protocol = info.get_str("AGNOS_PROTOCOL_VERSION").unwrap_or_default();
        if protocol != AGNOS_PROTOCOL_VERSION {
            return Err(Error::WrongProtocolVersion {
                expected: AGNOS_PROTOCOL_VERSION.to_string(),
                found: protocol.to_string(),
            });
        }

        let service = info.get_str("SERVICE_NAME").unwrap_or_default();
        if service != name {
            return Err(Error::WrongServiceName { expected: name.to_string(), found: service.to_string() });
        }

        if let Some(version) = client_version {
            let supported = info
                .get("SUPPORTED_VERSIONS")
                .and_then(Value::as_list)
                .is_some_and(|versions| versions.iter().any(|v| v.as_str() == Some(version)));
            if !supported {
                return Err(Error::IncompatibleServiceVersion(version.to_string()));
            }
        }
        Ok(info)
    }

    /// Releases one reference to a remote object. No reply is expected.
    pub async fn decref(&self, id: i64) -> Result<()> {
        self.notify(|w| {
            write_i8(w, Command::Decref as i8)?;
            write_i64(w, id)
        })
        .await
    }

    /// Takes an extra reference to a remote object. No reply is expected.
    pub async fn incref(&self, id: i64) -> Result<()> {
        self.notify(|w| {
            write_i8(w, Command::Incref as i8)?;
            write_i64(w, id)
        })
        .await
    }

    /// Asks the server to end this connection.
    pub async fn quit(&self) -> Result<()> {
        self.notify(|w| write_i8(w, Command::Quit as i8)).await
    }

    /// Sends an opaque, already encoded request. The reply resolves to a
    /// [`Value::Buffer`] holding everything after the reply code.
    pub async fn tunnel_request(&self, request: &[u8]) -> Result<i32> {
        self.request(Expect::Raw, |w| {
            w.write_all(request)?;
            Ok(())
        })
        .await
    }

    // ========================================================================
    // Proxies
    // ========================================================================

    /// Packer that turns handles of type `packer_id` into shared [`RemoteHandle`]s and back.
    pub fn proxy_packer(&self, packer_id: i32) -> Packer {
        Packer::obj_ref(packer_id, self.proxies.clone())
    }

    pub fn proxies(&self) -> &Arc<ProxySerializer> {
        &self.proxies
    }

    /// Forgets a proxy and drops the server's reference to its object.
    pub async fn release(&self, handle: &RemoteHandle) -> Result<()> {
        self.proxies.forget(handle.id());
        self.decref(handle.id()).await
    }

    // ========================================================================
    // Replies
    // ========================================================================

    fn take_ready(&self, seq: i32) -> Result<Option<Result<Value>>> {
        if let Some((_, slot)) = self.replies.remove_if(&seq, |_, slot| slot.is_ready()) {
            return Ok(Some(slot.into_result()));
        }
        if self.replies.contains_key(&seq) {
            Ok(None)
        } else {
            Err(Error::UnknownSequence(seq))
        }
    }

    pub fn is_reply_ready(&self, seq: i32) -> bool {
        self.replies.get(&seq).is_some_and(|slot| slot.is_ready())
    }

    /// Waits for the reply to `seq` and takes it.
    ///
    /// `timeout` bounds each wait for an incoming frame, not the total. `None` waits forever.
    pub async fn get_reply(&self, seq: i32, timeout: Option<Duration>) -> Result<Value> {
        loop {
            if let Some(reply) = self.take_ready(seq)? {
                return reply;
            }
            let _pump = self.pump.lock().await;
            // Another waiter may have filed our reply while we queued for the pump.
            if let Some(reply) = self.take_ready(seq)? {
                return reply;
            }
            self.process_incoming(timeout).await?;
        }
    }

    /// Abandons interest in `seq`. A reply that already arrived is dropped now; one
    /// still in flight is dropped when it arrives.
    pub fn discard_reply(&self, seq: i32) {
        let ready = match self.replies.get_mut(&seq) {
            Some(mut slot) => {
                if slot.is_ready() {
                    true
                } else {
                    *slot = ReplySlot::Discarded;
                    false
                }
            }
            None => false,
        };
        if ready {
            self.replies.remove(&seq);
        }
    }

    /// Reads one reply frame and files it into its slot.
    pub async fn process_incoming(&self, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self.transport.begin_read_timeout(timeout).await?;
        let seq = rx.seq();
        let code = read_i8(&mut rx)?;

        let expect = match self.replies.get(&seq).as_deref() {
            Some(ReplySlot::Empty(expect)) => Some(expect.clone()),
            Some(ReplySlot::Discarded) => None,
            _ => return Err(Error::Protocol(format!("invalid sequence number {}", seq))),
        };

        let Some(expect) = expect else {
            rx.end();
            self.replies.remove(&seq);
            tracing::trace!(seq, "discarded reply dropped");
            return Ok(());
        };

        let code = ReplyCode::try_from(code)
            .map_err(|code| Error::Protocol(format!("unknown reply code: {}", code)))?;
        let slot = self.decode_reply(code, expect, &mut rx);
        rx.end();
        tracing::trace!(seq, ?code, "reply filed");

        let discarded = match self.replies.get_mut(&seq) {
            Some(mut entry) if matches!(*entry, ReplySlot::Empty(_)) => {
                *entry = slot;
                false
            }
            _ => true,
        };
        if discarded {
            self.replies.remove(&seq);
        }
        Ok(())
    }

    /// Decoding failures resolve the slot instead of failing the pump.
    fn decode_reply(&self, code: ReplyCode, expect: Expect, rx: &mut ReadTransaction<'_>) -> ReplySlot {
        let decoded = match code {
            ReplyCode::Success => match expect {
                Expect::Void => Ok(ReplySlot::Value(Value::Null)),
                Expect::Packer(packer) => packer.unpack(rx).map(ReplySlot::Value),
                Expect::Raw => Ok(ReplySlot::Value(Value::Buffer(rx.read_all()))),
            },
            ReplyCode::ProtocolError => read_str(rx).map(ReplySlot::ProtocolError),
            ReplyCode::GenericException => read_str(rx).and_then(|message| {
                let traceback = read_str(rx)?;
                Ok(ReplySlot::GenericException(GenericException::new(message, traceback)))
            }),
            ReplyCode::PackedException => read_i32(rx).and_then(|class_id| {
                let Some(packer) = self.types.get(class_id) else {
                    return Ok(ReplySlot::ProtocolError(format!("invalid class id: {}", class_id)));
                };
                let value = packer.unpack(rx)?;
                Ok(ReplySlot::PackedException(PackedException::new(class_id, value)))
            }),
        };
        decoded.unwrap_or_else(|e| ReplySlot::ProtocolError(format!("could not decode reply: {}", e)))
    }
}

// ============================================================================
// Call
// ============================================================================

/// An INVOKE request being written. Holds the transport's write lock.
///
/// Dropping it without [`Call::end`] discards the request and its reply slot.
pub struct Call<'a> {
    client: &'a ClientUtils,
    seq: i32,
    tx: Option<WriteTransaction<'a>>,
}

impl Call<'_> {
    pub fn seq(&self) -> i32 {
        self.seq
    }

    /// Packs the next argument.
    pub fn pack(&mut self, packer: &Packer, value: &Value) -> Result<()> {
        match self.tx.as_mut() {
            Some(tx) => Ok(packer.pack(value, tx)?),
            None => Err(Error::Protocol("call already ended".to_string())),
        }
    }

    /// Sends the request and returns its sequence number for [`ClientUtils::get_reply`].
    pub async fn end(mut self) -> Result<i32> {
        let Some(tx) = self.tx.take() else {
            return Err(Error::Protocol("call already ended".to_string()));
        };
        tx.commit().await?;
        let seq = self.seq;
        // Committed; the slot now belongs to the reply.
        self.seq = -1;
        Ok(seq)
    }

    /// Discards the request without sending anything.
    pub fn cancel(self) {}
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        if self.seq != -1 {
            self.client.replies.remove(&self.seq);
        }
    }
}
