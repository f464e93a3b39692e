//! # Processor
//!
//! The server side of one connection: reads a request frame, dispatches it and
//! writes the reply frame under the same sequence number.
//!
//! ## Error Containment
//!
//! - A malformed request, a failing handler or a declared exception never leaves a
//!   half-built reply on the wire. The reply buffer is restarted and the matching
//!   error reply is written in its place.
//! - A transport failure cancels the reply and ends the connection.

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use agnopack::HeteroMap;
use agnopack::Packer;
use agnopack::Registry;
use agnopack::Value;
use agnopack::read_i8;
use agnopack::read_i32;
use agnopack::read_i64;
use agnopack::read_str;
use agnopack::write_i8;
use agnopack::write_i32;
use agnopack::write_str;
use agnowire::ReadTransaction;
use agnowire::Transport;
use agnowire::WriteTransaction;

use crate::codes::Command;
use crate::codes::InfoCode;
use crate::codes::ReplyCode;
use crate::error::Error;
use crate::error::Fault;
use crate::error::Result;
use crate::objects::ObjectTable;
use crate::service::Service;
use crate::service::ServiceFactory;

/// What the serve loop should do after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Processor {
    transport: Arc<Transport>,
    objects: Arc<ObjectTable>,
    service: Arc<dyn Service>,
}

impl Processor {
    /// Builds a processor with a fresh object table and a service bound to it.
    pub fn new(transport: Arc<Transport>, factory: &dyn ServiceFactory) -> Self {
        let objects = Arc::new(ObjectTable::new());
        let service = factory.create(objects.clone());
        Self { transport, objects, service }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn objects(&self) -> &Arc<ObjectTable> {
        &self.objects
    }

    /// Serves requests until the client quits or the connection closes.
    pub async fn serve(&self) -> Result<()> {
        loop {
            match self.process().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => {
                    tracing::debug!(peer = %self.transport.label(), "client quit");
                    return Ok(());
                }
                Err(Error::Transport(agnowire::Error::ConnectionLost(reason))) => {
                    tracing::debug!(peer = %self.transport.label(), %reason, "connection closed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %self.transport.label(), error = %e, "connection failed");
                    return Err(e);
                }
            }
        }
    }

    /// Handles exactly one request.
    pub async fn process(&self) -> Result<Flow> {
        let mut rx = self.transport.begin_read().await?;
        let seq = rx.seq();
        let mut tx = self.transport.begin_write(seq).await;

        let outcome = self.dispatch(seq, &mut rx, &mut tx).await;
        rx.end();

        let flow = match outcome {
            Ok(flow) => flow,
            Err(fault) => {
                tx.restart();
                if let Err(e) = self.write_fault(&fault, &mut tx) {
                    tx.cancel();
                    return Err(e.into());
                }
                Flow::Continue
            }
        };

        if let Err(e) = tx.commit().await {
            return Err(e.into());
        }
        Ok(flow)
    }

    async fn dispatch(
        &self,
        seq: i32,
        rx: &mut ReadTransaction<'_>,
        tx: &mut WriteTransaction<'_>,
    ) -> std::result::Result<Flow, Fault> {
        let code = read_i8(rx).map_err(malformed)?;
        let command = Command::try_from(code)
            .map_err(|code| Fault::protocol(format!("unknown command code: {}", code)))?;
        tracing::debug!(seq, ?command, "dispatching");

        match command {
            Command::Ping => {
                let payload = read_str(rx).map_err(malformed)?;
                write_success(tx)?;
                write_str(tx, &payload).map_err(unpackable)?;
            }
            Command::Invoke => self.invoke(rx, tx).await?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Decref => {
                let id = read_i64(rx).map_err(malformed)?;
                self.objects.decref(id);
            }
            Command::Incref => {
                let id = read_i64(rx).map_err(malformed)?;
                self.objects.incref(id);
            }
            Command::GetInfo => {
                let code = InfoCode::from_code(read_i32(rx).map_err(malformed)?);
                let mut info = HeteroMap::new();
                self.service.describe(code, &mut info).map_err(unpackable)?;
                write_success(tx)?;
                Packer::HeteroMap(Registry::default())
                    .pack(&Value::HeteroMap(info), tx)
                    .map_err(unpackable)?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn invoke(
        &self,
        rx: &mut ReadTransaction<'_>,
        tx: &mut WriteTransaction<'_>,
    ) -> std::result::Result<(), Fault> {
        let func_id = read_i32(rx).map_err(malformed)?;
        let func = self
            .service
            .function(func_id)
            .ok_or_else(|| Fault::protocol(format!("unknown function id: {}", func_id)))?;

        let args = func
            .args
            .iter()
            .map(|arg| arg.packer.unpack(rx))
            .collect::<agnopack::Result<Vec<_>>>()
            .map_err(malformed)?;

        let value = match AssertUnwindSafe(func.call(args)).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                let fault = Fault::from_handler_error(err, &func.name);
                if let Fault::Generic { message, .. } = &fault {
                    tracing::warn!(function = %func.name, %message, "handler failed");
                }
                return Err(fault);
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(function = %func.name, %message, "handler panicked");
                return Err(Fault::generic(message, format!("  in {}\n  (panic)", func.name)));
            }
        };

        write_success(tx)?;
        if let Some(packer) = &func.result {
            packer.pack(&value, tx).map_err(unpackable)?;
        }
        Ok(())
    }

    fn write_fault(&self, fault: &Fault, tx: &mut dyn Write) -> agnopack::Result<()> {
        match fault {
            Fault::Protocol(message) => {
                tracing::debug!(%message, "protocol error");
                write_i8(tx, ReplyCode::ProtocolError as i8)?;
                write_str(tx, message)
            }
            Fault::Generic { message, traceback } => write_generic(tx, message, traceback),
            Fault::Packed { class_id, value } => {
                let Some(packer) = self.service.exception_packer(*class_id) else {
                    let message = format!("undeclared exception class {}", class_id);
                    return write_generic(tx, &message, "  (no packer registered)");
                };
                let mut body = Vec::new();
                write_i8(&mut body, ReplyCode::PackedException as i8)?;
                write_i32(&mut body, *class_id)?;
                match packer.pack(value, &mut body) {
                    Ok(()) => {
                        tx.write_all(&body)?;
                        Ok(())
                    }
                    Err(e) => write_generic(tx, &format!("could not pack exception {}: {}", class_id, e), "  (packing)"),
                }
            }
        }
    }
}

fn write_success(tx: &mut dyn Write) -> std::result::Result<(), Fault> {
    write_i8(tx, ReplyCode::Success as i8).map_err(unpackable)
}

fn write_generic(tx: &mut dyn Write, message: &str, traceback: &str) -> agnopack::Result<()> {
    write_i8(tx, ReplyCode::GenericException as i8)?;
    write_str(tx, message)?;
    write_str(tx, traceback)
}

/// The request could not be decoded.
fn malformed(e: agnopack::Error) -> Fault {
    Fault::protocol(format!("malformed request: {}", e))
}

/// The reply could not be encoded.
fn unpackable(e: agnopack::Error) -> Fault {
    Fault::generic(format!("could not pack reply: {}", e), "  (packing)")
}
