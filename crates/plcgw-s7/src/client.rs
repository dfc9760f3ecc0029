// ── S7 client ──
//
// One ISO-on-TCP session to one CPU. Requests are strictly sequential:
// every call writes a frame and waits for the matching response before
// returning, so the client needs `&mut self` and no request multiplexing.
// A timed-out or failed exchange can leave half a frame on the socket, so
// the session refuses every later request once one has failed that way.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::frame;
use crate::szl;

/// ISO-on-TCP well-known port.
pub const DEFAULT_PORT: u16 = 102;

const REQUESTED_PDU_SIZE: u16 = 480;

const SZL_MODULE_IDENTIFICATION: u16 = 0x0011;
const SZL_COMPONENT_IDENTIFICATION: u16 = 0x001C;
const SZL_CPU_STATUS: u16 = 0x0424;

/// Where and how to reach a CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub rack: u8,
    pub slot: u8,
    /// Applies to the TCP connect and to every request/response exchange.
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            rack: 0,
            slot: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Identification strings reported by the CPU. Any field the CPU does not
/// provide stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuIdentity {
    pub order_code: Option<String>,
    pub module_type: Option<String>,
    pub serial_number: Option<String>,
    pub firmware: Option<String>,
}

/// An established S7 session.
#[derive(Debug)]
pub struct S7Client {
    stream: TcpStream,
    timeout: Duration,
    pdu_size: u16,
    pdu_ref: u16,
    broken: bool,
}

impl S7Client {
    /// Open the TCP connection and run the COTP + setup-communication
    /// handshake.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let timeout = options.timeout;
        let addr = (options.host.as_str(), options.port);
        let stream = within(timeout, async { Ok(TcpStream::connect(addr).await?) }).await?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream,
            timeout,
            pdu_size: 0,
            pdu_ref: 0,
            broken: false,
        };
        client.handshake(options.rack, options.slot).await?;

        debug!(
            host = %options.host,
            port = options.port,
            rack = options.rack,
            slot = options.slot,
            pdu_size = client.pdu_size,
            "S7 session established"
        );
        Ok(client)
    }

    /// PDU size negotiated with the CPU.
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    async fn handshake(&mut self, rack: u8, slot: u8) -> Result<()> {
        let confirm = self
            .exchange(&frame::connection_request(rack, slot), None)
            .await?;
        frame::check_connection_confirm(&confirm)?;

        let pdu_ref = self.next_pdu_ref();
        let response = self
            .exchange(
                &frame::setup_communication(pdu_ref, REQUESTED_PDU_SIZE),
                Some(pdu_ref),
            )
            .await?;
        let ack = frame::parse_ack_data(&response).map_err(|e| Error::Handshake(e.to_string()))?;
        let pdu_size = frame::parse_negotiated_pdu(&ack)?;
        if usize::from(pdu_size) <= frame::WRITE_OVERHEAD {
            return Err(Error::Handshake(format!(
                "negotiated PDU size {pdu_size} is too small"
            )));
        }
        self.pdu_size = pdu_size;
        Ok(())
    }

    // ── Data blocks ──────────────────────────────────────────────

    /// Read `len` bytes from data block `db`, starting at byte `start`.
    ///
    /// Requests larger than one PDU are split transparently.
    pub async fn read_db(&mut self, db: u16, start: u32, len: usize) -> Result<Vec<u8>> {
        let chunk = usize::from(self.pdu_size) - frame::READ_OVERHEAD;
        let mut out = Vec::with_capacity(len);
        let mut offset = start;

        while out.len() < len {
            let n = (len - out.len()).min(chunk);
            let n16 = u16::try_from(n)
                .map_err(|_| Error::InvalidRequest(format!("chunk of {n} bytes")))?;
            let pdu_ref = self.next_pdu_ref();
            let request = frame::read_request(pdu_ref, db, offset, n16)?;
            let response = self.exchange(&request, Some(pdu_ref)).await?;
            let ack = frame::parse_ack_data(&response)?;
            out.extend_from_slice(&frame::parse_read(&ack, n)?);
            offset = advance(offset, n16)?;
        }

        trace!(db, start, len, "read data block");
        Ok(out)
    }

    /// Write `data` into data block `db`, starting at byte `start`.
    pub async fn write_db(&mut self, db: u16, start: u32, data: &[u8]) -> Result<()> {
        let chunk = usize::from(self.pdu_size) - frame::WRITE_OVERHEAD;
        let mut offset = start;

        for part in data.chunks(chunk) {
            let pdu_ref = self.next_pdu_ref();
            let request = frame::write_request(pdu_ref, db, offset, part)?;
            let response = self.exchange(&request, Some(pdu_ref)).await?;
            let ack = frame::parse_ack_data(&response)?;
            frame::parse_write(&ack)?;
            let written = u16::try_from(part.len())
                .map_err(|_| Error::InvalidRequest(format!("chunk of {} bytes", part.len())))?;
            offset = advance(offset, written)?;
        }

        trace!(db, start, len = data.len(), "wrote data block");
        Ok(())
    }

    // ── Diagnostics ──────────────────────────────────────────────

    /// Order code, module type, serial number and firmware of the CPU.
    ///
    /// Module identification is required; component identification is
    /// not available on every CPU family, so its absence only leaves
    /// `module_type` and `serial_number` empty.
    pub async fn identity(&mut self) -> Result<CpuIdentity> {
        let mut identity = CpuIdentity::default();

        let module = self.read_szl(SZL_MODULE_IDENTIFICATION, 0).await?;
        szl::apply_module_identification(&module, &mut identity);

        match self.read_szl(SZL_COMPONENT_IDENTIFICATION, 0).await {
            Ok(component) => szl::apply_component_identification(&component, &mut identity),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!(error = %e, "component identification unavailable"),
        }

        Ok(identity)
    }

    /// Cheap liveness check: reads the CPU status list.
    pub async fn probe(&mut self) -> Result<()> {
        self.read_szl(SZL_CPU_STATUS, 0).await.map(drop)
    }

    /// Whether an earlier exchange failed in a way that left the socket in
    /// an unknown state. Every request on a broken session fails with
    /// [`Error::Broken`].
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Shut down the write side of the socket.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────

    async fn read_szl(&mut self, id: u16, index: u16) -> Result<Vec<Vec<u8>>> {
        let pdu_ref = self.next_pdu_ref();
        let response = self
            .exchange(&frame::szl_request(pdu_ref, id, index), Some(pdu_ref))
            .await?;
        let userdata = frame::parse_userdata(&response)?;
        let list = frame::parse_szl(&userdata)?;
        trace!(
            id = format_args!("0x{:04X}", list.id),
            records = list.records.len(),
            "read SZL"
        );
        Ok(list.records.into_iter().map(<[u8]>::to_vec).collect())
    }

    /// Send `request` and wait for its response. With `pdu_ref` set,
    /// responses carrying any other reference are stale answers to an
    /// earlier request and are skipped.
    async fn exchange(&mut self, request: &[u8], pdu_ref: Option<u16>) -> Result<Vec<u8>> {
        if self.broken {
            return Err(Error::Broken);
        }

        let stream = &mut self.stream;
        let result = within(self.timeout, async move {
            stream.write_all(request).await.map_err(closed_on_eof)?;
            loop {
                let response = read_frame(stream).await?;
                let Some(expected) = pdu_ref else {
                    return Ok(response);
                };
                let received = frame::response_pdu_ref(&response)?;
                if received == expected {
                    return Ok(response);
                }
                debug!(expected, received, "discarding stale S7 response");
            }
        })
        .await;

        match &result {
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "S7 session unusable after failed exchange");
                self.broken = true;
            }
            _ => {}
        }
        result
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut header = [0u8; frame::TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await.map_err(closed_on_eof)?;
    let len = frame::frame_length(header)?;

    let mut buf = vec![0u8; len];
    buf[..frame::TPKT_HEADER_LEN].copy_from_slice(&header);
    stream
        .read_exact(&mut buf[frame::TPKT_HEADER_LEN..])
        .await
        .map_err(closed_on_eof)?;
    Ok(buf)
}

async fn within<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
}

fn closed_on_eof(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe => Error::Closed,
        _ => Error::Io(e),
    }
}

fn advance(offset: u32, by: u16) -> Result<u32> {
    offset
        .checked_add(u32::from(by))
        .ok_or_else(|| Error::InvalidRequest("offset overflow".into()))
}
