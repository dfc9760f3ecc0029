// ── Wire framing ──
//
// TPKT (RFC 1006) → COTP (ISO 8073 class 0) → S7comm. Requests leave this
// module as complete TPKT frames ready for the socket; responses enter it
// as complete TPKT frames read off the socket.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ItemError, Result};

pub(crate) const TPKT_HEADER_LEN: usize = 4;
const TPKT_VERSION: u8 = 0x03;

const COTP_CR: u8 = 0xE0;
const COTP_CC: u8 = 0xD0;
const COTP_DT: u8 = 0xF0;
const COTP_EOT: u8 = 0x80;
const COTP_TPDU_SIZE_1024: u8 = 0x0A;

const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const ROSCTR_USERDATA: u8 = 0x07;

const FN_SETUP_COMMUNICATION: u8 = 0xF0;
const FN_READ_VAR: u8 = 0x04;
const FN_WRITE_VAR: u8 = 0x05;

const AREA_DB: u8 = 0x84;
const TRANSPORT_BYTE: u8 = 0x02;

const DATA_BIT: u8 = 0x03;
const DATA_BYTE_WORD_DWORD: u8 = 0x04;
const DATA_INTEGER: u8 = 0x05;
const DATA_REAL: u8 = 0x07;
const DATA_OCTET: u8 = 0x09;

const RETURN_SUCCESS: u8 = 0xFF;

/// Bytes a read-var response spends around its payload.
pub(crate) const READ_OVERHEAD: usize = 18;
/// Bytes a write-var request spends around its payload.
pub(crate) const WRITE_OVERHEAD: usize = 35;

const MAX_BIT_ADDRESS: u32 = 0x00FF_FFFF;
const LOCAL_TSAP: u16 = 0x0100;

const JOB_HEADER_LEN: usize = 10;
const ACK_HEADER_LEN: usize = 12;
const USERDATA_HEADER_LEN: usize = 10;

// ── Requests ─────────────────────────────────────────────────────────

/// Remote TSAP for a PG-class connection to the CPU at `rack`/`slot`.
pub(crate) fn remote_tsap(rack: u8, slot: u8) -> u16 {
    0x0100 | ((u16::from(rack) * 0x20 + u16::from(slot)) & 0x00FF)
}

/// COTP connection request (CR) negotiating a 1024-byte TPDU.
pub(crate) fn connection_request(rack: u8, slot: u8) -> Bytes {
    let mut cotp = BytesMut::with_capacity(18);
    cotp.put_u8(17); // length indicator, excludes itself
    cotp.put_u8(COTP_CR);
    cotp.put_u16(0x0000); // destination reference
    cotp.put_u16(0x0001); // source reference
    cotp.put_u8(0x00); // class 0
    cotp.put_slice(&[0xC0, 0x01, COTP_TPDU_SIZE_1024]);
    cotp.put_slice(&[0xC1, 0x02]);
    cotp.put_u16(LOCAL_TSAP);
    cotp.put_slice(&[0xC2, 0x02]);
    cotp.put_u16(remote_tsap(rack, slot));
    tpkt(&cotp)
}

/// S7 "setup communication" job requesting `pdu_size`.
pub(crate) fn setup_communication(pdu_ref: u16, pdu_size: u16) -> Bytes {
    let mut param = BytesMut::with_capacity(8);
    param.put_u8(FN_SETUP_COMMUNICATION);
    param.put_u8(0x00);
    param.put_u16(1); // max AmQ calling
    param.put_u16(1); // max AmQ called
    param.put_u16(pdu_size);
    job(pdu_ref, &param, &[])
}

/// Read `len` bytes from data block `db` starting at byte `start`.
pub(crate) fn read_request(pdu_ref: u16, db: u16, start: u32, len: u16) -> Result<Bytes> {
    let mut param = BytesMut::with_capacity(14);
    param.put_u8(FN_READ_VAR);
    param.put_u8(1); // item count
    any_pointer(&mut param, db, start, len)?;
    Ok(job(pdu_ref, &param, &[]))
}

/// Write `payload` into data block `db` starting at byte `start`.
pub(crate) fn write_request(pdu_ref: u16, db: u16, start: u32, payload: &[u8]) -> Result<Bytes> {
    let too_large = || Error::InvalidRequest(format!("{} bytes exceed one request", payload.len()));
    let len = u16::try_from(payload.len()).map_err(|_| too_large())?;
    let bits = len.checked_mul(8).ok_or_else(too_large)?;

    let mut param = BytesMut::with_capacity(14);
    param.put_u8(FN_WRITE_VAR);
    param.put_u8(1);
    any_pointer(&mut param, db, start, len)?;

    let mut data = BytesMut::with_capacity(4 + payload.len());
    data.put_u8(0x00); // reserved return code
    data.put_u8(DATA_BYTE_WORD_DWORD);
    data.put_u16(bits);
    data.put_slice(payload);

    Ok(job(pdu_ref, &param, &data))
}

/// Userdata request reading system status list `id`/`index`.
pub(crate) fn szl_request(pdu_ref: u16, id: u16, index: u16) -> Bytes {
    // head, param length 4, request/CPU functions group, read SZL, sequence 0
    let param = [0x00, 0x01, 0x12, 0x04, 0x11, 0x44, 0x01, 0x00];

    let mut data = BytesMut::with_capacity(8);
    data.put_slice(&[RETURN_SUCCESS, DATA_OCTET]);
    data.put_u16(4);
    data.put_u16(id);
    data.put_u16(index);

    let mut s7 = BytesMut::with_capacity(USERDATA_HEADER_LEN + param.len() + data.len());
    s7.put_u8(S7_PROTOCOL_ID);
    s7.put_u8(ROSCTR_USERDATA);
    s7.put_u16(0x0000);
    s7.put_u16(pdu_ref);
    s7.put_u16(len16(param.len()));
    s7.put_u16(len16(data.len()));
    s7.put_slice(&param);
    s7.put_slice(&data);
    data_frame(&s7)
}

fn any_pointer(param: &mut BytesMut, db: u16, start: u32, len: u16) -> Result<()> {
    let bit_address = start
        .checked_mul(8)
        .filter(|address| *address <= MAX_BIT_ADDRESS)
        .ok_or_else(|| {
            Error::InvalidRequest(format!("byte offset {start} is outside the addressable range"))
        })?;

    param.put_slice(&[0x12, 0x0A, 0x10, TRANSPORT_BYTE]);
    param.put_u16(len);
    param.put_u16(db);
    param.put_u8(AREA_DB);
    let [_, high, mid, low] = bit_address.to_be_bytes();
    param.put_slice(&[high, mid, low]);
    Ok(())
}

fn job(pdu_ref: u16, param: &[u8], data: &[u8]) -> Bytes {
    let mut s7 = BytesMut::with_capacity(JOB_HEADER_LEN + param.len() + data.len());
    s7.put_u8(S7_PROTOCOL_ID);
    s7.put_u8(ROSCTR_JOB);
    s7.put_u16(0x0000);
    s7.put_u16(pdu_ref);
    s7.put_u16(len16(param.len()));
    s7.put_u16(len16(data.len()));
    s7.put_slice(param);
    s7.put_slice(data);
    data_frame(&s7)
}

fn data_frame(s7: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(3 + s7.len());
    body.put_slice(&[0x02, COTP_DT, COTP_EOT]);
    body.put_slice(s7);
    tpkt(&body)
}

fn tpkt(body: &[u8]) -> Bytes {
    let total = TPKT_HEADER_LEN + body.len();
    let mut frame = BytesMut::with_capacity(total);
    frame.put_u8(TPKT_VERSION);
    frame.put_u8(0x00);
    frame.put_u16(len16(total));
    frame.put_slice(body);
    frame.freeze()
}

fn len16(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

// ── Responses ────────────────────────────────────────────────────────

/// Total frame length announced by a TPKT header.
pub(crate) fn frame_length(header: [u8; TPKT_HEADER_LEN]) -> Result<usize> {
    let [version, _, high, low] = header;
    if version != TPKT_VERSION {
        return Err(Error::Protocol(format!(
            "unexpected TPKT version 0x{version:02X}"
        )));
    }
    let len = usize::from(u16::from_be_bytes([high, low]));
    if len < TPKT_HEADER_LEN + 2 {
        return Err(Error::Protocol(format!("TPKT length {len} is too short")));
    }
    Ok(len)
}

pub(crate) fn check_connection_confirm(frame: &[u8]) -> Result<()> {
    match frame.get(TPKT_HEADER_LEN + 1) {
        Some(&COTP_CC) => Ok(()),
        Some(other) => Err(Error::Handshake(format!(
            "expected COTP connection confirm, got PDU type 0x{other:02X}"
        ))),
        None => Err(Error::Handshake("truncated connection confirm".into())),
    }
}

/// Parameter and data sections of an S7 response.
#[derive(Debug)]
pub(crate) struct Response<'a> {
    pub param: &'a [u8],
    pub data: &'a [u8],
}

/// PDU reference of an S7 response, echoed from the request it answers.
pub(crate) fn response_pdu_ref(frame: &[u8]) -> Result<u16> {
    match s7_payload(frame)?.get(4..6) {
        Some(&[high, low]) => Ok(u16::from_be_bytes([high, low])),
        _ => Err(truncated("S7 header")),
    }
}

/// Unwrap an ack-data response to a job, rejecting S7 error headers.
pub(crate) fn parse_ack_data(frame: &[u8]) -> Result<Response<'_>> {
    let s7 = s7_payload(frame)?;
    let header = s7
        .get(..ACK_HEADER_LEN)
        .ok_or_else(|| truncated("ack-data header"))?;
    if header[1] != ROSCTR_ACK_DATA {
        return Err(Error::Protocol(format!(
            "expected ack-data, got ROSCTR 0x{:02X}",
            header[1]
        )));
    }
    let (class, code) = (header[10], header[11]);
    if class != 0 || code != 0 {
        return Err(Error::Protocol(format!(
            "S7 error class 0x{class:02X} code 0x{code:02X}"
        )));
    }
    sections(s7, ACK_HEADER_LEN)
}

/// Unwrap a userdata response, rejecting a non-zero parameter error code.
pub(crate) fn parse_userdata(frame: &[u8]) -> Result<Response<'_>> {
    let s7 = s7_payload(frame)?;
    let header = s7
        .get(..USERDATA_HEADER_LEN)
        .ok_or_else(|| truncated("userdata header"))?;
    if header[1] != ROSCTR_USERDATA {
        return Err(Error::Protocol(format!(
            "expected userdata, got ROSCTR 0x{:02X}",
            header[1]
        )));
    }
    let response = sections(s7, USERDATA_HEADER_LEN)?;
    if let Some(&[high, low]) = response.param.get(10..12) {
        let code = u16::from_be_bytes([high, low]);
        if code != 0 {
            return Err(Error::Protocol(format!("userdata error code 0x{code:04X}")));
        }
    }
    Ok(response)
}

pub(crate) fn parse_negotiated_pdu(response: &Response<'_>) -> Result<u16> {
    match response.param {
        [FN_SETUP_COMMUNICATION, _, _, _, _, _, high, low, ..] => {
            Ok(u16::from_be_bytes([*high, *low]))
        }
        _ => Err(Error::Handshake(
            "malformed setup communication response".into(),
        )),
    }
}

/// Extract the payload of a single-item read-var response.
pub(crate) fn parse_read(response: &Response<'_>, expected: usize) -> Result<Vec<u8>> {
    if response.param.first() != Some(&FN_READ_VAR) {
        return Err(Error::Protocol("expected read-var response".into()));
    }
    let item = response.data;
    let code = *item.first().ok_or_else(|| truncated("read item"))?;
    if code != RETURN_SUCCESS {
        return Err(Error::Item(ItemError::from_code(code)));
    }
    let header = item.get(..4).ok_or_else(|| truncated("read item header"))?;
    let raw_len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let byte_len = match header[1] {
        DATA_BYTE_WORD_DWORD | DATA_INTEGER => raw_len / 8,
        DATA_BIT | DATA_REAL | DATA_OCTET => raw_len,
        other => {
            return Err(Error::Protocol(format!(
                "unsupported transport size 0x{other:02X}"
            )));
        }
    };
    if byte_len != expected {
        return Err(Error::Protocol(format!(
            "expected {expected} bytes, controller returned {byte_len}"
        )));
    }
    item.get(4..4 + byte_len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| truncated("read payload"))
}

pub(crate) fn parse_write(response: &Response<'_>) -> Result<()> {
    if response.param.first() != Some(&FN_WRITE_VAR) {
        return Err(Error::Protocol("expected write-var response".into()));
    }
    match response.data.first() {
        Some(&RETURN_SUCCESS) => Ok(()),
        Some(&code) => Err(Error::Item(ItemError::from_code(code))),
        None => Err(truncated("write item")),
    }
}

/// One system status list as returned by the CPU.
#[derive(Debug)]
pub(crate) struct Szl<'a> {
    pub id: u16,
    pub records: Vec<&'a [u8]>,
}

pub(crate) fn parse_szl<'a>(response: &Response<'a>) -> Result<Szl<'a>> {
    let data = response.data;
    let code = *data.first().ok_or_else(|| truncated("SZL data"))?;
    if code != RETURN_SUCCESS {
        return Err(Error::Item(ItemError::from_code(code)));
    }
    let head = data.get(..12).ok_or_else(|| truncated("SZL header"))?;
    let id = u16::from_be_bytes([head[4], head[5]]);
    let record_len = usize::from(u16::from_be_bytes([head[8], head[9]]));
    let count = usize::from(u16::from_be_bytes([head[10], head[11]]));

    let records = if record_len == 0 {
        Vec::new()
    } else {
        data.get(12..)
            .unwrap_or_default()
            .chunks_exact(record_len)
            .take(count)
            .collect()
    };
    Ok(Szl { id, records })
}

fn s7_payload(frame: &[u8]) -> Result<&[u8]> {
    let cotp_len = usize::from(
        *frame
            .get(TPKT_HEADER_LEN)
            .ok_or_else(|| truncated("COTP header"))?,
    );
    if frame.get(TPKT_HEADER_LEN + 1) != Some(&COTP_DT) {
        return Err(Error::Protocol("expected COTP data transfer".into()));
    }
    let payload = frame
        .get(TPKT_HEADER_LEN + 1 + cotp_len..)
        .ok_or_else(|| truncated("S7 payload"))?;
    if payload.first() != Some(&S7_PROTOCOL_ID) {
        return Err(Error::Protocol("missing S7 protocol id".into()));
    }
    Ok(payload)
}

fn sections(s7: &[u8], header_len: usize) -> Result<Response<'_>> {
    let lengths = s7.get(6..10).ok_or_else(|| truncated("S7 header"))?;
    let param_len = usize::from(u16::from_be_bytes([lengths[0], lengths[1]]));
    let data_len = usize::from(u16::from_be_bytes([lengths[2], lengths[3]]));
    let param_end = header_len + param_len;
    let param = s7
        .get(header_len..param_end)
        .ok_or_else(|| truncated("S7 parameters"))?;
    let data = s7
        .get(param_end..param_end + data_len)
        .ok_or_else(|| truncated("S7 data"))?;
    Ok(Response { param, data })
}

fn truncated(what: &str) -> Error {
    Error::Protocol(format!("truncated {what}"))
}

// ── Tests ────────────────────────────────────────────────────────────
