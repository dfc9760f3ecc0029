// Integration tests for `S7Client` against an in-process fake CPU.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;

use plcgw_s7::{ConnectOptions, Error, ItemError, S7Client};

// ── Fake CPU ────────────────────────────────────────────────────────

type Memory = Arc<Mutex<HashMap<u16, Vec<u8>>>>;

struct FakePlc {
    addr: SocketAddr,
    memory: Memory,
    requests: Arc<Mutex<u32>>,
}

async fn spawn_fake_plc(pdu_size: u16, blocks: &[(u16, usize)]) -> FakePlc {
    spawn_slow_plc(pdu_size, blocks, Duration::ZERO).await
}

/// Fake CPU that holds every read-var answer back for `read_delay`.
async fn spawn_slow_plc(pdu_size: u16, blocks: &[(u16, usize)], read_delay: Duration) -> FakePlc {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let memory: Memory = Arc::new(Mutex::new(
        blocks.iter().map(|(db, len)| (*db, vec![0u8; *len])).collect(),
    ));
    let requests = Arc::new(Mutex::new(0));

    let (mem, count) = (Arc::clone(&memory), Arc::clone(&requests));
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(
                socket,
                pdu_size,
                Arc::clone(&mem),
                Arc::clone(&count),
                read_delay,
            ));
        }
    });

    FakePlc {
        addr,
        memory,
        requests,
    }
}

async fn read_tpkt(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await.ok()?;
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut frame = header.to_vec();
    frame.resize(len, 0);
    socket.read_exact(&mut frame[4..]).await.ok()?;
    Some(frame)
}

fn tpkt(body: &[u8]) -> Vec<u8> {
    let len = u16::try_from(body.len() + 4).unwrap();
    let mut frame = vec![0x03, 0x00];
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

fn s7_response(rosctr: u8, pdu_ref: [u8; 2], param: &[u8], data: &[u8]) -> Vec<u8> {
    let mut body = vec![0x02, 0xF0, 0x80, 0x32, rosctr, 0x00, 0x00, pdu_ref[0], pdu_ref[1]];
    body.extend_from_slice(&u16::try_from(param.len()).unwrap().to_be_bytes());
    body.extend_from_slice(&u16::try_from(data.len()).unwrap().to_be_bytes());
    if rosctr == 0x03 {
        body.extend_from_slice(&[0x00, 0x00]);
    }
    body.extend_from_slice(param);
    body.extend_from_slice(data);
    tpkt(&body)
}

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(len, b' ');
    bytes
}

fn szl_data(id: u16, record_len: u16, records: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = records.concat();
    let mut data = vec![0xFF, 0x09];
    data.extend_from_slice(&u16::try_from(payload.len() + 8).unwrap().to_be_bytes());
    data.extend_from_slice(&id.to_be_bytes());
    data.extend_from_slice(&[0x00, 0x00]);
    data.extend_from_slice(&record_len.to_be_bytes());
    data.extend_from_slice(&u16::try_from(records.len()).unwrap().to_be_bytes());
    data.extend_from_slice(&payload);
    data
}

fn szl_answer(id: u16) -> Vec<u8> {
    match id {
        0x0011 => {
            let mut module = vec![0x00, 0x01];
            module.extend(padded("6ES7 315-2EH14-0AB0", 20));
            module.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x01]);
            let mut firmware = vec![0x00, 0x07];
            firmware.extend(padded("", 20));
            firmware.extend_from_slice(&[0x00, 0x00, 0x56, 0x03, 0x02, 0x06]);
            szl_data(id, 28, &[module, firmware])
        }
        0x001C => {
            let component = |index: u8, text: &str| {
                let mut record = vec![0x00, index];
                let mut body = text.as_bytes().to_vec();
                body.resize(32, 0);
                record.extend(body);
                record
            };
            szl_data(
                id,
                34,
                &[
                    component(0x02, "PLC_1"),
                    component(0x05, "S C-X4U421302009"),
                    component(0x07, "CPU 315-2 PN/DP"),
                ],
            )
        }
        _ => szl_data(id, 20, &[vec![0u8; 20]]),
    }
}

async fn serve(
    mut socket: TcpStream,
    pdu_size: u16,
    memory: Memory,
    requests: Arc<Mutex<u32>>,
    read_delay: Duration,
) {
    let Some(request) = read_tpkt(&mut socket).await else {
        return;
    };
    assert_eq!(request[5], 0xE0, "expected a COTP connection request");
    let confirm = tpkt(&[0x06, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00]);
    socket.write_all(&confirm).await.unwrap();

    while let Some(request) = read_tpkt(&mut socket).await {
        *requests.lock().unwrap() += 1;
        let s7 = &request[7..];
        let pdu_ref = [s7[4], s7[5]];
        let param_len = usize::from(u16::from_be_bytes([s7[6], s7[7]]));
        let param = &s7[10..10 + param_len];
        let data = &s7[10 + param_len..];

        let response = match (s7[1], param[0]) {
            (0x01, 0xF0) => {
                let mut ack = param.to_vec();
                ack[6..8].copy_from_slice(&pdu_size.to_be_bytes());
                s7_response(0x03, pdu_ref, &ack, &[])
            }
            (0x01, 0x04) => {
                let (db, start, len) = address(param);
                let memory = memory.lock().unwrap();
                let item = match memory.get(&db) {
                    Some(block) if start + len <= block.len() => {
                        let mut item = vec![0xFF, 0x04];
                        item.extend_from_slice(&u16::try_from(len * 8).unwrap().to_be_bytes());
                        item.extend_from_slice(&block[start..start + len]);
                        item
                    }
                    Some(_) => vec![0x05, 0x00, 0x00, 0x00],
                    None => vec![0x0A, 0x00, 0x00, 0x00],
                };
                s7_response(0x03, pdu_ref, &[0x04, 0x01], &item)
            }
            (0x01, 0x05) => {
                let (db, start, len) = address(param);
                let mut memory = memory.lock().unwrap();
                let code = match memory.get_mut(&db) {
                    Some(block) if start + len <= block.len() => {
                        block[start..start + len].copy_from_slice(&data[4..4 + len]);
                        0xFF
                    }
                    Some(_) => 0x05,
                    None => 0x0A,
                };
                s7_response(0x03, pdu_ref, &[0x05, 0x01], &[code])
            }
            (0x07, _) => {
                let id = u16::from_be_bytes([data[4], data[5]]);
                let param = [0x00, 0x01, 0x12, 0x08, 0x12, 0x84, 0x01, 0x01, 0, 0, 0, 0];
                s7_response(0x07, pdu_ref, &param, &szl_answer(id))
            }
            other => panic!("unexpected request {other:?}"),
        };
        if param[0] == 0x04 && !read_delay.is_zero() {
            tokio::time::sleep(read_delay).await;
        }
        if socket.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn address(param: &[u8]) -> (u16, usize, usize) {
    let len = usize::from(u16::from_be_bytes([param[6], param[7]]));
    let db = u16::from_be_bytes([param[8], param[9]]);
    let bits = u32::from_be_bytes([0, param[11], param[12], param[13]]);
    (db, usize::try_from(bits / 8).unwrap(), len)
}

fn options(addr: SocketAddr) -> ConnectOptions {
    ConnectOptions {
        host: addr.ip().to_string(),
        port: addr.port(),
        timeout: Duration::from_secs(2),
        ..ConnectOptions::new("unused")
    }
}

// ── Session ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_negotiates_pdu_size() {
    let plc = spawn_fake_plc(240, &[]).await;
    let client = S7Client::connect(&options(plc.addr)).await.unwrap();
    assert_eq!(client.pdu_size(), 240);
    assert_ok!(client.close().await);
}

#[tokio::test]
async fn test_refused_handshake_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_tpkt(&mut socket).await;
        // COTP disconnect request instead of a confirm
        let refuse = tpkt(&[0x06, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00]);
        socket.write_all(&refuse).await.unwrap();
    });

    let err = S7Client::connect(&options(addr)).await.unwrap_err();
    assert!(matches!(err, Error::Handshake(_)), "got {err:?}");
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut opts = options(addr);
    opts.timeout = Duration::from_millis(150);
    let err = S7Client::connect(&opts).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_ms: 150 }), "got {err:?}");
}

#[tokio::test]
async fn test_peer_hangup_is_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });

    let err = S7Client::connect(&options(addr)).await.unwrap_err();
    assert!(matches!(err, Error::Closed | Error::Io(_)), "got {err:?}");
}

#[tokio::test]
async fn test_timed_out_session_refuses_later_requests() {
    let plc = spawn_slow_plc(240, &[(1, 32)], Duration::from_millis(150)).await;
    {
        let mut memory = plc.memory.lock().unwrap();
        let block = memory.get_mut(&1).unwrap();
        block[10] = 10;
        block[20] = 20;
    }

    let mut opts = options(plc.addr);
    opts.timeout = Duration::from_millis(100);
    let mut client = S7Client::connect(&opts).await.unwrap();

    let err = client.read_db(1, 10, 1).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout_ms: 100 }), "got {err:?}");
    assert!(client.is_broken());

    // The late answer for offset 10 must never surface as offset 20's value.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = client.read_db(1, 20, 1).await.unwrap_err();
    assert!(matches!(err, Error::Broken), "got {err:?}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_stale_response_is_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_tpkt(&mut socket).await;
        let confirm = tpkt(&[0x06, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00]);
        socket.write_all(&confirm).await.unwrap();

        let setup = read_tpkt(&mut socket).await.unwrap();
        let s7 = &setup[7..];
        let mut ack = s7[10..18].to_vec();
        ack[6..8].copy_from_slice(&240u16.to_be_bytes());
        let answer = s7_response(0x03, [s7[4], s7[5]], &ack, &[]);
        socket.write_all(&answer).await.unwrap();

        let read = read_tpkt(&mut socket).await.unwrap();
        let pdu_ref = [read[11], read[12]];
        let stale_ref = u16::from_be_bytes(pdu_ref).wrapping_sub(1).to_be_bytes();
        let item = |value: u8| [0xFF, 0x04, 0x00, 0x08, value];
        let stale = s7_response(0x03, stale_ref, &[0x04, 0x01], &item(0xEE));
        let fresh = s7_response(0x03, pdu_ref, &[0x04, 0x01], &item(0x42));
        socket.write_all(&[stale, fresh].concat()).await.unwrap();
        let _ = read_tpkt(&mut socket).await;
    });

    let mut client = S7Client::connect(&options(addr)).await.unwrap();
    assert_eq!(client.read_db(1, 0, 1).await.unwrap(), vec![0x42]);
    assert!(!client.is_broken());
}

// ── Data blocks ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_write_then_read_back() {
    let plc = spawn_fake_plc(480, &[(1, 64)]).await;
    let mut client = S7Client::connect(&options(plc.addr)).await.unwrap();

    client.write_db(1, 10, &[0x41, 0x48, 0x00, 0x00]).await.unwrap();
    let bytes = client.read_db(1, 10, 4).await.unwrap();

    assert_eq!(bytes, vec![0x41, 0x48, 0x00, 0x00]);
    assert_eq!(plc.memory.lock().unwrap()[&1][10..14], [0x41, 0x48, 0x00, 0x00]);
}

#[tokio::test]
async fn test_large_read_is_split_by_pdu_size() {
    let plc = spawn_fake_plc(240, &[(5, 600)]).await;
    {
        let mut memory = plc.memory.lock().unwrap();
        let block = memory.get_mut(&5).unwrap();
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = u8::try_from(i % 251).unwrap();
        }
    }
    let mut client = S7Client::connect(&options(plc.addr)).await.unwrap();
    let before = *plc.requests.lock().unwrap();

    let bytes = client.read_db(5, 50, 500).await.unwrap();

    let expected: Vec<u8> = (50..550).map(|i| u8::try_from(i % 251).unwrap()).collect();
    assert_eq!(bytes, expected);
    // 240 - 18 = 222 bytes per request
    assert_eq!(*plc.requests.lock().unwrap() - before, 3);
}

#[tokio::test]
async fn test_large_write_is_split_by_pdu_size() {
    let plc = spawn_fake_plc(240, &[(2, 512)]).await;
    let mut client = S7Client::connect(&options(plc.addr)).await.unwrap();
    let before = *plc.requests.lock().unwrap();

    let payload = vec![0xAA; 300];
    client.write_db(2, 0, &payload).await.unwrap();

    // 240 - 35 = 205 bytes per request
    assert_eq!(*plc.requests.lock().unwrap() - before, 2);
    assert_eq!(plc.memory.lock().unwrap()[&2][..300], payload[..]);
}

#[tokio::test]
async fn test_missing_block_is_item_error() {
    let plc = spawn_fake_plc(480, &[(1, 8)]).await;
    let mut client = S7Client::connect(&options(plc.addr)).await.unwrap();

    let err = client.read_db(99, 0, 2).await.unwrap_err();
    assert!(matches!(err, Error::Item(ItemError::ObjectDoesNotExist)));
    assert!(!err.is_fatal());

    let err = client.read_db(1, 6, 4).await.unwrap_err();
    assert!(matches!(err, Error::Item(ItemError::AddressOutOfRange)));

    // Session is still usable after item errors
    assert_eq!(client.read_db(1, 0, 2).await.unwrap(), vec![0, 0]);
}

// ── Diagnostics ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_identity_reads_module_and_component_lists() {
    let plc = spawn_fake_plc(480, &[]).await;
    let mut client = S7Client::connect(&options(plc.addr)).await.unwrap();

    let identity = client.identity().await.unwrap();

    assert_eq!(identity.order_code.as_deref(), Some("6ES7 315-2EH14-0AB0"));
    assert_eq!(identity.module_type.as_deref(), Some("CPU 315-2 PN/DP"));
    assert_eq!(identity.serial_number.as_deref(), Some("S C-X4U421302009"));
    assert_eq!(identity.firmware.as_deref(), Some("V3.2.6"));
}

#[tokio::test]
async fn test_probe_succeeds_on_live_session() {
    let plc = spawn_fake_plc(480, &[]).await;
    let mut client = S7Client::connect(&options(plc.addr)).await.unwrap();
    client.probe().await.unwrap();
}
