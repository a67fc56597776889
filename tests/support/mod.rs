//! A minimal fake storage node for integration tests.
//!
//! Speaks just enough of the wire protocol to exercise the driver's
//! Transport/Session/Pool stack end to end over a real loopback TCP
//! socket: session open/ack, a handful of canned `ExecSql` behaviors
//! keyed off the SQL text, and token-gated row streaming.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prost::Message as _;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;

use xrpc::codec::message::{
    ColumnDesc, ColumnMetadata, Envelope, ExecSql, Row, SessionOpenAck, Terminal, TerminalStatus,
};
use xrpc::codec::{self, MessageTag};
use xrpc::pool::{Pool, PoolConfig, Target};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Start the fake server on an ephemeral loopback port and return its
/// address. The accept loop runs for the lifetime of the test process.
pub async fn spawn_fake_server() -> SocketAddr {
    let (addr, _recorder) = spawn_fake_server_with_recorder().await;
    addr
}

/// Same fake server, but every `ExecSql` body it receives is appended to
/// the returned recorder first, so a test can inspect exactly what the
/// driver sent on the wire (how many exec messages, what side-channel
/// metadata rode along) instead of only what came back.
pub async fn spawn_fake_server_with_recorder() -> (SocketAddr, Arc<AsyncMutex<Vec<ExecSql>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorder = Arc::new(AsyncMutex::new(Vec::new()));
    tokio::spawn(accept_loop(listener, recorder.clone()));
    (addr, recorder)
}

async fn accept_loop(listener: TcpListener, recorder: Arc<AsyncMutex<Vec<ExecSql>>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else { return };
        stream.set_nodelay(true).ok();
        tokio::spawn(serve_connection(stream, recorder.clone()));
    }
}

#[derive(Default)]
struct StreamState {
    rows_remaining: u32,
    columns_sent: bool,
}

async fn serve_connection(stream: TcpStream, recorder: Arc<AsyncMutex<Vec<ExecSql>>>) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let mut streams: HashMap<u64, StreamState> = HashMap::new();

    loop {
        let frame = match codec::read_frame(&mut read_half).await {
            Ok(Some(frame)) => frame,
            _ => return,
        };

        let Ok(env) = Envelope::decode(frame.payload.clone()) else { continue };

        match frame.tag {
            MessageTag::SessionOpen => {
                let ack = SessionOpenAck {
                    session_id: env.session_id,
                    connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
                };
                send(&mut write_half, MessageTag::SessionOpenAck, env.session_id, &ack).await;
            }
            MessageTag::ExecSql => {
                let Ok(body) = ExecSql::decode(env.body.clone()) else { continue };
                recorder.lock().await.push(body.clone());
                handle_exec_sql(&mut write_half, env.session_id, &body, &mut streams).await;
            }
            MessageTag::FetchMore => {
                let Ok(fetch) = xrpc::codec::message::FetchMore::decode(env.body.clone()) else { continue };
                send_rows(&mut write_half, env.session_id, fetch.token_count, &mut streams).await;
            }
            MessageTag::Cancel => {
                let terminal = Terminal {
                    status: TerminalStatus::Error as i32,
                    affected_rows: 0,
                    last_insert_id: 0,
                    sql_state: "70100".to_string(),
                    code: -1,
                    message: "query cancelled".to_string(),
                };
                send(&mut write_half, MessageTag::Terminal, env.session_id, &terminal).await;
            }
            MessageTag::SessionClose | MessageTag::SessionReset => {
                streams.remove(&env.session_id);
            }
            _ => {}
        }
    }
}

async fn handle_exec_sql<W: AsyncWrite + Unpin>(
    writer: &mut W,
    session_id: u64,
    body: &ExecSql,
    streams: &mut HashMap<u64, StreamState>,
) {
    let sql = body.sql.trim();

    if sql.eq_ignore_ascii_case("SELECT 1") {
        send(
            writer,
            MessageTag::ColumnMetadata,
            session_id,
            &ColumnMetadata {
                columns: vec![ColumnDesc { name: "1".into(), type_code: 1 }],
                compact: false,
            },
        )
        .await;
        send(writer, MessageTag::Row, session_id, &Row { values: vec![b"1".to_vec().into()] }).await;
        send(writer, MessageTag::Terminal, session_id, &ok_terminal(0)).await;
        return;
    }

    if sql.starts_with("INSERT") || sql.starts_with("UPDATE") {
        send(writer, MessageTag::Terminal, session_id, &ok_terminal(1)).await;
        return;
    }

    if sql.eq_ignore_ascii_case("BLOCK UNTIL CANCELLED") {
        // No reply until a Cancel frame for this session arrives.
        return;
    }

    if sql.contains("FROM big") {
        streams.insert(session_id, StreamState { rows_remaining: 5, columns_sent: false });
        send(
            writer,
            MessageTag::ColumnMetadata,
            session_id,
            &ColumnMetadata {
                columns: vec![ColumnDesc { name: "n".into(), type_code: 1 }],
                compact: false,
            },
        )
        .await;
        if let Some(state) = streams.get_mut(&session_id) {
            state.columns_sent = true;
        }
        let window = if body.token_window == 0 { u32::MAX } else { body.token_window };
        send_rows(writer, session_id, window, streams).await;
        return;
    }

    // Admin/`SET`/`USE`/`COMMIT`/`ROLLBACK` and anything else: ack with
    // an empty OK terminal, as the server does for ignorable requests.
    send(writer, MessageTag::Terminal, session_id, &ok_terminal(0)).await;
}

async fn send_rows<W: AsyncWrite + Unpin>(
    writer: &mut W,
    session_id: u64,
    count: u32,
    streams: &mut HashMap<u64, StreamState>,
) {
    let Some(state) = streams.get_mut(&session_id) else { return };
    let to_send = count.min(state.rows_remaining);
    let total = 5u32;
    let already_sent = total - state.rows_remaining;
    for i in 0..to_send {
        let value = (already_sent + i + 1).to_string();
        send(writer, MessageTag::Row, session_id, &Row { values: vec![value.into_bytes().into()] }).await;
    }
    state.rows_remaining -= to_send;
    if state.rows_remaining == 0 {
        let mut terminal = ok_terminal(0);
        terminal.status = TerminalStatus::Eof as i32;
        send(writer, MessageTag::Terminal, session_id, &terminal).await;
        streams.remove(&session_id);
    }
}

fn ok_terminal(affected_rows: u64) -> Terminal {
    Terminal {
        status: TerminalStatus::Ok as i32,
        affected_rows,
        last_insert_id: 0,
        sql_state: "00000".to_string(),
        code: 0,
        message: String::new(),
    }
}

async fn send<W: AsyncWrite + Unpin, M: prost::Message>(writer: &mut W, tag: MessageTag, session_id: u64, body: &M) {
    let envelope = Envelope { session_id, body: body.encode_to_vec().into() };
    let payload = envelope.encode_to_vec();
    if codec::write_frame(writer, tag, &payload).await.is_err() {
        return;
    }
    let _ = writer.flush().await;
}

pub fn target(addr: SocketAddr) -> Target {
    Target::new(addr, "tester", "secret", "test_schema")
}

pub fn pool_with(config: PoolConfig) -> std::sync::Arc<Pool> {
    Pool::new(config)
}
