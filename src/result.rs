//! Rows, metadata, and terminal status for a single [`Request`].
//!
//! A `ResultStream` owns the receiving half of the channel a
//! [`Session`](crate::session::Session) registered as packet owner when it
//! submitted the Request, plus the pipeline guard that keeps the next
//! submission on the same Session blocked until this one's terminal frame
//! is consumed. Buffered mode drains everything up front; streaming mode
//! pulls frames lazily and relies on the caller calling [`token_offer`]
//! to widen the server's row-chunk window.
//!
//! [`token_offer`]: ResultStream::token_offer

use std::collections::VecDeque;
use std::sync::Arc;

use prost::Message as _;
use tokio::sync::{OwnedMutexGuard, mpsc};

use crate::codec::MessageTag;
use crate::codec::message::{ColumnDesc, ColumnMetadata, Envelope, Notice, Row, Terminal, TerminalStatus};
use crate::error::{DriverError, Result};
use crate::session::{Request, Session};
use crate::transport::route::Delivery;

/// Outcome carried by the terminal frame, once observed.
#[derive(Debug, Clone)]
struct TerminalOutcome {
    status: TerminalStatus,
    affected_rows: u64,
    last_insert_id: u64,
    sql_state: String,
    code: i32,
    message: String,
}

impl TerminalOutcome {
    fn is_error(&self) -> bool {
        self.status == TerminalStatus::Error
    }
}

enum StreamEvent {
    Columns,
    Row,
    Notice,
    Terminal,
}

/// Rows, metadata, and terminal status for one Request.
pub struct ResultStream {
    session: Arc<Session>,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
    streaming: bool,
    request: Request,
    guard: Option<OwnedMutexGuard<()>>,

    columns: Option<ColumnMetadata>,
    buffered_rows: VecDeque<Vec<Vec<u8>>>,
    warnings: Vec<String>,
    terminal: Option<TerminalOutcome>,
}

impl ResultStream {
    pub(crate) fn new(
        session: Arc<Session>,
        rx: mpsc::UnboundedReceiver<Delivery>,
        streaming: bool,
        _token_window: u32,
        request: Request,
        guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            session,
            rx: Some(rx),
            streaming,
            request,
            guard: Some(guard),
            columns: None,
            buffered_rows: VecDeque::new(),
            warnings: Vec::new(),
            terminal: None,
        }
    }

    /// Drain the whole result up front, the way buffered (non-streaming)
    /// mode hands back a materialized row set.
    pub(crate) async fn materialize(&mut self) -> Result<()> {
        while self.terminal.is_none() {
            self.advance().await?;
        }
        Ok(())
    }

    /// Column descriptors for this result, if any were sent (a pure
    /// `execUpdate` with no `RETURNING` clause may have none).
    pub async fn column_metadata(&mut self) -> Result<&[ColumnDesc]> {
        while self.columns.is_none() && self.terminal.is_none() {
            self.advance().await?;
        }
        Ok(self.columns.as_ref().map(|m| m.columns.as_slice()).unwrap_or(&[]))
    }

    /// Pull the next row, or `None` once the terminal frame has arrived.
    /// In streaming mode this blocks until the server produces a row or
    /// the token window runs out and the caller has not yet offered more.
    pub async fn next_row(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        if let Some(row) = self.buffered_rows.pop_front() {
            return Ok(Some(row));
        }
        loop {
            if let Some(terminal) = &self.terminal {
                return if terminal.is_error() {
                    Err(self.terminal_error())
                } else {
                    Ok(None)
                };
            }
            match self.advance().await? {
                StreamEvent::Row => {
                    if let Some(row) = self.buffered_rows.pop_front() {
                        return Ok(Some(row));
                    }
                }
                StreamEvent::Terminal => continue,
                StreamEvent::Columns | StreamEvent::Notice => continue,
            }
        }
    }

    /// Grant the server `count` more row chunks on this stream. Only
    /// meaningful in streaming mode; a no-op otherwise.
    pub async fn token_offer(&self, count: u32) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.session.send_fetch_more(count).await
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn affected_rows(&self) -> u64 {
        self.terminal.as_ref().map(|t| t.affected_rows).unwrap_or(0)
    }

    pub fn last_insert_id(&self) -> u64 {
        self.terminal.as_ref().map(|t| t.last_insert_id).unwrap_or(0)
    }

    /// `true` once the terminal frame has arrived with no open transaction
    /// left dangling — the predicate the Pool's release protocol checks.
    pub fn is_good_and_done(&self) -> bool {
        match &self.terminal {
            Some(t) => !t.is_error(),
            None => false,
        }
    }

    pub fn last_exception(&self) -> Option<DriverError> {
        self.terminal.as_ref().filter(|t| t.is_error()).map(|_| self.terminal_error())
    }

    fn terminal_error(&self) -> DriverError {
        let t = self.terminal.as_ref().expect("terminal_error called before terminal frame");
        DriverError::Session {
            sql_state: t.sql_state.clone(),
            code: t.code,
            message: t.message.clone(),
        }
    }

    async fn advance(&mut self) -> Result<StreamEvent> {
        let rx = self
            .rx
            .as_mut()
            .expect("advance called after the channel was taken by Drop");
        loop {
            let delivery = rx
                .recv()
                .await
                .ok_or_else(|| DriverError::Transport("result stream channel closed".into()))?;

            match delivery {
                Delivery::TransportFailed(reason) => {
                    self.finish(TerminalOutcome {
                        status: TerminalStatus::Error,
                        affected_rows: 0,
                        last_insert_id: 0,
                        sql_state: "08000".to_string(),
                        code: -1,
                        message: reason,
                    });
                    return Ok(StreamEvent::Terminal);
                }
                Delivery::Frame(frame) => match frame.tag {
                    MessageTag::ColumnMetadata => {
                        let env = Envelope::decode(frame.payload.clone()).map_err(|e| DriverError::Frame(e.into()))?;
                        self.columns = Some(ColumnMetadata::decode(env.body).map_err(|e| DriverError::Frame(e.into()))?);
                        return Ok(StreamEvent::Columns);
                    }
                    MessageTag::Row => {
                        let env = Envelope::decode(frame.payload.clone()).map_err(|e| DriverError::Frame(e.into()))?;
                        let row = Row::decode(env.body).map_err(|e| DriverError::Frame(e.into()))?;
                        self.buffered_rows.push_back(row.values.into_iter().map(|b| b.to_vec()).collect());
                        return Ok(StreamEvent::Row);
                    }
                    MessageTag::Notice => {
                        let env = Envelope::decode(frame.payload.clone()).map_err(|e| DriverError::Frame(e.into()))?;
                        let notice = Notice::decode(env.body).map_err(|e| DriverError::Frame(e.into()))?;
                        self.warnings.push(notice.message);
                        return Ok(StreamEvent::Notice);
                    }
                    MessageTag::Terminal => {
                        let env = Envelope::decode(frame.payload.clone()).map_err(|e| DriverError::Frame(e.into()))?;
                        let term = Terminal::decode(env.body).map_err(|e| DriverError::Frame(e.into()))?;
                        let status = TerminalStatus::try_from(term.status).unwrap_or(TerminalStatus::Error);
                        self.finish(TerminalOutcome {
                            status,
                            affected_rows: term.affected_rows,
                            last_insert_id: term.last_insert_id,
                            sql_state: term.sql_state,
                            code: term.code,
                            message: term.message,
                        });
                        return Ok(StreamEvent::Terminal);
                    }
                    other => {
                        tracing::debug!(tag = ?other, "unexpected frame while draining a result, ignored");
                        continue;
                    }
                },
            }
        }
    }

    fn finish(&mut self, outcome: TerminalOutcome) {
        self.request.is_good_and_done = !outcome.is_error();
        self.terminal = Some(outcome);
        if let Some(err) = self.last_exception() {
            self.session.record_last_exception(&err);
        }
        self.session.record_request_outcome(self.request.clone());
        self.session.clear_route_owner();
        self.guard.take();
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        if self.terminal.is_some() {
            return;
        }
        let Some(rx) = self.rx.take() else { return };
        let Some(guard) = self.guard.take() else { return };
        let session = self.session.clone();
        let request = self.request.clone();
        tokio::spawn(async move {
            crate::session::drain_abandoned_stream(rx).await;
            session.clear_route_owner();
            session.record_request_outcome(request);
            drop(guard);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_terminal_is_not_good_and_done() {
        let outcome = TerminalOutcome {
            status: TerminalStatus::Error,
            affected_rows: 0,
            last_insert_id: 0,
            sql_state: "HY000".into(),
            code: 1,
            message: "boom".into(),
        };
        assert!(outcome.is_error());
    }
}
