// Per-connection relay. Each session runs two workers, one per direction,
// that frame complete top-level elements, log and optionally script them,
// and forward the original bytes untouched. Decoding failures never stall
// the relay.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use bytes::BytesMut;
use chrono::Local;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::asn1::{measure_element, BerError};
use crate::message::{hex_dump, LdapMessage};
use crate::script::ScriptSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromClient,
    FromServer,
}

impl Direction {
    fn source(self) -> &'static str {
        match self {
            Direction::FromClient => "the client",
            Direction::FromServer => "the server",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Direction::FromClient => "Client",
            Direction::FromServer => "Server",
        }
    }
}

/// Serialized writer for the decode log. Every entry is written whole under
/// the lock so entries from the two workers never interleave.
pub struct LogSink {
    writer: Mutex<Box<dyn Write + Send>>,
    raw_bytes: bool,
}

impl LogSink {
    pub fn new(writer: Box<dyn Write + Send>, raw_bytes: bool) -> LogSink {
        LogSink {
            writer: Mutex::new(writer),
            raw_bytes,
        }
    }

    fn timestamp() -> String {
        Local::now().format("[%d/%b/%Y:%H:%M:%S%.3f %z]").to_string()
    }

    /// Log one framed element and the outcome of decoding it.
    pub fn log_data(
        &self,
        direction: Direction,
        bytes: &[u8],
        decoded: &Result<LdapMessage, BerError>,
    ) -> anyhow::Result<()> {
        let mut entry = format!(
            "{} -- Read data from {}\n",
            Self::timestamp(),
            direction.source()
        );
        if self.raw_bytes {
            entry.push_str(&format!("Raw Data from {}:\n", direction.title()));
            entry.push_str(&hex_dump(bytes, 4));
        }
        match decoded {
            Ok(message) => {
                entry.push_str(&format!("Decoded Data from {}:\n", direction.title()));
                entry.push_str(&message.to_text(4));
            }
            Err(error) => {
                entry.push_str(&format!(
                    "Unable to Decode Data from {}:  {}\n",
                    direction.title(),
                    error
                ));
                if !self.raw_bytes {
                    entry.push_str(&hex_dump(bytes, 4));
                }
            }
        }
        entry.push_str("\n\n");
        self.write_entry(&entry)
    }

    /// Log a session-level note, such as a read failure.
    pub fn log_note(&self, direction: Direction, note: &str) -> anyhow::Result<()> {
        let entry = format!(
            "{} -- {} from {}\n\n\n",
            Self::timestamp(),
            note,
            direction.source()
        );
        self.write_entry(&entry)
    }

    fn write_entry(&self, entry: &str) -> anyhow::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("log writer lock poisoned"))?;
        writer
            .write_all(entry.as_bytes())
            .and_then(|_| writer.flush())
            .context("failed to write to decode log")
    }
}

/// Read one complete top-level element into an owned frame. Returns `None`
/// on a clean EOF at an element boundary.
async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> anyhow::Result<Option<BytesMut>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(len) = measure_element(buf)? {
            return Ok(Some(buf.split_to(len)));
        }
        let read = reader.read_buf(buf).await.context("read failed")?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            anyhow::bail!("connection closed mid-element with {} bytes pending", buf.len());
        }
    }
}

/// Relay one direction until EOF or an unrecoverable error. A single read
/// failure gets one retry before the worker gives up.
pub async fn relay<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    log: Arc<LogSink>,
    script: Option<Arc<ScriptSink>>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8192);
    let mut failed_last_time = false;
    loop {
        let frame = match read_frame(&mut reader, &mut buf).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(error) => {
                if !failed_last_time {
                    failed_last_time = true;
                    continue;
                }
                log.log_note(direction, "Error reading data")?;
                return Err(error);
            }
        };
        failed_last_time = false;

        let decoded = LdapMessage::decode_bytes(&frame);
        log.log_data(direction, &frame, &decoded)?;
        if let Ok(message) = &decoded {
            debug!("decoded an {} message", message.protocol_op.kind_name());
            if let Some(script) = &script {
                script.record(message)?;
            }
        }

        writer.write_all(&frame).await.context("write failed")?;
        writer.flush().await.context("flush failed")?;
    }
}

/// Drive both directions of a session. When either side finishes, the other
/// worker is dropped and both sockets close on return.
pub async fn run_session<C, S>(
    client: C,
    server: S,
    log: Arc<LogSink>,
    script: Option<Arc<ScriptSink>>,
) -> anyhow::Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);

    tokio::select! {
        result = relay(
            client_read,
            server_write,
            Direction::FromClient,
            Arc::clone(&log),
            script.clone(),
        ) => result,
        result = relay(
            server_read,
            client_write,
            Direction::FromServer,
            log,
            script,
        ) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{DeleteRequest, ProtocolOp};

    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::ReadBuf;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::io::Write::write(&mut *self.0.lock().unwrap(), buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Reader that fails the first `failures_left` reads, then delegates.
    struct FlakyReader<R> {
        inner: R,
        failures_left: usize,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for FlakyReader<R> {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            if this.failures_left > 0 {
                this.failures_left -= 1;
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            Pin::new(&mut this.inner).poll_read(cx, buf)
        }
    }

    fn delete_message() -> LdapMessage {
        LdapMessage::new(
            4,
            ProtocolOp::DeleteRequest(DeleteRequest {
                dn: "uid=gone,dc=example,dc=com".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn test_relay_forwards_decodable_message() {
        let message = delete_message();
        let bytes = message.encode();

        let (mut near, far) = tokio::io::duplex(1024);
        let (mut out_read, out_write) = tokio::io::duplex(1024);
        near.write_all(&bytes).await.unwrap();
        drop(near);

        let log_buf = SharedBuf::default();
        let log = Arc::new(LogSink::new(Box::new(log_buf.clone()), false));
        let (far_read, _far_write) = tokio::io::split(far);
        let (_unused, out_write_half) = tokio::io::split(out_write);
        relay(far_read, out_write_half, Direction::FromClient, log, None)
            .await
            .unwrap();

        let mut forwarded = vec![0u8; bytes.len()];
        out_read.read_exact(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, bytes);

        let logged = log_buf.contents();
        assert!(logged.contains("-- Read data from the client\n"));
        assert!(logged.contains("Decoded Data from Client:\n"));
        assert!(logged.contains("LDAP Delete Request"));
        assert!(logged.ends_with("\n\n\n"));
    }

    #[tokio::test]
    async fn test_relay_forwards_undecodable_bytes_verbatim() {
        // valid element framing but not a valid LDAP message
        let bytes = vec![0x30, 0x03, 0x02, 0x01, 0x01];

        let (mut near, far) = tokio::io::duplex(1024);
        let (mut out_read, out_write) = tokio::io::duplex(1024);
        near.write_all(&bytes).await.unwrap();
        drop(near);

        let log_buf = SharedBuf::default();
        let log = Arc::new(LogSink::new(Box::new(log_buf.clone()), false));
        let (far_read, _far_write) = tokio::io::split(far);
        let (_unused, out_write_half) = tokio::io::split(out_write);
        relay(far_read, out_write_half, Direction::FromServer, log, None)
            .await
            .unwrap();

        let mut forwarded = vec![0u8; bytes.len()];
        out_read.read_exact(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, bytes);

        let logged = log_buf.contents();
        assert!(logged.contains("Unable to Decode Data from Server:"));
        // the undecodable bytes are dumped even without --raw-bytes
        assert!(logged.contains("30 03 02 01 01"));
    }

    #[tokio::test]
    async fn test_relay_raw_bytes_dump() {
        let bytes = delete_message().encode();

        let (mut near, far) = tokio::io::duplex(1024);
        let (_out_read, out_write) = tokio::io::duplex(1024);
        near.write_all(&bytes).await.unwrap();
        drop(near);

        let log_buf = SharedBuf::default();
        let log = Arc::new(LogSink::new(Box::new(log_buf.clone()), true));
        let (far_read, _far_write) = tokio::io::split(far);
        let (_unused, out_write_half) = tokio::io::split(out_write);
        relay(far_read, out_write_half, Direction::FromClient, log, None)
            .await
            .unwrap();

        let logged = log_buf.contents();
        assert!(logged.contains("Raw Data from Client:\n"));
        assert!(logged.contains("Decoded Data from Client:\n"));
    }

    #[tokio::test]
    async fn test_relay_scripts_client_requests() {
        let bytes = delete_message().encode();

        let (mut near, far) = tokio::io::duplex(1024);
        let (_out_read, out_write) = tokio::io::duplex(1024);
        near.write_all(&bytes).await.unwrap();
        drop(near);

        let log = Arc::new(LogSink::new(Box::new(SharedBuf::default()), false));
        let script_buf = SharedBuf::default();
        let script = Arc::new(ScriptSink::new(Box::new(script_buf.clone())));
        let (far_read, _far_write) = tokio::io::split(far);
        let (_unused, out_write_half) = tokio::io::split(out_write);
        relay(
            far_read,
            out_write_half,
            Direction::FromClient,
            log,
            Some(script),
        )
        .await
        .unwrap();

        let scripted = script_buf.contents();
        assert!(scripted.contains("#### Delete request captured at"));
        assert!(scripted.contains("resultCode = conn.delete(\"uid=gone,dc=example,dc=com\");"));
    }

    #[tokio::test]
    async fn test_relay_retries_single_read_error() {
        let message = delete_message();
        let bytes = message.encode();

        let (mut near, far) = tokio::io::duplex(1024);
        let (mut out_read, out_write) = tokio::io::duplex(1024);
        near.write_all(&bytes).await.unwrap();
        drop(near);

        let log_buf = SharedBuf::default();
        let log = Arc::new(LogSink::new(Box::new(log_buf.clone()), false));
        let (far_read, _far_write) = tokio::io::split(far);
        let reader = FlakyReader {
            inner: far_read,
            failures_left: 1,
        };
        let (_unused, out_write_half) = tokio::io::split(out_write);
        relay(reader, out_write_half, Direction::FromClient, log, None)
            .await
            .unwrap();

        // the element after the failed read is still decoded and forwarded
        let mut forwarded = vec![0u8; bytes.len()];
        out_read.read_exact(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, bytes);

        let logged = log_buf.contents();
        assert!(logged.contains("Decoded Data from Client:\n"));
        assert!(!logged.contains("Error reading data"));
    }

    #[tokio::test]
    async fn test_relay_gives_up_after_consecutive_read_errors() {
        let (_near, far) = tokio::io::duplex(1024);
        let (_out_read, out_write) = tokio::io::duplex(1024);

        let log_buf = SharedBuf::default();
        let log = Arc::new(LogSink::new(Box::new(log_buf.clone()), false));
        let (far_read, _far_write) = tokio::io::split(far);
        let reader = FlakyReader {
            inner: far_read,
            failures_left: 2,
        };
        let (_unused, out_write_half) = tokio::io::split(out_write);
        let result = relay(reader, out_write_half, Direction::FromClient, log, None).await;
        assert!(result.is_err());
        assert!(log_buf.contents().contains("Error reading data"));
    }

    #[tokio::test]
    async fn test_relay_rejects_truncated_element() {
        // length claims 10 bytes but the stream ends after 2
        let bytes = vec![0x30, 0x0A, 0x02, 0x01];

        let (mut near, far) = tokio::io::duplex(1024);
        let (_out_read, out_write) = tokio::io::duplex(1024);
        near.write_all(&bytes).await.unwrap();
        drop(near);

        let log = Arc::new(LogSink::new(Box::new(SharedBuf::default()), false));
        let (far_read, _far_write) = tokio::io::split(far);
        let (_unused, out_write_half) = tokio::io::split(out_write);
        let result = relay(far_read, out_write_half, Direction::FromClient, log, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_session_relays_both_directions() {
        let request = delete_message().encode();
        let response = LdapMessage::new(
            4,
            ProtocolOp::DeleteResponse(crate::ops::LdapResult::default()),
        )
        .encode();

        let (mut client_near, client_far) = tokio::io::duplex(1024);
        let (mut server_near, server_far) = tokio::io::duplex(1024);

        client_near.write_all(&request).await.unwrap();
        server_near.write_all(&response).await.unwrap();

        let log = Arc::new(LogSink::new(Box::new(SharedBuf::default()), false));
        let session = tokio::spawn(run_session(client_far, server_far, log, None));

        let mut forwarded_request = vec![0u8; request.len()];
        server_near.read_exact(&mut forwarded_request).await.unwrap();
        assert_eq!(forwarded_request, request);

        let mut forwarded_response = vec![0u8; response.len()];
        client_near.read_exact(&mut forwarded_response).await.unwrap();
        assert_eq!(forwarded_response, response);

        drop(client_near);
        session.await.unwrap().unwrap();
    }
}
