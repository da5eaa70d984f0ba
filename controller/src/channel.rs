use admute_common::command::{ActuationCommand, LINE_DELIMITER, PROMPT_DELIMITER};
use admute_common::config::ChannelConfig;
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// How long the device must stay silent before a resync is considered done.
const RESYNC_QUIET: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("actuation device at {port} is unavailable: {reason}")]
    Unavailable { port: String, reason: String },
    #[error("actuation channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no prompt from actuation device within {0:?}")]
    Timeout(Duration),
    #[error("actuation channel is closed")]
    Closed,
}

/// Something that can carry actuation commands to the device.
///
/// `send` delivers one command and returns the device's reply text.
/// `close` releases the device and must be safe to call repeatedly.
#[async_trait]
pub trait Actuator: Send {
    async fn send(&mut self, command: &ActuationCommand) -> Result<String, ChannelError>;

    async fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Request/response line channel to the actuation device.
///
/// Requests are single lines terminated by `\r\n`; every reply (and the
/// banner printed on attach) ends with the `>:` prompt. The transport is
/// owned exclusively; dropping the channel drops the transport, so the port
/// is released on every exit path including unwinding.
pub struct ActuationChannel<T> {
    transport: Option<T>,
    buffer: BytesMut,
    prompt_timeout: Duration,
    name: String,
    /// Set when an exchange failed midway. The wire may hold half a request
    /// or a late reply, so the next send resyncs first.
    desynced: bool,
}

impl<T> ActuationChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Take ownership of an open transport and consume the device banner.
    pub async fn attach(
        transport: T,
        name: impl Into<String>,
        prompt_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let mut channel = Self {
            transport: Some(transport),
            buffer: BytesMut::with_capacity(4096),
            prompt_timeout,
            name: name.into(),
            desynced: false,
        };

        let banner = tokio::time::timeout(prompt_timeout, channel.read_until_prompt())
            .await
            .map_err(|_| ChannelError::Timeout(prompt_timeout))??;
        debug!(device = channel.name, banner, "discarded device banner");

        Ok(channel)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    async fn exchange(&mut self, line: &[u8]) -> Result<String, ChannelError> {
        let transport = self.transport.as_mut().ok_or(ChannelError::Closed)?;
        transport.write_all(line).await?;
        transport.flush().await?;
        self.read_until_prompt().await
    }

    /// Terminate any partial request line, then discard device output until
    /// the line has been quiet for `RESYNC_QUIET` or `prompt_timeout` runs out.
    async fn resync(&mut self) -> Result<(), ChannelError> {
        let quiet = RESYNC_QUIET.min(self.prompt_timeout);
        let deadline = tokio::time::Instant::now() + self.prompt_timeout;
        let transport = self.transport.as_mut().ok_or(ChannelError::Closed)?;
        transport.write_all(LINE_DELIMITER).await?;
        transport.flush().await?;

        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(quiet, transport.read_buf(&mut self.buffer)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    return Err(ChannelError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "device closed the connection",
                    )))
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        debug!(device = self.name, bytes = self.buffer.len(), "resynced with device");
        self.buffer.clear();
        self.desynced = false;
        Ok(())
    }

    /// Read until the next prompt delimiter and return the text before it,
    /// trimmed. Bytes after the delimiter stay buffered.
    async fn read_until_prompt(&mut self) -> Result<String, ChannelError> {
        loop {
            if let Some(pos) = find_subsequence(&self.buffer, PROMPT_DELIMITER) {
                let chunk = self.buffer.split_to(pos + PROMPT_DELIMITER.len());
                let text = String::from_utf8_lossy(&chunk[..pos]);
                return Ok(text.trim().to_string());
            }

            let transport = self.transport.as_mut().ok_or(ChannelError::Closed)?;
            let n = transport.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "device closed the connection",
                )));
            }
        }
    }
}

#[async_trait]
impl<T> Actuator for ActuationChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, command: &ActuationCommand) -> Result<String, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        if self.desynced {
            self.resync().await?;
        } else if !self.buffer.is_empty() {
            // Trailing bytes after the last prompt carry no reply.
            debug!(bytes = self.buffer.len(), "dropping stale device output");
            self.buffer.clear();
        }

        let line = command.encode();
        debug!(device = self.name, command = %command, "sending command");
        let result = tokio::time::timeout(self.prompt_timeout, self.exchange(&line))
            .await
            .map_err(|_| ChannelError::Timeout(self.prompt_timeout))
            .and_then(|reply| reply);
        if result.is_err() {
            self.desynced = true;
        }
        result
    }

    async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown().await {
                warn!(device = self.name, error = %e, "error while closing actuation channel");
            }
            info!(device = self.name, "actuation channel closed");
        }
        self.buffer.clear();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Open the serial port named in the config and attach to the device.
///
/// Any failure here, including a device that never prints its prompt, is
/// reported as `Unavailable` with the port name.
pub async fn connect_serial(
    config: &ChannelConfig,
) -> Result<ActuationChannel<SerialStream>, ChannelError> {
    info!(port = config.port, baud_rate = config.baud_rate, "opening actuation device");
    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .open_native_async()
        .map_err(|e| ChannelError::Unavailable {
            port: config.port.clone(),
            reason: e.to_string(),
        })?;

    attach_port(stream, &config.port, Duration::from_millis(config.prompt_timeout_ms)).await
}

/// Attach to an already opened transport, reporting failure as `Unavailable`.
async fn attach_port<T>(
    transport: T,
    port: &str,
    prompt_timeout: Duration,
) -> Result<ActuationChannel<T>, ChannelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let channel = ActuationChannel::attach(transport, port, prompt_timeout)
        .await
        .map_err(|e| ChannelError::Unavailable {
            port: port.to_string(),
            reason: e.to_string(),
        })?;

    info!(port, "actuation device attached");
    Ok(channel)
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    const BANNER: &[u8] = b"\r\nWelcome to Flipper Zero Command Line Interface!\r\n\r\n>: ";

    fn mute() -> ActuationCommand {
        ActuationCommand::Infrared {
            protocol: "NEC".into(),
            address: 0x04,
            command: 0x09,
        }
    }

    /// Read one request line from the device side of the pipe.
    async fn read_line(device: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while !line.ends_with(b"\r\n") {
            device.read_exact(&mut byte).await.unwrap();
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap()
    }

    async fn attached() -> (ActuationChannel<DuplexStream>, DuplexStream) {
        let (host, mut device) = duplex(1024);
        device.write_all(BANNER).await.unwrap();
        let channel = ActuationChannel::attach(host, "test", Duration::from_millis(500))
            .await
            .unwrap();
        (channel, device)
    }

    #[tokio::test]
    async fn attach_consumes_banner() {
        let (channel, _device) = attached().await;
        assert!(channel.is_open());
        // Only the space after the banner prompt may remain.
        assert!(channel.buffer.iter().all(|b| b.is_ascii_whitespace()));
    }

    #[tokio::test]
    async fn attach_times_out_without_prompt() {
        let (host, mut device) = duplex(1024);
        device.write_all(b"booting...").await.unwrap();
        let result = ActuationChannel::attach(host, "test", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ChannelError::Timeout(_))));
    }

    #[tokio::test]
    async fn send_writes_line_and_reads_reply() {
        let (mut channel, mut device) = attached().await;

        let device_task = tokio::spawn(async move {
            let line = read_line(&mut device).await;
            device.write_all(b"ir tx NEC 04 09\r\n\r\n>: ").await.unwrap();
            (line, device)
        });

        let reply = channel.send(&mute()).await.unwrap();
        let (line, _device) = device_task.await.unwrap();
        assert_eq!(line, "ir tx NEC 04 09\r\n");
        assert_eq!(reply, "ir tx NEC 04 09");
    }

    #[tokio::test]
    async fn reply_split_across_reads() {
        let (mut channel, mut device) = attached().await;

        let device_task = tokio::spawn(async move {
            read_line(&mut device).await;
            device.write_all(b"done").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            device.write_all(b"\r\n>").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            device.write_all(b":").await.unwrap();
            device
        });

        let reply = channel
            .send(&ActuationCommand::Vibro { pattern: "1".into() })
            .await
            .unwrap();
        let _device = device_task.await.unwrap();
        assert_eq!(reply, "done");
    }

    #[tokio::test]
    async fn send_times_out_when_device_is_silent() {
        let (mut channel, _device) = attached().await;
        channel.prompt_timeout = Duration::from_millis(50);
        let result = channel.send(&mute()).await;
        assert!(matches!(result, Err(ChannelError::Timeout(_))));
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_as_the_next_ack() {
        let (mut channel, mut device) = attached().await;
        channel.prompt_timeout = Duration::from_millis(100);

        assert!(matches!(channel.send(&mute()).await, Err(ChannelError::Timeout(_))));
        device.write_all(b"late reply for first\r\n>: ").await.unwrap();

        // The device never answers the second command.
        let result = channel.send(&mute()).await;
        assert!(matches!(result, Err(ChannelError::Timeout(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn resync_recovers_after_timeout() {
        let (mut channel, mut device) = attached().await;
        channel.prompt_timeout = Duration::from_millis(100);

        assert!(matches!(channel.send(&mute()).await, Err(ChannelError::Timeout(_))));
        device.write_all(b"late reply for first\r\n>: ").await.unwrap();

        let device_task = tokio::spawn(async move {
            let first = read_line(&mut device).await;
            let blank = read_line(&mut device).await;
            device.write_all(b"\r\n>: ").await.unwrap();
            let second = read_line(&mut device).await;
            device.write_all(b"second ok\r\n>: ").await.unwrap();
            (first, blank, second, device)
        });

        let reply = channel
            .send(&ActuationCommand::Vibro { pattern: "1".into() })
            .await
            .unwrap();
        let (first, blank, second, _device) = device_task.await.unwrap();
        assert_eq!(first, "ir tx NEC 04 09\r\n");
        assert_eq!(blank, "\r\n");
        assert_eq!(second, "vibro 1\r\n");
        assert_eq!(reply, "second ok");
        assert!(!channel.desynced);
    }

    #[tokio::test]
    async fn connect_reports_missing_port_as_unavailable() {
        let config = ChannelConfig {
            port: "/dev/does-not-exist".into(),
            baud_rate: 115_200,
            prompt_timeout_ms: 100,
            mute: mute(),
            unmute: mute(),
        };
        match connect_serial(&config).await {
            Err(ChannelError::Unavailable { port, .. }) => assert_eq!(port, "/dev/does-not-exist"),
            Err(e) => panic!("expected Unavailable, got {e}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }

    #[tokio::test]
    async fn banner_timeout_at_connect_is_unavailable() {
        let (host, _device) = duplex(1024);
        match attach_port(host, "/dev/ttyACM0", Duration::from_millis(50)).await {
            Err(ChannelError::Unavailable { port, reason }) => {
                assert_eq!(port, "/dev/ttyACM0");
                assert!(reason.contains("no prompt"), "reason: {reason}");
            }
            Err(e) => panic!("expected Unavailable, got {e}"),
            Ok(_) => panic!("attached without a banner"),
        }
    }

    #[tokio::test]
    async fn send_fails_when_device_hangs_up() {
        let (mut channel, device) = attached().await;
        drop(device);
        let result = channel.send(&mute()).await;
        assert!(matches!(result, Err(ChannelError::Io(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut channel, _device) = attached().await;
        channel.close().await;
        assert!(!channel.is_open());
        channel.close().await;
        assert!(matches!(channel.send(&mute()).await, Err(ChannelError::Closed)));
    }

    #[test]
    fn finds_prompt() {
        assert_eq!(find_subsequence(b"abc>: ", PROMPT_DELIMITER), Some(3));
        assert_eq!(find_subsequence(b"abc>", PROMPT_DELIMITER), None);
    }
}
