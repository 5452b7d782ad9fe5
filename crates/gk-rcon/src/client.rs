use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::error::{RconError, Result};
use crate::packet::{random_packet_id, read_packet, write_packet, TYPE_AUTH, TYPE_EXEC};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A remote-console session. Owns at most one in-flight command; not
/// shared across tasks.
pub struct RconClient {
    host: String,
    port: u16,
    password: String,
    stream: TcpStream,
}

impl RconClient {
    pub async fn connect(host: &str, port: u16, password: &str) -> Result<Self> {
        let stream = dial_and_authenticate(host, port, password).await?;
        Ok(Self {
            host: host.to_string(),
            port,
            password: password.to_string(),
            stream,
        })
    }

    /// Execute a command, reconnecting and retrying exactly once on
    /// I/O failure. An authentication-failure echo is not an I/O
    /// error and is never retried.
    pub async fn send_command(&mut self, command: &str) -> Result<String> {
        match self.send_once(command).await {
            Ok(response) => return Ok(response),
            Err(RconError::AuthenticationFailed) => return Err(RconError::AuthenticationFailed),
            Err(e) => warn!(error = %e, "rcon command failed, attempting reconnect"),
        }

        for attempt in 1..=RECONNECT_ATTEMPTS {
            sleep(RECONNECT_DELAY).await;
            match dial_and_authenticate(&self.host, self.port, &self.password).await {
                Ok(stream) => {
                    self.stream = stream;
                    info!(attempt, "rcon reconnected");
                    return self
                        .send_once(command)
                        .await
                        .map_err(|_| RconError::RconUnavailable);
                }
                Err(e) => {
                    error!(attempt, error = %e, "rcon reconnect attempt failed");
                }
            }
        }

        Err(RconError::RconUnavailable)
    }

    /// Write one EXEC packet and read its response. A response whose
    /// `packetId` echoes back `-1` means the session's authentication
    /// was rejected server-side; the spec singles this out as the
    /// one case `packetId` exists to detect.
    async fn send_once(&mut self, command: &str) -> Result<String> {
        let packet_id = random_packet_id();
        write_packet(&mut self.stream, packet_id, TYPE_EXEC, command.as_bytes()).await?;
        let response = read_packet(&mut self.stream).await?;

        if response.packet_id == -1 {
            return Err(RconError::AuthenticationFailed);
        }

        let body = String::from_utf8_lossy(&response.body);
        Ok(body.trim_matches('\0').trim().to_string())
    }
}

async fn dial_and_authenticate(host: &str, port: u16, password: &str) -> Result<TcpStream> {
    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| RconError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "rcon dial timed out")))??;

    let packet_id = random_packet_id();
    write_packet(&mut stream, packet_id, TYPE_AUTH, password.as_bytes()).await?;
    let response = read_packet(&mut stream).await?;

    if response.packet_id == -1 {
        return Err(RconError::AuthenticationFailed);
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn authentication_failure_echo_fails_without_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let auth = read_packet(&mut stream).await.unwrap();
            assert_eq!(auth.packet_type, TYPE_AUTH);
            write_packet(&mut stream, 1, TYPE_AUTH, b"").await.unwrap();

            let _exec = read_packet(&mut stream).await.unwrap();
            write_packet(&mut stream, -1, TYPE_AUTH, b"").await.unwrap();
        });

        let mut client = RconClient::connect("127.0.0.1", addr.port(), "pw").await.unwrap();
        let result = client.send_command("status").await;
        assert!(matches!(result, Err(RconError::AuthenticationFailed)));

        server.await.unwrap();
    }
}
