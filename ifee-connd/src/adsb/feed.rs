//! Producer side of the surveillance queue: a TCP client for receivers that
//! emit raw AVR lines (`*8D4840D6202CC371C32CE0576098;`).
use super::RawMessage;
use crate::utils::sleep_or_cancel;
use chrono::Utc;
use color_eyre::Result;
use flume::Sender;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extended squitter payload, 14 bytes.
const PAYLOAD_HEX_LEN: usize = 28;

/// Extracts the payload of a raw AVR line. Short (56 bit) frames and anything
/// malformed yield `None`.
pub fn parse_avr(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix('*')?.strip_suffix(';')?;

    (payload.len() == PAYLOAD_HEX_LEN && payload.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| payload.to_ascii_uppercase())
}

/// Pushes every frame received from `addr` onto `queue`, reconnecting after
/// `reconnect` whenever the receiver goes away. Returns when cancelled or
/// when the consumer is gone.
pub async fn run(
    addr: String,
    queue: Sender<RawMessage>,
    reconnect: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    while !cancel.is_cancelled() {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            res = TcpStream::connect(&addr) => res,
        };

        match stream {
            Ok(stream) => {
                info!("connected to surveillance receiver {addr}");
                let mut reader = BufReader::new(stream);
                let mut buf = Vec::new();

                loop {
                    buf.clear();
                    let read = tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        read = reader.read_until(b'\n', &mut buf) => read,
                    };

                    match read {
                        Ok(0) => {
                            warn!("surveillance receiver {addr} closed the connection");
                            break;
                        }
                        Ok(_) => {
                            let Ok(line) = std::str::from_utf8(&buf) else {
                                debug!("skipping non utf-8 line from {addr}");
                                continue;
                            };
                            let Some(payload) = parse_avr(line) else {
                                continue;
                            };

                            let msg = RawMessage::new(payload, Utc::now().timestamp());
                            if queue.send(msg).is_err() {
                                info!("surveillance queue closed, stopping feed");
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            warn!("failed reading from surveillance receiver {addr}: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("failed to connect to surveillance receiver {addr}: {e}"),
        }

        sleep_or_cancel(&cancel, reconnect).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{io::AsyncWriteExt, net::TcpListener};

    #[test]
    fn it_parses_extended_squitter_lines() {
        assert_eq!(
            parse_avr("*8d40621d58c382d690c8ac2863a7;\r"),
            Some("8D40621D58C382D690C8AC2863A7".to_string())
        );
    }

    #[test]
    fn it_skips_short_and_malformed_lines() {
        assert_eq!(parse_avr("*5D4840D6E7F1B0;"), None);
        assert_eq!(parse_avr("8D40621D58C382D690C8AC2863A7"), None);
        assert_eq!(parse_avr("*8D40621D58C382D690C8AC2863AZ;"), None);
        assert_eq!(parse_avr(""), None);
    }

    #[tokio::test]
    async fn it_forwards_frames_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = flume::unbounded();
        let cancel = CancellationToken::new();

        let feed = tokio::spawn(run(addr, tx, Duration::from_millis(10), cancel.clone()));

        for payload in ["8D40621D58C382D690C8AC2863A7", "8D40621D58C386435CC412692AD6"] {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(format!("*5D4840D6E7F1B0;\n*{payload};\n").as_bytes())
                .await
                .unwrap();
            sock.shutdown().await.unwrap();

            let msg = rx.recv_async().await.unwrap();
            assert_eq!(msg.payload, payload);
        }

        cancel.cancel();
        feed.await.unwrap().unwrap();
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn it_skips_non_utf8_lines_without_dropping_the_session() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = flume::unbounded();
        let cancel = CancellationToken::new();
        let feed = tokio::spawn(run(addr, tx, Duration::from_millis(10), cancel.clone()));
        let (mut sock, _) = listener.accept().await.unwrap();

        // Act
        sock.write_all(b"*8D40\xff\xfe;\n*8D40621D58C382D690C8AC2863A7;\n")
            .await
            .unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(msg.payload, "8D40621D58C382D690C8AC2863A7");
        let reconnect = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(reconnect.is_err(), "feed reconnected after a non utf-8 line");

        cancel.cancel();
        feed.await.unwrap().unwrap();
        drop(sock);
    }
}
