use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{UploadError, UploadReport, Uploader};

/// Uploads over a single TCP connection: connect, one write, close
#[derive(Debug, Clone)]
pub struct TcpUploader {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl TcpUploader {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Newline-framed payload, one record per line
pub fn frame_lines(lines: &[String]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
    }
    payload
}

/// Await a connection attempt, giving up after `limit`
async fn connect_within<F>(connect: F, limit: Duration) -> Result<TcpStream, UploadError>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    tokio::time::timeout(limit, connect)
        .await
        .map_err(|_| UploadError::ConnectTimeout(limit))?
        .map_err(UploadError::Connect)
}

impl Uploader for TcpUploader {
    async fn upload(&self, lines: &[String]) -> Result<UploadReport, UploadError> {
        debug!(addr = %self.addr, "Connecting to collection server");
        let mut stream = connect_within(TcpStream::connect(self.addr), self.connect_timeout).await?;

        let payload = frame_lines(lines);
        stream.write_all(&payload).await.map_err(UploadError::Write)?;
        stream.flush().await.map_err(UploadError::Write)?;
        stream.shutdown().await.map_err(UploadError::Write)?;

        info!(
            addr = %self.addr,
            records = lines.len(),
            bytes = payload.len(),
            "Upload complete"
        );
        Ok(UploadReport {
            records: lines.len(),
            bytes: payload.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_frame_lines() {
        let lines = vec!["0,a".to_string(), "1,b".to_string()];
        assert_eq!(frame_lines(&lines), b"0,a\n1,b\n".to_vec());
        assert!(frame_lines(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_upload_delivers_all_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let collector = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            conn.read_to_string(&mut received).await.unwrap();
            received
        });

        let lines: Vec<String> = (0..3).map(|i| format!("{},null", i)).collect();
        let uploader = TcpUploader::new(addr, Duration::from_secs(2));
        let report = uploader.upload(&lines).await.unwrap();

        assert_eq!(report.records, 3);
        assert_eq!(collector.await.unwrap(), "0,null\n1,null\n2,null\n");
        assert_eq!(report.bytes, "0,null\n1,null\n2,null\n".len());
    }

    #[tokio::test]
    async fn test_upload_connection_refused() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let uploader = TcpUploader::new(addr, Duration::from_secs(2));
        let err = uploader.upload(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, UploadError::Connect(_)));
        assert!(err.to_string().starts_with("Failed to connect"));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // A connect that never completes, as with a silently dropped SYN
        let limit = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let err = connect_within(std::future::pending(), limit)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ConnectTimeout(d) if d == limit));
        assert!(started.elapsed() >= limit);
        assert!(err.to_string().starts_with("Failed to connect"));
    }

    #[tokio::test]
    async fn test_connect_within_passes_connection_through() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect_within(TcpStream::connect(addr), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }
}
