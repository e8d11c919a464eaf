use memchr::memmem;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ClientError;

const MAX_CONNECT_RESPONSE_BYTES: usize = 8 * 1024;

/// Open a TCP tunnel to `target` through an HTTP forward proxy (`CONNECT`).
///
/// The returned stream is positioned right after the proxy's response
/// headers, ready for the TLS and WebSocket handshakes.
///
/// # Errors
///
/// Returns [`ClientError::Transport`] when the proxy is unreachable, refuses
/// the tunnel, or answers with something that is not an HTTP response.
pub async fn connect_via_proxy(proxy: &url::Url, target: &url::Url) -> Result<TcpStream, ClientError> {
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| ClientError::Transport(format!("Proxy URL has no host: {proxy}")))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(80);
    let target_host = target
        .host_str()
        .ok_or_else(|| ClientError::Transport(format!("Hub URL has no host: {target}")))?;
    let target_port = target
        .port_or_known_default()
        .ok_or_else(|| ClientError::Transport(format!("Hub URL has no port: {target}")))?;

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|err| ClientError::Transport(format!("Proxy connect failed: {err}")))?;
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!("failed to enable TCP_NODELAY on proxy stream: {err}");
    }

    let authority = format!("{target_host}:{target_port}");
    let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|err| ClientError::Transport(format!("Proxy write failed: {err}")))?;

    let head = read_response_head(&mut stream).await?;
    let status = parse_status_code(&head)
        .ok_or_else(|| ClientError::Transport("Proxy sent a malformed response".to_string()))?;
    if !(200..300).contains(&status) {
        return Err(ClientError::Transport(format!(
            "Proxy refused tunnel to {authority}: HTTP {status}"
        )));
    }
    tracing::debug!(proxy = %proxy_host, target = %authority, "proxy tunnel established");
    Ok(stream)
}

/// Read byte by byte until the blank line so no tunnelled bytes are consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<Vec<u8>, ClientError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let read = stream
            .read(&mut byte)
            .await
            .map_err(|err| ClientError::Transport(format!("Proxy read failed: {err}")))?;
        if read == 0 {
            return Err(ClientError::Transport(
                "Proxy closed the connection during CONNECT".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_CONNECT_RESPONSE_BYTES {
            return Err(ClientError::Transport(
                "Proxy response headers too large".to_string(),
            ));
        }
    }
}

fn parse_status_code(head: &[u8]) -> Option<u16> {
    let line_end = memmem::find(head, b"\r\n")?;
    let line = std::str::from_utf8(&head[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_status_code() {
        assert_eq!(
            parse_status_code(b"HTTP/1.1 200 Connection established\r\n\r\n"),
            Some(200)
        );
        assert_eq!(parse_status_code(b"HTTP/1.0 407 Auth\r\n\r\n"), Some(407));
        assert_eq!(parse_status_code(b"SSH-2.0-OpenSSH\r\n\r\n"), None);
        assert_eq!(parse_status_code(b"HTTP/1.1 200"), None);
    }

    async fn fake_proxy(reply: &'static [u8]) -> (url::Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(reply).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (url::Url::parse(&format!("http://{addr}")).unwrap(), handle)
    }

    #[tokio::test]
    async fn test_tunnel_established() {
        let (proxy, handle) =
            fake_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
        let target = url::Url::parse("wss://sydney.bing.com/sydney/ChatHub").unwrap();
        let stream = connect_via_proxy(&proxy, &target).await;
        assert!(stream.is_ok());
        let request = handle.await.unwrap();
        assert!(request.starts_with("CONNECT sydney.bing.com:443 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_tunnel_refused() {
        let (proxy, _handle) =
            fake_proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        let target = url::Url::parse("wss://sydney.bing.com/sydney/ChatHub").unwrap();
        let err = connect_via_proxy(&proxy, &target).await.unwrap_err();
        assert!(err.to_string().contains("407"));
    }
}
