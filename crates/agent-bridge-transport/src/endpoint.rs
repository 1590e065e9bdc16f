//! Socket.IO endpoint URL construction.

use agent_bridge_core::{SessionParams, TransportError};
use url::Url;

/// Default Socket.IO mount path.
pub const SOCKET_IO_PATH: &str = "/socket.io/";

/// Build the WebSocket URL for a session.
///
/// Accepts `ws://`, `wss://`, `http://`, `https://` or a bare `host:port`.
///
/// # Errors
/// Returns error if the address cannot be parsed or uses another scheme.
pub fn socket_url(params: &SessionParams) -> Result<Url, TransportError> {
    let raw = params.remote_url.trim();
    if raw.is_empty() {
        return Err(TransportError::InvalidUrl("empty address".to_string()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("ws://{raw}")
    };

    let mut url =
        Url::parse(&with_scheme).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(format!("cannot use scheme {scheme}")))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(SOCKET_IO_PATH);
    }

    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "4");
        query.append_pair("transport", "websocket");
        for (key, value) in params.query_pairs() {
            query.append_pair(key, &value);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_bridge_core::ConversationId;
    use secrecy::SecretString;
    use tokio_test::assert_ok;

    use super::*;

    fn params(remote: &str) -> SessionParams {
        SessionParams::new(
            remote,
            ConversationId::new("bbeee3e2"),
            Arc::new(SecretString::from("token".to_string())),
        )
    }

    #[test]
    fn test_bare_host_gets_ws_scheme() {
        let url = assert_ok!(socket_url(&params("192.168.50.90:3000")));
        assert_eq!(
            url.as_str(),
            "ws://192.168.50.90:3000/socket.io/?EIO=4&transport=websocket&conversation_id=bbeee3e2&latest_event_id=-1&source=external_client"
        );
    }

    #[test]
    fn test_http_schemes_are_mapped() {
        let url = socket_url(&params("https://agents.example.com")).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), SOCKET_IO_PATH);

        let url = socket_url(&params("http://localhost:3000")).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_custom_path_is_kept() {
        let url = socket_url(&params("ws://localhost:3000/custom/socket/")).unwrap();
        assert_eq!(url.path(), "/custom/socket/");
    }

    #[test]
    fn test_replay_cursor_and_source_tag() {
        let params = params("ws://localhost:3000")
            .with_replay_cursor(41)
            .with_source_tag("bridge");
        let url = socket_url(&params).unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("latest_event_id".to_string(), "41".to_string())));
        assert!(query.contains(&("source".to_string(), "bridge".to_string())));
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(matches!(
            socket_url(&params("")),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            socket_url(&params("ftp://example.com")),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            socket_url(&params("ws://")),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
