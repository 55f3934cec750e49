//! Framed RPC over a plugin subprocess's stdio (§6 "Plugin protocol").
//!
//! Each call is one newline-delimited JSON request followed by one
//! newline-delimited JSON response; the handshake is a single
//! newline-delimited JSON line emitted by the plugin at startup.
//! Callers serialize access with a mutex around the (reader, writer)
//! pair, matching §5's note that plugin RPC framing itself serializes
//! concurrent calls rather than the core adding its own locking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{PluginError, Result};

/// The protocol version this core speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Handshake line a plugin must emit on its stdout before the first RPC
/// call, proving it was launched by (and trusts) this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version the plugin speaks.
    pub protocol_version: u32,
    /// Agreed-upon cookie key.
    pub cookie_key: String,
    /// Agreed-upon cookie value.
    pub cookie_value: String,
}

impl Handshake {
    /// The cookie this core expects every launched plugin to echo back.
    #[must_use]
    pub fn expected() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            cookie_key: "SCALECORE_PLUGIN_COOKIE".into(),
            cookie_value: "dbd1f8b0-17a1-4e0c-8e1c-scalecore".into(),
        }
    }

    fn matches_cookie(&self, other: &Self) -> bool {
        self.cookie_key == other.cookie_key && self.cookie_value == other.cookie_value
    }
}

/// One outgoing RPC call.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation ID.
    pub id: u64,
    /// Method name, e.g. `"plugin_info"`, `"query"`, `"status"`.
    pub method: String,
    /// Call-specific parameters.
    pub params: Value,
}

/// One RPC reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoes the request's correlation ID.
    pub id: u64,
    /// Present on success.
    pub result: Option<Value>,
    /// Present on failure.
    pub error: Option<String>,
}

/// Reads and validates the handshake line from a freshly launched
/// plugin's stdout.
///
/// # Errors
///
/// Returns [`PluginError::HandshakeFailed`] if the line is malformed, the
/// cookie doesn't match, or the protocol version is unsupported.
pub async fn read_handshake<R>(reader: &mut BufReader<R>, plugin_name: &str) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| PluginError::HandshakeFailed {
            name: plugin_name.to_string(),
            reason: format!("failed to read handshake: {e}"),
        })?;
    if n == 0 {
        return Err(PluginError::HandshakeFailed {
            name: plugin_name.to_string(),
            reason: "plugin closed stdout before handshake".into(),
        });
    }
    let got: Handshake =
        serde_json::from_str(line.trim()).map_err(|e| PluginError::HandshakeFailed {
            name: plugin_name.to_string(),
            reason: format!("malformed handshake line: {e}"),
        })?;
    let expected = Handshake::expected();
    if got.protocol_version != expected.protocol_version {
        return Err(PluginError::HandshakeFailed {
            name: plugin_name.to_string(),
            reason: format!(
                "protocol version mismatch: expected {}, got {}",
                expected.protocol_version, got.protocol_version
            ),
        });
    }
    if !expected.matches_cookie(&got) {
        return Err(PluginError::HandshakeFailed {
            name: plugin_name.to_string(),
            reason: "cookie mismatch".into(),
        });
    }
    Ok(())
}

/// Sends one RPC request and awaits its matching response on the same
/// line-oriented transport.
///
/// # Errors
///
/// Returns [`PluginError::CallFailed`] on I/O failure, a malformed
/// response, an ID mismatch, or a plugin-reported error.
pub async fn call<R, W>(
    reader: &mut BufReader<R>,
    writer: &mut BufWriter<W>,
    plugin_name: &str,
    id: u64,
    method: &str,
    params: Value,
) -> Result<Value>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let request = RpcRequest {
        id,
        method: method.to_string(),
        params,
    };
    let mut line = serde_json::to_string(&request).map_err(|e| PluginError::CallFailed {
        name: plugin_name.to_string(),
        method: method.to_string(),
        reason: format!("failed to encode request: {e}"),
    })?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: format!("write failed: {e}"),
        })?;
    writer
        .flush()
        .await
        .map_err(|e| PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: format!("flush failed: {e}"),
        })?;

    let mut reply_line = String::new();
    let n = reader
        .read_line(&mut reply_line)
        .await
        .map_err(|e| PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: format!("read failed: {e}"),
        })?;
    if n == 0 {
        return Err(PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: "plugin closed stdout".into(),
        });
    }
    let response: RpcResponse =
        serde_json::from_str(reply_line.trim()).map_err(|e| PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: format!("malformed response: {e}"),
        })?;
    if response.id != id {
        return Err(PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: format!("response id {} did not match request id {id}", response.id),
        });
    }
    if let Some(err) = response.error {
        return Err(PluginError::CallFailed {
            name: plugin_name.to_string(),
            method: method.to_string(),
            reason: err,
        });
    }
    response.result.ok_or_else(|| PluginError::CallFailed {
        name: plugin_name.to_string(),
        method: method.to_string(),
        reason: "response had neither result nor error".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_round_trip_succeeds() {
        let (mut client, mut plugin) = duplex(1024);
        let writer_task = tokio::spawn(async move {
            let line = serde_json::to_string(&Handshake::expected()).unwrap();
            plugin.write_all(format!("{line}\n").as_bytes()).await.unwrap();
            plugin
        });
        let mut reader = BufReader::new(&mut client);
        read_handshake(&mut reader, "test-plugin").await.expect("handshake ok");
        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_bad_cookie() {
        let (mut client, mut plugin) = duplex(1024);
        tokio::spawn(async move {
            let bad = Handshake {
                protocol_version: PROTOCOL_VERSION,
                cookie_key: "wrong".into(),
                cookie_value: "wrong".into(),
            };
            let line = serde_json::to_string(&bad).unwrap();
            plugin.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        });
        let mut reader = BufReader::new(&mut client);
        let result = read_handshake(&mut reader, "test-plugin").await;
        assert!(matches!(result, Err(PluginError::HandshakeFailed { .. })));
    }
}
