use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{error, warn};

use crate::{
    error::{AppError, AppResult},
    layers::session::Session,
    types::{
        ChainChangedParams, LoginOptionsPatch, LoginOut, LoginParams, SetNetworkParams,
        SetThemeParams,
    },
};

/// Runtime that speaks JSON-RPC 2.0 over stdin/stdout so a host process can drive the session.
pub struct RpcServer {
    session: Arc<Session>,
}

#[derive(Debug, Default, Deserialize)]
struct NoParams {}

impl RpcServer {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Start processing JSON-RPC requests until EOF on stdin.
    pub async fn run_stdio(self) -> AppResult<()> {
        let reader = BufReader::new(io::stdin());
        let writer = BufWriter::new(io::stdout());
        self.run(reader, writer).await
    }

    pub async fn run<R, W>(self, mut reader: R, mut writer: W) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes = reader.read_line(&mut line).await?;
            if bytes == 0 {
                break;
            }

            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(req) => self.handle_request(req).await,
                Err(err) => {
                    warn!("failed to parse JSON-RPC request: {err}");
                    RpcResponse::error(Value::Null, -32700, format!("parse error: {err}"))
                }
            };
            let payload = serde_json::to_vec(&response).map_err(AppError::from)?;
            writer.write_all(&payload).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    async fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let RpcRequest {
            method, params, id, ..
        } = req;

        match method.as_str() {
            "initialize" => {
                self.dispatch::<NoParams, Value, _, _>(id, params, |session, _| async move {
                    session.initialize().await?;
                    Ok(json!({ "inited": true }))
                })
                .await
            }
            "login" => {
                self.dispatch::<LoginParams, LoginOut, _, _>(id, params, |session, parsed| async move {
                    let success = session.login(parsed.wallet.as_deref()).await;
                    Ok(login_out(&session, success).await)
                })
                .await
            }
            "login_with_wallet_connect" => {
                self.dispatch::<NoParams, LoginOut, _, _>(id, params, |session, _| async move {
                    let success = session.login_with_wallet_connect().await;
                    Ok(login_out(&session, success).await)
                })
                .await
            }
            "login_with_remote_wallet" => {
                self.dispatch::<NoParams, LoginOut, _, _>(id, params, |session, _| async move {
                    let success = session.login_with_remote_wallet().await;
                    Ok(login_out(&session, success).await)
                })
                .await
            }
            "restore_login" => {
                self.dispatch::<NoParams, LoginOut, _, _>(id, params, |session, _| async move {
                    let success = session.restore_login().await;
                    Ok(login_out(&session, success).await)
                })
                .await
            }
            "reset" => {
                self.dispatch::<NoParams, _, _, _>(id, params, |session, _| async move {
                    session.reset().await;
                    Ok(session.snapshot().await)
                })
                .await
            }
            "status" => {
                self.dispatch::<NoParams, _, _, _>(id, params, |session, _| async move {
                    Ok(session.snapshot().await)
                })
                .await
            }
            "reject_network_change" => {
                self.dispatch::<NoParams, Value, _, _>(id, params, |session, _| async move {
                    Ok(json!({ "rejected": session.reject_network_change() }))
                })
                .await
            }
            "chain_changed" => {
                self.dispatch::<ChainChangedParams, Value, _, _>(id, params, |session, parsed| async move {
                    let released = session.notify_chain_changed(parsed.chain_id).await;
                    Ok(json!({ "released": released }))
                })
                .await
            }
            "network_config" => {
                self.dispatch::<NoParams, _, _, _>(id, params, |session, _| async move {
                    session.config().await
                })
                .await
            }
            "set_network" => {
                self.dispatch::<SetNetworkParams, _, _, _>(id, params, |session, parsed| async move {
                    session.set_network(&parsed.network).await?;
                    session.config().await
                })
                .await
            }
            "set_login_options" => {
                self.dispatch::<LoginOptionsPatch, Value, _, _>(id, params, |session, parsed| async move {
                    session.set_login_options(parsed).await;
                    Ok(json!(session.snapshot().await.login_options))
                })
                .await
            }
            "set_theme" => {
                self.dispatch::<SetThemeParams, Value, _, _>(id, params, |session, parsed| async move {
                    session.set_theme(parsed.theme).await?;
                    Ok(json!({ "theme": parsed.theme }))
                })
                .await
            }
            "toggle_theme" => {
                self.dispatch::<NoParams, Value, _, _>(id, params, |session, _| async move {
                    let theme = session.toggle_theme().await?;
                    Ok(json!({ "theme": theme }))
                })
                .await
            }
            other => {
                warn!("received unknown method {other}");
                RpcResponse::error(id, -32601, format!("method not found: {other}"))
            }
        }
    }

    async fn dispatch<P, T, F, Fut>(
        &self,
        id: Value,
        params_value: Value,
        handler: F,
    ) -> RpcResponse
    where
        P: DeserializeOwned,
        T: Serialize,
        F: Fn(Arc<Session>, P) -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        match parse_params::<P>(params_value) {
            Ok(parsed) => match handler(self.session.clone(), parsed).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(value) => RpcResponse::success(id, value),
                    Err(err) => {
                        error!("serialization error: {err}");
                        RpcResponse::error(id, -32603, format!("serialization error: {err}"))
                    }
                },
                Err(err) => {
                    error!("handler error: {err}");
                    let payload = err.to_json_rpc();
                    RpcResponse::error_with_data(id, payload.code, payload.message, payload.data)
                }
            },
            Err(err) => {
                warn!("invalid params: {err}");
                RpcResponse::error(id, -32602, err.to_string())
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|err| AppError::InvalidInput(format!("invalid params: {err}")))
}

async fn login_out(session: &Session, success: bool) -> LoginOut {
    LoginOut {
        success,
        status: session.status().await,
        error: session.error().await,
    }
}

fn default_null() -> Value {
    Value::Null
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default = "default_null")]
    params: Value,
    #[serde(default = "default_null")]
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Value,
}

impl RpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: json!({}),
            }),
            id,
        }
    }

    fn error_with_data(id: Value, code: i32, message: String, data: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
    data: Value,
}
