//! 回调接收服务器模块
//!
//! 接收微信协议网关推送的 Webhook 回调：
//! - `GET /callback/command`：网关校验用，原样回显查询参数；
//! - `POST /callback/command`：消息回调入口，解析成功入队并
//!   返回字面量 `"success"`，解析失败记日志并返回 `"error"`。
//!
//! 响应体是网关约定的裸字符串，不是 JSON 状态对象；网关只认
//! 这两个字面量，其他响应会触发网关重推。

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::infra::error::{Error, Result};

/// 回调处理共享状态
#[derive(Clone)]
struct CallbackState {
    /// 原始载荷队列（服务器只负责收与验，规范化在消费侧）
    raw_tx: mpsc::Sender<Value>,
}

/// 回调接收服务器
///
/// 绑定在构造时完成，便于使用端口 0 并在测试中取回实际端口。
pub struct CallbackServer {
    listener: tokio::net::TcpListener,
    local_addr: SocketAddr,
    router: Router,
    /// 停机信号（watch 锁存标志值，早于 `serve` 的触发也能生效）
    shutdown_rx: watch::Receiver<bool>,
}

impl CallbackServer {
    /// 绑定监听地址并构建路由
    ///
    /// # 参数说明
    /// * `host` - 监听地址
    /// * `port` - 监听端口（0 表示由系统分配）
    /// * `raw_tx` - 原始载荷队列发送端
    /// * `shutdown_rx` - 优雅停机信号接收端
    pub async fn bind(
        host: &str,
        port: u16,
        raw_tx: mpsc::Sender<Value>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Network(format!("绑定 {}:{} 失败: {}", host, port, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Network(format!("获取监听地址失败: {}", e)))?;

        let state = CallbackState { raw_tx };
        let router = Router::new()
            .route(
                "/callback/command",
                get(verify_callback).post(receive_callback),
            )
            .with_state(state);

        info!(addr = %local_addr, "回调服务器已绑定");
        Ok(Self {
            listener,
            local_addr,
            router,
            shutdown_rx,
        })
    }

    /// 实际监听地址
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 运行服务器直到收到停机信号
    pub async fn serve(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                // wait_for 先检查当前值，停机早于本任务首次轮询也不会丢失
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
                info!("回调服务器收到停机信号");
            })
            .await
            .map_err(|e| Error::Network(format!("回调服务器运行失败: {}", e)))?;

        info!("回调服务器已停止");
        Ok(())
    }
}

/// 网关校验请求：原样回显查询参数
async fn verify_callback(
    Query(params): Query<HashMap<String, String>>,
) -> Json<HashMap<String, String>> {
    debug!(?params, "收到网关校验请求");
    Json(params)
}

/// 消息回调入口
///
/// 响应必须是裸字符串 `"success"` / `"error"`。
async fn receive_callback(State(state): State<CallbackState>, body: String) -> &'static str {
    let raw: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, body = %body, "回调载荷不是合法 JSON");
            return "error";
        }
    };

    debug!(raw = %raw, "收到回调载荷");
    if let Err(e) = state.raw_tx.send(raw).await {
        error!(error = %e, "载荷入队失败，消费端已关闭");
        return "error";
    }

    "success"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_callback_accepts_json() {
        let (tx, mut rx) = mpsc::channel(8);
        let state = CallbackState { raw_tx: tx };

        let response =
            receive_callback(State(state), r#"{"TypeName":"AddMsg"}"#.to_string()).await;
        assert_eq!(response, "success");

        let raw = rx.recv().await.unwrap();
        assert_eq!(raw["TypeName"], "AddMsg");
    }

    #[tokio::test]
    async fn test_receive_callback_rejects_bad_json() {
        let (tx, _rx) = mpsc::channel(8);
        let state = CallbackState { raw_tx: tx };

        let response = receive_callback(State(state), "不是 JSON".to_string()).await;
        assert_eq!(response, "error");
    }

    #[tokio::test]
    async fn test_receive_callback_errors_when_queue_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let state = CallbackState { raw_tx: tx };

        let response = receive_callback(State(state), "{}".to_string()).await;
        assert_eq!(response, "error");
    }

    #[tokio::test]
    async fn test_bind_port_zero_assigns_port() {
        let (tx, _rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = CallbackServer::bind("127.0.0.1", 0, tx, shutdown_rx)
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_pre_latched_shutdown_stops_serve() {
        let (tx, _rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // 停机信号先于 serve 触发，标志值被锁存，服务器仍应退出
        shutdown_tx.send(true).unwrap();

        let server = CallbackServer::bind("127.0.0.1", 0, tx, shutdown_rx)
            .await
            .unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), server.serve())
            .await
            .expect("服务器应在锁存的停机信号下退出");
        assert!(result.is_ok());
    }
}
