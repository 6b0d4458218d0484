//! 微信渠道适配器模块
//!
//! 把回调服务器、规范化器与出站客户端组装成完整的渠道适配器：
//! 接收网关 Webhook 回调 → 规范化为统一消息 → 打包成事件交给
//! 上层消费。
//!
//! # 生命周期
//! `run` 绑定回调服务器并进入消费循环，每条载荷在独立任务中
//! 规范化，慢媒体下载不会阻塞后续消息。`terminate` 通过 watch
//! 通道锁存停机标志，早于 `run` 的触发也不会丢失；停机后先停止
//! 接收新回调，再在硬性期限内排空在途任务，超时的任务被中止。

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::cache::GroupMemberCache;
use super::client::WechatClient;
use super::event::WechatMessageEvent;
use super::media::MediaDownloader;
use super::normalizer::Normalizer;
use super::server::CallbackServer;
use crate::channels::traits::ChannelAdapter;
use crate::infra::config::Config;
use crate::infra::error::Result;

/// 网关 API 默认地址（gewe 本地部署默认端口）
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:2531/v2/api";

/// 原始载荷队列容量
const RAW_QUEUE_CAPACITY: usize = 256;

/// 停机后排空在途任务的硬性期限
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// 微信渠道适配器
pub struct WechatAdapter {
    host: String,
    port: u16,
    client: Arc<WechatClient>,
    normalizer: Arc<Normalizer>,
    event_tx: mpsc::Sender<WechatMessageEvent>,
    /// 停机信号发送端（watch 锁存标志值）
    shutdown_tx: watch::Sender<bool>,
    /// 停机信号原始接收端（常驻，保证通道不因无接收者而关闭）
    shutdown_rx: watch::Receiver<bool>,
    /// 实际监听地址（`run` 完成绑定后可读）
    bound_addr: tokio::sync::OnceCell<std::net::SocketAddr>,
}

impl WechatAdapter {
    /// 从配置创建适配器
    ///
    /// # 参数说明
    /// * `config` - 全局配置
    /// * `event_tx` - 规范化消息事件的发送端，上层消费
    pub fn new(config: &Config, event_tx: mpsc::Sender<WechatMessageEvent>) -> Self {
        let base_url = config
            .vendor
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL);
        let app_id = config.vendor.app_id.as_deref().unwrap_or_default();

        let client = Arc::new(WechatClient::new(
            base_url,
            app_id,
            config.vendor.token.clone(),
        ));
        let media = MediaDownloader::new(config.media.temp_dir.clone());
        let members = Arc::new(GroupMemberCache::new());
        let normalizer = Arc::new(Normalizer::new(
            client.clone(),
            media,
            members,
            config.vendor.bot_wxid.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            client,
            normalizer,
            event_tx,
            shutdown_tx,
            shutdown_rx,
            bound_addr: tokio::sync::OnceCell::new(),
        }
    }

    /// 实际监听地址（绑定完成前为 `None`）
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.bound_addr.get().copied()
    }

    /// 网关客户端引用
    pub fn client(&self) -> &Arc<WechatClient> {
        &self.client
    }

    /// 在独立任务中规范化一条载荷并交给事件队列
    ///
    /// 每条载荷一个任务，挂起的媒体下载不会阻塞后续消息；
    /// 群成员缓存的并发填充是幂等的，并发处理对正确性无影响。
    fn spawn_payload(&self, tasks: &mut JoinSet<()>, raw: Value) {
        let normalizer = self.normalizer.clone();
        let client = self.client.clone();
        let event_tx = self.event_tx.clone();

        tasks.spawn(async move {
            match normalizer.normalize(&raw).await {
                Ok(Some(message)) => {
                    let event = WechatMessageEvent::new(message, client);
                    if let Err(e) = event_tx.send(event).await {
                        error!(error = %e, "事件入队失败，消费端已关闭");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "消息规范化失败，丢弃");
                }
            }
        });
    }

    /// 在硬性期限内排空已入队的载荷与在途任务
    async fn drain(&self, raw_rx: &mut mpsc::Receiver<Value>, tasks: &mut JoinSet<()>) {
        let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
            while let Some(raw) = raw_rx.recv().await {
                self.spawn_payload(tasks, raw);
            }
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                deadline = ?DRAIN_DEADLINE,
                in_flight = tasks.len(),
                "排空超时，中止剩余处理任务"
            );
            tasks.abort_all();
        }
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for WechatAdapter {
    fn name(&self) -> &str {
        "wechat"
    }

    async fn run(&self) -> Result<()> {
        let (raw_tx, mut raw_rx) = mpsc::channel(RAW_QUEUE_CAPACITY);

        let server =
            CallbackServer::bind(&self.host, self.port, raw_tx, self.shutdown_rx.clone()).await?;
        let _ = self.bound_addr.set(server.local_addr());
        info!(addr = %server.local_addr(), channel = self.name(), "微信适配器已启动");

        let server_task = tokio::spawn(server.serve());

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                // wait_for 先检查锁存值，停机早于循环首次轮询也不会丢失
                _ = async { shutdown_rx.wait_for(|stop| *stop).await.map(drop) } => {
                    info!("适配器收到停机信号，开始排空队列");
                    self.drain(&mut raw_rx, &mut tasks).await;
                    break;
                }
                maybe_raw = raw_rx.recv() => {
                    match maybe_raw {
                        Some(raw) => self.spawn_payload(&mut tasks, raw),
                        None => {
                            warn!("载荷队列意外关闭");
                            break;
                        }
                    }
                }
                // 回收已完成的处理任务
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        match server_task.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "回调服务器任务异常退出"),
        }

        info!(channel = self.name(), "微信适配器已停止");
        Ok(())
    }

    async fn terminate(&self) {
        info!(channel = self.name(), "触发适配器停机");
        // 自身常驻一个接收端，send 不会因通道关闭而失败
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.media.temp_dir = dir.path().to_path_buf();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config
    }

    #[test]
    fn test_adapter_wiring_from_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.media.temp_dir = dir.path().to_path_buf();

        let (tx, _rx) = mpsc::channel(8);
        let adapter = WechatAdapter::new(&config, tx);

        assert_eq!(adapter.name(), "wechat");
        assert_eq!(adapter.client().base_url(), DEFAULT_API_BASE_URL);
    }

    #[tokio::test]
    async fn test_run_and_terminate_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let (tx, _rx) = mpsc::channel(8);
        let adapter = Arc::new(WechatAdapter::new(&config, tx));

        let runner = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.run().await })
        };

        // 等适配器完成绑定后触发停机
        tokio::time::sleep(Duration::from_millis(100)).await;
        adapter.terminate().await;

        let result = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("适配器应在停机后退出")
            .expect("适配器任务不应 panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_terminate_before_run_is_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let (tx, _rx) = mpsc::channel(8);
        let adapter = Arc::new(WechatAdapter::new(&config, tx));

        // 停机先于启动：标志值被锁存，run 仍应立即退出
        adapter.terminate().await;

        let runner = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.run().await })
        };

        let result = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("锁存的停机信号不应丢失")
            .expect("适配器任务不应 panic");
        assert!(result.is_ok());
    }
}
