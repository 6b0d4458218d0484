//! 服务模块
//!
//! 负责桥接服务的完整生命周期：加载配置、启动微信适配器、
//! 消费规范化消息事件，并在收到 Ctrl+C 或外部停止指令时
//! 协作式停机。

use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::channels::traits::ChannelAdapter;
use crate::channels::wechat::{WechatAdapter, WechatMessageEvent};
use crate::infra::config::{Config, ConfigLoader};
use crate::infra::error::{Error, Result};

/// 事件队列容量
const EVENT_QUEUE_CAPACITY: usize = 256;

/// 服务状态
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceStatus {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// 服务配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// 配置文件路径
    pub config_path: String,
    /// 是否启用 verbose 模式
    pub verbose: bool,
    /// 监听端口覆盖（0 表示沿用配置文件）
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_path: "wxbridge.toml".to_string(),
            verbose: false,
            port: 0,
        }
    }
}

/// 桥接服务
///
/// 持有适配器与事件队列，事件消费循环是对接机器人核心的接缝：
/// 这里默认只记录消息日志，上层系统替换消费逻辑即可接入。
pub struct BridgeService {
    config: ServiceConfig,
    status: Arc<tokio::sync::RwLock<ServiceStatus>>,
    shutdown_tx: broadcast::Sender<()>,
    loaded_config: Option<Config>,
}

impl BridgeService {
    pub fn new(config: ServiceConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            status: Arc::new(tokio::sync::RwLock::new(ServiceStatus::Initializing)),
            shutdown_tx,
            loaded_config: None,
        }
    }

    /// 初始化服务（加载配置）
    pub async fn initialize(&mut self) -> Result<()> {
        info!(path = %self.config.config_path, "初始化服务...");

        let loader = ConfigLoader::new();
        let mut config = loader.load(&self.config.config_path).await?;

        // 命令行端口覆盖配置文件
        if self.config.port > 0 {
            config.server.port = self.config.port;
        }
        self.loaded_config = Some(config);

        info!("服务初始化完成");
        Ok(())
    }

    /// 启动服务，阻塞直到停机
    pub async fn start(&mut self) -> Result<()> {
        info!("开始启动服务...");

        let config = self
            .loaded_config
            .clone()
            .ok_or_else(|| Error::Config("服务未初始化".to_string()))?;

        *self.status.write().await = ServiceStatus::Running;

        // 事件队列：适配器生产，本服务消费
        let (event_tx, mut event_rx) = mpsc::channel::<WechatMessageEvent>(EVENT_QUEUE_CAPACITY);
        let adapter = Arc::new(WechatAdapter::new(&config, event_tx));

        let adapter_task = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.run().await })
        };

        // 事件消费循环
        let consumer_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let message = &event.message;
                info!(
                    id = %message.id,
                    session = %message.session_id,
                    sender = %message.sender.display_name,
                    group = message.is_group(),
                    text = %message.plain_text,
                    "收到消息事件"
                );
            }
            info!("事件队列已关闭");
        });

        // Ctrl+C 触发停机
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            let _ = signal::ctrl_c().await;
            warn!("收到 Ctrl+C 信号，准备关闭服务...");
            let _ = shutdown_tx.send(());
        });

        // 等待停机信号
        let _ = shutdown_rx.recv().await;
        *self.status.write().await = ServiceStatus::Stopping;

        adapter.terminate().await;
        match adapter_task.await {
            Ok(result) => result?,
            Err(e) => warn!(error = %e, "适配器任务异常退出"),
        }
        let _ = consumer_task.await;

        *self.status.write().await = ServiceStatus::Stopped;
        info!("服务已停止");
        Ok(())
    }

    /// 触发协作式停机
    pub async fn stop(&self) {
        info!("正在停止服务...");
        *self.status.write().await = ServiceStatus::Stopping;
        let _ = self.shutdown_tx.send(());
    }

    /// 当前服务状态
    pub async fn status(&self) -> ServiceStatus {
        self.status.read().await.clone()
    }
}
