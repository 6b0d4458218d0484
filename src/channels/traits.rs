//! 渠道 Trait 定义模块
//!
//! 定义渠道适配器的统一接口。
//!
//! # 设计原则
//! 1. 使用 `async-trait` 支持异步方法
//! 2. 所有方法返回 `Result` 类型
//! 3. 适配器自身持有全部可变状态（缓存、停机标志），不依赖模块级全局量

use crate::infra::error::Result;

/// 渠道适配器 Trait
///
/// 定义渠道适配器的统一接口
///
/// # 方法说明
/// - `name()`: 返回渠道名称
/// - `run()`: 启动适配器（阻塞直到停机）
/// - `terminate()`: 触发协作式停机
#[async_trait::async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// 获取渠道名称
    fn name(&self) -> &str;

    /// 启动适配器
    ///
    /// 启动回调服务并开始处理入站消息，直到 `terminate` 被调用。
    async fn run(&self) -> Result<()>;

    /// 触发协作式停机
    ///
    /// 停止接收新回调，等待在途请求完成。
    async fn terminate(&self);
}
