//! 微信渠道模块
//!
//! 对接微信协议网关（wcf/gewe）的完整渠道实现：
//! - 回调服务器：接收网关 Webhook 推送（`server`）
//! - 载荷定义：两种网关下发格式（`payload`）
//! - 规范化器：异构载荷 → 统一消息（`normalizer`）
//! - XML 子消息解析：表情包与 appmsg（`xmlmsg`）
//! - 网关客户端：出站消息与群/通讯录操作（`client`）
//! - 媒体处理：图片下载、语音落盘与转码（`media`）
//! - 群成员缓存：wxid → 群内昵称（`cache`）
//! - 消息事件：规范化消息 + 回复能力（`event`)
//! - 适配器：以上组件的组装与生命周期（`adapter`）
//!
//! # 配置示例
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9001
//!
//! [vendor]
//! api_base_url = "http://127.0.0.1:2531/v2/api"
//! app_id = "${GEWE_APP_ID}"
//! token = "${GEWE_TOKEN}"
//!
//! [media]
//! temp_dir = "data/temp"
//! ```

pub mod adapter;
pub mod cache;
pub mod client;
pub mod event;
pub mod media;
pub mod normalizer;
pub mod payload;
pub mod server;
pub mod xmlmsg;

pub use adapter::WechatAdapter;
pub use client::WechatClient;
pub use event::WechatMessageEvent;
pub use server::CallbackServer;
