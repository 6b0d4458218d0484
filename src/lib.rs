//! wxbridge - 微信回调协议桥接器
//!
//! 把微信协议网关（wcf/gewe）的 Webhook 回调规范化为统一的
//! 机器人消息事件，并提供出站发送能力。
//!
//! # 模块结构
//! - `infra`: 基础设施（配置、日志、错误）
//! - `core`: 统一消息模型
//! - `channels`: 渠道适配器（微信）
//! - `service`: 服务生命周期管理

pub mod channels;
pub mod core;
pub mod infra;
pub mod service;
