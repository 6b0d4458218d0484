//! 渠道适配器模块
//!
//! 每个子模块对应一种聊天平台网关的适配实现。

pub mod traits;
pub mod wechat;
