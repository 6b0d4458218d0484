//! 核心模块
//!
//! 定义与具体网关无关的消息模型。

pub mod message;
