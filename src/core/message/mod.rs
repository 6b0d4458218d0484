//! 消息核心模块

pub mod types;
