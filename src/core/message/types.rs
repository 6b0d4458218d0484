//! 消息类型定义模块
//!
//! 定义统一的机器人消息模型，包括：
//! - 规范化消息（各网关回调转换后的统一形态）
//! - 消息段（文本、图片、语音、视频、@提及等）
//! - 发送者信息
//!
//! # 使用示例
//! ```rust
//! use wxbridge::core::message::types::{BotMessage, MessageSegment};
//!
//! let msg = BotMessage::default();
//! assert!(msg.segments.is_empty());
//! ```

use serde::{Deserialize, Serialize};

/// 消息来源类型
///
/// 表示消息来自私聊还是群聊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageType {
    /// 私聊（好友消息）
    #[default]
    Friend,
    /// 群聊消息
    Group,
}

/// 消息段
///
/// 规范化消息的内容由若干消息段按顺序组成。
/// 每个网关消息类型码映射到一种消息段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageSegment {
    /// 纯文本
    Text {
        /// 文本内容
        text: String,
    },
    /// 图片（已下载到本地）
    Image {
        /// 本地文件路径
        file: String,
        /// 原始下载 URL
        url: String,
    },
    /// 语音（已持久化到临时文件）
    Voice {
        /// 本地文件路径
        file: String,
    },
    /// 视频（仅携带封面上下文，不拉取完整视频）
    Video {
        /// 封面/缩略图上下文
        cover: String,
    },
    /// @提及
    Mention {
        /// 被提及的用户 ID
        user_id: String,
    },
    /// 表情包
    Emoji {
        /// 表情包 MD5
        md5: String,
        /// 表情包大小（字节）
        size: String,
        /// CDN 链接（md5 缺失时用于降级为图片发送）
        cdn_url: Option<String>,
    },
    /// 链接/公众号卡片
    Link {
        /// 标题
        title: String,
        /// 描述
        desc: String,
        /// 链接地址
        url: String,
    },
    /// 文件
    File {
        /// 文件名
        name: String,
        /// 下载地址（如有）
        url: Option<String>,
    },
    /// 引用回复
    Quote {
        /// 回复正文
        text: String,
        /// 被引用的内容
        quoted: String,
    },
    /// 转账
    Transfer {
        /// 转账附言
        memo: String,
    },
    /// 红包
    RedPacket {
        /// 红包标题
        title: String,
    },
}

impl MessageSegment {
    /// 创建文本段
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// 创建 @提及段
    pub fn mention(user_id: impl Into<String>) -> Self {
        Self::Mention {
            user_id: user_id.into(),
        }
    }
}

/// 发送者信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    /// 发送者 wxid
    pub id: String,
    /// 发送者显示名称（群内昵称或通讯录名称）
    pub display_name: String,
}

impl Sender {
    /// 创建发送者信息
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// 规范化消息
///
/// 所有网关回调经规范化后的统一消息形态。
/// 每条入站回调生成一条消息，被分发器消费一次后丢弃，不做持久化。
///
/// # 不变式
/// - 成功规范化的消息 `segments` 永不为空；
///   无法产出内容段的消息在规范化阶段被丢弃。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotMessage {
    /// 消息唯一 ID
    pub id: String,
    /// 消息时间戳（Unix 秒）
    pub timestamp: i64,
    /// 会话 ID（私聊为发送者 wxid，群聊为群 ID 或 sender#roomid）
    pub session_id: String,
    /// 机器人自身 wxid
    pub self_id: String,
    /// 消息来源类型
    pub message_type: MessageType,
    /// 群 ID（仅群聊消息）
    pub group_id: Option<String>,
    /// 发送者信息
    pub sender: Sender,
    /// 消息段序列
    pub segments: Vec<MessageSegment>,
    /// 纯文本拼接（便于日志与文本处理）
    pub plain_text: String,
    /// 原始网关载荷（调试用）
    pub raw: serde_json::Value,
}

impl BotMessage {
    /// 是否为群聊消息
    pub fn is_group(&self) -> bool {
        self.message_type == MessageType::Group
    }

    /// 取出所有文本段拼接后的字符串
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                MessageSegment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_text_skips_non_text_segments() {
        let msg = BotMessage {
            segments: vec![
                MessageSegment::mention("wxid_bot"),
                MessageSegment::text("你好"),
                MessageSegment::text("，世界"),
            ],
            ..Default::default()
        };
        assert_eq!(msg.joined_text(), "你好，世界");
    }

    #[test]
    fn test_default_is_friend_message() {
        let msg = BotMessage::default();
        assert!(!msg.is_group());
        assert!(msg.group_id.is_none());
    }
}
