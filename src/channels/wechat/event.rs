//! 微信消息事件模块
//!
//! 把一条规范化入站消息与回复能力打包成事件，交给上层消费。
//! 上层调用 `send` 即可把回复段序列发回原会话，无需关心
//! 网关端点与请求体格式。

use std::sync::Arc;
use tracing::{debug, warn};

use super::client::WechatClient;
use crate::core::message::types::{BotMessage, MessageSegment};
use crate::infra::error::Result;

/// 微信消息事件
///
/// 持有规范化消息与网关客户端引用；回复目标由消息本身决定
/// （群聊回到群，私聊回到发送者）。
#[derive(Debug, Clone)]
pub struct WechatMessageEvent {
    /// 规范化消息
    pub message: BotMessage,
    client: Arc<WechatClient>,
}

impl WechatMessageEvent {
    /// 创建消息事件
    pub fn new(message: BotMessage, client: Arc<WechatClient>) -> Self {
        Self { message, client }
    }

    /// 回复目标（群 ID 或发送者 wxid）
    pub fn reply_target(&self) -> &str {
        self.message
            .group_id
            .as_deref()
            .unwrap_or(&self.message.sender.id)
    }

    /// 把回复段序列发回原会话
    ///
    /// 文本段合并为一条文本消息发送，提及段折叠为文本消息的
    /// @ 列表；图片/表情/视频各自独立发送。语音段不支持外发，
    /// 跳过并记日志。任一网关调用失败立即返回错误。
    pub async fn send(&self, segments: &[MessageSegment]) -> Result<()> {
        let target = self.reply_target().to_string();

        // 文本与提及先归集，其余按段逐条发送
        let mut text = String::new();
        let mut ats: Vec<&str> = Vec::new();

        for segment in segments {
            match segment {
                MessageSegment::Text { text: t } => text.push_str(t),
                MessageSegment::Mention { user_id } => ats.push(user_id),
                MessageSegment::Image { url, file } => {
                    let image_url = if url.is_empty() { file } else { url };
                    self.client.post_image(&target, image_url).await?;
                }
                MessageSegment::Emoji { md5, size, cdn_url } => {
                    self.client
                        .post_emoji(&target, md5, size, cdn_url.as_deref().unwrap_or(""))
                        .await?;
                }
                MessageSegment::Video { cover } => {
                    self.client.forward_video(&target, cover).await?;
                }
                MessageSegment::Voice { .. } => {
                    debug!("暂不支持发送语音消息，跳过");
                }
                other => {
                    warn!(segment = ?other, "暂不支持发送该消息段，跳过");
                }
            }
        }

        if !text.is_empty() || !ats.is_empty() {
            self.client.post_text(&target, &text, &ats.join(",")).await?;
        }

        Ok(())
    }
}
