//! 入站消息规范化模块
//!
//! 把两种网关的异构回调载荷规范化为统一的 `BotMessage`。
//!
//! # 丢弃规则（只记日志，不产出消息）
//! - 非内容类通知（联系人增删、下线通知）
//! - 缺少 Data/Content 字段的载荷
//! - 时间戳早于 30 秒前的过期消息
//! - 机器人自己发出的消息（回声抑制）与保留系统账号
//! - 未识别的消息类型码
//! - 类型处理后未产出任何内容段的消息
//!
//! # 群消息处理
//! 内容按 `发送者wxid:\n正文` 前缀拆分；@提及通过正文中的
//! U+2005 标记与元数据里的 atuserlist 双路检测，命中时在段
//! 序列头部插入提及段。发送者昵称经群成员缓存解析，未命中时
//! 拉取一次全量成员列表整体填充。

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cache::GroupMemberCache;
use super::client::WechatClient;
use super::media::MediaDownloader;
use super::payload::{GeweEnvelope, ProviderPayload, WcfRecord};
use super::xmlmsg::XmlMsgParser;
use crate::core::message::types::{BotMessage, MessageSegment, MessageType, Sender};
use crate::infra::error::Result;

/// 消息时间戳的最大滞后（秒），更旧的消息直接丢弃
const STALE_SECONDS: i64 = 30;

/// 保留系统账号，来自这些账号的消息不转发
const RESERVED_ACCOUNTS: &[&str] = &["weixin"];

/// gewe 消息类型码
///
/// 每个变体对应一个处理分支；`from_code` 未覆盖的码视为未识别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeweMsgType {
    /// 文本消息
    Text,
    /// 图片消息
    Image,
    /// 语音消息
    Voice,
    /// 好友申请
    FriendRequest,
    /// 名片
    Card,
    /// 视频消息
    Video,
    /// 表情包
    Emoji,
    /// 地理位置
    Location,
    /// 公众号/文件/引用/转账/红包等 XML 子消息
    AppMsg,
    /// 帐号消息同步
    AccountSync,
    /// 被踢出群聊/更换群主/修改群名称
    GroupSystem,
    /// 撤回/拍一拍/成员邀请/群公告等
    GroupNotice,
}

impl GeweMsgType {
    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Text),
            3 => Some(Self::Image),
            34 => Some(Self::Voice),
            37 => Some(Self::FriendRequest),
            42 => Some(Self::Card),
            43 => Some(Self::Video),
            47 => Some(Self::Emoji),
            48 => Some(Self::Location),
            49 => Some(Self::AppMsg),
            51 => Some(Self::AccountSync),
            10000 => Some(Self::GroupSystem),
            10002 => Some(Self::GroupNotice),
            _ => None,
        }
    }
}

/// 入站消息规范化器
///
/// 规范化所需的全部状态（成员缓存、XML 解析器、正则）都是
/// 实例字段，不依赖模块级全局量。
pub struct Normalizer {
    client: Arc<WechatClient>,
    media: MediaDownloader,
    members: Arc<GroupMemberCache>,
    xml_parser: XmlMsgParser,
    /// `@昵称 ` 提及标记段（以 U+2005 收尾）
    at_marker_re: Regex,
    /// 机器人 wxid 配置覆盖（gewe 默认取载荷中的 Wxid）
    bot_wxid: Option<String>,
}

impl Normalizer {
    /// 创建规范化器
    pub fn new(
        client: Arc<WechatClient>,
        media: MediaDownloader,
        members: Arc<GroupMemberCache>,
        bot_wxid: Option<String>,
    ) -> Self {
        Self {
            client,
            media,
            members,
            xml_parser: XmlMsgParser::new(),
            at_marker_re: Regex::new("@[^\u{2005}]*\u{2005}").expect("编译提及标记正则失败"),
            bot_wxid,
        }
    }

    /// 群成员缓存引用
    pub fn member_cache(&self) -> &GroupMemberCache {
        &self.members
    }

    /// 规范化一条原始回调载荷
    ///
    /// # 返回值
    /// - `Ok(Some(_))`: 规范化成功，消息应交给分发器
    /// - `Ok(None)`: 按丢弃规则丢弃，只记日志
    /// - `Err(_)`: 处理该条消息时出错，调用方记日志后丢弃
    pub async fn normalize(&self, raw: &Value) -> Result<Option<BotMessage>> {
        match ProviderPayload::from_value(raw)? {
            ProviderPayload::Gewe(envelope) => self.normalize_gewe(envelope, raw).await,
            ProviderPayload::Wcf(record) => self.normalize_wcf(record, raw).await,
        }
    }

    // ==================== gewe 信封格式 ====================

    async fn normalize_gewe(
        &self,
        envelope: GeweEnvelope,
        raw: &Value,
    ) -> Result<Option<BotMessage>> {
        // 非内容类通知：只记日志
        match envelope.type_name.as_str() {
            "AddMsg" => {}
            "ModContacts" => {
                info!("网关下发：ModContacts 消息通知");
                return Ok(None);
            }
            "DelContacts" => {
                info!("网关下发：DelContacts 消息通知");
                return Ok(None);
            }
            "Offline" => {
                error!("收到网关下线通知");
                return Ok(None);
            }
            other => {
                warn!(type_name = %other, "无法识别的通知类型");
                return Ok(None);
            }
        }

        let Some(data) = envelope.data else {
            warn!(raw = %raw, "消息不含 data 字段");
            return Ok(None);
        };

        // 过期消息防护
        let now = chrono::Utc::now().timestamp();
        if let Some(create_time) = data.create_time {
            if create_time < now - STALE_SECONDS {
                warn!(create_time, now, "消息时间戳过旧，丢弃");
                return Ok(None);
            }
        }

        let Some(from_user_name) = data.from_user_name.as_ref().map(|f| f.string.clone()) else {
            warn!("消息缺少 FromUserName 字段");
            return Ok(None);
        };
        let Some(mut content) = data.content.as_ref().map(|c| c.string.clone()) else {
            warn!("消息缺少 Content 字段");
            return Ok(None);
        };

        let self_id = self
            .bot_wxid
            .clone()
            .unwrap_or_else(|| envelope.wxid.clone());

        // 群消息：拆分发送者前缀、剥离提及标记、双路检测 @我
        let is_group = from_user_name.contains("@chatroom");
        let mut at_me = false;
        let sender_id;
        let group_id;

        if is_group {
            if let Some((uid, rest)) = content.split_once(":\n") {
                sender_id = uid.to_string();
                content = rest.to_string();
            } else {
                sender_id = from_user_name.clone();
            }
            if content.contains('\u{2005}') {
                content = self.at_marker_re.replace_all(&content, "").to_string();
            }
            group_id = Some(from_user_name.clone());

            if data
                .msg_source
                .contains(&format!("<atuserlist><![CDATA[,{}]]>", self_id))
                || data
                    .msg_source
                    .contains(&format!("<atuserlist><![CDATA[{}]]>", self_id))
            {
                at_me = true;
            }
            if data.push_content.contains("在群聊中@了你") {
                at_me = true;
            }
        } else {
            sender_id = from_user_name.clone();
            group_id = None;
        }

        // 回声抑制与保留账号
        if sender_id == self_id {
            info!("忽略自己发送的消息");
            return Ok(None);
        }
        if RESERVED_ACCOUNTS.contains(&sender_id.as_str()) {
            info!(sender = %sender_id, "忽略保留系统账号消息");
            return Ok(None);
        }

        let message_id = data
            .msg_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // 发送者显示名称
        let display_name = match &group_id {
            Some(gid) => self.resolve_group_display_name(gid, &sender_id).await?,
            None => {
                if data.push_content.is_empty() {
                    "unknown".to_string()
                } else {
                    data.push_content
                        .split(" : ")
                        .next()
                        .unwrap_or("unknown")
                        .to_string()
                }
            }
        };

        let mut segments = Vec::new();
        if at_me {
            segments.push(MessageSegment::mention(&self_id));
        }

        // 按类型码分派内容段提取
        let Some(code) = data.msg_type else {
            warn!("消息缺少 MsgType 字段");
            return Ok(None);
        };
        let Some(msg_type) = GeweMsgType::from_code(code) else {
            info!(code, raw = %raw, "未实现的消息类型");
            return Ok(None);
        };

        match msg_type {
            GeweMsgType::Text => {
                segments.push(MessageSegment::text(&content));
            }
            GeweMsgType::Image => {
                let file_url = self.client.download_image(&content).await?;
                debug!(url = %file_url, "换取图片下载链接");
                let file_path = self
                    .media
                    .download_image_by_url(&message_id, &file_url)
                    .await?;
                segments.push(MessageSegment::Image {
                    file: file_path.display().to_string(),
                    url: file_url,
                });
            }
            GeweMsgType::Voice => {
                match data.img_buf.as_ref().and_then(|b| b.buffer.as_deref()) {
                    Some(buffer) => {
                        let file_path = self.media.save_voice(&message_id, buffer).await?;
                        segments.push(MessageSegment::Voice {
                            file: file_path.display().to_string(),
                        });
                    }
                    None => {
                        debug!("语音消息缺少 ImgBuf 载荷");
                    }
                }
            }
            GeweMsgType::Video => {
                // 只携带封面上下文，不拉取完整视频
                segments.push(MessageSegment::Video { cover: content });
            }
            GeweMsgType::Emoji => {
                if let Some(segment) = self.xml_parser.parse_emoji(&content) {
                    segments.push(segment);
                }
            }
            GeweMsgType::AppMsg => {
                if let Some(segment) = self.xml_parser.parse_appmsg(&content) {
                    segments.push(segment);
                }
            }
            GeweMsgType::FriendRequest => {
                info!("消息类型(37)：好友申请");
                return Ok(None);
            }
            GeweMsgType::Card => {
                info!("消息类型(42)：名片");
                return Ok(None);
            }
            GeweMsgType::Location => {
                info!("消息类型(48)：地理位置");
                return Ok(None);
            }
            GeweMsgType::AccountSync => {
                info!("消息类型(51)：帐号消息同步");
                return Ok(None);
            }
            GeweMsgType::GroupSystem => {
                info!("消息类型(10000)：被踢出群聊/更换群主/修改群名称");
                return Ok(None);
            }
            GeweMsgType::GroupNotice => {
                info!("消息类型(10002)：撤回/拍一拍/成员邀请/群公告/群待办");
                return Ok(None);
            }
        }

        // 不变式：不转发空消息
        if segments.is_empty() {
            debug!(message_id = %message_id, "未产出内容段，丢弃");
            return Ok(None);
        }

        let mut message = BotMessage {
            id: message_id,
            timestamp: data.create_time.unwrap_or(now),
            session_id: from_user_name.clone(),
            self_id,
            message_type: if is_group {
                MessageType::Group
            } else {
                MessageType::Friend
            },
            group_id,
            sender: Sender::new(sender_id, display_name),
            segments,
            plain_text: String::new(),
            raw: raw.clone(),
        };
        message.plain_text = message.joined_text();

        debug!(message = ?message.id, session = %message.session_id, "规范化完成");
        Ok(Some(message))
    }

    /// 解析群内发送者昵称
    ///
    /// 缓存未命中时拉取一次全量成员列表并整体填充，
    /// 把查询成本摊到该群后续的全部消息上。
    async fn resolve_group_display_name(&self, group_id: &str, user_id: &str) -> Result<String> {
        if !self.members.contains(group_id, user_id) {
            let members = self.client.get_chatroom_member_list(group_id).await?;
            debug!(group_id = %group_id, "已获取群成员列表");
            self.members.fill_group(group_id, members);
        }

        Ok(self
            .members
            .display_name(group_id, user_id)
            .unwrap_or_else(|| "unknown".to_string()))
    }

    // ==================== wcf 扁平格式 ====================

    async fn normalize_wcf(&self, record: WcfRecord, raw: &Value) -> Result<Option<BotMessage>> {
        if record.is_self {
            info!("忽略自己发送的消息");
            return Ok(None);
        }

        if record.sender.is_empty() {
            warn!("wcf 消息缺少 sender 字段");
            return Ok(None);
        }
        if RESERVED_ACCOUNTS.contains(&record.sender.as_str()) {
            info!(sender = %record.sender, "忽略保留系统账号消息");
            return Ok(None);
        }

        let now = chrono::Utc::now().timestamp();
        if let Some(ts) = record.ts {
            if ts < now - STALE_SECONDS {
                warn!(ts, now, "消息时间戳过旧，丢弃");
                return Ok(None);
            }
        }

        let Some(code) = record.msg_type else {
            warn!("wcf 消息缺少 type 字段");
            return Ok(None);
        };

        let message_id = record
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut segments = Vec::new();
        match code {
            1 => {
                if record.content.is_empty() {
                    warn!("wcf 文本消息内容为空");
                    return Ok(None);
                }
                segments.push(MessageSegment::text(&record.content));
            }
            3 => {
                if record.extra.is_empty() {
                    warn!("wcf 图片消息缺少 extra 路径");
                    return Ok(None);
                }
                segments.push(MessageSegment::Image {
                    file: record.extra.clone(),
                    url: record.extra.clone(),
                });
            }
            34 => {
                if record.extra.is_empty() {
                    warn!("wcf 语音消息缺少 extra 路径");
                    return Ok(None);
                }
                // AMR 需转换为 WAV；转换不可用时丢弃而不是转发损坏文件
                match self
                    .media
                    .transcode_to_wav(std::path::Path::new(&record.extra))
                    .await
                {
                    Ok(wav_path) => {
                        segments.push(MessageSegment::Voice {
                            file: wav_path.display().to_string(),
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "语音转换失败，丢弃该消息");
                        return Ok(None);
                    }
                }
            }
            other => {
                info!(code = other, raw = %raw, "未实现的消息类型");
                return Ok(None);
            }
        }

        if segments.is_empty() {
            debug!(message_id = %message_id, "未产出内容段，丢弃");
            return Ok(None);
        }

        let (message_type, group_id, session_id) = if record.is_group {
            (
                MessageType::Group,
                Some(record.roomid.clone()),
                format!("{}#{}", record.sender, record.roomid),
            )
        } else {
            (MessageType::Friend, None, record.sender.clone())
        };

        let mut message = BotMessage {
            id: message_id,
            timestamp: record.ts.unwrap_or(now),
            session_id,
            self_id: self.bot_wxid.clone().unwrap_or_default(),
            message_type,
            group_id,
            sender: Sender::new(record.sender.clone(), record.sender.clone()),
            segments,
            plain_text: String::new(),
            raw: raw.clone(),
        };
        message.plain_text = message.joined_text();

        debug!(message = ?message.id, session = %message.session_id, "规范化完成");
        Ok(Some(message))
    }
}
