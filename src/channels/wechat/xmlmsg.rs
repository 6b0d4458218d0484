//! 微信 XML 子消息解析模块
//!
//! 表情包（类型 47）与 appmsg（类型 49：公众号/文件/引用/转账/红包等）
//! 的内容是嵌在消息体里的 XML，本模块从中提取出类型化的消息段。
//!
//! 网关下发的 XML 结构松散且无 schema，这里按原始实现的方式做
//! 标签/属性抽取，不做完整的 XML 解析。

use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::message::types::MessageSegment;

/// appmsg 子类型码
mod appmsg_type {
    pub const LINK: i64 = 5;
    pub const FILE: i64 = 6;
    pub const QUOTE: i64 = 57;
    pub const TRANSFER: i64 = 2000;
    pub const RED_PACKET: i64 = 2001;
}

/// XML 子消息解析器
///
/// 正则在构造时编译一次，随适配器实例存活。
pub struct XmlMsgParser {
    attr_re: Regex,
    tag_res: HashMap<&'static str, Regex>,
}

/// 会被抽取正文的标签集合
const KNOWN_TAGS: &[&str] = &[
    "type",
    "title",
    "des",
    "url",
    "content",
    "pay_memo",
    "sendertitle",
];

impl XmlMsgParser {
    /// 创建解析器
    pub fn new() -> Self {
        let mut tag_res = HashMap::new();
        for tag in KNOWN_TAGS {
            // 标签正文，CDATA 与裸文本均可能出现
            let re = Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>"))
                .expect("编译标签正则失败");
            tag_res.insert(*tag, re);
        }

        Self {
            // 属性形如 md5="..."（单双引号均可能出现）
            attr_re: Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*["']([^"']*)["']"#)
                .expect("编译属性正则失败"),
            tag_res,
        }
    }

    /// 解析表情包消息（类型 47）
    ///
    /// 从 `<emoji md5="..." len="..." cdnurl="..."/>` 中提取表情段；
    /// 缺少 md5 时仍返回段，发送侧会降级为图片。
    pub fn parse_emoji(&self, content: &str) -> Option<MessageSegment> {
        let emoji_part = match content.find("<emoji") {
            Some(pos) => &content[pos..],
            None => {
                debug!("表情包消息中未找到 emoji 节点");
                return None;
            }
        };

        let mut md5 = String::new();
        let mut len = String::new();
        let mut cdn_url = None;
        for caps in self.attr_re.captures_iter(emoji_part) {
            match &caps[1] {
                "md5" => md5 = caps[2].to_string(),
                "len" => len = caps[2].to_string(),
                "cdnurl" => cdn_url = Some(caps[2].to_string()),
                _ => {}
            }
        }

        if md5.is_empty() && cdn_url.is_none() {
            debug!("表情包消息缺少 md5 与 cdnurl");
            return None;
        }

        Some(MessageSegment::Emoji {
            md5,
            size: len,
            cdn_url,
        })
    }

    /// 解析 appmsg 消息（类型 49）
    ///
    /// 按 `<type>` 子类型码分派；未识别的子类型丢弃。
    pub fn parse_appmsg(&self, content: &str) -> Option<MessageSegment> {
        let sub_type: i64 = self
            .tag_text(content, "type")
            .and_then(|t| t.trim().parse().ok())?;

        match sub_type {
            appmsg_type::LINK => Some(MessageSegment::Link {
                title: self.tag_text(content, "title").unwrap_or_default(),
                desc: self.tag_text(content, "des").unwrap_or_default(),
                url: self.tag_text(content, "url").unwrap_or_default(),
            }),
            appmsg_type::FILE => Some(MessageSegment::File {
                name: self.tag_text(content, "title").unwrap_or_default(),
                url: self.tag_text(content, "url"),
            }),
            appmsg_type::QUOTE => {
                let text = self.tag_text(content, "title").unwrap_or_default();
                // refermsg 里的 content 是被引用的原文
                let quoted = content
                    .find("<refermsg>")
                    .and_then(|pos| self.tag_text(&content[pos..], "content"))
                    .unwrap_or_default();
                Some(MessageSegment::Quote { text, quoted })
            }
            appmsg_type::TRANSFER => Some(MessageSegment::Transfer {
                memo: self.tag_text(content, "pay_memo").unwrap_or_default(),
            }),
            appmsg_type::RED_PACKET => Some(MessageSegment::RedPacket {
                title: self.tag_text(content, "sendertitle").unwrap_or_default(),
            }),
            other => {
                warn!(sub_type = other, "未识别的 appmsg 子类型，丢弃");
                None
            }
        }
    }

    /// 提取指定标签第一次出现的正文，剥离 CDATA 包装
    fn tag_text(&self, xml: &str, tag: &str) -> Option<String> {
        let re = self.tag_res.get(tag)?;
        re.captures(xml).map(|caps| strip_cdata(&caps[1]))
    }
}

impl Default for XmlMsgParser {
    fn default() -> Self {
        Self::new()
    }
}

/// 剥离 `<![CDATA[...]]>` 包装
fn strip_cdata(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(trimmed)
        .to_string()
}
