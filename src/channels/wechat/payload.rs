//! 微信网关载荷定义模块
//!
//! 两种网关下发格式，字段命名互不兼容，规范化时分别特判：
//! - gewe 信封格式：`{TypeName, Appid, Wxid, Data{...}}`，
//!   内部字段多为 `{"string": ...}` 包装；
//! - wcf 扁平格式：`{is_self, is_group, id, type, ts, roomid, content,
//!   sender, sign, thumb, extra, xml}`。

use serde::Deserialize;
use serde_json::Value;

use crate::infra::error::{Error, Result};

/// gewe 字符串包装字段
///
/// gewe 下发的文本字段形如 `{"string": "wxid_abc"}`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StringField {
    /// 实际字符串值
    #[serde(default)]
    pub string: String,
}

/// gewe 语音缓冲字段
#[derive(Debug, Clone, Deserialize)]
pub struct ImgBuf {
    /// base64 编码的语音数据
    pub buffer: Option<String>,
}

/// gewe 消息数据体
#[derive(Debug, Clone, Deserialize)]
pub struct GeweData {
    /// 消息 ID
    #[serde(rename = "MsgId")]
    pub msg_id: Option<i64>,
    /// 消息来源（私聊为对方 wxid，群聊为群 ID）
    #[serde(rename = "FromUserName")]
    pub from_user_name: Option<StringField>,
    /// 消息接收方
    #[serde(rename = "ToUserName")]
    pub to_user_name: Option<StringField>,
    /// 消息内容
    #[serde(rename = "Content")]
    pub content: Option<StringField>,
    /// 消息类型码
    #[serde(rename = "MsgType")]
    pub msg_type: Option<i64>,
    /// 消息创建时间（Unix 秒）
    #[serde(rename = "CreateTime")]
    pub create_time: Option<i64>,
    /// 消息来源元数据（XML，含 atuserlist）
    #[serde(rename = "MsgSource", default)]
    pub msg_source: String,
    /// 推送摘要（含"在群聊中@了你"等提示）
    #[serde(rename = "PushContent", default)]
    pub push_content: String,
    /// 语音缓冲
    #[serde(rename = "ImgBuf")]
    pub img_buf: Option<ImgBuf>,
}

/// gewe 回调信封
#[derive(Debug, Clone, Deserialize)]
pub struct GeweEnvelope {
    /// 通知类型（AddMsg / ModContacts / DelContacts / Offline）
    #[serde(rename = "TypeName", alias = "type_name")]
    pub type_name: String,
    /// 应用标识
    #[serde(rename = "Appid", default)]
    pub appid: String,
    /// 机器人自身 wxid
    #[serde(rename = "Wxid", default)]
    pub wxid: String,
    /// 消息数据体
    #[serde(rename = "Data", alias = "data")]
    pub data: Option<GeweData>,
}

/// wcf 扁平消息记录
#[derive(Debug, Clone, Deserialize)]
pub struct WcfRecord {
    /// 是否机器人自己发送
    #[serde(default)]
    pub is_self: bool,
    /// 是否群聊消息
    #[serde(default)]
    pub is_group: bool,
    /// 消息 ID
    pub id: Option<u64>,
    /// 消息类型码
    #[serde(rename = "type")]
    pub msg_type: Option<u32>,
    /// 消息时间戳（Unix 秒）
    pub ts: Option<i64>,
    /// 群 ID（群聊时）
    #[serde(default)]
    pub roomid: String,
    /// 消息内容
    #[serde(default)]
    pub content: String,
    /// 发送者 wxid
    #[serde(default)]
    pub sender: String,
    /// 消息签名
    #[serde(default)]
    pub sign: String,
    /// 缩略图路径
    #[serde(default)]
    pub thumb: String,
    /// 附加数据（媒体消息的本地路径）
    #[serde(default)]
    pub extra: String,
    /// 消息来源 XML
    #[serde(default)]
    pub xml: String,
}

/// 网关载荷
///
/// 按来源网关区分的原始载荷
#[derive(Debug, Clone)]
pub enum ProviderPayload {
    /// gewe 信封格式
    Gewe(GeweEnvelope),
    /// wcf 扁平格式
    Wcf(WcfRecord),
}

impl ProviderPayload {
    /// 从原始 JSON 识别网关并解析
    ///
    /// 含 `TypeName`（或 `type_name`）键的载荷视为 gewe 信封，
    /// 其余按 wcf 扁平记录解析。
    pub fn from_value(raw: &Value) -> Result<Self> {
        if raw.get("TypeName").is_some() || raw.get("type_name").is_some() {
            let envelope: GeweEnvelope = serde_json::from_value(raw.clone())
                .map_err(|e| Error::Serialization(format!("解析 gewe 载荷失败: {}", e)))?;
            Ok(Self::Gewe(envelope))
        } else {
            let record: WcfRecord = serde_json::from_value(raw.clone())
                .map_err(|e| Error::Serialization(format!("解析 wcf 载荷失败: {}", e)))?;
            Ok(Self::Wcf(record))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_gewe_envelope() {
        let raw = json!({
            "TypeName": "AddMsg",
            "Wxid": "wxid_bot",
            "Data": {
                "FromUserName": {"string": "wxid_abc"},
                "Content": {"string": "hello"},
                "MsgType": 1,
                "CreateTime": 1700000000
            }
        });

        match ProviderPayload::from_value(&raw).unwrap() {
            ProviderPayload::Gewe(env) => {
                assert_eq!(env.type_name, "AddMsg");
                assert_eq!(env.wxid, "wxid_bot");
                let data = env.data.unwrap();
                assert_eq!(data.from_user_name.unwrap().string, "wxid_abc");
                assert_eq!(data.msg_type, Some(1));
            }
            ProviderPayload::Wcf(_) => panic!("应识别为 gewe 载荷"),
        }
    }

    #[test]
    fn test_detect_wcf_record() {
        let raw = json!({
            "is_self": false,
            "is_group": true,
            "id": 603516295724061438u64,
            "type": 1,
            "ts": 1743437563,
            "roomid": "123@chatroom",
            "content": "你好",
            "sender": "wxid_abc",
            "sign": "85bb",
            "thumb": "",
            "extra": "",
            "xml": ""
        });

        match ProviderPayload::from_value(&raw).unwrap() {
            ProviderPayload::Wcf(rec) => {
                assert!(rec.is_group);
                assert_eq!(rec.sender, "wxid_abc");
                assert_eq!(rec.msg_type, Some(1));
            }
            ProviderPayload::Gewe(_) => panic!("应识别为 wcf 载荷"),
        }
    }

    #[test]
    fn test_gewe_missing_data_is_none() {
        let raw = json!({"TypeName": "AddMsg", "Wxid": "wxid_bot"});
        match ProviderPayload::from_value(&raw).unwrap() {
            ProviderPayload::Gewe(env) => assert!(env.data.is_none()),
            _ => panic!("应识别为 gewe 载荷"),
        }
    }
}
