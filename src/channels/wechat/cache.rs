//! 群成员缓存模块
//!
//! 缓存群 ID → (成员 wxid → 群内昵称) 的映射，用于把发送者 wxid
//! 解析为显示名称。首次遇到未知发送者时拉取一次全量成员列表并
//! 整体填充，将查询成本摊到该群后续的全部消息上。
//!
//! # 缓存策略
//! - 进程生命周期内常驻，无 TTL、无淘汰，仅随进程重启失效；
//! - 并发填充是幂等的：重复拉取后整体覆盖，后写者胜，
//!   对正确性无要求。

use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// 群成员缓存
#[derive(Debug, Default)]
pub struct GroupMemberCache {
    /// 群 ID → (成员 wxid → 昵称)
    groups: DashMap<String, HashMap<String, String>>,
}

impl GroupMemberCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// 查询某群内某成员的昵称
    pub fn display_name(&self, group_id: &str, user_id: &str) -> Option<String> {
        self.groups
            .get(group_id)
            .and_then(|members| members.get(user_id).cloned())
    }

    /// 是否已缓存某群且包含该成员
    pub fn contains(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .get(group_id)
            .map(|members| members.contains_key(user_id))
            .unwrap_or(false)
    }

    /// 整体填充一个群的成员表（后写者胜）
    pub fn fill_group(&self, group_id: &str, members: HashMap<String, String>) {
        debug!(group_id = %group_id, count = members.len(), "填充群成员缓存");
        self.groups.insert(group_id.to_string(), members);
    }

    /// 已缓存的群数量
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_lookup() {
        let cache = GroupMemberCache::new();
        assert!(cache.display_name("g@chatroom", "wxid_a").is_none());

        let mut members = HashMap::new();
        members.insert("wxid_a".to_string(), "小明".to_string());
        members.insert("wxid_b".to_string(), "小红".to_string());
        cache.fill_group("g@chatroom", members);

        assert_eq!(
            cache.display_name("g@chatroom", "wxid_a").as_deref(),
            Some("小明")
        );
        assert!(cache.contains("g@chatroom", "wxid_b"));
        assert!(!cache.contains("g@chatroom", "wxid_c"));
        assert_eq!(cache.group_count(), 1);
    }

    #[test]
    fn test_refill_overwrites() {
        let cache = GroupMemberCache::new();
        let mut first = HashMap::new();
        first.insert("wxid_a".to_string(), "旧昵称".to_string());
        cache.fill_group("g@chatroom", first);

        let mut second = HashMap::new();
        second.insert("wxid_a".to_string(), "新昵称".to_string());
        cache.fill_group("g@chatroom", second);

        assert_eq!(
            cache.display_name("g@chatroom", "wxid_a").as_deref(),
            Some("新昵称")
        );
    }
}
