//! 键空间映射
//!
//! 将科目/题型/难度/搜索词等领域条件翻译为宽表的复合键与二级索引查询形状。
//!
//! 键约定：
//! - 主键 `PK = SUBJECT#<subject_id>`，`SK = QUESTION#<question_id>`
//! - 二级索引 `GSI1PK = QUESTIONS`，`GSI1SK = SUBJECT#<subject_id>#QUESTION#<question_id>`

use crate::models::{Question, QuestionFilters, QuestionKey};
use crate::services::error::QueryResult;
use crate::services::store::{
    Comparator, FilterExpression, KeyCondition, QuerySpec, StoreKey, StoredItem, TableIndex,
};
use serde_json::{Map, Value};

pub const KEY_DELIMITER: char = '#';
pub const SUBJECT_PREFIX: &str = "SUBJECT#";
pub const QUESTION_PREFIX: &str = "QUESTION#";
pub const TYPE_PREFIX: &str = "TYPE#";

/// 所有题目共享的二级索引分区
pub const QUESTION_INDEX_PARTITION: &str = "QUESTIONS";

pub const ENTITY_QUESTION: &str = "QUESTION";

// 属性名
pub const ATTR_ENTITY_TYPE: &str = "entityType";
pub const ATTR_TITLE: &str = "title";
pub const ATTR_TITLE_LOWER: &str = "titleLower";
pub const ATTR_TYPE: &str = "type";
pub const ATTR_DIFFICULTY: &str = "difficultyLevel";
pub const ATTR_PAYLOAD: &str = "payload";
pub const ATTR_CREATED_AT: &str = "createdAt";
pub const ATTR_UPDATED_AT: &str = "updatedAt";

pub fn question_pk(subject_id: &str) -> String {
    format!("{}{}", SUBJECT_PREFIX, subject_id)
}

pub fn question_sk(question_id: &str) -> String {
    format!("{}{}", QUESTION_PREFIX, question_id)
}

pub fn index_sort_key(subject_id: &str, question_id: &str) -> String {
    format!(
        "{}{}{}{}{}",
        SUBJECT_PREFIX, subject_id, KEY_DELIMITER, QUESTION_PREFIX, question_id
    )
}

/// 科目作用域前缀；未指定科目时为覆盖全部科目的哨兵前缀
pub fn subject_scope_prefix(subject_id: Option<&str>) -> String {
    match subject_id {
        Some(id) => format!("{}{}{}", SUBJECT_PREFIX, id, KEY_DELIMITER),
        None => SUBJECT_PREFIX.to_string(),
    }
}

/// 去掉 `PREFIX#` 形式的前缀，没有分隔符时原样返回
pub fn strip_key_prefix(value: &str) -> &str {
    match value.split_once(KEY_DELIMITER) {
        Some((_, rest)) => rest,
        None => value,
    }
}

pub fn store_key(key: &QuestionKey) -> StoreKey {
    StoreKey {
        pk: question_pk(&key.subject_id),
        sk: question_sk(&key.question_id),
    }
}

pub fn question_key(key: &StoreKey) -> QuestionKey {
    QuestionKey::new(strip_key_prefix(&key.pk), strip_key_prefix(&key.sk))
}

/// 构造查询规格
///
/// 键条件固定落在题目索引分区上，并以科目前缀（或全科目哨兵前缀）约束排序键；
/// 题型、难度、搜索词作为可选的 AND 过滤子句追加。搜索词按小写匹配预先
/// 计算好的 `titleLower` 字段。
pub fn build_query_spec(filters: &QuestionFilters) -> QuerySpec {
    let mut filter = FilterExpression::new();

    if let Some(question_type) = filters.question_type {
        filter = filter.and(ATTR_TYPE, Comparator::Equals, question_type.as_str());
    }
    if let Some(difficulty) = filters.difficulty {
        filter = filter.and(ATTR_DIFFICULTY, Comparator::Equals, difficulty.level());
    }
    if let Some(term) = filters.search_term.as_deref() {
        let term = term.trim().to_lowercase();
        if !term.is_empty() {
            filter = filter.and(ATTR_TITLE_LOWER, Comparator::Contains, term);
        }
    }

    QuerySpec {
        index: TableIndex::Gsi1,
        key: KeyCondition {
            partition: QUESTION_INDEX_PARTITION.to_string(),
            sort_prefix: Some(subject_scope_prefix(filters.subject_id.as_deref())),
        },
        filter,
    }
}

/// 将题目映射为宽表记录
pub fn question_to_item(question: &Question) -> QueryResult<StoredItem> {
    let mut attributes = Map::new();
    attributes.insert(ATTR_ENTITY_TYPE.into(), Value::from(ENTITY_QUESTION));
    attributes.insert(ATTR_TITLE.into(), Value::from(question.title.clone()));
    attributes.insert(
        ATTR_TITLE_LOWER.into(),
        Value::from(question.title.to_lowercase()),
    );
    attributes.insert(
        ATTR_TYPE.into(),
        Value::from(question.question_type().as_str()),
    );
    attributes.insert(
        ATTR_DIFFICULTY.into(),
        Value::from(question.difficulty.level()),
    );
    attributes.insert(ATTR_PAYLOAD.into(), serde_json::to_value(&question.payload)?);
    attributes.insert(
        ATTR_CREATED_AT.into(),
        Value::from(question.created_at.to_rfc3339()),
    );
    attributes.insert(
        ATTR_UPDATED_AT.into(),
        Value::from(question.updated_at.to_rfc3339()),
    );

    Ok(StoredItem {
        pk: question_pk(&question.subject_id),
        sk: question_sk(&question.question_id),
        gsi1_pk: Some(QUESTION_INDEX_PARTITION.to_string()),
        gsi1_sk: Some(index_sort_key(&question.subject_id, &question.question_id)),
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, QuestionType};

    #[test]
    fn missing_subject_scopes_to_all_subjects() {
        let spec = build_query_spec(&QuestionFilters::default());
        assert_eq!(spec.index, TableIndex::Gsi1);
        assert_eq!(spec.key.partition, QUESTION_INDEX_PARTITION);
        assert_eq!(spec.key.sort_prefix.as_deref(), Some("SUBJECT#"));
        assert!(spec.filter.is_empty());
    }

    #[test]
    fn subject_prefix_ends_at_delimiter() {
        // "math" 不能匹配到 "mathematics" 的题目
        let spec = build_query_spec(&QuestionFilters::for_subject("math"));
        assert_eq!(spec.key.sort_prefix.as_deref(), Some("SUBJECT#math#"));
        assert!(!index_sort_key("mathematics", "q1").starts_with("SUBJECT#math#"));
        assert!(index_sort_key("math", "q1").starts_with("SUBJECT#math#"));
    }

    #[test]
    fn optional_filters_are_aliased_and_anded() {
        let filters = QuestionFilters {
            subject_id: Some("physics".to_string()),
            question_type: Some(QuestionType::Fib),
            difficulty: Some(Difficulty::Hard),
            search_term: Some("  Newton ".to_string()),
        };
        let spec = build_query_spec(&filters);

        assert_eq!(
            spec.filter.to_string(),
            "#n0 = :v0 AND #n1 = :v1 AND contains(#n2, :v2)"
        );
        assert_eq!(spec.filter.names()["#n0"], ATTR_TYPE);
        assert_eq!(spec.filter.values()[":v0"], Value::from("FIB"));
        assert_eq!(spec.filter.values()[":v1"], Value::from(3));
        assert_eq!(spec.filter.values()[":v2"], Value::from("newton"));
    }

    #[test]
    fn prefixes_are_stripped_up_to_delimiter() {
        assert_eq!(strip_key_prefix("SUBJECT#math"), "math");
        assert_eq!(strip_key_prefix("TYPE#MCQ"), "MCQ");
        assert_eq!(strip_key_prefix("plain"), "plain");

        let key = QuestionKey::new("math", "q-1");
        assert_eq!(question_key(&store_key(&key)), key);
    }
}
