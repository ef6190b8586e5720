// 题库领域模型
// 题目、过滤条件、查询结果与批量操作报告

use crate::services::error::{QueryError, QueryResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 选项权重总和
pub const TOTAL_WEIGHT: f64 = 100.0;

const WEIGHT_EPSILON: f64 = 1e-6;

// 标识符构成键的一部分，不允许出现键分隔符 `#`
static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-.]+$").unwrap());

/// 题目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "MCQ")]
    Mcq,
    #[serde(rename = "MSQ")]
    Msq,
    #[serde(rename = "FIB")]
    Fib,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::Msq => "MSQ",
            QuestionType::Fib => "FIB",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MCQ" => Ok(QuestionType::Mcq),
            "MSQ" => Ok(QuestionType::Msq),
            "FIB" => Ok(QuestionType::Fib),
            other => Err(QueryError::InvalidFilter(format!(
                "unknown question type '{}', expected one of MCQ, MSQ, FIB",
                other
            ))),
        }
    }
}

/// 难度等级（1-3）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Difficulty {
    Easy = 1,
    Medium = 2,
    Hard = 3,
}

impl Difficulty {
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Difficulty::Easy),
            2 => Ok(Difficulty::Medium),
            3 => Ok(Difficulty::Hard),
            other => Err(format!("difficulty level must be 1, 2 or 3, got {}", other)),
        }
    }
}

impl TryFrom<i64> for Difficulty {
    type Error = QueryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| format!("difficulty level must be 1, 2 or 3, got {}", value))
            .and_then(Difficulty::try_from)
            .map_err(QueryError::InvalidFilter)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> Self {
        d.level()
    }
}

/// 选择题选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    pub weight: f64,
    #[serde(default)]
    pub is_correct: bool,
}

/// 填空题的一个空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blank {
    pub answers: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Blank {
    /// 判断作答是否命中任一可接受答案
    pub fn accepts(&self, answer: &str) -> bool {
        let answer = answer.trim();
        self.answers.iter().any(|candidate| {
            let candidate = candidate.trim();
            if self.case_sensitive {
                candidate == answer
            } else {
                candidate.to_lowercase() == answer.to_lowercase()
            }
        })
    }
}

/// 按题型区分的题目内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum QuestionPayload {
    #[serde(rename = "MCQ")]
    Mcq { options: Vec<QuestionOption> },
    #[serde(rename = "MSQ")]
    Msq { options: Vec<QuestionOption> },
    #[serde(rename = "FIB")]
    Fib { blanks: Vec<Blank> },
}

impl QuestionPayload {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionPayload::Mcq { .. } => QuestionType::Mcq,
            QuestionPayload::Msq { .. } => QuestionType::Msq,
            QuestionPayload::Fib { .. } => QuestionType::Fib,
        }
    }

    /// 校验权重与正确答案不变量
    pub fn validate(&self) -> QueryResult<()> {
        match self {
            QuestionPayload::Mcq { options } => {
                validate_weights(options)?;
                let correct = options.iter().filter(|o| o.is_correct).count();
                if correct != 1 {
                    return Err(QueryError::InvalidQuestion(format!(
                        "MCQ must have exactly one correct option, found {}",
                        correct
                    )));
                }
                if let Some(answer) = options
                    .iter()
                    .find(|o| o.is_correct && (o.weight - TOTAL_WEIGHT).abs() > WEIGHT_EPSILON)
                {
                    return Err(QueryError::InvalidQuestion(format!(
                        "MCQ correct option '{}' must carry weight 100, got {}",
                        answer.text, answer.weight
                    )));
                }
                Ok(())
            }
            QuestionPayload::Msq { options } => {
                validate_weights(options)?;
                let correct: Vec<&QuestionOption> =
                    options.iter().filter(|o| o.is_correct).collect();
                if correct.len() < 2 {
                    return Err(QueryError::InvalidQuestion(format!(
                        "MSQ must have at least two correct options, found {}",
                        correct.len()
                    )));
                }
                let correct_weight: f64 = correct.iter().map(|o| o.weight).sum();
                if (correct_weight - TOTAL_WEIGHT).abs() > WEIGHT_EPSILON {
                    return Err(QueryError::InvalidQuestion(format!(
                        "MSQ correct option weights must sum to 100, got {}",
                        correct_weight
                    )));
                }
                Ok(())
            }
            QuestionPayload::Fib { blanks } => {
                if blanks.is_empty() {
                    return Err(QueryError::InvalidQuestion(
                        "FIB must contain at least one blank".to_string(),
                    ));
                }
                for (idx, blank) in blanks.iter().enumerate() {
                    if blank.answers.iter().all(|a| a.trim().is_empty()) {
                        return Err(QueryError::InvalidQuestion(format!(
                            "blank {} has no acceptable answer",
                            idx + 1
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn validate_weights(options: &[QuestionOption]) -> QueryResult<()> {
    if options.is_empty() {
        return Err(QueryError::InvalidQuestion(
            "choice question must have at least one option".to_string(),
        ));
    }
    if let Some(bad) = options
        .iter()
        .find(|o| !o.weight.is_finite() || o.weight < 0.0)
    {
        return Err(QueryError::InvalidQuestion(format!(
            "option '{}' has invalid weight {}",
            bad.text, bad.weight
        )));
    }
    let total: f64 = options.iter().map(|o| o.weight).sum();
    if (total - TOTAL_WEIGHT).abs() > WEIGHT_EPSILON {
        return Err(QueryError::InvalidQuestion(format!(
            "option weights must sum to 100, got {}",
            total
        )));
    }
    Ok(())
}

/// 校验科目/题目标识符
pub fn validate_identifier(kind: &str, value: &str) -> QueryResult<()> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(QueryError::InvalidQuestion(format!(
            "{} '{}' must be non-empty and contain only letters, digits, '-', '_' or '.'",
            kind, value
        )))
    }
}

/// 题目复合主键（裸标识符）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionKey {
    pub subject_id: String,
    pub question_id: String,
}

impl QuestionKey {
    pub fn new(subject_id: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            question_id: question_id.into(),
        }
    }
}

/// 题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub subject_id: String,
    pub question_id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub payload: QuestionPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    pub fn key(&self) -> QuestionKey {
        QuestionKey::new(self.subject_id.clone(), self.question_id.clone())
    }

    pub fn question_type(&self) -> QuestionType {
        self.payload.question_type()
    }

    pub fn validate(&self) -> QueryResult<()> {
        validate_identifier("subject id", &self.subject_id)?;
        validate_identifier("question id", &self.question_id)?;
        if self.title.trim().is_empty() {
            return Err(QueryError::InvalidQuestion(
                "title must not be empty".to_string(),
            ));
        }
        self.payload.validate()
    }
}

/// 新建题目（题目 ID 与时间戳由引擎分配）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub subject_id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub payload: QuestionPayload,
}

/// 对外返回的规范化题目记录
///
/// 分页、随机、搜索与单题读取返回同一形状，均包含 `created_at`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub subject_id: String,
    pub question_id: String,
    pub title: String,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub payload: QuestionPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestionRecord {
    pub fn key(&self) -> QuestionKey {
        QuestionKey::new(self.subject_id.clone(), self.question_id.clone())
    }
}

/// 查询过滤条件，全部可选
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionFilters {
    pub subject_id: Option<String>,
    pub question_type: Option<QuestionType>,
    pub difficulty: Option<Difficulty>,
    pub search_term: Option<String>,
}

impl QuestionFilters {
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Default::default()
        }
    }

    /// 从外部原始输入构造；空字符串视为未提供
    pub fn from_raw(
        subject_id: Option<&str>,
        question_type: Option<&str>,
        difficulty_level: Option<i64>,
        search_term: Option<&str>,
    ) -> QueryResult<Self> {
        let non_blank = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let subject_id = non_blank(subject_id);
        if let Some(id) = &subject_id {
            if id.contains('#') {
                return Err(QueryError::InvalidFilter(format!(
                    "subject id '{}' must not contain '#'",
                    id
                )));
            }
        }

        let question_type = non_blank(question_type)
            .map(|t| t.parse::<QuestionType>())
            .transpose()?;
        let difficulty = difficulty_level.map(Difficulty::try_from).transpose()?;

        Ok(Self {
            subject_id,
            question_type,
            difficulty,
            search_term: non_blank(search_term),
        })
    }
}

/// 查询模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    /// 单页查询，调用方驱动翻页
    Paged {
        limit: Option<usize>,
        continuation_token: Option<String>,
    },
    /// 全量枚举后均匀随机抽样
    Random { count: usize },
}

/// 查询结果页
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPage {
    pub records: Vec<QuestionRecord>,
    pub continuation_token: Option<String>,
}

/// 题目统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionStats {
    pub total_count: usize,
    pub per_difficulty_counts: BTreeMap<u8, usize>,
    pub per_type_counts: BTreeMap<QuestionType, usize>,
}

/// 单个分块写入失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub keys: Vec<QuestionKey>,
    pub error: String,
}

/// 单条记录在写入前被拒绝
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRejection {
    pub index: usize,
    pub reason: String,
}

/// 批量写入/删除报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchWriteReport {
    pub affected_count: usize,
    pub chunk_count: usize,
    pub succeeded_chunks: Vec<usize>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub rejected_items: Vec<ItemRejection>,
}

impl BatchWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}
