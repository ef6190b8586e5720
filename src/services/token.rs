//! 续页令牌的文本编解码
//!
//! 令牌跨越文本边界（URL 查询参数、JSON 字段）时先序列化为 JSON 再做 URL 编码。
//! 无法解析的令牌一律视为"无令牌"，从头开始，不作为致命错误。

use crate::services::error::{QueryError, QueryResult};
use crate::services::store::ContinuationToken;

pub fn encode_token(token: &ContinuationToken) -> QueryResult<String> {
    let json = serde_json::to_string(token)?;
    Ok(urlencoding::encode(&json).into_owned())
}

/// 严格解码，失败时返回 `MalformedContinuationToken`
pub fn decode_token_strict(raw: &str) -> QueryResult<ContinuationToken> {
    let json = urlencoding::decode(raw)
        .map_err(|e| QueryError::MalformedContinuationToken(format!("not url-encoded: {}", e)))?;
    serde_json::from_str(&json)
        .map_err(|e| QueryError::MalformedContinuationToken(format!("not a store key: {}", e)))
}

/// 宽松解码：空或无法解析的令牌返回 `None`
pub fn decode_token(raw: Option<&str>) -> Option<ContinuationToken> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match decode_token_strict(raw) {
        Ok(token) => Some(token),
        Err(e) => {
            log::warn!("ignoring continuation token, starting from the beginning: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn token() -> ContinuationToken {
        ContinuationToken {
            pk: "SUBJECT#math".to_string(),
            sk: "QUESTION#a b/c?&=".to_string(),
            gsi1_pk: Some("QUESTIONS".to_string()),
            gsi1_sk: Some("SUBJECT#math#QUESTION#a b/c?&=".to_string()),
        }
    }

    #[test]
    fn encoded_token_is_url_safe_and_exact() {
        let encoded = encode_token(&token()).unwrap();
        assert!(!encoded.contains(['#', ' ', '&', '?', '/', '"']));
        assert_eq!(decode_token(Some(&encoded)), Some(token()));
    }

    #[test]
    fn malformed_tokens_fall_back_to_start() {
        assert_eq!(decode_token(None), None);
        assert_eq!(decode_token(Some("   ")), None);
        assert_eq!(decode_token(Some("not-json")), None);
        assert_eq!(decode_token(Some("%7B%22PK%22%3A1%7D")), None);
        assert_eq!(decode_token(Some("%E0%A4%A")), None);
    }

    #[test]
    fn strict_decoding_reports_the_malformed_kind() {
        assert_matches!(
            decode_token_strict("{\"PK\":\"x\"}"),
            Err(QueryError::MalformedContinuationToken(_))
        );
    }
}
