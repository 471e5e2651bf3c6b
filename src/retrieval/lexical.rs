//! 词法打分：归一化、分词、TF 权重、标题加权与精确引用识别
//!
//! 归一化规则：小写、去变音符、去标点、按空白切分，丢弃停用词与长度 ≤ 2 的 token。
//! 精确引用指「关键词 + 裸整数」（如 "rule 100"、"article 5"）；
//! 带分隔符的案号（如 "1234567-89.2024"）不是裸整数，不触发精确匹配。

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

/// 停用词表（归一化后匹配；长度 ≤ 2 的词在分词阶段已被丢弃）
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "are", "was", "were", "has", "have",
    "had", "not", "but", "his", "her", "its", "they", "them", "there", "been", "will", "shall",
    "would", "could", "should", "what", "when", "where", "which", "whose", "while", "about",
    "into", "under", "over", "between", "after", "before", "than", "then", "these", "those",
    "such", "upon", "any", "all", "can", "may", "must", "does", "did", "also", "per", "via",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// 可被精确引用的条目关键词（关键词紧跟整数，如 "rule 100"）
fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(rule|summary|article|statute|theme|note)s?\.?\s+(?:n[oº°]?\.?\s*)?(\d+)")
            .unwrap()
    })
}

/// 去变音符（拉丁字母常见重音折叠为基础字母）
fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        // 序数标记按标点处理
        'º' | 'ª' | '°' => ' ',
        other => other,
    }
}

/// 归一化：小写、去变音符、非字母数字折叠为空格
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(fold_diacritic)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect()
}

/// 分词：归一化后切分，丢弃停用词与长度 ≤ 2 的 token
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|t| t.len() > 2 && !stop_words().contains(t))
        .map(str::to_string)
        .collect()
}

/// 从文本中抽取所有「关键词 + 裸整数」引用对；整数后紧跟 [-./,]+数字 时视为案号片段而非裸整数
pub fn extract_references(text: &str) -> Vec<(String, u64)> {
    let mut refs = Vec::new();
    for caps in reference_regex().captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let rest = &text[whole.end()..];
        let mut chars = rest.chars();
        if let Some(sep) = chars.next() {
            if matches!(sep, '.' | '-' | ',' | '/')
                && chars.next().map(|c| c.is_ascii_digit()).unwrap_or(false)
            {
                continue;
            }
        }
        let keyword = caps[1].to_lowercase();
        if let Ok(number) = caps[2].parse::<u64>() {
            refs.push((keyword, number));
        }
    }
    refs
}

/// 查询是否为精确引用（触发精确匹配优先策略）
pub fn is_exact_reference(query: &str) -> bool {
    !extract_references(query).is_empty()
}

/// TF-IDF 风格打分：
/// (命中 token 数 / 查询 token 数) × Σ 1/ln(tf+2) / 查询 token 数
pub fn lexical_score(query_tokens: &[String], doc_tokens: &[String]) -> f32 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }
    let mut tf: HashMap<&str, usize> = HashMap::new();
    for t in doc_tokens {
        *tf.entry(t.as_str()).or_insert(0) += 1;
    }
    let mut matched = 0usize;
    let mut weight = 0.0f32;
    for qt in query_tokens {
        if let Some(&count) = tf.get(qt.as_str()) {
            matched += 1;
            weight += 1.0 / (count as f32 + 2.0).ln();
        }
    }
    let qlen = query_tokens.len() as f32;
    (matched as f32 / qlen) * weight / qlen
}

/// 标题加权：
/// - 查询中的「关键词 + 整数」与标题中同关键词的相同整数相邻匹配：+10
///   （整数必须完全相等，"rule 10" 不会命中 "rule 100"）
/// - 否则若归一化查询是归一化标题的子串：+5
pub fn title_boost(query: &str, title: &str) -> f32 {
    let query_refs = extract_references(query);
    if !query_refs.is_empty() {
        let title_refs = extract_references(title);
        for (kw, n) in &query_refs {
            if title_refs.iter().any(|(tk, tn)| tk == kw && tn == n) {
                return 10.0;
            }
        }
    }
    let nq = normalize(query);
    let nq = nq.split_whitespace().collect::<Vec<_>>().join(" ");
    if nq.is_empty() {
        return 0.0;
    }
    let nt = normalize(title);
    let nt = nt.split_whitespace().collect::<Vec<_>>().join(" ");
    if nt.contains(&nq) {
        return 5.0;
    }
    0.0
}
