use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::warn;

/// Shared post-processing applied after variant-specific segmentation.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    pub lowercase: bool,
    pub min_len: usize,
    pub max_len: usize,
    pub stop_words: HashSet<String>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            min_len: 1,
            max_len: 64,
            stop_words: HashSet::new(),
        }
    }
}

/// Deterministic text -> token sequence, script-aware.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Space-joined form suitable for feeding to the lexical engine.
    fn tokenize_for_fts(&self, text: &str) -> String {
        self.tokenize(text).join(" ")
    }
}

fn post_filter(tokens: Vec<String>, config: &TokenizerConfig) -> Vec<String> {
    tokens
        .into_iter()
        .map(|t| {
            if config.lowercase {
                t.to_lowercase()
            } else {
                t
            }
        })
        .filter(|t| {
            let len = t.chars().count();
            len >= config.min_len && len <= config.max_len && !config.stop_words.contains(t)
        })
        .collect()
}

/// CJK scripts that whitespace splitting cannot segment: Han, kana, hangul.
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

// --- Simple ---

/// Splits on any rune that is neither a Unicode letter nor digit.
#[derive(Debug, Default)]
pub struct SimpleTokenizer {
    config: TokenizerConfig,
}

impl SimpleTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }
}

fn simple_split(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        post_filter(simple_split(text), &self.config)
    }
}

// --- Unicode ---

/// Category-aware segmentation: letter runs and digit runs form separate
/// tokens; every CJK rune is emitted as its own single-character token.
#[derive(Debug, Default)]
pub struct UnicodeTokenizer {
    config: TokenizerConfig,
}

impl UnicodeTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }
}

#[derive(PartialEq, Clone, Copy)]
enum RunCategory {
    Letter,
    Digit,
    None,
}

impl Tokenizer for UnicodeTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut run = String::new();
        let mut category = RunCategory::None;

        let mut flush = |run: &mut String, tokens: &mut Vec<String>| {
            if !run.is_empty() {
                tokens.push(std::mem::take(run));
            }
        };

        for c in text.chars() {
            if is_cjk(c) {
                flush(&mut run, &mut tokens);
                category = RunCategory::None;
                tokens.push(c.to_string());
            } else if c.is_alphabetic() {
                if category != RunCategory::Letter {
                    flush(&mut run, &mut tokens);
                }
                category = RunCategory::Letter;
                run.push(c);
            } else if c.is_numeric() {
                if category != RunCategory::Digit {
                    flush(&mut run, &mut tokens);
                }
                category = RunCategory::Digit;
                run.push(c);
            } else {
                flush(&mut run, &mut tokens);
                category = RunCategory::None;
            }
        }
        flush(&mut run, &mut tokens);

        post_filter(tokens, &self.config)
    }
}

// --- CJK ---

/// Common-word seed for the CJK dictionary. Two- and three-character words
/// covering the vocabulary that shows up in API catalogs.
const BUILTIN_CJK_WORDS: &[&str] = &[
    "数据库", "数据", "用户", "列表", "获取", "创建", "删除", "更新", "查询", "搜索",
    "管理", "系统", "服务", "接口", "文件", "配置", "网络", "信息", "订单", "支付",
    "商品", "地址", "消息", "时间", "状态", "权限", "日志", "版本", "应用", "程序",
    "请求", "响应", "参数", "方法", "路径", "标签", "工具", "名称", "描述", "索引",
    "缓存", "密码", "账户", "登录", "注销", "注册", "上传", "下载", "导出", "导入",
    "分页", "排序", "过滤", "统计", "报告", "任务", "项目", "团队", "成员", "角色",
    "设置", "通知", "邮件", "电话", "图片", "视频", "文档", "代码", "测试", "部署",
    "分析", "监控", "安全", "认证", "授权", "会话", "模型", "字段", "类型", "资源",
];

struct CjkDict {
    words: HashSet<String>,
    /// Longest word length in chars, bounds the forward-matching window.
    max_word_chars: usize,
}

impl CjkDict {
    fn build(extra_path: Option<&PathBuf>) -> Self {
        let mut words: HashSet<String> = BUILTIN_CJK_WORDS.iter().map(|w| w.to_string()).collect();

        if let Some(path) = extra_path {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    for line in contents.lines() {
                        let word = line.trim();
                        if !word.is_empty() && !word.starts_with('#') {
                            words.insert(word.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read CJK dictionary, using built-in words");
                }
            }
        }

        let max_word_chars = words.iter().map(|w| w.chars().count()).max().unwrap_or(1);
        Self {
            words,
            max_word_chars,
        }
    }

    fn recompute_max(&mut self) {
        self.max_word_chars = self.words.iter().map(|w| w.chars().count()).max().unwrap_or(1);
    }

    /// Forward maximum matching over one CJK run. Unknown characters are
    /// emitted as single-character tokens.
    fn segment(&self, run: &[char]) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut pos = 0;
        while pos < run.len() {
            let window = self.max_word_chars.min(run.len() - pos);
            let mut matched = 1;
            for len in (2..=window).rev() {
                let candidate: String = run[pos..pos + len].iter().collect();
                if self.words.contains(&candidate) {
                    matched = len;
                    break;
                }
            }
            tokens.push(run[pos..pos + matched].iter().collect());
            pos += matched;
        }
        tokens
    }
}

/// Forward-maximum-matching segmentation against a word dictionary.
/// Non-CJK runs fall back to simple splitting.
pub struct CjkTokenizer {
    config: TokenizerConfig,
    dict_path: RwLock<Option<PathBuf>>,
    /// Lazily built exactly once; reset by `set_dictionary_path`.
    dict: RwLock<Option<CjkDict>>,
}

impl CjkTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self {
            config,
            dict_path: RwLock::new(None),
            dict: RwLock::new(None),
        }
    }

    pub fn with_dictionary(config: TokenizerConfig, path: PathBuf) -> Self {
        let tokenizer = Self::new(config);
        *tokenizer.dict_path.write().unwrap_or_else(|e| e.into_inner()) = Some(path);
        tokenizer
    }

    /// Point at a new dictionary file; the dictionary rebuilds on next use.
    #[allow(dead_code)]
    pub fn set_dictionary_path(&self, path: Option<PathBuf>) {
        *self.dict_path.write().unwrap_or_else(|e| e.into_inner()) = path;
        *self.dict.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    #[allow(dead_code)]
    pub fn add_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_dict();
        let mut guard = self.dict.write().unwrap_or_else(|e| e.into_inner());
        if let Some(dict) = guard.as_mut() {
            for word in words {
                dict.words.insert(word.as_ref().to_string());
            }
            dict.recompute_max();
        }
    }

    #[allow(dead_code)]
    pub fn remove_words<I, S>(&self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_dict();
        let mut guard = self.dict.write().unwrap_or_else(|e| e.into_inner());
        if let Some(dict) = guard.as_mut() {
            for word in words {
                dict.words.remove(word.as_ref());
            }
            dict.recompute_max();
        }
    }

    fn ensure_dict(&self) {
        // Double-checked: readers skip the write lock once built.
        if self.dict.read().unwrap_or_else(|e| e.into_inner()).is_some() {
            return;
        }
        let mut guard = self.dict.write().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            let path = self
                .dict_path
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            *guard = Some(CjkDict::build(path.as_ref()));
        }
    }
}

impl Tokenizer for CjkTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        self.ensure_dict();
        let guard = self.dict.read().unwrap_or_else(|e| e.into_inner());
        let dict = match guard.as_ref() {
            Some(d) => d,
            None => return post_filter(simple_split(text), &self.config),
        };

        let mut tokens = Vec::new();
        let mut cjk_run: Vec<char> = Vec::new();
        let mut other_run = String::new();

        for c in text.chars() {
            if is_cjk(c) {
                if !other_run.is_empty() {
                    tokens.extend(simple_split(&other_run));
                    other_run.clear();
                }
                cjk_run.push(c);
            } else {
                if !cjk_run.is_empty() {
                    tokens.extend(dict.segment(&cjk_run));
                    cjk_run.clear();
                }
                other_run.push(c);
            }
        }
        if !cjk_run.is_empty() {
            tokens.extend(dict.segment(&cjk_run));
        }
        if !other_run.is_empty() {
            tokens.extend(simple_split(&other_run));
        }

        post_filter(tokens, &self.config)
    }
}
