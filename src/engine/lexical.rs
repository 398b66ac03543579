use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{RESULT_LIMIT, SearchEngine, empty_query_slice};
use crate::error::BridgeError;
use crate::registry::ToolMetadata;
use crate::tokenize::Tokenizer;

// BM25 parameters: k1 = term frequency saturation, b = length normalization.
const K1: f64 = 1.2;
const B: f64 = 0.75;
/// Name-field matches count double.
const NAME_WEIGHT: usize = 2;

/// Columns addressable as `field:term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Id,
    Name,
    Description,
    Method,
    Path,
    Tags,
}

const ALL_FIELDS: [Field; 6] = [
    Field::Id,
    Field::Name,
    Field::Description,
    Field::Method,
    Field::Path,
    Field::Tags,
];

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "id" => Self::Id,
            "name" => Self::Name,
            "description" => Self::Description,
            "method" => Self::Method,
            "path" => Self::Path,
            "tags" => Self::Tags,
            _ => return None,
        })
    }

    fn weight(self) -> usize {
        if self == Field::Name { NAME_WEIGHT } else { 1 }
    }
}

struct IndexedDoc {
    meta: ToolMetadata,
    fields: HashMap<Field, Vec<String>>,
    /// Weighted token count (name counted double).
    length: usize,
}

/// Keyword and boolean matching with BM25 ranking.
///
/// Query language: bare terms (implicit AND), `"phrases"`, `AND` / `OR` /
/// `NOT` (binary, as in FTS5), trailing-`*` prefix terms, and column
/// qualifiers `field:term`. Indexed text and query terms run through the
/// configured tokenizer so non-whitespace scripts match correctly.
pub struct LexicalEngine {
    tokenizer: Arc<dyn Tokenizer>,
    docs: RwLock<Vec<IndexedDoc>>,
}

impl LexicalEngine {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            docs: RwLock::new(Vec::new()),
        }
    }

    fn index_one(&self, meta: &ToolMetadata) -> IndexedDoc {
        let mut fields = HashMap::new();
        fields.insert(Field::Id, self.tokenizer.tokenize(&meta.id));
        fields.insert(Field::Name, self.tokenizer.tokenize(&meta.name));
        fields.insert(Field::Description, self.tokenizer.tokenize(&meta.description));
        fields.insert(Field::Method, vec![meta.method.to_lowercase()]);
        fields.insert(Field::Path, self.tokenizer.tokenize(&meta.path));
        fields.insert(
            Field::Tags,
            meta.tags
                .iter()
                .flat_map(|t| self.tokenizer.tokenize(t))
                .collect(),
        );
        let length = ALL_FIELDS
            .iter()
            .map(|f| fields.get(f).map_or(0, |t| t.len() * f.weight()))
            .sum();
        IndexedDoc {
            meta: meta.clone(),
            fields,
            length,
        }
    }
}

#[async_trait]
impl SearchEngine for LexicalEngine {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn index(&self, tools: &[ToolMetadata]) -> Result<(), BridgeError> {
        let indexed: Vec<IndexedDoc> = tools.iter().map(|m| self.index_one(m)).collect();
        *self.docs.write().unwrap_or_else(|e| e.into_inner()) = indexed;
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolMetadata>, BridgeError> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        if query.trim().is_empty() {
            let catalog: Vec<ToolMetadata> = docs.iter().map(|d| d.meta.clone()).collect();
            return Ok(empty_query_slice(&catalog));
        }

        let Some(ast) = parse_query(query, self.tokenizer.as_ref())? else {
            // Every term filtered out by tokenization: nothing can match.
            return Ok(Vec::new());
        };

        let mut positive = Vec::new();
        collect_positive_terms(&ast, &mut positive);

        // Ranking statistics come from documents containing at least one
        // positive term, so unrelated catalog growth cannot reorder results.
        let universe: Vec<&IndexedDoc> = docs
            .iter()
            .filter(|d| positive.iter().any(|t| term_frequency(d, t) > 0))
            .collect();
        if universe.is_empty() {
            return Ok(Vec::new());
        }

        let n = universe.len() as f64;
        let avgdl = universe.iter().map(|d| d.length as f64).sum::<f64>() / n;
        let df: Vec<f64> = positive
            .iter()
            .map(|t| {
                universe
                    .iter()
                    .filter(|d| term_frequency(d, t) > 0)
                    .count() as f64
            })
            .collect();

        let mut scored: Vec<(usize, &IndexedDoc, f64)> = Vec::new();
        for (pos, doc) in docs.iter().enumerate() {
            if !eval(&ast, doc) {
                continue;
            }
            let dl = doc.length as f64;
            let mut score = 0.0f64;
            for (term, &doc_freq) in positive.iter().zip(df.iter()) {
                let tf = term_frequency(doc, term) as f64;
                if tf == 0.0 {
                    continue;
                }
                let idf = ((n - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln();
                let tf_norm = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl));
                score += idf * tf_norm;
            }
            scored.push((pos, doc, score));
        }

        // Descending score; insertion order breaks ties.
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(RESULT_LIMIT);
        Ok(scored.into_iter().map(|(_, d, _)| d.meta.clone()).collect())
    }
}

// --- Query AST ---

#[derive(Debug, Clone)]
enum Node {
    Term(TermSpec),
    Phrase { field: Option<Field>, tokens: Vec<String> },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    /// Binary exclusion: left must match, right must not.
    Not(Box<Node>, Box<Node>),
}

#[derive(Debug, Clone)]
struct TermSpec {
    field: Option<Field>,
    token: String,
    prefix: bool,
}

fn term_matches(doc: &IndexedDoc, spec: &TermSpec) -> bool {
    term_frequency(doc, spec) > 0
}

/// Weighted occurrence count of a term in a document.
fn term_frequency(doc: &IndexedDoc, spec: &TermSpec) -> usize {
    let fields: &[Field] = match spec.field {
        Some(ref f) => std::slice::from_ref(f),
        None => &ALL_FIELDS,
    };
    let mut count = 0;
    for field in fields {
        let Some(tokens) = doc.fields.get(field) else {
            continue;
        };
        let matches = tokens
            .iter()
            .filter(|t| {
                if spec.prefix {
                    t.starts_with(&spec.token)
                } else {
                    *t == &spec.token
                }
            })
            .count();
        count += matches * field.weight();
    }
    count
}

fn phrase_matches(doc: &IndexedDoc, field: Option<Field>, phrase: &[String]) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let fields: &[Field] = match field {
        Some(ref f) => std::slice::from_ref(f),
        None => &ALL_FIELDS,
    };
    fields.iter().any(|f| {
        doc.fields
            .get(f)
            .map(|tokens| tokens.windows(phrase.len()).any(|w| w == phrase))
            .unwrap_or(false)
    })
}

fn eval(node: &Node, doc: &IndexedDoc) -> bool {
    match node {
        Node::Term(spec) => term_matches(doc, spec),
        Node::Phrase { field, tokens } => phrase_matches(doc, *field, tokens),
        Node::And(a, b) => eval(a, doc) && eval(b, doc),
        Node::Or(a, b) => eval(a, doc) || eval(b, doc),
        Node::Not(a, b) => eval(a, doc) && !eval(b, doc),
    }
}

/// Terms contributing to the BM25 score: everything outside NOT exclusions.
fn collect_positive_terms(node: &Node, out: &mut Vec<TermSpec>) {
    match node {
        Node::Term(spec) => out.push(spec.clone()),
        Node::Phrase { field, tokens } => {
            for token in tokens {
                out.push(TermSpec {
                    field: *field,
                    token: token.clone(),
                    prefix: false,
                });
            }
        }
        Node::And(a, b) | Node::Or(a, b) => {
            collect_positive_terms(a, out);
            collect_positive_terms(b, out);
        }
        Node::Not(a, _) => collect_positive_terms(a, out),
    }
}

// --- Query parsing ---

#[derive(Debug, PartialEq)]
enum RawToken {
    And,
    Or,
    Not,
    Word(String),
    Quoted { field: Option<String>, text: String },
}

fn lex_query(query: &str) -> Result<Vec<RawToken>, BridgeError> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        let mut quoted: Option<String> = None;
        let mut field: Option<String> = None;
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            if c == '"' {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(BridgeError::InvalidArgument(
                        "unbalanced quote in search query".into(),
                    ));
                }
                if !word.is_empty() {
                    // `field:"some phrase"`
                    field = Some(word.trim_end_matches(':').to_string());
                    word.clear();
                }
                quoted = Some(text);
                break;
            }
            word.push(c);
            chars.next();
        }

        if let Some(text) = quoted {
            tokens.push(RawToken::Quoted { field, text });
        } else if !word.is_empty() {
            match word.as_str() {
                "AND" => tokens.push(RawToken::And),
                "OR" => tokens.push(RawToken::Or),
                "NOT" => tokens.push(RawToken::Not),
                _ => tokens.push(RawToken::Word(word)),
            }
        }
    }
    Ok(tokens)
}

/// Parse the query language into an AST. Returns `None` when tokenization
/// leaves nothing searchable.
fn parse_query(query: &str, tokenizer: &dyn Tokenizer) -> Result<Option<Node>, BridgeError> {
    let raw = lex_query(query)?;
    let mut parser = QueryParser {
        raw,
        pos: 0,
        tokenizer,
    };
    let node = parser.parse_or()?;
    if parser.pos != parser.raw.len() {
        return Err(BridgeError::InvalidArgument(format!(
            "dangling operator in search query: {query}"
        )));
    }
    Ok(node)
}

struct QueryParser<'a> {
    raw: Vec<RawToken>,
    pos: usize,
    tokenizer: &'a dyn Tokenizer,
}

impl QueryParser<'_> {
    fn peek(&self) -> Option<&RawToken> {
        self.raw.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<Option<Node>, BridgeError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&RawToken::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = match (left, right) {
                (Some(l), Some(r)) => Some(Node::Or(Box::new(l), Box::new(r))),
                (Some(l), None) => Some(l),
                (None, r) => r,
            };
        }
        Ok(left)
    }

    /// Adjacent items are implicit AND; `a NOT b` excludes b from a.
    fn parse_and(&mut self) -> Result<Option<Node>, BridgeError> {
        let mut left = self.parse_item()?;
        loop {
            match self.peek() {
                Some(RawToken::And) => {
                    self.pos += 1;
                    let right = self.require_item()?;
                    left = combine_and(left, right);
                }
                Some(RawToken::Not) => {
                    self.pos += 1;
                    let right = self.require_item()?;
                    left = match (left, right) {
                        (Some(l), Some(r)) => Some(Node::Not(Box::new(l), Box::new(r))),
                        (l, None) => l,
                        (None, _) => {
                            return Err(BridgeError::InvalidArgument(
                                "NOT requires a left-hand term".into(),
                            ));
                        }
                    };
                }
                Some(RawToken::Word(_)) | Some(RawToken::Quoted { .. }) => {
                    let right = self.parse_item()?;
                    left = combine_and(left, right);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn require_item(&mut self) -> Result<Option<Node>, BridgeError> {
        match self.peek() {
            Some(RawToken::Word(_)) | Some(RawToken::Quoted { .. }) => self.parse_item(),
            _ => Err(BridgeError::InvalidArgument(
                "operator requires a following term".into(),
            )),
        }
    }

    fn parse_item(&mut self) -> Result<Option<Node>, BridgeError> {
        let token = match self.raw.get(self.pos) {
            Some(t) => t,
            None => {
                return Err(BridgeError::InvalidArgument(
                    "search query ended unexpectedly".into(),
                ));
            }
        };
        match token {
            RawToken::Quoted { field, text } => {
                let field = resolve_field(field.as_deref())?;
                let tokens = self.tokenizer.tokenize(text);
                self.pos += 1;
                if tokens.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Node::Phrase { field, tokens }))
            }
            RawToken::Word(word) => {
                let word = word.clone();
                self.pos += 1;
                self.word_to_node(&word)
            }
            other => Err(BridgeError::InvalidArgument(format!(
                "unexpected token in search query: {other:?}"
            ))),
        }
    }

    fn word_to_node(&self, word: &str) -> Result<Option<Node>, BridgeError> {
        let (field, rest) = match word.split_once(':') {
            Some((f, rest)) => (resolve_field(Some(f))?, rest),
            None => (None, word),
        };
        let (stem, prefix) = match rest.strip_suffix('*') {
            Some(stem) => (stem, true),
            None => (rest, false),
        };
        if field.is_some() && stem.is_empty() {
            return Err(BridgeError::InvalidArgument(format!(
                "empty value in column filter '{word}'"
            )));
        }

        let mut tokens = self.tokenizer.tokenize(stem);
        if tokens.is_empty() {
            return Ok(None);
        }
        // Multi-token words (CJK runs, hyphenated terms) become implicit AND;
        // a trailing `*` applies to the last token.
        let last = tokens.len() - 1;
        let mut node: Option<Node> = None;
        for (i, token) in tokens.drain(..).enumerate() {
            let term = Node::Term(TermSpec {
                field,
                token,
                prefix: prefix && i == last,
            });
            node = combine_and(node, Some(term));
        }
        Ok(node)
    }
}

fn combine_and(left: Option<Node>, right: Option<Node>) -> Option<Node> {
    match (left, right) {
        (Some(l), Some(r)) => Some(Node::And(Box::new(l), Box::new(r))),
        (Some(l), None) => Some(l),
        (None, r) => r,
    }
}

fn resolve_field(name: Option<&str>) -> Result<Option<Field>, BridgeError> {
    match name {
        None => Ok(None),
        Some(raw) => Field::from_name(raw).map(Some).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("unknown search column '{raw}'"))
        }),
    }
}
