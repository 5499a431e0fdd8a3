//! JSONSelect expressions for document validation.
//!
//! A selector is tested against every node of a document, the root included,
//! and yields the nodes it matches in document order. A document "matches"
//! when at least one node is selected.
//!
//! Supported syntax:
//! - `object`, `array`, `string`, `number`, `boolean`, `null`, `*` - node type
//! - `.key`, `."quoted key"` - node stored under `key` in its parent object,
//!   at any depth
//! - `:root`, `:first-child`, `:last-child`, `:only-child`, `:empty`
//! - `:nth-child(an+b)`, `:nth-last-child(an+b)` - position in the parent array
//! - `:val(<json>)` - node equal to the literal
//! - `:contains("text")` - string node containing `text`
//! - `:has(<selector>)` - node with a descendant matching `<selector>`
//! - `A B` descendant, `A > B` child, `A ~ B` sibling, `A, B` either
//!
//! ```
//! use bucketlib::selector::matches;
//! use serde_json::json;
//!
//! let doc = json!({"order": {"items": [{"sku": "A1"}, {"sku": "B2"}]}});
//! assert!(matches(&doc, r#".sku:val("B2")"#).unwrap());
//! assert!(matches(&doc, r#".order > .items > :first-child > .sku"#).unwrap());
//! assert!(!matches(&doc, ".order > .sku").unwrap());
//! ```

use std::str::FromStr;

use serde_json::Value;

/// Errors raised while parsing a selector expression.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of selector")]
    UnexpectedEnd,

    #[error("empty key at position {0}")]
    EmptyKey(usize),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("unknown pseudo-class ':{0}'")]
    UnknownPseudo(String),

    #[error("':{0}' needs an argument")]
    MissingArgument(String),

    #[error("invalid argument for ':{pseudo}': {argument}")]
    InvalidArgument { pseudo: String, argument: String },

    #[error("invalid literal in :val(): {0}")]
    InvalidLiteral(String),

    #[error("unclosed string starting at position {0}")]
    UnclosedString(usize),

    #[error("unclosed parenthesis starting at position {0}")]
    UnclosedParen(usize),
}

/// JSON type a node can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
}

impl NodeType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "object" => Some(NodeType::Object),
            "array" => Some(NodeType::Array),
            "string" => Some(NodeType::String),
            "number" => Some(NodeType::Number),
            "boolean" => Some(NodeType::Boolean),
            "null" => Some(NodeType::Null),
            _ => None,
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => NodeType::Object,
            Value::Array(_) => NodeType::Array,
            Value::String(_) => NodeType::String,
            Value::Number(_) => NodeType::Number,
            Value::Bool(_) => NodeType::Boolean,
            Value::Null => NodeType::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Pseudo {
    Root,
    /// Matches position `step * k + offset` for some `k >= 0`, counted from 1.
    NthChild {
        step: i64,
        offset: i64,
        from_end: bool,
    },
    OnlyChild,
    Empty,
    Val(Value),
    Contains(String),
    Has(Selector),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    Sibling,
}

/// Type, keys and pseudo-classes that must all hold for one node.
#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    node_type: Option<NodeType>,
    keys: Vec<String>,
    pseudos: Vec<Pseudo>,
}

/// Compounds joined by combinators, read left to right.
#[derive(Debug, Clone, PartialEq)]
struct Complex {
    compounds: Vec<Compound>,
    combinators: Vec<Combinator>,
}

/// A parsed selector expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    alternatives: Vec<Complex>,
}

/// A document node together with where it sits in its parent.
#[derive(Debug, Clone, Copy)]
struct Node<'a> {
    value: &'a Value,
    key: Option<&'a str>,
    /// 0-based position and length of the parent array.
    position: Option<(usize, usize)>,
    parent: Option<&'a Value>,
}

impl<'a> Node<'a> {
    fn root(value: &'a Value) -> Self {
        Self {
            value,
            key: None,
            position: None,
            parent: None,
        }
    }
}

fn children(value: &Value) -> Vec<Node<'_>> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, child)| Node {
                value: child,
                key: Some(key.as_str()),
                position: None,
                parent: Some(value),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, child)| Node {
                value: child,
                key: None,
                position: Some((i, items.len())),
                parent: Some(value),
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl Selector {
    /// Every node of `document` matched by this selector, in document order.
    #[must_use]
    pub fn select<'a>(&self, document: &'a Value) -> Vec<&'a Value> {
        let mut out = Vec::new();
        self.walk(&mut vec![Node::root(document)], true, &mut out);
        out
    }

    /// Whether at least one node is selected.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        !self.select(document).is_empty()
    }

    fn walk<'a>(&self, path: &mut Vec<Node<'a>>, include_self: bool, out: &mut Vec<&'a Value>) {
        let Some(&node) = path.last() else {
            return;
        };
        if include_self && self.matches_path(path) {
            out.push(node.value);
        }
        for child in children(node.value) {
            path.push(child);
            self.walk(path, true, out);
            path.pop();
        }
    }

    /// Whether the last node of `path` matches, given its ancestors.
    fn matches_path(&self, path: &[Node<'_>]) -> bool {
        self.alternatives.iter().any(|complex| {
            complex
                .compounds
                .len()
                .checked_sub(1)
                .is_some_and(|last| complex.matches_path(last, path))
        })
    }

    /// Whether some node strictly below `value` matches. `value` is treated
    /// as a root.
    fn matches_below(&self, value: &Value) -> bool {
        let mut out = Vec::new();
        self.walk(&mut vec![Node::root(value)], false, &mut out);
        !out.is_empty()
    }
}

impl Complex {
    fn matches_path(&self, at: usize, path: &[Node<'_>]) -> bool {
        let Some((node, ancestors)) = path.split_last() else {
            return false;
        };
        let Some(compound) = self.compounds.get(at) else {
            return false;
        };
        if !compound.matches(node) {
            return false;
        }
        let Some(previous) = at.checked_sub(1) else {
            return true;
        };

        match self.combinators.get(previous) {
            Some(Combinator::Child) => self.matches_path(previous, ancestors),
            Some(Combinator::Descendant) => {
                (1..=ancestors.len()).any(|end| self.matches_path(previous, &ancestors[..end]))
            }
            Some(Combinator::Sibling) => {
                let Some(parent) = node.parent else {
                    return false;
                };
                children(parent)
                    .into_iter()
                    .filter(|sibling| !std::ptr::eq(sibling.value, node.value))
                    .any(|sibling| {
                        let mut sibling_path = ancestors.to_vec();
                        sibling_path.push(sibling);
                        self.matches_path(previous, &sibling_path)
                    })
            }
            None => false,
        }
    }
}

impl Compound {
    fn matches(&self, node: &Node<'_>) -> bool {
        if let Some(node_type) = self.node_type
            && NodeType::of(node.value) != node_type
        {
            return false;
        }
        self.keys.iter().all(|key| node.key == Some(key.as_str()))
            && self.pseudos.iter().all(|pseudo| pseudo.matches(node))
    }
}

impl Pseudo {
    fn matches(&self, node: &Node<'_>) -> bool {
        match self {
            Pseudo::Root => node.parent.is_none(),
            Pseudo::NthChild {
                step,
                offset,
                from_end,
            } => node.position.is_some_and(|(i, len)| {
                let n = if *from_end { len - i } else { i + 1 };
                nth_matches(*step, *offset, n)
            }),
            Pseudo::OnlyChild => node.position.is_some_and(|(_, len)| len == 1),
            Pseudo::Empty => match node.value {
                Value::Object(map) => map.is_empty(),
                Value::Array(items) => items.is_empty(),
                _ => false,
            },
            Pseudo::Val(expected) => node.value == expected,
            Pseudo::Contains(text) => node
                .value
                .as_str()
                .is_some_and(|s| s.contains(text.as_str())),
            Pseudo::Has(selector) => selector.matches_below(node.value),
        }
    }
}

fn nth_matches(step: i64, offset: i64, n: usize) -> bool {
    let Ok(n) = i64::try_from(n) else {
        return false;
    };
    if step == 0 {
        return n == offset;
    }
    let diff = n - offset;
    diff % step == 0 && diff / step >= 0
}

/// Parse an `an+b` argument, also accepting `odd`, `even` and plain numbers.
fn parse_nth(argument: &str) -> Option<(i64, i64)> {
    let compact: String = argument
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();

    match compact.as_str() {
        "odd" => return Some((2, 1)),
        "even" => return Some((2, 0)),
        _ => {}
    }

    match compact.split_once('n') {
        Some((step, offset)) => {
            let step = match step {
                "" | "+" => 1,
                "-" => -1,
                other => other.parse().ok()?,
            };
            let offset = if offset.is_empty() {
                0
            } else if offset.starts_with(['+', '-']) {
                offset.parse().ok()?
            } else {
                return None;
            };
            Some((step, offset))
        }
        None => Some((0, compact.parse().ok()?)),
    }
}

/// Parse `expression` and test it against `document`.
///
/// # Errors
///
/// Returns `SelectorError` if the expression cannot be parsed.
pub fn matches(document: &Value, expression: &str) -> Result<bool, SelectorError> {
    let selector: Selector = expression.parse()?;
    Ok(selector.matches(document))
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(SelectorError::Empty);
        }

        let chars: Vec<char> = s.chars().collect();
        let mut parser = Parser {
            chars: &chars,
            pos: 0,
        };
        let selector = parser.selector()?;
        parser.skip_whitespace();
        match parser.peek() {
            Some(c) => Err(SelectorError::UnexpectedChar(c, parser.pos)),
            None => Ok(selector),
        }
    }
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(c) => SelectorError::UnexpectedChar(c, self.pos),
            None => SelectorError::UnexpectedEnd,
        }
    }

    /// Skip whitespace, returning whether any was skipped.
    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn selector(&mut self) -> Result<Selector, SelectorError> {
        let mut alternatives = vec![self.complex()?];
        loop {
            self.skip_whitespace();
            if self.peek() != Some(',') {
                break;
            }
            self.pos += 1;
            alternatives.push(self.complex()?);
        }
        Ok(Selector { alternatives })
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        self.skip_whitespace();
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();

        loop {
            let spaced = self.skip_whitespace();
            let combinator = match self.peek() {
                Some('>') => {
                    self.pos += 1;
                    Combinator::Child
                }
                Some('~') => {
                    self.pos += 1;
                    Combinator::Sibling
                }
                None | Some(',') => break,
                Some(_) if spaced => Combinator::Descendant,
                Some(_) => return Err(self.unexpected()),
            };
            self.skip_whitespace();
            combinators.push(combinator);
            compounds.push(self.compound()?);
        }

        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut universal = false;

        match self.peek() {
            Some('*') => {
                self.pos += 1;
                universal = true;
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let name = self.identifier();
                compound.node_type =
                    Some(NodeType::from_name(&name).ok_or(SelectorError::UnknownType(name))?);
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    let key = self.key()?;
                    compound.keys.push(key);
                }
                Some(':') => {
                    self.pos += 1;
                    let pseudo = self.pseudo()?;
                    compound.pseudos.push(pseudo);
                }
                _ => break,
            }
        }

        if !universal && compound == Compound::default() {
            return Err(self.unexpected());
        }
        Ok(compound)
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '$'))
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn key(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        let key = if self.peek() == Some('"') {
            self.string()?
        } else {
            self.identifier()
        };
        if key.is_empty() {
            return Err(SelectorError::EmptyKey(start));
        }
        Ok(key)
    }

    /// A JSON string literal starting at the current position.
    fn string(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        let mut end = start + 1;
        loop {
            match self.chars.get(end) {
                None => return Err(SelectorError::UnclosedString(start)),
                Some('\\') => end += 2,
                Some('"') => break,
                Some(_) => end += 1,
            }
        }

        let raw: String = self.chars[start..=end].iter().collect();
        self.pos = end + 1;
        serde_json::from_str(&raw)
            .map_err(|e| SelectorError::InvalidLiteral(format!("{raw}: {e}")))
    }

    fn pseudo(&mut self) -> Result<Pseudo, SelectorError> {
        let name = self.identifier();
        if name.is_empty() {
            return Err(self.unexpected());
        }

        let pseudo = match name.as_str() {
            "root" => Pseudo::Root,
            "first-child" | "last-child" => Pseudo::NthChild {
                step: 0,
                offset: 1,
                from_end: name == "last-child",
            },
            "only-child" => Pseudo::OnlyChild,
            "empty" => Pseudo::Empty,
            "nth-child" | "nth-last-child" => {
                let argument = self.argument(&name)?;
                let (step, offset) =
                    parse_nth(&argument).ok_or_else(|| SelectorError::InvalidArgument {
                        pseudo: name.clone(),
                        argument: argument.clone(),
                    })?;
                Pseudo::NthChild {
                    step,
                    offset,
                    from_end: name == "nth-last-child",
                }
            }
            "val" => {
                let argument = self.argument(&name)?;
                let literal = argument.trim();
                let value = serde_json::from_str(literal)
                    .map_err(|e| SelectorError::InvalidLiteral(format!("{literal}: {e}")))?;
                Pseudo::Val(value)
            }
            "contains" => {
                let argument = self.argument(&name)?;
                match serde_json::from_str(argument.trim()) {
                    Ok(Value::String(text)) => Pseudo::Contains(text),
                    _ => {
                        return Err(SelectorError::InvalidArgument {
                            pseudo: name,
                            argument,
                        });
                    }
                }
            }
            "has" => Pseudo::Has(self.argument(&name)?.parse()?),
            _ => return Err(SelectorError::UnknownPseudo(name)),
        };
        Ok(pseudo)
    }

    /// The text between a balanced pair of parentheses.
    fn argument(&mut self, pseudo: &str) -> Result<String, SelectorError> {
        let open = self.pos;
        if self.peek() != Some('(') {
            return Err(SelectorError::MissingArgument(pseudo.to_string()));
        }

        let mut depth = 0usize;
        let mut in_string = false;
        let mut i = open;
        while let Some(&c) = self.chars.get(i) {
            if in_string {
                match c {
                    '\\' => i += 1,
                    '"' => in_string = false,
                    _ => {}
                }
            } else {
                match c {
                    '"' => in_string = true,
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            self.pos = i + 1;
                            return Ok(self.chars[open + 1..i].iter().collect());
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }
        Err(SelectorError::UnclosedParen(open))
    }
}
