//! A subset of XPath 1.0 evaluated over [`Document`].
//!
//! Supported: absolute and relative location paths with `/`, `//`, `.`, `..`,
//! `*` and prefixed names; the axes `child`, `descendant`,
//! `descendant-or-self`, `self`, `parent`, `ancestor`, `ancestor-or-self`,
//! `following-sibling`, `preceding-sibling` and `attribute` (`@`); node tests
//! `text()`, `comment()` and `node()`; predicates with comparisons, `and`,
//! `or`, arithmetic `+`/`-`, numeric positions, the usual string and node-set
//! functions, and unions with `|`.
//!
//! Unprefixed element names match the default namespace when the namespace
//! map has an entry for the empty prefix, and any namespace otherwise.
//! Unprefixed attribute names match attributes without a namespace.

use std::collections::HashMap;
use std::ops::Range;

use html5ever::Namespace;

use crate::dom::{Document, NodeData, NodeId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
    Star,
    Plus,
    Minus,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    DoubleColon,
    /// A name, possibly prefixed. `local` is `*` for `prefix:*`.
    Name {
        prefix: Option<String>,
        local: String,
    },
    Literal(String),
    Number(f64),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn invalid(source: &str, offset: usize, msg: impl std::fmt::Display) -> Error {
    Error::InvalidSelector(format!("{msg} at offset {offset} in {source:?}"))
}

fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let offset = |i: usize| chars.get(i).map_or(source.len(), |&(o, _)| o);

    let mut tokens = Vec::new();
    let mut i = 0;
    while let Some(c) = at(i) {
        let start = offset(i);
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, len) = match c {
            '/' if at(i + 1) == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '.' if at(i + 1) == Some('.') => (Token::DotDot, 2),
            '.' if at(i + 1).is_some_and(|d| d.is_ascii_digit()) => {
                let end = scan_number(&chars, i);
                (parse_number(source, start, offset(end))?, end - i)
            }
            '.' => (Token::Dot, 1),
            '@' => (Token::At, 1),
            ',' => (Token::Comma, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '|' => (Token::Pipe, 1),
            '*' => (Token::Star, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Eq, 1),
            '!' if at(i + 1) == Some('=') => (Token::Neq, 2),
            '<' if at(i + 1) == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if at(i + 1) == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            ':' if at(i + 1) == Some(':') => (Token::DoubleColon, 2),
            '"' | '\'' => {
                let mut end = i + 1;
                while at(end).is_some_and(|q| q != c) {
                    end += 1;
                }
                if at(end).is_none() {
                    return Err(invalid(source, start, "unterminated string literal"));
                }
                let text = source[offset(i + 1)..offset(end)].to_string();
                (Token::Literal(text), end + 1 - i)
            }
            d if d.is_ascii_digit() => {
                let end = scan_number(&chars, i);
                (parse_number(source, start, offset(end))?, end - i)
            }
            n if is_name_start(n) => {
                let mut end = i + 1;
                while at(end).is_some_and(is_name_char) {
                    end += 1;
                }
                let name = source[start..offset(end)].to_string();
                // prefix:local or prefix:*, but not axis::
                if at(end) == Some(':') && at(end + 1) != Some(':') {
                    match at(end + 1) {
                        Some('*') => (
                            Token::Name {
                                prefix: Some(name),
                                local: "*".to_string(),
                            },
                            end + 2 - i,
                        ),
                        Some(l) if is_name_start(l) => {
                            let mut local_end = end + 2;
                            while at(local_end).is_some_and(is_name_char) {
                                local_end += 1;
                            }
                            let local = source[offset(end + 1)..offset(local_end)].to_string();
                            (
                                Token::Name {
                                    prefix: Some(name),
                                    local,
                                },
                                local_end - i,
                            )
                        }
                        _ => return Err(invalid(source, offset(end), "expected a name after ':'")),
                    }
                } else {
                    (
                        Token::Name {
                            prefix: None,
                            local: name,
                        },
                        end - i,
                    )
                }
            }
            other => return Err(invalid(source, start, format!("unexpected character {other:?}"))),
        };
        tokens.push((token, start..offset(i + len)));
        i += len;
    }
    Ok(tokens)
}

fn scan_number(chars: &[(usize, char)], mut i: usize) -> usize {
    let mut seen_dot = false;
    while let Some(&(_, c)) = chars.get(i) {
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn parse_number(source: &str, start: usize, end: usize) -> Result<Token> {
    source[start..end]
        .parse::<f64>()
        .map(Token::Number)
        .map_err(|_| invalid(source, start, "malformed number"))
}

// ----------------------------------------------------------------------------
// Syntax tree
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfNode,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Axis> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfNode,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "attribute" => Axis::Attribute,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NsTest {
    Any,
    Uri(String),
}

impl NsTest {
    fn matches(&self, ns: &Namespace) -> bool {
        match self {
            NsTest::Any => true,
            NsTest::Uri(uri) => ns.as_ref() == uri,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    /// `local` of `None` is a wildcard.
    Name { ns: NsTest, local: Option<String> },
    Text,
    Comment,
    Node,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Self {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
}

/// Core library functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Position,
    Last,
    Count,
    Contains,
    StartsWith,
    NormalizeSpace,
    Not,
    String,
    Concat,
    LocalName,
    Name,
    True,
    False,
    StringLength,
    Boolean,
    Number,
}

impl Function {
    fn lookup(name: &str) -> Option<(Function, usize, usize)> {
        Some(match name {
            "position" => (Function::Position, 0, 0),
            "last" => (Function::Last, 0, 0),
            "count" => (Function::Count, 1, 1),
            "contains" => (Function::Contains, 2, 2),
            "starts-with" => (Function::StartsWith, 2, 2),
            "normalize-space" => (Function::NormalizeSpace, 0, 1),
            "not" => (Function::Not, 1, 1),
            "string" => (Function::String, 0, 1),
            "concat" => (Function::Concat, 2, usize::MAX),
            "local-name" => (Function::LocalName, 0, 1),
            "name" => (Function::Name, 0, 1),
            "true" => (Function::True, 0, 0),
            "false" => (Function::False, 0, 0),
            "string-length" => (Function::StringLength, 0, 1),
            "boolean" => (Function::Boolean, 1, 1),
            "number" => (Function::Number, 0, 1),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Vec<Expr>),
    Path {
        absolute: bool,
        steps: Vec<Step>,
    },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Call(Function, Vec<Expr>),
}

impl Expr {
    fn selects_nodes(&self) -> bool {
        match self {
            Expr::Path { .. } => true,
            Expr::Union(parts) => parts.iter().all(Expr::selects_nodes),
            Expr::Filter { primary, steps, .. } => !steps.is_empty() || primary.selects_nodes(),
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    namespaces: &'a HashMap<String, String>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, namespaces: &'a HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
            namespaces,
        })
    }

    fn parse(mut self) -> Result<Expr> {
        if self.tokens.is_empty() {
            return Err(Error::InvalidSelector("empty expression".to_string()));
        }
        let expr = self.parse_or()?;
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.match_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.match_keyword("and") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Neq) => CmpOp::Neq,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.match_token(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr> {
        let first = self.parse_path_expr()?;
        if !self.check(&Token::Pipe) {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.match_token(&Token::Pipe) {
            parts.push(self.parse_path_expr()?);
        }
        if !parts.iter().all(Expr::selects_nodes) {
            return Err(self.error("union operands must select nodes"));
        }
        Ok(Expr::Union(parts))
    }

    fn parse_path_expr(&mut self) -> Result<Expr> {
        let starts_filter = match self.peek() {
            Some(Token::Literal(_) | Token::Number(_) | Token::LParen) => true,
            Some(Token::Name { prefix: None, local }) => {
                self.peek_ahead(1) == Some(&Token::LParen)
                    && !matches!(local.as_str(), "text" | "node" | "comment")
            }
            _ => false,
        };
        if !starts_filter {
            return self.parse_location_path();
        }

        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        if self.match_token(&Token::Slash) {
            self.parse_relative(&mut steps)?;
        } else if self.match_token(&Token::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            self.parse_relative(&mut steps)?;
        }
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        if !primary.selects_nodes() {
            return Err(self.error("only node-sets can be filtered or navigated"));
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn parse_location_path(&mut self) -> Result<Expr> {
        let mut steps = Vec::new();
        let absolute = if self.match_token(&Token::Slash) {
            if self.starts_step() {
                self.parse_relative(&mut steps)?;
            }
            true
        } else if self.match_token(&Token::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            self.parse_relative(&mut steps)?;
            true
        } else {
            self.parse_relative(&mut steps)?;
            false
        };
        Ok(Expr::Path { absolute, steps })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name { .. })
        )
    }

    fn parse_relative(&mut self, steps: &mut Vec<Step>) -> Result<()> {
        loop {
            steps.push(self.parse_step()?);
            if self.match_token(&Token::Slash) {
                continue;
            }
            if self.match_token(&Token::DoubleSlash) {
                steps.push(Step::descendant_or_self());
                continue;
            }
            return Ok(());
        }
    }

    fn parse_step(&mut self) -> Result<Step> {
        if self.match_token(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfNode,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.match_token(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.match_token(&Token::At) {
            Axis::Attribute
        } else if let Some(Token::Name { prefix: None, local }) = self.peek()
            && self.peek_ahead(1) == Some(&Token::DoubleColon)
        {
            let axis = Axis::from_name(local).ok_or_else(|| self.error(format!("unknown axis {local:?}")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.parse_node_test(axis)?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self, axis: Axis) -> Result<NodeTest> {
        match self.peek().cloned() {
            Some(Token::Star) => {
                self.advance();
                Ok(NodeTest::Name {
                    ns: NsTest::Any,
                    local: None,
                })
            }
            Some(Token::Name { prefix, local }) => {
                self.advance();
                if prefix.is_none() && self.check(&Token::LParen) {
                    let test = match local.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::Node,
                        "comment" => NodeTest::Comment,
                        _ => return Err(self.error(format!("unknown node test {local:?}"))),
                    };
                    self.expect(&Token::LParen)?;
                    self.expect(&Token::RParen)?;
                    return Ok(test);
                }
                let ns = self.resolve_prefix(prefix.as_deref(), axis)?;
                let local = (local != "*").then_some(local);
                Ok(NodeTest::Name { ns, local })
            }
            _ => Err(self.error("expected a node test")),
        }
    }

    fn resolve_prefix(&self, prefix: Option<&str>, axis: Axis) -> Result<NsTest> {
        match prefix {
            Some(prefix) => self
                .namespaces
                .get(prefix)
                .map(|uri| NsTest::Uri(uri.clone()))
                .ok_or_else(|| self.error(format!("unknown namespace prefix {prefix:?}"))),
            None if axis == Axis::Attribute => Ok(NsTest::Uri(String::new())),
            None => Ok(self
                .namespaces
                .get("")
                .map_or(NsTest::Any, |uri| NsTest::Uri(uri.clone()))),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.match_token(&Token::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Literal(text)) => {
                self.advance();
                Ok(Expr::Literal(text))
            }
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name { prefix: None, local }) => {
                let (function, min, max) =
                    Function::lookup(&local).ok_or_else(|| self.error(format!("unknown function {local}()")))?;
                self.advance();
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if !self.match_token(&Token::RParen) {
                    loop {
                        args.push(self.parse_or()?);
                        if self.match_token(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RParen)?;
                        break;
                    }
                }
                if args.len() < min || args.len() > max {
                    return Err(self.error(format!("wrong number of arguments to {local}()")));
                }
                Ok(Expr::Call(function, args))
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    // Helpers

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_ahead(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Name { prefix: None, local }) = self.peek()
            && local == keyword
        {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.match_token(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {token:?}")))
        }
    }

    fn error(&self, msg: impl std::fmt::Display) -> Error {
        let offset = self
            .tokens
            .get(self.pos)
            .map_or(self.source.len(), |(_, span)| span.start);
        invalid(self.source, offset, msg)
    }
}

// ----------------------------------------------------------------------------
// Evaluation
// ----------------------------------------------------------------------------

/// A node or an attribute of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Item {
    Node(NodeId),
    Attr(NodeId, usize),
}

enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

struct Context {
    item: Item,
    position: usize,
    size: usize,
}

struct Evaluator<'d> {
    doc: &'d Document,
    /// Preorder rank of every attached node, indexed by node id.
    order: Vec<usize>,
}

impl<'d> Evaluator<'d> {
    fn new(doc: &'d Document) -> Self {
        let mut order = vec![usize::MAX; doc.len()];
        let root = doc.document();
        if let Some(slot) = order.get_mut(root.0 as usize) {
            *slot = 0;
        }
        for (rank, id) in doc.descendants(root).enumerate() {
            if let Some(slot) = order.get_mut(id.0 as usize) {
                *slot = rank + 1;
            }
        }
        Self { doc, order }
    }

    fn key(&self, item: Item) -> (usize, usize) {
        let rank = |id: NodeId| self.order.get(id.0 as usize).copied().unwrap_or(usize::MAX);
        match item {
            Item::Node(id) => (rank(id), 0),
            Item::Attr(id, idx) => (rank(id), idx + 1),
        }
    }

    fn sort(&self, items: &mut Vec<Item>) {
        items.sort_by_key(|&item| self.key(item));
        items.dedup();
    }

    fn eval(&self, expr: &Expr, ctx: &Context) -> Value {
        match expr {
            Expr::Or(left, right) => Value::Bool(self.truthy(left, ctx) || self.truthy(right, ctx)),
            Expr::And(left, right) => Value::Bool(self.truthy(left, ctx) && self.truthy(right, ctx)),
            Expr::Compare(op, left, right) => {
                let left = self.eval(left, ctx);
                let right = self.eval(right, ctx);
                Value::Bool(self.compare(*op, &left, &right))
            }
            Expr::Arith(op, left, right) => {
                let left = self.number(&self.eval(left, ctx));
                let right = self.number(&self.eval(right, ctx));
                Value::Num(match op {
                    ArithOp::Add => left + right,
                    ArithOp::Sub => left - right,
                })
            }
            Expr::Negate(inner) => Value::Num(-self.number(&self.eval(inner, ctx))),
            Expr::Union(parts) => {
                let mut items = Vec::new();
                for part in parts {
                    if let Value::Nodes(nodes) = self.eval(part, ctx) {
                        items.extend(nodes);
                    }
                }
                self.sort(&mut items);
                Value::Nodes(items)
            }
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    Item::Node(self.doc.document())
                } else {
                    ctx.item
                };
                Value::Nodes(self.walk(vec![start], steps))
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut items = match self.eval(primary, ctx) {
                    Value::Nodes(items) => items,
                    _ => Vec::new(),
                };
                self.sort(&mut items);
                for predicate in predicates {
                    items = self.apply_predicate(items, predicate);
                }
                Value::Nodes(self.walk(items, steps))
            }
            Expr::Literal(text) => Value::Str(text.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Call(function, args) => self.call(*function, args, ctx),
        }
    }

    fn truthy(&self, expr: &Expr, ctx: &Context) -> bool {
        self.boolean(&self.eval(expr, ctx))
    }

    fn walk(&self, mut current: Vec<Item>, steps: &[Step]) -> Vec<Item> {
        for step in steps {
            let mut next = Vec::new();
            for &item in &current {
                let mut candidates: Vec<Item> = self
                    .axis(step.axis, item)
                    .into_iter()
                    .filter(|&c| self.node_test(&step.test, c))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.apply_predicate(candidates, predicate);
                }
                next.extend(candidates);
            }
            self.sort(&mut next);
            current = next;
        }
        current
    }

    /// Keep the items for which `predicate` holds. A numeric result selects by position.
    fn apply_predicate(&self, items: Vec<Item>, predicate: &Expr) -> Vec<Item> {
        let size = items.len();
        items
            .into_iter()
            .enumerate()
            .filter(|&(idx, item)| {
                let ctx = Context {
                    item,
                    position: idx + 1,
                    size,
                };
                match self.eval(predicate, &ctx) {
                    Value::Num(n) => n == (idx + 1) as f64,
                    other => self.boolean(&other),
                }
            })
            .map(|(_, item)| item)
            .collect()
    }

    /// Nodes along `axis` from `item`, in proximity order.
    fn axis(&self, axis: Axis, item: Item) -> Vec<Item> {
        let doc = self.doc;
        let node = match item {
            Item::Node(id) => id,
            Item::Attr(owner, _) => {
                return match axis {
                    Axis::SelfNode => vec![item],
                    Axis::Parent => vec![Item::Node(owner)],
                    Axis::Ancestor => self.ancestors(owner, true),
                    Axis::AncestorOrSelf => {
                        let mut out = vec![item];
                        out.extend(self.ancestors(owner, true));
                        out
                    }
                    _ => Vec::new(),
                };
            }
        };

        match axis {
            Axis::Child => doc.children(node).map(Item::Node).collect(),
            Axis::Descendant => doc.descendants(node).map(Item::Node).collect(),
            Axis::DescendantOrSelf => std::iter::once(node)
                .chain(doc.descendants(node))
                .map(Item::Node)
                .collect(),
            Axis::SelfNode => vec![item],
            Axis::Parent => doc.parent(node).map(Item::Node).into_iter().collect(),
            Axis::Ancestor => self.ancestors(node, false),
            Axis::AncestorOrSelf => self.ancestors(node, true),
            Axis::FollowingSibling => self.siblings(node, |n| n.next_sibling),
            Axis::PrecedingSibling => self.siblings(node, |n| n.prev_sibling),
            Axis::Attribute => (0..doc.attrs(node).len())
                .map(|idx| Item::Attr(node, idx))
                .collect(),
        }
    }

    fn ancestors(&self, node: NodeId, include_self: bool) -> Vec<Item> {
        let mut out = Vec::new();
        if include_self {
            out.push(Item::Node(node));
        }
        let mut current = self.doc.parent(node);
        while let Some(id) = current {
            out.push(Item::Node(id));
            current = self.doc.parent(id);
        }
        out
    }

    fn siblings(&self, node: NodeId, step: impl Fn(&crate::dom::Node) -> NodeId) -> Vec<Item> {
        let mut out = Vec::new();
        let mut current = self.doc.get(node).map_or(NodeId::NONE, &step);
        while current.is_some() {
            out.push(Item::Node(current));
            current = self.doc.get(current).map_or(NodeId::NONE, &step);
        }
        out
    }

    fn node_test(&self, test: &NodeTest, item: Item) -> bool {
        match (test, item) {
            (NodeTest::Node, _) => true,
            (NodeTest::Text, Item::Node(id)) => self.doc.is_text(id),
            (NodeTest::Comment, Item::Node(id)) => {
                matches!(self.doc.get(id).map(|n| &n.data), Some(NodeData::Comment(_)))
            }
            (NodeTest::Name { ns, local }, Item::Node(id)) => self.doc.qual_name(id).is_some_and(|name| {
                ns.matches(&name.ns) && local.as_deref().is_none_or(|l| name.local.as_ref() == l)
            }),
            (NodeTest::Name { ns, local }, Item::Attr(id, idx)) => {
                self.doc.attrs(id).get(idx).is_some_and(|attr| {
                    ns.matches(&attr.name.ns) && local.as_deref().is_none_or(|l| attr.name.local.as_ref() == l)
                })
            }
            _ => false,
        }
    }

    fn string_value(&self, item: Item) -> String {
        match item {
            Item::Attr(id, idx) => self
                .doc
                .attrs(id)
                .get(idx)
                .map(|a| a.value.clone())
                .unwrap_or_default(),
            Item::Node(id) => match self.doc.get(id).map(|n| &n.data) {
                Some(NodeData::Text(text) | NodeData::Comment(text)) => text.clone(),
                Some(NodeData::Element { .. } | NodeData::Document) => self.doc.text_content(id),
                _ => String::new(),
            },
        }
    }

    fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Str(s) => to_number(s),
            Value::Nodes(items) => items
                .first()
                .map_or(f64::NAN, |&item| to_number(&self.string_value(item))),
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Str(s) => s.clone(),
            Value::Num(n) => number_to_string(*n),
            Value::Bool(b) => b.to_string(),
            Value::Nodes(items) => items
                .first()
                .map(|&item| self.string_value(item))
                .unwrap_or_default(),
        }
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => {
                let rights: Vec<Value> = b.iter().map(|&y| Value::Str(self.string_value(y))).collect();
                a.iter().any(|&x| {
                    let x = Value::Str(self.string_value(x));
                    rights.iter().any(|y| self.compare_scalars(op, &x, y))
                })
            }
            (Value::Nodes(nodes), other) => self.compare_nodes(op, nodes, other, false),
            (other, Value::Nodes(nodes)) => self.compare_nodes(op, nodes, other, true),
            (a, b) => self.compare_scalars(op, a, b),
        }
    }

    fn compare_nodes(&self, op: CmpOp, nodes: &[Item], other: &Value, flipped: bool) -> bool {
        let ordered = |a: &Value, b: &Value| {
            if flipped {
                self.compare_scalars(op, b, a)
            } else {
                self.compare_scalars(op, a, b)
            }
        };
        if let Value::Bool(_) = other {
            return ordered(&Value::Bool(!nodes.is_empty()), other);
        }
        nodes
            .iter()
            .any(|&item| ordered(&Value::Str(self.string_value(item)), other))
    }

    fn compare_scalars(&self, op: CmpOp, a: &Value, b: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Neq => {
                let equal = match (a, b) {
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => self.boolean(a) == self.boolean(b),
                    (Value::Num(_), _) | (_, Value::Num(_)) => self.number(a) == self.number(b),
                    _ => self.string(a) == self.string(b),
                };
                equal == (op == CmpOp::Eq)
            }
            CmpOp::Lt => self.number(a) < self.number(b),
            CmpOp::Le => self.number(a) <= self.number(b),
            CmpOp::Gt => self.number(a) > self.number(b),
            CmpOp::Ge => self.number(a) >= self.number(b),
        }
    }

    fn call(&self, function: Function, args: &[Expr], ctx: &Context) -> Value {
        let arg = |idx: usize| args.get(idx).map(|a| self.eval(a, ctx));
        let string_arg = |idx: usize| match arg(idx) {
            Some(value) => self.string(&value),
            None => self.string_value(ctx.item),
        };
        let first_item = |idx: usize| match arg(idx) {
            Some(Value::Nodes(items)) => items.first().copied(),
            Some(_) => None,
            None => Some(ctx.item),
        };

        match function {
            Function::Position => Value::Num(ctx.position as f64),
            Function::Last => Value::Num(ctx.size as f64),
            Function::Count => match arg(0) {
                Some(Value::Nodes(items)) => Value::Num(items.len() as f64),
                _ => Value::Num(0.0),
            },
            Function::Contains => Value::Bool(string_arg(0).contains(&string_arg(1))),
            Function::StartsWith => Value::Bool(string_arg(0).starts_with(&string_arg(1))),
            Function::NormalizeSpace => {
                Value::Str(string_arg(0).split_whitespace().collect::<Vec<_>>().join(" "))
            }
            Function::Not => Value::Bool(!arg(0).is_some_and(|v| self.boolean(&v))),
            Function::String => Value::Str(string_arg(0)),
            Function::Concat => Value::Str((0..args.len()).map(string_arg).collect()),
            Function::LocalName => Value::Str(first_item(0).map(|i| self.item_name(i, false)).unwrap_or_default()),
            Function::Name => Value::Str(first_item(0).map(|i| self.item_name(i, true)).unwrap_or_default()),
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
            Function::StringLength => Value::Num(string_arg(0).chars().count() as f64),
            Function::Boolean => Value::Bool(arg(0).is_some_and(|v| self.boolean(&v))),
            Function::Number => match arg(0) {
                Some(value) => Value::Num(self.number(&value)),
                None => Value::Num(to_number(&self.string_value(ctx.item))),
            },
        }
    }

    fn item_name(&self, item: Item, qualified: bool) -> String {
        let name = match item {
            Item::Node(id) => self.doc.qual_name(id),
            Item::Attr(id, idx) => self.doc.attrs(id).get(idx).map(|a| &a.name),
        };
        match name {
            Some(name) if qualified => match &name.prefix {
                Some(prefix) => format!("{prefix}:{}", name.local),
                None => name.local.to_string(),
            },
            Some(name) => name.local.to_string(),
            None => String::new(),
        }
    }
}

fn to_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A compiled path expression.
#[derive(Debug, Clone)]
pub struct XPath {
    expr: Expr,
}

impl XPath {
    /// Compile `source`, resolving prefixes through `namespaces`.
    ///
    /// The expression must select nodes; scalar expressions such as
    /// `count(//p)` are rejected.
    pub fn compile(source: &str, namespaces: &HashMap<String, String>) -> Result<Self> {
        let expr = Parser::new(source, namespaces)?.parse()?;
        if !expr.selects_nodes() {
            return Err(Error::InvalidSelector(format!(
                "{source:?} does not select elements"
            )));
        }
        Ok(Self { expr })
    }

    /// Matching elements in document order.
    ///
    /// Relative paths are evaluated against the root element.
    pub fn select(&self, doc: &Document) -> Vec<NodeId> {
        let evaluator = Evaluator::new(doc);
        let start = doc.root().unwrap_or_else(|| doc.document());
        let ctx = Context {
            item: Item::Node(start),
            position: 1,
            size: 1,
        };
        match evaluator.eval(&self.expr, &ctx) {
            Value::Nodes(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Item::Node(id) if doc.is_element(id) => Some(id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
