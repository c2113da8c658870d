//! Small templating facility for prompt text.
//!
//! Supported syntax:
//!
//! - `{{ path }}`: variable lookup; `this`, `this.field`, `@index`, `@first`
//!   and `@last` refer to the innermost `each` loop
//! - `{{ helper arg arg }}`: one of `add`, `subtract`, `length`, `default`,
//!   `contains`; arguments are paths, `"strings"`, integers, `true`/`false`
//!   or parenthesized helper calls
//! - `{{#if expr}} ... {{else}} ... {{/if}}`, `{{#unless expr}} ... {{/unless}}`
//! - `{{#each expr}} ... {{/each}}`
//! - `{{! comment }}`
//!
//! Templates are parsed once; helper names and arities are checked at parse
//! time so a malformed template is rejected when the catalog is built.
//! Missing variables render as an empty string.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Variables available to a template.
pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TemplateError {
    message: String,
}

impl TemplateError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A template value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Empty strings, empty collections, zero, `false` and null are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    fn is_empty_value(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            Value::Bool(_) | Value::Int(_) => false,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Value::Null | Value::Map(_) => {}
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Str(s) => out.push_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_to(out);
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Str(n.to_string()),
            },
            JsonValue::String(s) => Value::Str(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    Add,
    Subtract,
    Length,
    Default,
    Contains,
}

impl Helper {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "add" => Some(Helper::Add),
            "subtract" | "sub" => Some(Helper::Subtract),
            "length" | "len" => Some(Helper::Length),
            "default" => Some(Helper::Default),
            "contains" => Some(Helper::Contains),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Helper::Length => 1,
            Helper::Add | Helper::Subtract | Helper::Default | Helper::Contains => 2,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Helper::Add => "add",
            Helper::Subtract => "subtract",
            Helper::Length => "length",
            Helper::Default => "default",
            Helper::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Call(Helper, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Expr(Expr),
    If {
        cond: Expr,
        negate: bool,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Each {
        list: Expr,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Unless,
    Each,
}

impl BlockKind {
    fn name(self) -> &'static str {
        match self {
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
            BlockKind::Each => "each",
        }
    }
}

struct OpenBlock {
    kind: BlockKind,
    expr: Expr,
    then: Vec<Node>,
    otherwise: Vec<Node>,
    in_else: bool,
}

impl OpenBlock {
    fn into_node(self) -> Node {
        match self.kind {
            BlockKind::Each => Node::Each {
                list: self.expr,
                body: self.then,
            },
            BlockKind::If | BlockKind::Unless => Node::If {
                cond: self.expr,
                negate: self.kind == BlockKind::Unless,
                then: self.then,
                otherwise: self.otherwise,
            },
        }
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut root: Vec<Node> = Vec::new();
        let mut stack: Vec<OpenBlock> = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                push_node(&mut root, &mut stack, Node::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or_else(|| {
                TemplateError::new(format!("unclosed tag at byte {}", offset + start))
            })?;
            let tag = after_open[..end].trim();
            apply_tag(tag, &mut root, &mut stack)?;

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            push_node(&mut root, &mut stack, Node::Text(rest.to_string()));
        }

        if let Some(open) = stack.last() {
            return Err(TemplateError::new(format!(
                "unclosed {{{{#{}}}}} block",
                open.kind.name()
            )));
        }

        Ok(Self { nodes: root })
    }

    /// Render with the given variables.
    pub fn render(&self, vars: &Variables) -> Result<String, TemplateError> {
        let mut out = String::new();
        let mut scope = Scope {
            vars,
            loops: Vec::new(),
        };
        render_nodes(&self.nodes, &mut scope, &mut out)?;
        Ok(out)
    }
}

fn push_node(root: &mut Vec<Node>, stack: &mut [OpenBlock], node: Node) {
    match stack.last_mut() {
        Some(open) if open.in_else => open.otherwise.push(node),
        Some(open) => open.then.push(node),
        None => root.push(node),
    }
}

fn apply_tag(
    tag: &str,
    root: &mut Vec<Node>,
    stack: &mut Vec<OpenBlock>,
) -> Result<(), TemplateError> {
    if tag.starts_with('!') {
        return Ok(());
    }

    if let Some(open) = tag.strip_prefix('#') {
        let (keyword, expr_source) = open.split_once(char::is_whitespace).unwrap_or((open, ""));
        let kind = match keyword {
            "if" => BlockKind::If,
            "unless" => BlockKind::Unless,
            "each" => BlockKind::Each,
            other => return Err(TemplateError::new(format!("unknown block '#{}'", other))),
        };
        let expr = parse_expr(expr_source)?;
        stack.push(OpenBlock {
            kind,
            expr,
            then: Vec::new(),
            otherwise: Vec::new(),
            in_else: false,
        });
        return Ok(());
    }

    if let Some(close) = tag.strip_prefix('/') {
        let close = close.trim();
        let open = stack
            .pop()
            .ok_or_else(|| TemplateError::new(format!("unexpected {{{{/{}}}}}", close)))?;
        if open.kind.name() != close {
            return Err(TemplateError::new(format!(
                "{{{{/{}}}}} closes a {{{{#{}}}}} block",
                close,
                open.kind.name()
            )));
        }
        push_node(root, stack, open.into_node());
        return Ok(());
    }

    if tag == "else" {
        return match stack.last_mut() {
            Some(open) if open.kind != BlockKind::Each && !open.in_else => {
                open.in_else = true;
                Ok(())
            }
            _ => Err(TemplateError::new("{{else}} outside an if/unless block")),
        };
    }

    let expr = parse_expr(tag)?;
    push_node(root, stack, Node::Expr(expr));
    Ok(())
}

// ==================== Expression parsing ====================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Int(i64),
    Word(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push(Token::Open);
        } else if c == ')' {
            chars.next();
            tokens.push(Token::Close);
        } else if c == '"' {
            chars.next();
            let mut literal = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('n') => literal.push('\n'),
                        Some(escaped) => literal.push(escaped),
                        None => break,
                    },
                    other => literal.push(other),
                }
            }
            if !closed {
                return Err(TemplateError::new(format!(
                    "unterminated string in '{}'",
                    source
                )));
            }
            tokens.push(Token::Str(literal));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            match word.parse::<i64>() {
                Ok(number) => tokens.push(Token::Int(number)),
                Err(_) => tokens.push(Token::Word(word)),
            }
        }
    }

    Ok(tokens)
}

fn parse_expr(source: &str) -> Result<Expr, TemplateError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(TemplateError::new("empty expression"));
    }

    let mut pos = 0;
    let expr = match &tokens[0] {
        Token::Word(word) if Helper::from_name(word).is_some() => {
            parse_call(&tokens, &mut pos, tokens.len())?
        }
        _ => parse_atom(&tokens, &mut pos)?,
    };

    if pos != tokens.len() {
        return Err(TemplateError::new(format!(
            "unexpected trailing input in '{}'",
            source
        )));
    }
    Ok(expr)
}

/// Parse `helper arg...` from `tokens[*pos..end]`, stopping at a `)` or `end`.
fn parse_call(tokens: &[Token], pos: &mut usize, end: usize) -> Result<Expr, TemplateError> {
    let helper = match tokens.get(*pos) {
        Some(Token::Word(word)) => Helper::from_name(word)
            .ok_or_else(|| TemplateError::new(format!("unknown helper '{}'", word)))?,
        _ => return Err(TemplateError::new("expected a helper name")),
    };
    *pos += 1;

    let mut args = Vec::new();
    while *pos < end && tokens[*pos] != Token::Close {
        args.push(parse_atom(tokens, pos)?);
    }

    if args.len() != helper.arity() {
        return Err(TemplateError::new(format!(
            "helper '{}' takes {} argument(s), got {}",
            helper.name(),
            helper.arity(),
            args.len()
        )));
    }
    Ok(Expr::Call(helper, args))
}

fn parse_atom(tokens: &[Token], pos: &mut usize) -> Result<Expr, TemplateError> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| TemplateError::new("unexpected end of expression"))?;
    *pos += 1;

    match token {
        Token::Str(s) => Ok(Expr::Literal(Value::Str(s.clone()))),
        Token::Int(i) => Ok(Expr::Literal(Value::Int(*i))),
        Token::Word(word) if word == "true" => Ok(Expr::Literal(Value::Bool(true))),
        Token::Word(word) if word == "false" => Ok(Expr::Literal(Value::Bool(false))),
        Token::Word(word) => Ok(Expr::Path(
            word.split('.').map(|segment| segment.to_string()).collect(),
        )),
        Token::Open => {
            let call = parse_call(tokens, pos, tokens.len())?;
            match tokens.get(*pos) {
                Some(Token::Close) => {
                    *pos += 1;
                    Ok(call)
                }
                _ => Err(TemplateError::new("missing ')'")),
            }
        }
        Token::Close => Err(TemplateError::new("unexpected ')'")),
    }
}

// ==================== Rendering ====================

struct LoopFrame {
    item: Value,
    index: usize,
    len: usize,
}

struct Scope<'a> {
    vars: &'a Variables,
    loops: Vec<LoopFrame>,
}

impl Scope<'_> {
    fn lookup(&self, path: &[String]) -> Value {
        let Some((head, tail)) = path.split_first() else {
            return Value::Null;
        };

        let frame = self.loops.last();
        let base = match head.as_str() {
            "this" => frame.map(|f| f.item.clone()),
            "@index" => frame.map(|f| Value::Int(f.index as i64)),
            "@first" => frame.map(|f| Value::Bool(f.index == 0)),
            "@last" => frame.map(|f| Value::Bool(f.index + 1 == f.len)),
            name => self.vars.get(name).cloned(),
        };

        tail.iter()
            .fold(base.unwrap_or_default(), |value, segment| match value {
                Value::Map(mut map) => map.remove(segment).unwrap_or_default(),
                Value::List(mut items) => match segment.parse::<usize>() {
                    Ok(i) if i < items.len() => items.swap_remove(i),
                    _ => Value::Null,
                },
                _ => Value::Null,
            })
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr(expr) => eval(expr, scope)?.write_to(out),
            Node::If {
                cond,
                negate,
                then,
                otherwise,
            } => {
                let truthy = eval(cond, scope)?.is_truthy() != *negate;
                render_nodes(if truthy { then } else { otherwise }, scope, out)?;
            }
            Node::Each { list, body } => {
                let items = match eval(list, scope)? {
                    Value::Null => Vec::new(),
                    Value::List(items) => items,
                    Value::Map(map) => map.into_values().collect(),
                    other => {
                        return Err(TemplateError::new(format!(
                            "cannot iterate over a {}",
                            other.type_name()
                        )))
                    }
                };
                let len = items.len();
                for (index, item) in items.into_iter().enumerate() {
                    scope.loops.push(LoopFrame { item, index, len });
                    let rendered = render_nodes(body, scope, out);
                    scope.loops.pop();
                    rendered?;
                }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, TemplateError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(scope.lookup(path)),
        Expr::Call(helper, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call_helper(*helper, args)
        }
    }
}

fn call_helper(helper: Helper, args: Vec<Value>) -> Result<Value, TemplateError> {
    let mut args = args.into_iter();
    let first = args.next().unwrap_or_default();
    let second = args.next().unwrap_or_default();

    match helper {
        Helper::Add | Helper::Subtract => match (&first, &second) {
            (Value::Int(a), Value::Int(b)) => {
                let result = if helper == Helper::Add {
                    a.checked_add(*b)
                } else {
                    a.checked_sub(*b)
                };
                result
                    .map(Value::Int)
                    .ok_or_else(|| TemplateError::new(format!("'{}' overflowed", helper.name())))
            }
            _ => Err(TemplateError::new(format!(
                "'{}' expects two ints, got {} and {}",
                helper.name(),
                first.type_name(),
                second.type_name()
            ))),
        },
        Helper::Length => match first {
            Value::Null => Ok(Value::Int(0)),
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(map) => Ok(Value::Int(map.len() as i64)),
            other => Err(TemplateError::new(format!(
                "'length' cannot measure a {}",
                other.type_name()
            ))),
        },
        Helper::Default => Ok(if first.is_empty_value() { second } else { first }),
        Helper::Contains => match (&first, &second) {
            (Value::List(items), needle) => Ok(Value::Bool(items.contains(needle))),
            (Value::Str(haystack), Value::Str(needle)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            (Value::Null, _) => Ok(Value::Bool(false)),
            _ => Err(TemplateError::new(format!(
                "'contains' cannot search a {} for a {}",
                first.type_name(),
                second.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: Vec<(&str, Value)>) -> Variables {
        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    fn target(code: &str, name: &str) -> Value {
        Value::Map(
            [
                ("code".to_string(), Value::from(code)),
                ("name".to_string(), Value::from(name)),
            ]
            .into_iter()
            .collect(),
        )
    }

    fn render(source: &str, vars: &Variables) -> String {
        Template::parse(source)
            .expect("template should parse")
            .render(vars)
            .expect("template should render")
    }

    // ==================== Text and Variables ====================

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render("Hello, world.", &Variables::new()), "Hello, world.");
    }

    #[test]
    fn test_variable_substitution() {
        let vars = vars(vec![("name", Value::from("Japanese"))]);
        assert_eq!(render("Translate into {{ name }}.", &vars), "Translate into Japanese.");
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        assert_eq!(render("[{{missing}}]", &Variables::new()), "[]");
    }

    #[test]
    fn test_comment_is_dropped() {
        assert_eq!(render("a{{! note }}b", &Variables::new()), "ab");
    }

    #[test]
    fn test_list_renders_comma_separated() {
        let vars = vars(vec![("codes", Value::from(vec!["en", "ja"]))]);
        assert_eq!(render("{{codes}}", &vars), "en, ja");
    }

    // ==================== Loops ====================

    #[test]
    fn test_each_with_offset_enumeration() {
        let vars = vars(vec![(
            "targets",
            Value::List(vec![target("en", "English"), target("ja", "Japanese")]),
        )]);
        let source = "{{#each targets}}{{add @index 2}}. {{this.name}}\n{{/each}}";
        assert_eq!(render(source, &vars), "2. English\n3. Japanese\n");
    }

    #[test]
    fn test_each_last_marker() {
        let vars = vars(vec![("codes", Value::from(vec!["en", "ja", "zh"]))]);
        let source = "{{#each codes}}\"{{this}}\"{{#unless @last}},{{/unless}}{{/each}}";
        assert_eq!(render(source, &vars), r#""en","ja","zh""#);
    }

    #[test]
    fn test_each_over_missing_list_renders_nothing() {
        assert_eq!(render("[{{#each nothing}}x{{/each}}]", &Variables::new()), "[]");
    }

    #[test]
    fn test_nested_loop_scopes() {
        let vars = vars(vec![
            ("outer", Value::from(vec!["a", "b"])),
            ("inner", Value::from(vec!["1", "2"])),
        ]);
        let source = "{{#each outer}}{{#each inner}}{{this}}{{/each}}{{this}};{{/each}}";
        assert_eq!(render(source, &vars), "12a;12b;");
    }

    #[test]
    fn test_root_variables_visible_inside_loop() {
        let vars = vars(vec![
            ("codes", Value::from(vec!["en"])),
            ("separator", Value::from(":")),
        ]);
        assert_eq!(render("{{#each codes}}{{this}}{{separator}}{{/each}}", &vars), "en:");
    }

    // ==================== Conditionals ====================

    #[test]
    fn test_if_contains_code() {
        let source = "{{#if contains codes \"neko\"}}persona{{else}}plain{{/if}}";
        let with = vars(vec![("codes", Value::from(vec!["en", "neko"]))]);
        let without = vars(vec![("codes", Value::from(vec!["en"]))]);
        assert_eq!(render(source, &with), "persona");
        assert_eq!(render(source, &without), "plain");
    }

    #[test]
    fn test_unless_block() {
        let vars = vars(vec![("flag", Value::Bool(false))]);
        assert_eq!(render("{{#unless flag}}shown{{/unless}}", &vars), "shown");
    }

    // ==================== Helpers ====================

    #[test]
    fn test_length_and_subtract() {
        let vars = vars(vec![("codes", Value::from(vec!["en", "ja", "zh"]))]);
        assert_eq!(render("{{length codes}}", &vars), "3");
        assert_eq!(render("{{subtract (length codes) 1}}", &vars), "2");
    }

    #[test]
    fn test_default_if_empty() {
        let source = "{{default prompt \"Please process the audio.\"}}";
        let empty = vars(vec![("prompt", Value::from(""))]);
        let given = vars(vec![("prompt", Value::from("Custom"))]);
        assert_eq!(render(source, &Variables::new()), "Please process the audio.");
        assert_eq!(render(source, &empty), "Please process the audio.");
        assert_eq!(render(source, &given), "Custom");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(render("{{default x \"a\\\"b\\nc\"}}", &Variables::new()), "a\"b\nc");
    }

    #[test]
    fn test_add_rejects_strings_at_render_time() {
        let template = Template::parse("{{add name 1}}").unwrap();
        let vars = vars(vec![("name", Value::from("x"))]);
        let err = template.render(&vars).unwrap_err();
        assert!(err.message().contains("expects two ints"));
    }

    #[test]
    fn test_arithmetic_overflow_is_error() {
        let vars = vars(vec![("big", Value::Int(i64::MAX)), ("small", Value::Int(i64::MIN))]);

        let err = Template::parse("{{add big 1}}").unwrap().render(&vars).unwrap_err();
        assert!(err.message().contains("'add' overflowed"));

        let err = Template::parse("{{subtract small 1}}").unwrap().render(&vars).unwrap_err();
        assert!(err.message().contains("'subtract' overflowed"));
    }

    // ==================== Parse Errors ====================

    #[test]
    fn test_unclosed_tag() {
        let err = Template::parse("Hello {{name").unwrap_err();
        assert!(err.message().contains("unclosed tag"));
    }

    #[test]
    fn test_unclosed_block() {
        let err = Template::parse("{{#if x}}never closed").unwrap_err();
        assert!(err.message().contains("unclosed"));
    }

    #[test]
    fn test_mismatched_block_close() {
        let err = Template::parse("{{#if x}}a{{/each}}").unwrap_err();
        assert!(err.message().contains("closes"));
    }

    #[test]
    fn test_unexpected_close() {
        assert!(Template::parse("a{{/if}}").is_err());
    }

    #[test]
    fn test_else_outside_block() {
        assert!(Template::parse("{{else}}").is_err());
        assert!(Template::parse("{{#each xs}}{{else}}{{/each}}").is_err());
    }

    #[test]
    fn test_wrong_arity() {
        let err = Template::parse("{{add 1}}").unwrap_err();
        assert!(err.message().contains("takes 2 argument(s)"));
    }

    #[test]
    fn test_unknown_helper_in_parens() {
        assert!(Template::parse("{{add (multiply 1 2) 3}}").is_err());
    }

    #[test]
    fn test_unknown_block_keyword() {
        assert!(Template::parse("{{#with x}}{{/with}}").is_err());
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Template::parse("{{default x \"oops}}").is_err());
    }

    // ==================== Value Conversion ====================

    #[test]
    fn test_json_value_conversion() {
        let json = serde_json::json!({"a": [1, "two", true, null]});
        let value = Value::from(json);
        let Value::Map(map) = value else {
            panic!("expected a map");
        };
        assert_eq!(
            map.get("a"),
            Some(&Value::List(vec![
                Value::Int(1),
                Value::from("two"),
                Value::Bool(true),
                Value::Null
            ]))
        );
    }
}
