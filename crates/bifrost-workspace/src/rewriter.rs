// Decorator rewriter
//
// Reads and writes @workflow / @tool / @data_provider decorator keyword
// arguments in Python source without disturbing any other byte of the
// file. The parser is a small hand-rolled scanner that understands just
// enough Python (strings, comments, bracket nesting) to locate decorator
// argument lists and the following function definition; it never executes
// or imports user code.
//
// A parse failure returns a Validation error and callers keep the
// original source - nothing is persisted on failure.

use bifrost_contracts::EntityType;
use bifrost_core::{Error, Result};
use uuid::Uuid;

/// A decorator keyword-argument value.
///
/// Rendering rules: strings are double-quoted, booleans are True/False,
/// numbers are bare literals, lists render recursively, None is None.
/// `Raw` preserves an expression this parser does not model.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    List(Vec<PropertyValue>),
    None,
    Raw(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => Option::None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => Option::None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            PropertyValue::Str(s) => {
                format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            PropertyValue::Bool(true) => "True".to_string(),
            PropertyValue::Bool(false) => "False".to_string(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.render()).collect();
                format!("[{}]", inner.join(", "))
            }
            PropertyValue::None => "None".to_string(),
            PropertyValue::Raw(raw) => raw.clone(),
        }
    }
}

/// A discovered decorator on a function definition
#[derive(Debug, Clone)]
pub struct DecoratorInfo {
    pub decorator_type: EntityType,
    pub function_name: String,
    /// 1-based line of the `@`
    pub line: usize,
    pub has_parentheses: bool,
    /// Keyword arguments in source order
    pub kwargs: Vec<(String, PropertyValue)>,
    /// Raw parameter list of the decorated function, for schema derivation
    pub function_params: String,
}

impl DecoratorInfo {
    pub fn kwarg(&self, key: &str) -> Option<&PropertyValue> {
        self.kwargs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn has_id(&self) -> bool {
        self.kwarg("id").is_some()
    }
}

/// Outcome of an id-injection pass
#[derive(Debug, Clone)]
pub struct InjectOutcome {
    pub source: String,
    pub modified: bool,
    /// (function_name, injected id) per decorator that gained an id
    pub injected: Vec<(String, Uuid)>,
}

/// Outcome of a property write
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub source: String,
    pub modified: bool,
    pub changes: Vec<String>,
}

/// Enumerate every supported decorator in the source.
pub fn read_decorators(source: &str) -> Result<Vec<DecoratorInfo>> {
    let parsed = parse(source)?;
    Ok(parsed
        .into_iter()
        .map(|raw| {
            let kwargs = raw
                .args
                .iter()
                .filter_map(|arg| {
                    arg.key.clone().map(|key| {
                        (key, parse_value(&source[arg.value_start..arg.text_end]))
                    })
                })
                .collect();
            DecoratorInfo {
                decorator_type: raw.dec_type,
                function_name: raw.function_name,
                line: raw.line,
                has_parentheses: raw.parens.is_some(),
                kwargs,
                function_params: raw.function_params,
            }
        })
        .collect())
}

/// Insert a fresh UUID as the first keyword argument of every supported
/// decorator that lacks one, converting bare `@workflow` to
/// `@workflow(id="…")` as needed. All untouched bytes are preserved.
pub fn inject_ids(source: &str) -> Result<InjectOutcome> {
    let parsed = parse(source)?;

    // (offset, text) insertions, applied back-to-front so earlier offsets
    // stay valid.
    let mut insertions: Vec<(usize, String)> = Vec::new();
    let mut injected = Vec::new();

    for raw in &parsed {
        if raw.args.iter().any(|a| a.key.as_deref() == Some("id")) {
            continue;
        }
        let id = Uuid::new_v4();
        match raw.parens {
            Some((open, _)) if raw.args.is_empty() => {
                insertions.push((open + 1, format!("id=\"{id}\"")));
            }
            Some((open, _)) => {
                insertions.push((open + 1, format!("id=\"{id}\", ")));
            }
            Option::None => {
                insertions.push((raw.name_end, format!("(id=\"{id}\")")));
            }
        }
        injected.push((raw.function_name.clone(), id));
    }

    if insertions.is_empty() {
        return Ok(InjectOutcome {
            source: source.to_string(),
            modified: false,
            injected,
        });
    }

    let mut out = source.to_string();
    insertions.sort_by(|a, b| b.0.cmp(&a.0));
    for (offset, text) in insertions {
        out.insert_str(offset, &text);
    }

    Ok(InjectOutcome {
        source: out,
        modified: true,
        injected,
    })
}

/// Set or update keyword arguments on the supported decorators of one
/// function. Existing argument order is preserved, new keys append at the
/// end, and the re-emitted list carries exactly one comma between
/// arguments and none after the last.
pub fn write_properties(
    source: &str,
    target_function: &str,
    properties: &[(String, PropertyValue)],
) -> Result<WriteOutcome> {
    let parsed = parse(source)?;
    let mut changes = Vec::new();

    // (start, end, replacement) span edits, non-overlapping
    let mut edits: Vec<(usize, usize, String)> = Vec::new();

    for raw in &parsed {
        if raw.function_name != target_function {
            continue;
        }

        let mut pieces: Vec<String> = Vec::new();
        let mut handled: Vec<&str> = Vec::new();

        for arg in &raw.args {
            match &arg.key {
                Some(key) => {
                    if let Some((_, value)) =
                        properties.iter().find(|(k, _)| k == key)
                    {
                        pieces.push(format!("{key}={}", value.render()));
                        handled.push(key);
                        changes.push(format!(
                            "Set {key}={} on @{} of {}",
                            value.render(),
                            raw.dec_type.decorator(),
                            raw.function_name
                        ));
                    } else {
                        pieces.push(source[arg.text_start..arg.text_end].trim().to_string());
                    }
                }
                Option::None => {
                    pieces.push(source[arg.text_start..arg.text_end].trim().to_string());
                }
            }
        }

        for (key, value) in properties {
            if handled.iter().any(|k| k == key) {
                continue;
            }
            pieces.push(format!("{key}={}", value.render()));
            changes.push(format!(
                "Added {key}={} to @{} of {}",
                value.render(),
                raw.dec_type.decorator(),
                raw.function_name
            ));
        }

        let rendered = format!("({})", pieces.join(", "));
        match raw.parens {
            Some((open, close)) => edits.push((open, close + 1, rendered)),
            Option::None => edits.push((raw.name_end, raw.name_end, rendered)),
        }
    }

    if edits.is_empty() {
        return Ok(WriteOutcome {
            source: source.to_string(),
            modified: false,
            changes,
        });
    }

    let mut out = source.to_string();
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, end, replacement) in edits {
        out.replace_range(start..end, &replacement);
    }

    Ok(WriteOutcome {
        source: out,
        modified: true,
        changes,
    })
}

// ============================================================
// Parser internals
// ============================================================

struct RawDecorator {
    dec_type: EntityType,
    /// Byte offset just past the decorator name
    name_end: usize,
    /// Byte offsets of the opening and closing parens, when present
    parens: Option<(usize, usize)>,
    args: Vec<RawArg>,
    function_name: String,
    function_params: String,
    line: usize,
}

struct RawArg {
    key: Option<String>,
    /// Full `key=value` span
    text_start: usize,
    text_end: usize,
    /// Value span start (equals text_start for positional args)
    value_start: usize,
}

struct FunctionDef {
    offset: usize,
    name: String,
    params: String,
}

fn parse(source: &str) -> Result<Vec<RawDecorator>> {
    let bytes = source.as_bytes();
    let mut decorators: Vec<(EntityType, usize, Option<(usize, usize)>, Vec<RawArg>, usize)> =
        Vec::new();
    let functions = find_functions(source)?;

    let mut line = 0usize;
    let mut offset = 0usize;

    while offset < bytes.len() {
        line += 1;
        let line_end = source[offset..]
            .find('\n')
            .map(|i| offset + i + 1)
            .unwrap_or(bytes.len());

        let content = &source[offset..line_end];
        let trimmed_start = content.len() - content.trim_start().len();
        let at_offset = offset + trimmed_start;

        // `at_offset < line_end` keeps blank lines from bleeding into the
        // next line's first byte.
        if at_offset < line_end && bytes.get(at_offset) == Some(&b'@') {
            let name_start = at_offset + 1;
            let mut name_end = name_start;
            while name_end < bytes.len()
                && (bytes[name_end].is_ascii_alphanumeric()
                    || bytes[name_end] == b'_'
                    || bytes[name_end] == b'.')
            {
                name_end += 1;
            }

            let full_name = &source[name_start..name_end];
            let short_name = full_name.rsplit('.').next().unwrap_or(full_name);

            if let Ok(dec_type) = short_name.parse::<EntityType>() {
                if bytes.get(name_end) == Some(&b'(') {
                    let close = scan_balanced(source, name_end)?;
                    let args = split_args(source, name_end + 1, close)?;
                    decorators.push((dec_type, name_end, Some((name_end, close)), args, line));
                    // Resume scanning after the argument list.
                    offset = source[close..]
                        .find('\n')
                        .map(|i| close + i + 1)
                        .unwrap_or(bytes.len());
                    line += source[at_offset..close].matches('\n').count();
                    continue;
                } else {
                    decorators.push((dec_type, name_end, Option::None, Vec::new(), line));
                }
            }
        }

        offset = line_end;
    }

    let mut out = Vec::new();
    for (dec_type, name_end, parens, args, line) in decorators {
        let end = parens.map(|(_, close)| close).unwrap_or(name_end);
        let function = functions.iter().find(|f| f.offset > end).ok_or_else(|| {
            Error::validation(format!(
                "decorator @{} at line {line} is not followed by a function definition",
                dec_type.decorator()
            ))
        })?;
        out.push(RawDecorator {
            dec_type,
            name_end,
            parens,
            args,
            function_name: function.name.clone(),
            function_params: function.params.clone(),
            line,
        });
    }

    Ok(out)
}

fn find_functions(source: &str) -> Result<Vec<FunctionDef>> {
    let bytes = source.as_bytes();
    let mut functions = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let line_end = source[offset..]
            .find('\n')
            .map(|i| offset + i + 1)
            .unwrap_or(bytes.len());
        let content = &source[offset..line_end];
        let trimmed = content.trim_start();

        let def_rest = trimmed
            .strip_prefix("async def ")
            .or_else(|| trimmed.strip_prefix("def "));

        if let Some(rest) = def_rest {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                let def_start = offset + (content.len() - trimmed.len());
                if let Some(paren_rel) = source[def_start..line_end.min(bytes.len())].find('(') {
                    let open = def_start + paren_rel;
                    let close = scan_balanced(source, open)?;
                    functions.push(FunctionDef {
                        offset: def_start,
                        name,
                        params: source[open + 1..close].to_string(),
                    });
                    offset = source[close..]
                        .find('\n')
                        .map(|i| close + i + 1)
                        .unwrap_or(bytes.len());
                    continue;
                }
            }
        }

        offset = line_end;
    }

    Ok(functions)
}

/// Find the closing bracket matching the opener at `open`, skipping
/// strings (including triple-quoted) and comments.
fn scan_balanced(source: &str, open: usize) -> Result<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0i32;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            b'#' => {
                // Comment runs to end of line
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    Err(Error::validation(
        "unbalanced brackets in decorator or signature".to_string(),
    ))
}

/// Skip a string literal starting at `start`; returns the index just past
/// its closing quote.
fn skip_string(bytes: &[u8], start: usize) -> Result<usize> {
    let quote = bytes[start];
    let triple = bytes.len() >= start + 3 && bytes[start + 1] == quote && bytes[start + 2] == quote;
    let mut i = if triple { start + 3 } else { start + 1 };

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if triple {
                if bytes.len() >= i + 3 && bytes[i + 1] == quote && bytes[i + 2] == quote {
                    return Ok(i + 3);
                }
            } else {
                return Ok(i + 1);
            }
        }
        i += 1;
    }

    Err(Error::validation("unterminated string literal".to_string()))
}

/// Split an argument list span into top-level comma-separated arguments.
fn split_args(source: &str, start: usize, end: usize) -> Result<Vec<RawArg>> {
    let bytes = source.as_bytes();
    let mut args = Vec::new();
    let mut piece_start = start;
    let mut depth = 0i32;
    let mut i = start;

    while i < end {
        let b = bytes[i];
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'#' => {
                while i < end && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b',' if depth == 0 => {
                push_arg(source, piece_start, i, &mut args);
                piece_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    push_arg(source, piece_start, end, &mut args);

    Ok(args)
}

fn push_arg(source: &str, start: usize, end: usize, args: &mut Vec<RawArg>) {
    let text = &source[start..end];
    let trimmed = text.trim();
    // Pure-comment pieces appear when a comment follows the comma of a
    // multiline argument list; they are formatting, not arguments.
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return;
    }

    let text_start = start + (text.len() - text.trim_start().len());
    let mut text_end = text_start + trimmed.len();

    // Trim a trailing comment off the final argument of a multiline list.
    if let Some(hash) = top_level_comment_start(trimmed) {
        let head = trimmed[..hash].trim_end();
        text_end = text_start + head.len();
        if head.is_empty() {
            return;
        }
    }

    // `ident = value` with a single '=' marks a keyword argument
    let arg_text = &source[text_start..text_end];
    let mut key = Option::None;
    let mut value_start = text_start;
    let ident: String = arg_text
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if !ident.is_empty() {
        let after = arg_text[ident.len()..].trim_start();
        if after.starts_with('=') && !after.starts_with("==") {
            key = Some(ident.clone());
            let eq_abs = text_start + (arg_text.len() - after.len());
            let value_text = &source[eq_abs + 1..text_end];
            value_start = eq_abs + 1 + (value_text.len() - value_text.trim_start().len());
        }
    }

    args.push(RawArg {
        key,
        text_start,
        text_end,
        value_start,
    });
}

/// Offset of the first `#` outside any string literal, if any.
fn top_level_comment_start(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => return Some(i),
            b'"' | b'\'' => match skip_string(bytes, i) {
                Ok(next) => {
                    i = next;
                    continue;
                }
                Err(_) => return Option::None,
            },
            _ => {}
        }
        i += 1;
    }
    Option::None
}

fn parse_value(raw: &str) -> PropertyValue {
    let trimmed = raw.trim();

    if trimmed == "True" {
        return PropertyValue::Bool(true);
    }
    if trimmed == "False" {
        return PropertyValue::Bool(false);
    }
    if trimmed == "None" {
        return PropertyValue::None;
    }

    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        let inner = &trimmed[1..trimmed.len() - 1];
        if !inner.contains(trimmed.as_bytes()[0] as char) {
            return PropertyValue::Str(
                inner.replace("\\\"", "\"").replace("\\'", "'").replace("\\\\", "\\"),
            );
        }
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return PropertyValue::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if trimmed.contains('.') || trimmed.contains('e') || trimmed.contains('E') {
            return PropertyValue::Float(f);
        }
    }

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(items) = split_list_items(&trimmed[1..trimmed.len() - 1]) {
            return PropertyValue::List(items.iter().map(|s| parse_value(s)).collect());
        }
    }

    PropertyValue::Raw(trimmed.to_string())
}

fn split_list_items(inner: &str) -> Result<Vec<String>> {
    let bytes = inner.as_bytes();
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'"' | b'\'' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            b',' if depth == 0 => {
                items.push(inner[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if !inner[start..].trim().is_empty() {
        items.push(inner[start..].to_string());
    }

    Ok(items)
}

// ============================================================
// Parameters-schema derivation
// ============================================================

/// Derive a JSON-schema-shaped object from the decorated function's raw
/// parameter list. Unannotated parameters map to string; `self`, `*args`
/// and `**kwargs` are skipped.
pub fn parameters_schema(raw_params: &str) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    let pieces = match split_list_items(raw_params) {
        Ok(p) => p,
        Err(_) => Vec::new(),
    };

    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() || piece.starts_with('*') || piece == "self" {
            continue;
        }

        let (head, default) = match split_once_top_level(piece, '=') {
            Some((h, d)) => (h.trim().to_string(), Some(d.trim().to_string())),
            Option::None => (piece.to_string(), Option::None),
        };

        let (name, annotation) = match head.split_once(':') {
            Some((n, a)) => (n.trim().to_string(), Some(a.trim().to_string())),
            Option::None => (head.trim().to_string(), Option::None),
        };
        if name.is_empty() {
            continue;
        }

        let json_type = annotation
            .as_deref()
            .map(python_type_to_json)
            .unwrap_or("string");
        properties.insert(
            name.clone(),
            serde_json::json!({ "type": json_type }),
        );
        if default.is_none() {
            required.push(serde_json::Value::String(name));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": serde_json::Value::Object(properties),
        "required": serde_json::Value::Array(required),
    })
}

fn split_once_top_level(piece: &str, sep: char) -> Option<(&str, &str)> {
    let bytes = piece.as_bytes();
    let mut depth = 0i32;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'"' | b'\'' => match skip_string(bytes, i) {
                Ok(next) => {
                    i = next;
                    continue;
                }
                Err(_) => return Option::None,
            },
            b if depth == 0 && b == sep as u8 => {
                return Some((&piece[..i], &piece[i + 1..]));
            }
            _ => {}
        }
        i += 1;
    }
    Option::None
}

fn python_type_to_json(annotation: &str) -> &'static str {
    let base = annotation
        .split('[')
        .next()
        .unwrap_or(annotation)
        .trim();
    match base {
        "str" => "string",
        "int" => "integer",
        "float" => "number",
        "bool" => "boolean",
        "dict" | "Dict" => "object",
        "list" | "List" => "array",
        _ => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os

@workflow(name="hello", tags=["greeting", "demo"], endpoint_enabled=True)
async def hello(x: str) -> dict:
    return {"got": x}


@tool
def helper(a: int, b: int = 2):
    return a + b
"#;

    #[test]
    fn reads_decorators_with_kwargs() {
        let decorators = read_decorators(SAMPLE).unwrap();
        assert_eq!(decorators.len(), 2);

        let wf = &decorators[0];
        assert_eq!(wf.decorator_type, EntityType::Workflow);
        assert_eq!(wf.function_name, "hello");
        assert!(wf.has_parentheses);
        assert_eq!(wf.kwarg("name").unwrap().as_str(), Some("hello"));
        assert_eq!(
            wf.kwarg("tags").unwrap(),
            &PropertyValue::List(vec![
                PropertyValue::Str("greeting".into()),
                PropertyValue::Str("demo".into())
            ])
        );
        assert_eq!(wf.kwarg("endpoint_enabled").unwrap().as_bool(), Some(true));

        let tool = &decorators[1];
        assert_eq!(tool.decorator_type, EntityType::Tool);
        assert_eq!(tool.function_name, "helper");
        assert!(!tool.has_parentheses);
        assert!(tool.kwargs.is_empty());
    }

    #[test]
    fn injects_id_as_first_kwarg() {
        let outcome = inject_ids(SAMPLE).unwrap();
        assert!(outcome.modified);
        assert_eq!(outcome.injected.len(), 2);

        let decorators = read_decorators(&outcome.source).unwrap();
        for dec in &decorators {
            assert!(dec.has_id(), "{} should have an id", dec.function_name);
            assert_eq!(dec.kwargs[0].0, "id");
        }

        // Bare @tool became a call form
        assert!(outcome.source.contains("@tool(id=\""));
        // Existing kwargs survive unchanged after the injected id
        assert!(outcome.source.contains("name=\"hello\""));
    }

    #[test]
    fn inject_preserves_unchanged_lines() {
        let outcome = inject_ids(SAMPLE).unwrap();
        let before: Vec<&str> = SAMPLE.lines().collect();
        let after: Vec<&str> = outcome.source.lines().collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            if !b.starts_with("@workflow") && !b.starts_with("@tool") {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn inject_is_idempotent() {
        let first = inject_ids(SAMPLE).unwrap();
        let second = inject_ids(&first.source).unwrap();
        assert!(!second.modified);
        assert_eq!(first.source, second.source);
    }

    #[test]
    fn read_structure_is_stable_across_injection() {
        let before = read_decorators(SAMPLE).unwrap();
        let after = read_decorators(&inject_ids(SAMPLE).unwrap().source).unwrap();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.function_name, a.function_name);
            assert_eq!(b.decorator_type, a.decorator_type);
            let without_id: Vec<_> = a.kwargs.iter().filter(|(k, _)| k != "id").collect();
            let original: Vec<_> = b.kwargs.iter().collect();
            assert_eq!(without_id, original);
        }
    }

    #[test]
    fn writes_properties_preserving_order() {
        let source = "@workflow(id=\"abc\", name=\"old\", schedule=\"0 * * * *\")\ndef job():\n    pass\n";
        let outcome = write_properties(
            source,
            "job",
            &[
                ("name".to_string(), PropertyValue::Str("new".into())),
                ("endpoint_enabled".to_string(), PropertyValue::Bool(true)),
            ],
        )
        .unwrap();

        assert!(outcome.modified);
        assert!(outcome.source.starts_with(
            "@workflow(id=\"abc\", name=\"new\", schedule=\"0 * * * *\", endpoint_enabled=True)"
        ));
        assert!(outcome.source.ends_with("def job():\n    pass\n"));
    }

    #[test]
    fn write_fixes_trailing_commas() {
        let source = "@workflow(\n    id=\"abc\",\n    name=\"x\",\n)\ndef job():\n    pass\n";
        let outcome = write_properties(
            source,
            "job",
            &[("category".to_string(), PropertyValue::Str("ops".into()))],
        )
        .unwrap();

        assert!(outcome
            .source
            .starts_with("@workflow(id=\"abc\", name=\"x\", category=\"ops\")"));
        assert!(!outcome.source.contains(",)"));
    }

    #[test]
    fn multiline_decorator_args_parse() {
        let source = "@workflow(\n    id=\"abc\",\n    name=\"multi\",  # display name\n)\nasync def multi():\n    pass\n";
        let decorators = read_decorators(source).unwrap();
        assert_eq!(decorators.len(), 1);
        assert_eq!(decorators[0].kwarg("name").unwrap().as_str(), Some("multi"));
    }

    #[test]
    fn unsupported_decorators_are_ignored() {
        let source = "@app.route(\"/x\")\n@staticmethod\ndef handler():\n    pass\n";
        assert!(read_decorators(source).unwrap().is_empty());
        let outcome = inject_ids(source).unwrap();
        assert!(!outcome.modified);
        assert_eq!(outcome.source, source);
    }

    #[test]
    fn unbalanced_parens_is_validation_error() {
        let source = "@workflow(name=\"broken\"\ndef broken():\n    pass\n";
        let err = read_decorators(source).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn decorator_without_function_is_validation_error() {
        let source = "@workflow(name=\"dangling\")\nx = 1\n";
        assert!(read_decorators(source).is_err());
    }

    #[test]
    fn derives_parameters_schema() {
        let decorators = read_decorators(SAMPLE).unwrap();
        let schema = parameters_schema(&decorators[0].function_params);
        assert_eq!(schema["properties"]["x"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["x"]));

        let helper_schema = parameters_schema(&decorators[1].function_params);
        assert_eq!(helper_schema["properties"]["a"]["type"], "integer");
        assert_eq!(helper_schema["properties"]["b"]["type"], "integer");
        // b has a default and is not required
        assert_eq!(helper_schema["required"], serde_json::json!(["a"]));
    }

    #[test]
    fn string_values_with_commas_stay_whole() {
        let source = "@workflow(id=\"a\", name=\"hello, world\", category=\"a, b\")\ndef f():\n    pass\n";
        let decorators = read_decorators(source).unwrap();
        assert_eq!(
            decorators[0].kwarg("name").unwrap().as_str(),
            Some("hello, world")
        );
    }
}
