//! Hand-written parser for the supported PromQL subset.
//!
//! ```text
//! query      := selector range?
//!             | function '(' (selector range?)? ')'
//!             | agg '(' query ')' (('by' | 'without') '(' labels ')')?
//! selector   := metric_name ('{' (label '=' value (',' label '=' value)*)? '}')?
//! range      := '[' duration ']'
//! ```

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use telemorph_core::attr::Attributes;
use telemorph_core::error::{Result, TelemorphError};

use crate::ast::{Aggregation, Grouping, Query};
use crate::registry::Registry;

static METRIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:.]*$").expect("metric name pattern is valid")
});

static LABEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.]*$").expect("label name pattern is valid")
});

pub fn parse(input: &str) -> Result<Query> {
    let expr = input.trim();
    if expr.is_empty() {
        return Err(TelemorphError::parse(input, "empty query"));
    }
    parse_expr(expr, Registry::builtin())
}

fn parse_expr(expr: &str, registry: &Registry) -> Result<Query> {
    let expr = expr.trim();
    match find_unquoted(expr, '(') {
        // A '(' after '{' belongs to a label value or is garbage; the selector
        // parser reports it.
        Some(open) if find_unquoted(&expr[..open], '{').is_none() => {
            parse_call(expr, open, registry)
        }
        _ => parse_range_selector(expr),
    }
}

fn parse_call(expr: &str, open: usize, registry: &Registry) -> Result<Query> {
    let name = expr[..open].trim();
    if name.is_empty() {
        return Err(TelemorphError::parse(expr, "missing function name"));
    }
    if !LABEL_NAME.is_match(name) {
        return Err(TelemorphError::parse(name, "invalid function name"));
    }
    let close = matching_paren(expr, open)
        .ok_or_else(|| TelemorphError::parse(expr, "missing closing parenthesis"))?;
    let inner = &expr[open + 1..close];
    let rest = expr[close + 1..].trim();

    if registry.is_aggregation(name) {
        if inner.trim().is_empty() {
            return Err(TelemorphError::parse(expr, "aggregation requires an argument"));
        }
        let mut query = parse_expr(inner, registry)?;
        if query.aggregation.is_some() {
            return Err(TelemorphError::parse(inner, "nested aggregations are not supported"));
        }
        query.aggregation = Some(Aggregation {
            operation: name.to_string(),
            grouping: parse_grouping(rest)?,
        });
        return Ok(query);
    }

    if !rest.is_empty() {
        return Err(TelemorphError::parse(rest, "unexpected input after function call"));
    }
    if find_unquoted(inner, '(').is_some() {
        return Err(TelemorphError::parse(inner, "nested function calls are not supported"));
    }

    let mut query = if inner.trim().is_empty() {
        Query::default()
    } else {
        parse_range_selector(inner)?
    };
    query.function = Some(name.to_string());
    Ok(query)
}

fn parse_grouping(rest: &str) -> Result<Grouping> {
    if rest.is_empty() {
        return Ok(Grouping::None);
    }
    let (by, tail) = if let Some(tail) = strip_keyword(rest, "by") {
        (true, tail)
    } else if let Some(tail) = strip_keyword(rest, "without") {
        (false, tail)
    } else {
        return Err(TelemorphError::parse(rest, "expected `by (...)` or `without (...)`"));
    };

    let tail = tail.trim_start();
    if !tail.starts_with('(') {
        return Err(TelemorphError::parse(tail, "expected `(` after grouping keyword"));
    }
    let close = matching_paren(tail, 0)
        .ok_or_else(|| TelemorphError::parse(tail, "missing closing parenthesis"))?;
    if !tail[close + 1..].trim().is_empty() {
        return Err(TelemorphError::parse(&tail[close + 1..], "unexpected input after grouping"));
    }

    let labels = tail[1..close]
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| {
            if LABEL_NAME.is_match(label) {
                Ok(label.to_string())
            } else {
                Err(TelemorphError::parse(label, "invalid label name"))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(if by {
        Grouping::By(labels)
    } else {
        Grouping::Without(labels)
    })
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let tail = text.strip_prefix(keyword)?;
    match tail.chars().next() {
        Some(c) if c == '(' || c.is_whitespace() => Some(tail),
        _ => None,
    }
}

fn parse_range_selector(expr: &str) -> Result<Query> {
    let expr = expr.trim();
    let (selector, range) = if expr.ends_with(']') {
        let open = rfind_unquoted(expr, '[')
            .ok_or_else(|| TelemorphError::parse(expr, "missing opening bracket"))?;
        let text = &expr[open + 1..expr.len() - 1];
        let range = parse_duration(text)?;
        if range.is_zero() {
            return Err(TelemorphError::parse(text, "range must be positive"));
        }
        (&expr[..open], Some(range))
    } else if find_unquoted(expr, '[').is_some() {
        return Err(TelemorphError::parse(expr, "missing closing bracket"));
    } else {
        (expr, None)
    };

    let mut query = parse_selector(selector)?;
    query.range = range;
    Ok(query)
}

fn parse_selector(selector: &str) -> Result<Query> {
    let selector = selector.trim();
    let (name, labels) = match find_unquoted(selector, '{') {
        Some(open) => {
            let close = find_unquoted(&selector[open + 1..], '}')
                .map(|i| i + open + 1)
                .ok_or_else(|| TelemorphError::parse(selector, "missing closing brace"))?;
            if close + 1 != selector.len() {
                return Err(TelemorphError::parse(
                    &selector[close + 1..],
                    "unexpected input after label selector",
                ));
            }
            (
                selector[..open].trim(),
                parse_labels(&selector[open + 1..close])?,
            )
        }
        None => {
            if find_unquoted(selector, '}').is_some() {
                return Err(TelemorphError::parse(selector, "missing opening brace"));
            }
            (selector, Attributes::new())
        }
    };

    if name.is_empty() {
        return Err(TelemorphError::parse(selector, "metric name is required"));
    }
    if !METRIC_NAME.is_match(name) {
        return Err(TelemorphError::parse(name, "invalid metric name"));
    }

    Ok(Query {
        metric_name: name.to_string(),
        labels,
        ..Query::default()
    })
}

fn parse_labels(body: &str) -> Result<Attributes> {
    let mut labels = Attributes::new();
    for pair in split_unquoted(body, ',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let eq = find_unquoted(pair, '=')
            .ok_or_else(|| TelemorphError::parse(pair, "expected key=\"value\""))?;
        let key = pair[..eq].trim();
        let raw = pair[eq + 1..].trim();
        if key.ends_with('!') || raw.starts_with('~') {
            return Err(TelemorphError::parse(
                pair,
                "only exact-match (=) label matchers are supported",
            ));
        }
        if !LABEL_NAME.is_match(key) {
            return Err(TelemorphError::parse(key, "invalid label name"));
        }
        let value = unquote(raw)?;
        if labels.insert(key.to_string(), value).is_some() {
            return Err(TelemorphError::parse(pair, "duplicate label"));
        }
    }
    Ok(labels)
}

fn unquote(raw: &str) -> Result<String> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next_back()) {
        (Some(open), Some(close)) if (open == '"' || open == '\'') && open == close => {
            let inner = &raw[1..raw.len() - 1];
            let mut out = String::with_capacity(inner.len());
            let mut escaped = false;
            for c in inner.chars() {
                if escaped {
                    out.push(match c {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == open {
                    return Err(TelemorphError::parse(raw, "unescaped quote in label value"));
                } else {
                    out.push(c);
                }
            }
            if escaped {
                return Err(TelemorphError::parse(raw, "dangling escape in label value"));
            }
            Ok(out)
        }
        _ if raw.contains(['"', '\'']) => {
            Err(TelemorphError::parse(raw, "unterminated quoted label value"))
        }
        _ => Ok(raw.to_string()),
    }
}

/// Accepts `<integer><s|m|h|d>` and falls back to humantime syntax (`1h30m`, `500ms`).
pub fn parse_duration(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TelemorphError::parse(text, "empty duration"));
    }

    if let Some((idx, unit)) = trimmed.char_indices().last() {
        let digits = &trimmed[..idx];
        let multiplier = match unit {
            's' => Some(1u64),
            'm' => Some(60),
            'h' => Some(60 * 60),
            'd' => Some(24 * 60 * 60),
            _ => None,
        };
        let is_integer = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
        if let (Some(multiplier), true) = (multiplier, is_integer) {
            let secs = digits
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(multiplier))
                .ok_or_else(|| TelemorphError::parse(text, "duration out of range"))?;
            return Ok(Duration::from_secs(secs));
        }
    }

    humantime::parse_duration(trimmed)
        .map_err(|e| TelemorphError::parse(text, format!("invalid duration: {e}")))
}

/// Characters outside single- or double-quoted sections, with their byte offsets.
fn unquoted(text: &str) -> impl Iterator<Item = (usize, char)> + '_ {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    text.char_indices().filter(move |&(_, c)| match quote.as_ref().copied() {
        Some(q) => {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            false
        }
        None if c == '"' || c == '\'' => {
            quote = Some(c);
            false
        }
        None => true,
    })
}

fn find_unquoted(text: &str, target: char) -> Option<usize> {
    unquoted(text).find(|&(_, c)| c == target).map(|(i, _)| i)
}

fn rfind_unquoted(text: &str, target: char) -> Option<usize> {
    unquoted(text)
        .filter(|&(_, c)| c == target)
        .last()
        .map(|(i, _)| i)
}

fn split_unquoted(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in unquoted(text) {
        if c == separator {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in unquoted(text).skip_while(|&(i, _)| i < open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
