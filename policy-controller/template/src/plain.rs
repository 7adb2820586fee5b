use crate::{cel, Engine, Error, InjectedData};
use once_cell::sync::Lazy;
use regex::Regex;

static OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*expr:").expect("expression marker regex must compile"));

/// An `{{expr: ...}}` marker within a plain text template.
#[derive(Debug, PartialEq, Eq)]
struct Marker<'t> {
    start: usize,
    end: usize,
    expr: &'t str,
}

pub(crate) fn has_expressions(text: &str) -> bool {
    OPEN.is_match(text)
}

/// Replaces every `{{expr: ...}}` marker in `text` with the result of its CEL expression.
pub(crate) fn render(text: &str, data: &InjectedData<'_>) -> Result<String, Error> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for marker in markers(text)? {
        out.push_str(&text[last..marker.start]);
        out.push_str(&cel::evaluate(marker.expr, data)?);
        last = marker.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

pub(crate) fn check(text: &str) -> Result<(), Error> {
    for marker in markers(text)? {
        cel::check(marker.expr)?;
    }
    Ok(())
}

fn markers(text: &str) -> Result<Vec<Marker<'_>>, Error> {
    let mut markers = Vec::new();
    let mut pos = 0;
    while let Some(open) = OPEN.find_at(text, pos) {
        let body = open.end();
        let close = closing(&text[body..]).map(|n| body + n).ok_or_else(|| {
            Error::syntax(
                Engine::Plain,
                format!("unterminated expression marker at offset {}", open.start()),
            )
        })?;
        markers.push(Marker {
            start: open.start(),
            end: close + 2,
            expr: text[body..close].trim(),
        });
        pos = close + 2;
    }
    Ok(markers)
}

/// Returns the offset of the `}}` that closes a marker body. Braces and quoted strings within the
/// expression are skipped, so map literals may be nested.
fn closing(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth == 0 => return (bytes.get(i + 1) == Some(&b'}')).then_some(i),
                b'}' => depth -= 1,
                _ => {}
            },
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_and_multiline_markers() {
        let text = "a={{expr: {'a': {'b': 1}}.a.b}} b={{ expr:\n  x\n  + 1 }}";
        let found = markers(text).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].expr, "{'a': {'b': 1}}.a.b");
        assert_eq!(&text[found[0].start..found[0].end], "{{expr: {'a': {'b': 1}}.a.b}}");
        assert_eq!(found[1].expr, "x\n  + 1");
        assert_eq!(found[1].end, text.len());
    }

    #[test]
    fn ignores_braces_in_strings() {
        let found = markers("{{expr: '}}' + \"{\"}}!").unwrap();
        assert_eq!(found[0].expr, "'}}' + \"{\"");
        assert_eq!(found[0].end, "{{expr: '}}' + \"{\"}}".len());
    }

    #[test]
    fn rejects_unterminated_markers() {
        for text in ["x={{expr: 1 + 1", "x={{expr: {'a': 1}", "x={{expr: 1 } + 1"] {
            assert!(
                matches!(markers(text), Err(Error::Syntax { engine: Engine::Plain, .. })),
                "{text:?}"
            );
        }
    }
}
