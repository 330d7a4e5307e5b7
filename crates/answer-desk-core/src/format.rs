use once_cell::sync::Lazy;
use regex_lite::Regex;

static NUMBER_MARKER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d{1,2})\.").ok());

#[derive(Debug, Clone, Copy)]
struct Marker {
    start: usize,
    end: usize,
    number: u32,
}

fn boundary_before(text: &str, at: usize) -> bool {
    match text[..at].chars().next_back() {
        Some(ch) => ch.is_whitespace(),
        None => true,
    }
}

fn boundary_after(text: &str, at: usize) -> bool {
    match text[at..].chars().next() {
        Some(ch) => ch.is_whitespace(),
        None => true,
    }
}

/// Markers `1.`, `2.`, ... in order, each standing alone between whitespace.
fn sequential_markers(text: &str) -> Vec<Marker> {
    let Some(pattern) = NUMBER_MARKER.as_ref() else {
        return Vec::new();
    };
    let mut expected = 1;
    let mut markers = Vec::new();
    for captures in pattern.captures_iter(text) {
        let (Some(whole), Some(digits)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if !boundary_before(text, whole.start()) || !boundary_after(text, whole.end()) {
            continue;
        }
        let Ok(number) = digits.as_str().parse::<u32>() else {
            continue;
        };
        if number == expected {
            markers.push(Marker { start: whole.start(), end: whole.end(), number });
            expected += 1;
        }
    }
    markers
}

fn split_numbered(text: &str) -> Option<String> {
    let markers = sequential_markers(text);
    if markers.len() < 2 {
        return None;
    }

    let mut lines = Vec::with_capacity(markers.len() + 1);
    let intro = text[..markers[0].start].trim();
    if !intro.is_empty() {
        lines.push(intro.to_string());
    }
    for (idx, marker) in markers.iter().enumerate() {
        let until = markers.get(idx + 1).map_or(text.len(), |next| next.start);
        let content = text[marker.end..until].trim();
        if content.is_empty() {
            lines.push(format!("{}.", marker.number));
        } else {
            lines.push(format!("{}. {content}", marker.number));
        }
    }
    Some(lines.join("\n"))
}

fn split_bullets(text: &str) -> Option<String> {
    let mut parts = text.split('•');
    let intro = parts.next().unwrap_or_default().trim();
    let items = parts.map(str::trim).collect::<Vec<_>>();
    if items.len() < 2 || items.iter().any(|item| item.is_empty()) {
        return None;
    }

    let mut lines = Vec::with_capacity(items.len() + 1);
    if !intro.is_empty() {
        lines.push(intro.to_string());
    }
    lines.extend(items.into_iter().map(|item| format!("• {item}")));
    Some(lines.join("\n"))
}

/// Normalize the line structure of a stored answer for display.
///
/// Answers that already contain line breaks are returned untouched, as are the literal
/// `\n` escapes some imports carry once they are turned into real line breaks. A
/// single-line answer has its whitespace collapsed and an embedded `1. … 2. …` list or
/// `•` bullet list split one item per line. Only whitespace changes, so the function is
/// idempotent.
#[must_use]
pub fn format_answer(raw: &str) -> String {
    if raw.contains('\n') {
        return raw.to_string();
    }
    let unescaped = raw.replace("\\n", "\n");
    if unescaped.contains('\n') {
        return unescaped;
    }

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    split_numbered(&collapsed).or_else(|| split_bullets(&collapsed)).unwrap_or(collapsed)
}
