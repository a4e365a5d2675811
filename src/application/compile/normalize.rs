use super::verbatim::{VerbatimTracker, is_escaped, protected_span_len};

/// Escape special characters outside verbatim regions.
///
/// A character counts as already escaped when the character before it is a
/// backslash, so running this over its own output changes nothing.
pub fn normalize(source: &str) -> String {
    let mut tracker = VerbatimTracker::new();
    let mut output = String::with_capacity(source.len() + source.len() / 16);

    for line in source.split_inclusive('\n') {
        for segment in tracker.segments(line) {
            if segment.protected {
                output.push_str(segment.text);
            } else {
                escape_line(segment.text, &mut output);
            }
        }
    }

    output
}

fn escape_line(line: &str, output: &mut String) {
    let chars: Vec<char> = line.chars().collect();
    let mut index = 0;

    while index < chars.len() {
        if let Some(span) = protected_span_len(&chars, index) {
            output.extend(&chars[index..index + span]);
            index += span;
            continue;
        }

        let ch = chars[index];
        if is_escaped(&chars, index) {
            output.push(ch);
        } else {
            match escaped_form(ch) {
                Some(replacement) => output.push_str(replacement),
                None => output.push(ch),
            }
        }
        index += 1;
    }
}

fn escaped_form(ch: char) -> Option<&'static str> {
    match ch {
        '&' => Some("\\&"),
        '%' => Some("\\%"),
        '_' => Some("\\_"),
        '#' => Some("\\#"),
        '~' => Some("\\~{}"),
        '^' => Some("\\^{}"),
        _ => None,
    }
}
