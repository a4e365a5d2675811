//! Detection of source spans whose text must be left untouched.
//!
//! Block regions run from a `\begin{verbatim}`-style marker through its
//! matching end marker and may cover several lines; text sharing a line with
//! either marker stays outside the region. Inline spans (`\verb|..|`, the
//! braced argument of reference-like commands such as `\label` or `\url`)
//! are measured from the backslash that starts them.

const VERBATIM_ENVIRONMENTS: &[&str] = &[
    "verbatim",
    "verbatim*",
    "Verbatim",
    "lstlisting",
    "minted",
    "comment",
];

/// Commands whose first braced argument is an identifier, path or URL.
const LITERAL_ARGUMENT_COMMANDS: &[&str] = &[
    "label",
    "ref",
    "eqref",
    "pageref",
    "autoref",
    "cref",
    "Cref",
    "cite",
    "citep",
    "citet",
    "nocite",
    "url",
    "href",
    "includegraphics",
    "input",
    "include",
    "bibliography",
    "bibliographystyle",
    "usepackage",
    "documentclass",
];

/// Line-oriented tracker for verbatim environments.
#[derive(Debug, Default)]
pub(crate) struct VerbatimTracker {
    open: Option<&'static str>,
}

/// Piece of a line, either inside a verbatim region or plain source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment<'a> {
    pub(crate) text: &'a str,
    pub(crate) protected: bool,
}

impl VerbatimTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed the next line and split it into verbatim and plain segments.
    ///
    /// A region spans from its begin marker through its end marker, both
    /// included. Empty plain segments are omitted.
    pub(crate) fn segments<'a>(&mut self, line: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        loop {
            match self.open {
                Some(environment) => {
                    let end = end_marker(environment);
                    let stop = match line[cursor..].find(&end) {
                        Some(offset) => {
                            self.open = None;
                            cursor + offset + end.len()
                        }
                        None => line.len(),
                    };
                    segments.push(Segment {
                        text: &line[cursor..stop],
                        protected: true,
                    });
                    cursor = stop;
                    if self.open.is_some() {
                        break;
                    }
                }
                None => {
                    let next = next_begin(&line[cursor..]);
                    let start = next.map_or(line.len(), |(offset, _)| cursor + offset);
                    if start > cursor {
                        segments.push(Segment {
                            text: &line[cursor..start],
                            protected: false,
                        });
                    }
                    let Some((_, environment)) = next else {
                        break;
                    };
                    self.open = Some(environment);
                    cursor = start;
                }
            }
        }

        segments
    }

    /// Environment still awaiting its `\end`, if any.
    pub(crate) fn open_environment(&self) -> Option<&'static str> {
        self.open
    }
}

fn next_begin(text: &str) -> Option<(usize, &'static str)> {
    VERBATIM_ENVIRONMENTS
        .iter()
        .filter_map(|&environment| {
            text.find(&begin_marker(environment)).map(|offset| (offset, environment))
        })
        .min_by_key(|&(offset, _)| offset)
}

fn begin_marker(environment: &str) -> String {
    format!("\\begin{{{environment}}}")
}

fn end_marker(environment: &str) -> String {
    format!("\\end{{{environment}}}")
}

/// Number of chars covered by a protected inline span starting at `start`,
/// which must index a backslash. Returns `None` when no span starts there.
pub(crate) fn protected_span_len(chars: &[char], start: usize) -> Option<usize> {
    if chars.get(start) != Some(&'\\') {
        return None;
    }
    let name = command_name(chars, start + 1);
    if name.is_empty() {
        return None;
    }
    let after_name = start + 1 + name.len();

    if name == "verb" {
        return Some(verb_span_len(chars, start, after_name));
    }

    if LITERAL_ARGUMENT_COMMANDS.contains(&name.as_str()) {
        let mut cursor = after_name;
        if chars.get(cursor) == Some(&'*') {
            cursor += 1;
        }
        if chars.get(cursor) == Some(&'[') {
            cursor = match find_unescaped(chars, cursor + 1, ']') {
                Some(close) => close + 1,
                None => return Some(chars.len() - start),
            };
        }
        if chars.get(cursor) != Some(&'{') {
            return None;
        }
        let end = match balanced_group_end(chars, cursor) {
            Some(close) => close + 1,
            None => chars.len(),
        };
        return Some(end - start);
    }

    None
}

/// ASCII letters following a backslash.
pub(crate) fn command_name(chars: &[char], from: usize) -> String {
    chars
        .iter()
        .skip(from)
        .take_while(|ch| ch.is_ascii_alphabetic())
        .collect()
}

/// Contents of the braced argument starting at `open` (which must index `{`),
/// along with the index of the closing brace.
pub(crate) fn braced_argument(chars: &[char], open: usize) -> Option<(String, usize)> {
    if chars.get(open) != Some(&'{') {
        return None;
    }
    let close = balanced_group_end(chars, open)?;
    Some((chars[open + 1..close].iter().collect(), close))
}

fn verb_span_len(chars: &[char], start: usize, after_name: usize) -> usize {
    let mut cursor = after_name;
    if chars.get(cursor) == Some(&'*') {
        cursor += 1;
    }
    let Some(&delimiter) = chars.get(cursor) else {
        return chars.len() - start;
    };
    match chars
        .iter()
        .skip(cursor + 1)
        .position(|&ch| ch == delimiter)
    {
        Some(offset) => cursor + 1 + offset + 1 - start,
        None => chars.len() - start,
    }
}

fn find_unescaped(chars: &[char], from: usize, target: char) -> Option<usize> {
    (from..chars.len()).find(|&index| chars[index] == target && !is_escaped(chars, index))
}

fn balanced_group_end(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for index in open..chars.len() {
        if is_escaped(chars, index) {
            continue;
        }
        match chars[index] {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// One-character lookback: a char is escaped when the char before it is `\`.
pub(crate) fn is_escaped(chars: &[char], index: usize) -> bool {
    index > 0 && chars[index - 1] == '\\'
}
