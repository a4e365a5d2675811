use crate::domain::diagnostic::{Diagnostic, DiagnosticKind};

/// How a table entry recognises its error in engine output.
#[derive(Debug, Clone, Copy)]
enum Marker {
    Contains(&'static str),
    /// Both fragments appear on the same line, in order.
    Pair(&'static str, &'static str),
}

impl Marker {
    /// Byte offset of the first match across the combined output.
    fn find(&self, output: &str) -> Option<usize> {
        match *self {
            Marker::Contains(needle) => output.find(needle),
            Marker::Pair(first, second) => {
                let mut offset = 0;
                for line in output.split_inclusive('\n') {
                    if let Some(start) = line.find(first) {
                        if line[start + first.len()..].contains(second) {
                            return Some(offset + start);
                        }
                    }
                    offset += line.len();
                }
                None
            }
        }
    }
}

struct Rule {
    marker: Marker,
    kind: DiagnosticKind,
    message: &'static str,
}

/// Known fatal engine messages, most specific first.
const RULES: &[Rule] = &[
    Rule {
        marker: Marker::Contains("Missing $ inserted"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "missing math delimiter `$`",
    },
    Rule {
        marker: Marker::Contains("Display math should end with $$"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "display math is not closed with `$$`",
    },
    Rule {
        marker: Marker::Contains("Extra }, or forgotten $"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "unbalanced `}` or forgotten `$`",
    },
    Rule {
        marker: Marker::Contains("Missing } inserted"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "missing closing brace `}`",
    },
    Rule {
        marker: Marker::Contains("Missing { inserted"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "missing opening brace `{`",
    },
    Rule {
        marker: Marker::Contains("Runaway argument?"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "runaway argument; a closing brace is probably missing",
    },
    Rule {
        marker: Marker::Contains("File ended while scanning use of"),
        kind: DiagnosticKind::MissingDelimiter,
        message: "file ended inside a command argument; a closing brace is probably missing",
    },
    Rule {
        marker: Marker::Contains("Missing \\begin{document}"),
        kind: DiagnosticKind::StructuralError,
        message: "content appears before `\\begin{document}`",
    },
    Rule {
        marker: Marker::Pair("LaTeX Error: \\begin{", "ended by \\end{"),
        kind: DiagnosticKind::StructuralError,
        message: "mismatched `\\begin`/`\\end` environments",
    },
    Rule {
        marker: Marker::Pair("LaTeX Error: Environment", "undefined"),
        kind: DiagnosticKind::StructuralError,
        message: "undefined environment",
    },
    Rule {
        marker: Marker::Contains("Undefined control sequence"),
        kind: DiagnosticKind::SyntaxError,
        message: "undefined control sequence",
    },
    Rule {
        marker: Marker::Contains("Misplaced alignment tab character"),
        kind: DiagnosticKind::SyntaxError,
        message: "misplaced alignment tab character `&`",
    },
    Rule {
        marker: Marker::Contains("Double subscript"),
        kind: DiagnosticKind::SyntaxError,
        message: "double subscript",
    },
    Rule {
        marker: Marker::Contains("Double superscript"),
        kind: DiagnosticKind::SyntaxError,
        message: "double superscript",
    },
    Rule {
        marker: Marker::Pair("LaTeX Error: File", "not found"),
        kind: DiagnosticKind::SyntaxError,
        message: "referenced file or package not found",
    },
];

/// Map raw engine output to a diagnostic. `None` means the pass succeeded.
pub fn classify(stdout: &str, stderr: &str, exit_code: Option<i32>) -> Option<Diagnostic> {
    for stream in [stdout, stderr] {
        if let Some(diagnostic) = match_rules(stream) {
            return Some(diagnostic);
        }
    }

    if exit_code == Some(0) {
        return None;
    }

    let message = last_error_line(stdout)
        .or_else(|| last_non_empty_line(stderr))
        .map(str::to_string)
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("engine exited with status {code}"),
            None => "engine was terminated by a signal".to_string(),
        });
    let line = line_number_after(stdout, stdout.rfind("\n!").map_or(0, |offset| offset + 1));

    Some(Diagnostic::new(DiagnosticKind::EngineCrash, message).at_line(line))
}

fn match_rules(output: &str) -> Option<Diagnostic> {
    RULES.iter().find_map(|rule| {
        rule.marker.find(output).map(|offset| {
            let detail = offending_line(output, offset);
            let message = match detail {
                Some(detail) if detail != rule.message => format!("{}: {detail}", rule.message),
                _ => rule.message.to_string(),
            };
            Diagnostic::new(rule.kind, message).at_line(line_number_after(output, offset))
        })
    })
}

/// The engine's own wording for the error at `offset`, without the `!` prefix.
fn offending_line(output: &str, offset: usize) -> Option<&str> {
    let line_start = output[..offset].rfind('\n').map_or(0, |index| index + 1);
    let line_end = output[offset..]
        .find('\n')
        .map_or(output.len(), |index| offset + index);
    let line = output[line_start..line_end]
        .trim()
        .trim_start_matches('!')
        .trim();
    (!line.is_empty()).then_some(line)
}

/// Source line from the first `l.<N>` context line (or `on input line <N>`) after `offset`.
fn line_number_after(output: &str, offset: usize) -> Option<u32> {
    let tail = output.get(offset..)?;
    for line in tail.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("l.") {
            if let Some(number) = leading_number(rest) {
                return Some(number);
            }
        }
        if let Some(index) = line.find("on input line ") {
            if let Some(number) = leading_number(&line[index + "on input line ".len()..]) {
                return Some(number);
            }
        }
    }
    None
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn last_error_line(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('!'))
        .map(|line| line.trim_start_matches('!').trim())
        .filter(|line| !line.is_empty())
}

fn last_non_empty_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().map(str::trim).find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_DOLLAR_LOG: &str = "\
This is pdfTeX, Version 3.141592653
(./input.tex
LaTeX2e <2023-11-01>
! Missing $ inserted.
<inserted text>
                $
l.12 The value x_
                 1 is positive.
No pages of output.
";

    #[test]
    fn clean_run_yields_none() {
        assert_eq!(classify("Output written on input.pdf", "", Some(0)), None);
    }

    #[test]
    fn missing_dollar_maps_to_missing_delimiter_with_line() {
        let diagnostic = classify(MISSING_DOLLAR_LOG, "", Some(1)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::MissingDelimiter);
        assert_eq!(diagnostic.line, Some(12));
        assert!(diagnostic.message.contains("Missing $ inserted"));
    }

    #[test]
    fn fatal_marker_wins_even_with_zero_exit() {
        let diagnostic = classify(MISSING_DOLLAR_LOG, "", Some(0)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::MissingDelimiter);
    }

    #[test]
    fn undefined_control_sequence_is_syntax_error() {
        let log = "! Undefined control sequence.\nl.7 \\foo\n";
        let diagnostic = classify(log, "", Some(1)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::SyntaxError);
        assert_eq!(diagnostic.line, Some(7));
    }

    #[test]
    fn mismatched_environment_is_structural() {
        let log = "! LaTeX Error: \\begin{itemize} on input line 5 ended by \\end{document}.\n";
        let diagnostic = classify(log, "", Some(1)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::StructuralError);
        assert_eq!(diagnostic.line, Some(5));
    }

    #[test]
    fn table_order_decides_between_multiple_markers() {
        let log = "! Undefined control sequence.\nl.3 \\foo\n! Missing $ inserted.\nl.9 x\n";
        let diagnostic = classify(log, "", Some(1)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::MissingDelimiter);
        assert_eq!(diagnostic.line, Some(9));
    }

    #[test]
    fn unknown_failure_uses_last_bang_line() {
        let log = "! First problem.\nsome text\n! Emergency stop.\nl.20 \\end\n";
        let diagnostic = classify(log, "", Some(1)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::EngineCrash);
        assert_eq!(diagnostic.message, "Emergency stop.");
        assert_eq!(diagnostic.line, Some(20));
    }

    #[test]
    fn crash_without_bang_line_falls_back_to_stderr() {
        let diagnostic =
            classify("", "kpathsea: out of memory\n\n", Some(3)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::EngineCrash);
        assert_eq!(diagnostic.message, "kpathsea: out of memory");
    }

    #[test]
    fn crash_without_any_output_reports_status() {
        let diagnostic = classify("", "", Some(2)).expect("diagnostic");
        assert_eq!(diagnostic.message, "engine exited with status 2");
        let killed = classify("", "", None).expect("diagnostic");
        assert_eq!(killed.message, "engine was terminated by a signal");
    }

    #[test]
    fn markers_in_stderr_are_recognised() {
        let diagnostic = classify("", "! Missing } inserted.\n", Some(1)).expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::MissingDelimiter);
    }
}
