use crate::domain::diagnostic::Diagnostic;

use super::verbatim::{
    VerbatimTracker, braced_argument, command_name, is_escaped, protected_span_len,
};

const DOCUMENT_CLASS: &str = "\\documentclass";
const BEGIN_DOCUMENT: &str = "\\begin{document}";
const END_DOCUMENT: &str = "\\end{document}";

const MATH_ENVIRONMENTS: &[&str] = &[
    "math",
    "displaymath",
    "equation",
    "equation*",
    "align",
    "align*",
    "alignat",
    "alignat*",
    "flalign",
    "flalign*",
    "gather",
    "gather*",
    "multline",
    "multline*",
    "eqnarray",
    "eqnarray*",
];

const ALIGNMENT_ENVIRONMENTS: &[&str] = &[
    "tabular",
    "tabular*",
    "tabularx",
    "tabulary",
    "longtable",
    "array",
    "align",
    "align*",
    "alignat",
    "alignat*",
    "flalign",
    "flalign*",
    "eqnarray",
    "eqnarray*",
    "aligned",
    "alignedat",
    "split",
    "cases",
    "matrix",
    "pmatrix",
    "bmatrix",
    "Bmatrix",
    "vmatrix",
    "Vmatrix",
    "smallmatrix",
];

/// Static checks run before any engine process is spawned. Stops at the first failure.
pub fn validate(source: &str) -> Result<(), Diagnostic> {
    check_structure(source)?;
    check_special_characters(source)
}

fn check_structure(source: &str) -> Result<(), Diagnostic> {
    if !source.contains(DOCUMENT_CLASS) {
        return Err(Diagnostic::structural(
            "missing `\\documentclass` declaration",
        ));
    }

    let begin = source.find(BEGIN_DOCUMENT);
    let end = source.rfind(END_DOCUMENT);
    match (begin, end) {
        (None, _) => Err(Diagnostic::structural(
            "missing `\\begin{document}` marker",
        )),
        (Some(_), None) => Err(Diagnostic::structural("missing `\\end{document}` marker")),
        (Some(begin), Some(end)) if end < begin => Err(Diagnostic::structural(
            "`\\end{document}` appears before `\\begin{document}`",
        )
        .at_line(Some(line_of_offset(source, end)))),
        _ => Ok(()),
    }
}

fn line_of_offset(source: &str, offset: usize) -> u32 {
    let line = source[..offset].matches('\n').count() + 1;
    u32::try_from(line).unwrap_or(u32::MAX)
}

#[derive(Debug, Default)]
struct MathState {
    inline_opened_at: Option<u32>,
    display_opened_at: Option<u32>,
    paren_depth: u32,
    bracket_depth: u32,
    environment_depth: u32,
    alignment_depth: u32,
}

impl MathState {
    fn in_math(&self) -> bool {
        self.inline_opened_at.is_some()
            || self.display_opened_at.is_some()
            || self.paren_depth > 0
            || self.bracket_depth > 0
            || self.environment_depth > 0
    }

    fn in_alignment(&self) -> bool {
        self.alignment_depth > 0
    }

    fn enter(&mut self, environment: &str) {
        if MATH_ENVIRONMENTS.contains(&environment) {
            self.environment_depth += 1;
        }
        if ALIGNMENT_ENVIRONMENTS.contains(&environment) {
            self.alignment_depth += 1;
        }
    }

    fn leave(&mut self, environment: &str) {
        if MATH_ENVIRONMENTS.contains(&environment) {
            self.environment_depth = self.environment_depth.saturating_sub(1);
        }
        if ALIGNMENT_ENVIRONMENTS.contains(&environment) {
            self.alignment_depth = self.alignment_depth.saturating_sub(1);
        }
    }

    /// A paragraph break ends inline math; an open `$` at that point is never closed.
    fn check_closed(&self) -> Result<(), Diagnostic> {
        if let Some(line) = self.inline_opened_at {
            return Err(Diagnostic::syntax(
                "math delimiter `$` is opened but never closed",
            )
            .at_line(Some(line)));
        }
        if let Some(line) = self.display_opened_at {
            return Err(Diagnostic::syntax(
                "display math delimiter `$$` is opened but never closed",
            )
            .at_line(Some(line)));
        }
        Ok(())
    }
}

fn check_special_characters(source: &str) -> Result<(), Diagnostic> {
    let mut tracker = VerbatimTracker::new();
    let mut math = MathState::default();

    for (index, line) in source.lines().enumerate() {
        let line_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let segments = tracker.segments(line);
        if line.trim().is_empty() && !segments.iter().any(|segment| segment.protected) {
            math.check_closed()?;
            continue;
        }
        for segment in segments.iter().filter(|segment| !segment.protected) {
            scan_line(segment.text, line_number, &mut math)?;
        }
    }

    if let Some(environment) = tracker.open_environment() {
        return Err(Diagnostic::structural(format!(
            "`\\begin{{{environment}}}` is never closed"
        )));
    }
    math.check_closed()
}

fn scan_line(line: &str, line_number: u32, math: &mut MathState) -> Result<(), Diagnostic> {
    let chars: Vec<char> = line.chars().collect();
    let mut index = 0;

    while index < chars.len() {
        if let Some(span) = protected_span_len(&chars, index) {
            index += span;
            continue;
        }

        let ch = chars[index];
        if ch != '\\' && is_escaped(&chars, index) {
            index += 1;
            continue;
        }

        match ch {
            '\\' => index = scan_command(&chars, index, math),
            '%' => {
                return Err(unescaped('%', "\\%", line_number));
            }
            '_' if !math.in_math() => {
                return Err(unescaped('_', "\\_", line_number));
            }
            '&' if !math.in_alignment() => {
                return Err(unescaped('&', "\\&", line_number));
            }
            '$' => {
                if chars.get(index + 1) == Some(&'$') && math.inline_opened_at.is_none() {
                    math.display_opened_at = match math.display_opened_at {
                        Some(_) => None,
                        None => Some(line_number),
                    };
                    index += 2;
                    continue;
                }
                math.inline_opened_at = match math.inline_opened_at {
                    Some(_) => None,
                    None => Some(line_number),
                };
                index += 1;
            }
            _ => index += 1,
        }
    }

    Ok(())
}

/// Handle the command starting at `start` (a backslash) and return the index to resume at.
fn scan_command(chars: &[char], start: usize, math: &mut MathState) -> usize {
    let name = command_name(chars, start + 1);
    if name.is_empty() {
        match chars.get(start + 1) {
            Some('(') => math.paren_depth += 1,
            Some(')') => math.paren_depth = math.paren_depth.saturating_sub(1),
            Some('[') => math.bracket_depth += 1,
            Some(']') => math.bracket_depth = math.bracket_depth.saturating_sub(1),
            _ => {}
        }
        // Covers `\\` too: the char after a line break goes through the usual lookback.
        return start + 2;
    }

    let after_name = start + 1 + name.len();
    if name == "begin" || name == "end" {
        if let Some((environment, close)) = braced_argument(chars, after_name) {
            if name == "begin" {
                math.enter(&environment);
            } else {
                math.leave(&environment);
            }
            return close + 1;
        }
    }
    after_name
}

fn unescaped(ch: char, replacement: &str, line: u32) -> Diagnostic {
    Diagnostic::syntax(format!(
        "unescaped `{ch}` outside a verbatim region; write `{replacement}` for a literal character"
    ))
    .at_line(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::diagnostic::DiagnosticKind;

    fn document(body: &str) -> String {
        format!("\\documentclass{{article}}\n\\begin{{document}}\n{body}\n\\end{{document}}\n")
    }

    #[test]
    fn accepts_minimal_document() {
        assert_eq!(validate(&document("Hello, world.")), Ok(()));
    }

    #[test]
    fn missing_document_class_is_structural() {
        let err = validate("\\begin{document}\nHi\n\\end{document}").expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::StructuralError);
        assert!(err.message.contains("documentclass"));
    }

    #[test]
    fn missing_end_marker_is_structural() {
        let err =
            validate("\\documentclass{article}\n\\begin{document}\nHi").expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::StructuralError);
        assert!(err.message.contains("\\end{document}"));
    }

    #[test]
    fn structure_is_checked_before_characters() {
        let err = validate("50% done").expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::StructuralError);
    }

    #[test]
    fn unescaped_percent_is_syntax_error_with_line() {
        let err = validate(&document("Growth was 50% this year.")).expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::SyntaxError);
        assert_eq!(err.line, Some(3));
        assert!(err.message.contains('%'));
    }

    #[test]
    fn percent_inside_verbatim_is_accepted() {
        let body = "\\begin{verbatim}\nprintf(\"%d\", x_1);\n\\end{verbatim}";
        assert_eq!(validate(&document(body)), Ok(()));
    }

    #[test]
    fn percent_after_verbatim_end_on_same_line_is_rejected() {
        let body = "\\begin{verbatim}\nraw\n\\end{verbatim} Growth was 50% this year.";
        let err = validate(&document(body)).expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::SyntaxError);
        assert_eq!(err.line, Some(5));
    }

    #[test]
    fn percent_before_verbatim_begin_on_same_line_is_rejected() {
        let body = "Growth was 50% \\begin{verbatim}\nraw\n\\end{verbatim}";
        let err = validate(&document(body)).expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::SyntaxError);
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn single_line_verbatim_only_protects_its_own_span() {
        assert_eq!(
            validate(&document("\\begin{verbatim}50%\\end{verbatim} fine")),
            Ok(())
        );
        let err = validate(&document("\\begin{verbatim}x\\end{verbatim} and 50% more"))
            .expect_err("invalid");
        assert_eq!(err.line, Some(3));
        assert!(err.message.contains('%'));
    }

    #[test]
    fn escaped_specials_are_accepted() {
        assert_eq!(
            validate(&document("50\\% of R\\&D costs \\$5 for item\\_1")),
            Ok(())
        );
    }

    #[test]
    fn underscore_is_allowed_in_math_only() {
        assert_eq!(validate(&document("Let $x_1 = 2$ and \\(y_2\\).")), Ok(()));
        let err = validate(&document("file_name")).expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::SyntaxError);
        assert!(err.message.contains('_'));
    }

    #[test]
    fn ampersand_is_allowed_in_tabular() {
        let body = "\\begin{tabular}{ll}\na & b \\\\\n\\end{tabular}";
        assert_eq!(validate(&document(body)), Ok(()));
        let err = validate(&document("Smith & Sons")).expect_err("invalid");
        assert!(err.message.contains('&'));
    }

    #[test]
    fn align_environment_allows_subscripts_and_tabs() {
        let body = "\\begin{align*}\na_1 &= b_2 \\\\\nc &= d\n\\end{align*}";
        assert_eq!(validate(&document(body)), Ok(()));
    }

    #[test]
    fn unclosed_inline_math_is_reported() {
        let err =
            validate(&document("The value $x + 1 is positive.\n\nNext.")).expect_err("invalid");
        assert_eq!(err.kind, DiagnosticKind::SyntaxError);
        assert!(err.message.contains('$'));
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn inline_math_may_span_lines_within_a_paragraph() {
        assert_eq!(validate(&document("Take $a +\nb_1$ now.")), Ok(()));
    }

    #[test]
    fn labels_and_urls_may_contain_underscores() {
        let body = "\\section{Intro}\\label{sec_intro}\nSee \\url{https://x.org/a_b%20c}.";
        assert_eq!(validate(&document(body)), Ok(()));
    }

    #[test]
    fn unclosed_verbatim_is_structural() {
        let err = validate(&document("\\begin{verbatim}\n100% raw\n")).expect_err("unclosed");
        assert_eq!(err.kind, DiagnosticKind::StructuralError);
        assert!(err.message.contains("verbatim"));
    }

    #[test]
    fn line_break_with_spacing_is_not_display_math() {
        let body = "\\begin{tabular}{l}\na \\\\[2pt]\nb\n\\end{tabular}";
        assert_eq!(validate(&document(body)), Ok(()));
    }
}
