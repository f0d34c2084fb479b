//! Error rendering using ariadne
//!
//! Parse errors are shown against the source they came from, with their
//! code and help text. A generator error is shown against the generated
//! interpreter source it carries.

use crate::{Error, ParseError};
use ariadne::{ColorGenerator, Label, Report, ReportKind, Source};
use std::io::Write;

/// Render an error for `source` to stderr
///
/// # Example
/// ```no_run
/// use veil::{Obfuscator, ObfuscatorOptions, render_error};
///
/// let source = "local = 1";
/// if let Err(e) = Obfuscator::new(ObfuscatorOptions::default()).obfuscate(source) {
///     render_error(&e, source);
/// }
/// ```
pub fn render_error(error: &Error, source: &str) {
    render_error_to_writer(error, source, &mut std::io::stderr(), true).ok();
}

/// Render an error to a specific writer
pub fn render_error_to(error: &Error, source: &str, writer: &mut dyn Write) -> std::io::Result<()> {
    render_error_to_writer(error, source, writer, true)
}

pub fn render_error_to_string(error: &Error, source: &str) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, source, &mut buf, true).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Same as `render_error_to_string` without ANSI color codes.
pub fn render_error_to_string_no_color(error: &Error, source: &str) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, source, &mut buf, false).ok();
    String::from_utf8_lossy(&buf).to_string()
}

fn render_error_to_writer(
    error: &Error,
    source: &str,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    match error {
        Error::Parse(e) => render_parse_error("<input>", source, e, None, writer, use_color),
        Error::Generator {
            function,
            error,
            generated,
        } => {
            let note = format!("while generating the interpreter for `{}`", function);
            render_parse_error("<generated>", generated, error, Some(&note), writer, use_color)
        }
        Error::Config(e) => writeln!(writer, "Configuration error: {}", e),
        Error::Eval(e) => writeln!(writer, "Evaluation error: {}", e),
    }
}

fn render_parse_error(
    name: &str,
    source: &str,
    error: &ParseError,
    note: Option<&str>,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    let mut colors = ColorGenerator::new();
    colors.next(); // Skip the first color.

    // Clamp so a span at end of input still points into the source.
    let end = error.span.0.end.min(source.len());
    let start = error.span.0.start.min(end);
    let message = error.to_string();

    let mut report = Report::build(ReportKind::Error, (name, start..end))
        .with_message(&message)
        .with_code(error.code())
        .with_config(ariadne::Config::default().with_color(use_color))
        .with_label(
            Label::new((name, start..end))
                .with_message(&message)
                .with_color(colors.next()),
        );

    if let Some(help) = error.help() {
        report = report.with_help(help);
    }
    if let Some(note) = note {
        report = report.with_note(note);
    }

    report.finish().write((name, Source::from(source)), &mut *writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Obfuscator, ObfuscatorOptions};

    #[test]
    fn test_render_parse_error() {
        let source = "local x = = 1";
        let err = Obfuscator::new(ObfuscatorOptions::default())
            .obfuscate(source)
            .unwrap_err();
        let output = render_error_to_string_no_color(&err, source);

        assert!(output.contains("Error"));
        assert!(output.contains("P001"));
        assert!(output.contains("local x = = 1"));
        assert!(output.lines().count() > 1);
    }

    #[test]
    fn test_render_config_error() {
        let err = Error::from(ObfuscatorOptions::from_json(r#"{ "vm": { "nope": 1 } }"#).unwrap_err());
        let output = render_error_to_string_no_color(&err, "");
        assert!(output.starts_with("Configuration error:"));
    }
}
