// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Quoting and parsing of management interface parameters
//!
//! OpenVPN tokenises command and notification parameters with shell-like
//! rules: double quotes and backslash escapes, single quotes without
//! escapes, and `#`/`;` starting a comment.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("backslash may only escape '\\', '\"' or whitespace")]
    BadBackslash,
    #[error("missing closing quotation mark")]
    NoClosingQuotation,
    #[error("missing closing single quotation mark")]
    NoClosingSingleQuotation,
    #[error("unterminated parameter")]
    Unterminated,
    #[error("value contains a line break")]
    LineBreak,
}

/// Reject values that would end the command line early
///
/// Quoting cannot carry CR or LF: OpenVPN reads commands line by line.
pub fn single_line(value: &str) -> Result<&str, ParamsError> {
    if value.contains(['\r', '\n']) {
        Err(ParamsError::LineBreak)
    } else {
        Ok(value)
    }
}

/// Escape a value so OpenVPN reads it back as a single parameter
pub fn escape_param(value: &str) -> String {
    if value.is_empty() {
        return "\"\"".to_string();
    }
    if value.contains(['\\', ' ', '"', '\'']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Quoted,
    Unquoted,
    SingleQuoted,
}

fn is_blank(c: char) -> bool {
    c == '\0' || c.is_whitespace()
}

/// Split a parameter string into its parameters
pub fn parse_params(line: &str) -> Result<Vec<String>, ParamsError> {
    let mut params = Vec::new();
    let mut param = String::new();
    let mut state = State::Initial;
    let mut backslash = false;

    // A trailing NUL terminates the last unquoted parameter.
    for c in line.chars().chain(std::iter::once('\0')) {
        if !backslash && c == '\\' && state != State::SingleQuoted {
            backslash = true;
            continue;
        }

        let mut out = None;
        let mut done = false;
        match state {
            State::Initial => {
                if !is_blank(c) {
                    if c == ';' || c == '#' {
                        break;
                    }
                    if !backslash && c == '"' {
                        state = State::Quoted;
                    } else if !backslash && c == '\'' {
                        state = State::SingleQuoted;
                    } else {
                        out = Some(c);
                        state = State::Unquoted;
                    }
                }
            }
            State::Unquoted => {
                if !backslash && is_blank(c) {
                    done = true;
                } else {
                    out = Some(c);
                }
            }
            State::Quoted => {
                if !backslash && c == '"' {
                    done = true;
                } else {
                    out = Some(c);
                }
            }
            State::SingleQuoted => {
                if c == '\'' {
                    done = true;
                } else {
                    out = Some(c);
                }
            }
        }

        if done {
            params.push(std::mem::take(&mut param));
            state = State::Initial;
        }

        if let Some(c) = out {
            if backslash && !(c == '\\' || c == '"' || is_blank(c)) {
                return Err(ParamsError::BadBackslash);
            }
            if c != '\0' {
                param.push(c);
            }
        }
        backslash = false;
    }

    match state {
        State::Initial => Ok(params),
        State::Quoted => Err(ParamsError::NoClosingQuotation),
        State::SingleQuoted => Err(ParamsError::NoClosingSingleQuotation),
        State::Unquoted => Err(ParamsError::Unterminated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_breaks_are_rejected() {
        assert_eq!(single_line("pass word"), Ok("pass word"));
        assert_eq!(single_line("pa\nsignal SIGTERM"), Err(ParamsError::LineBreak));
        assert_eq!(single_line("pa\rss"), Err(ParamsError::LineBreak));
    }

    #[test]
    fn escape_leaves_plain_values_alone() {
        assert_eq!(escape_param("0"), "0");
        assert_eq!(escape_param("string"), "string");
        assert_eq!(escape_param("ca.pem"), "ca.pem");
        assert_eq!(escape_param(""), "\"\"");
    }

    #[test]
    fn escape_quotes_special_values() {
        assert_eq!(
            escape_param(r"C:\Program Files\OpenVPN\config"),
            r#""C:\\Program Files\\OpenVPN\\config""#
        );
        assert_eq!(
            escape_param("THUMB:00 11 22"),
            "\"THUMB:00 11 22\""
        );
        assert_eq!(escape_param("it's"), "\"it's\"");
        assert_eq!(escape_param("say \"hi\""), r#""say \"hi\"""#);
    }

    #[test]
    fn parse_handles_comments_and_blanks() {
        assert!(parse_params("").unwrap().is_empty());
        assert!(parse_params("# Comment 1").unwrap().is_empty());
        assert!(parse_params("; Comment 2").unwrap().is_empty());
        assert_eq!(parse_params("param").unwrap(), vec!["param"]);
    }

    #[test]
    fn parse_handles_quoting_styles() {
        let params =
            parse_params("  param1 param\\ 2 \"param 3\" 'param 4' C:\\\\test.txt   ").unwrap();
        assert_eq!(
            params,
            vec!["param1", "param 2", "param 3", "param 4", r"C:\test.txt"]
        );
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(
            parse_params(r"C:\certificate.pem"),
            Err(ParamsError::BadBackslash)
        );
        assert_eq!(
            parse_params("\"open param"),
            Err(ParamsError::NoClosingQuotation)
        );
        assert_eq!(
            parse_params("'open param"),
            Err(ParamsError::NoClosingSingleQuotation)
        );
    }

    #[test]
    fn escaped_arguments_parse_back_unchanged() {
        let args = [
            "plain",
            "with space",
            "with \"double\" quotes",
            "it's single",
            "",
            r"back\slash",
        ];
        let line = args
            .iter()
            .map(|a| escape_param(a))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(parse_params(&line).unwrap(), args);
    }

    #[test]
    fn parses_password_prompt() {
        let params = parse_params("Need 'Auth' username/password").unwrap();
        assert_eq!(params, vec!["Need", "Auth", "username/password"]);
    }
}
