//! Shell pipeline splitting and metacharacter detection across quote
//! states (§4.4 Layer A, §9 redesign flag: "shell metacharacter
//! detection across quote states -> a small explicit state machine").
//!
//! A single scan does both jobs at once: it tracks which of three
//! states (default, single-quoted, double-quoted) the cursor is in,
//! and outside quotes it rejects command/process substitution,
//! redirection, and raw newlines as it goes.

use crate::error::ReadonlyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    Default,
    SingleQuote,
    DoubleQuote,
}

/// Splits `input` into pipeline segments on `|`, `;`, `&&`, `||`,
/// respecting quote state, and rejects forbidden constructs found
/// outside quotes. Returns the non-empty, trimmed segments in order.
pub fn split_pipeline(input: &str) -> Result<Vec<String>, ReadonlyError> {
    let chars: Vec<char> = input.chars().collect();
    let mut state = QuoteState::Default;
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            QuoteState::Default => match c {
                '\'' => {
                    state = QuoteState::SingleQuote;
                    current.push(c);
                }
                '"' => {
                    state = QuoteState::DoubleQuote;
                    current.push(c);
                }
                '`' => {
                    return Err(ReadonlyError::Blocked(
                        "backtick command substitution is not permitted".to_string(),
                    ));
                }
                '\n' | '\r' => {
                    return Err(ReadonlyError::Blocked(
                        "raw newline/carriage-return is not permitted".to_string(),
                    ));
                }
                '$' if chars.get(i + 1) == Some(&'(') => {
                    return Err(ReadonlyError::Blocked(
                        "command substitution $(...) is not permitted".to_string(),
                    ));
                }
                '<' if chars.get(i + 1) == Some(&'(') => {
                    return Err(ReadonlyError::Blocked(
                        "process substitution <(...) is not permitted".to_string(),
                    ));
                }
                '>' if chars.get(i + 1) == Some(&'(') => {
                    return Err(ReadonlyError::Blocked(
                        "process substitution >(...) is not permitted".to_string(),
                    ));
                }
                '>' => {
                    return Err(ReadonlyError::Blocked("redirection (>, >>) is not permitted".to_string()));
                }
                '|' if chars.get(i + 1) == Some(&'|') => {
                    segments.push(std::mem::take(&mut current));
                    i += 1;
                }
                '|' => segments.push(std::mem::take(&mut current)),
                ';' => segments.push(std::mem::take(&mut current)),
                '&' if chars.get(i + 1) == Some(&'&') => {
                    segments.push(std::mem::take(&mut current));
                    i += 1;
                }
                _ => current.push(c),
            },
            QuoteState::SingleQuote => {
                current.push(c);
                if c == '\'' {
                    state = QuoteState::Default;
                }
            }
            QuoteState::DoubleQuote => {
                current.push(c);
                if c == '"' {
                    state = QuoteState::Default;
                }
            }
        }
        i += 1;
    }

    if state != QuoteState::Default {
        return Err(ReadonlyError::UnclosedQuote);
    }

    segments.push(current);

    Ok(segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Whitespace tokenizer that respects quote state, used to pull a
/// segment's head command and arguments apart without disturbing
/// quoted content (e.g. `grep "a b" file`).
pub fn tokenize(segment: &str) -> Result<Vec<String>, ReadonlyError> {
    let chars: Vec<char> = segment.chars().collect();
    let mut state = QuoteState::Default;
    let mut tokens = Vec::new();
    let mut current = String::new();

    for &c in &chars {
        match state {
            QuoteState::Default => match c {
                '\'' => state = QuoteState::SingleQuote,
                '"' => state = QuoteState::DoubleQuote,
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            },
            QuoteState::SingleQuote => {
                if c == '\'' {
                    state = QuoteState::Default;
                } else {
                    current.push(c);
                }
            }
            QuoteState::DoubleQuote => {
                if c == '"' {
                    state = QuoteState::Default;
                } else {
                    current.push(c);
                }
            }
        }
    }

    if state != QuoteState::Default {
        return Err(ReadonlyError::UnclosedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_all_four_separators() {
        let segments = split_pipeline("dpkg -l | grep python ; uptime && w").unwrap();
        assert_eq!(segments, vec!["dpkg -l", "grep python", "uptime", "w"]);
    }

    #[test]
    fn quoted_separators_are_not_split_points() {
        let segments = split_pipeline(r#"grep "a|b;c" file.txt"#).unwrap();
        assert_eq!(segments, vec![r#"grep "a|b;c" file.txt"#]);
    }

    #[test]
    fn rejects_command_substitution_forms() {
        assert!(split_pipeline("cat $(whoami)").is_err());
        assert!(split_pipeline("cat `whoami`").is_err());
    }

    #[test]
    fn rejects_process_substitution() {
        assert!(split_pipeline("diff <(ls) <(ls -a)").is_err());
        assert!(split_pipeline("tee >(cat)").is_err());
    }

    #[test]
    fn rejects_redirection() {
        assert!(split_pipeline("cat /etc/passwd > /tmp/x").is_err());
        assert!(split_pipeline("echo hi >> /tmp/log").is_err());
    }

    #[test]
    fn allows_injection_attempt_to_be_rejected_by_the_semicolon_path() {
        let err = split_pipeline("cat /etc/passwd; rm -rf /").unwrap();
        assert_eq!(err, vec!["cat /etc/passwd", "rm -rf /"]);
    }

    #[test]
    fn rejects_raw_newline() {
        assert!(split_pipeline("cat /etc/passwd\nrm -rf /").is_err());
    }

    #[test]
    fn unclosed_quote_is_rejected() {
        assert!(matches!(split_pipeline("echo \"unterminated"), Err(ReadonlyError::UnclosedQuote)));
    }

    #[test]
    fn tokenize_respects_quoted_whitespace() {
        let tokens = tokenize(r#"grep "hello world" file.txt"#).unwrap();
        assert_eq!(tokens, vec!["grep", "hello world", "file.txt"]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_input(s in ".*") {
            let _ = split_pipeline(&s);
        }

        #[test]
        fn balanced_single_quotes_never_report_unclosed(
            segments in prop::collection::vec("[a-z]{1,6}", 1..4)
        ) {
            let joined = segments
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(" ");
            prop_assert!(split_pipeline(&joined).is_ok());
        }
    }
}
