//! # Command Line Parsing
//!
//! Splits user-entered command lines into a keyword and its parameters.
//!
//! ```text
//! "  /kick   -user "Old Name"  "
//!     keyword:    "/kick"
//!     remainder:  "-user \"Old Name\""
//!     parameters: ["-user", "Old Name"]
//! ```

/// Maximum number of parameters produced by [`parse_parameters`]
pub const MAX_PARAMETERS: usize = 128;

/// Split a line into its keyword and the remainder
///
/// # Arguments
/// * `text` - The raw command line
///
/// # Returns
/// `(keyword, remainder)`, both trimmed. The remainder is empty when the line
/// holds only a keyword.
pub fn parse_command_line(text: &str) -> (String, String) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((keyword, remainder)) => (keyword.to_string(), remainder.trim().to_string()),
        None => (text.to_string(), String::new()),
    }
}

/// Tokenize a parameter string
///
/// Tokens are separated by whitespace. A `"` toggles quoted mode in which
/// whitespace is kept as part of the token; the quote itself is dropped and
/// also ends any token in progress. An unterminated quote runs to the end of
/// the input. Empty tokens are never produced and at most
/// [`MAX_PARAMETERS`] tokens are returned.
pub fn parse_parameters(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in text.chars() {
        if c == '"' {
            quoted = !quoted;
            flush_token(&mut tokens, &mut current);
        } else if c.is_whitespace() && !quoted {
            flush_token(&mut tokens, &mut current);
        } else {
            current.push(c);
        }
    }
    flush_token(&mut tokens, &mut current);

    if tokens.len() > MAX_PARAMETERS {
        tracing::debug!("Dropping {} parameters past the limit", tokens.len() - MAX_PARAMETERS);
        tokens.truncate(MAX_PARAMETERS);
    }
    tokens
}

fn flush_token(tokens: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Whether `text` is non-empty and made only of ASCII digits
#[inline]
pub fn is_number(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        assert_eq!(
            parse_command_line("  /nick   Alice  "),
            ("/nick".to_string(), "Alice".to_string())
        );
        assert_eq!(parse_command_line("/quit"), ("/quit".to_string(), String::new()));
        assert_eq!(
            parse_command_line("/connect\t10.0.0.1  5456"),
            ("/connect".to_string(), "10.0.0.1  5456".to_string())
        );
        assert_eq!(parse_command_line("   "), (String::new(), String::new()));
    }

    #[test]
    fn test_parse_parameters_quoted() {
        assert_eq!(parse_parameters("nick \"New Name\""), vec!["nick", "New Name"]);
        assert_eq!(parse_parameters("-user \"a  b\" -id 3"), vec!["-user", "a  b", "-id", "3"]);
    }

    #[test]
    fn test_parse_parameters_collapses_whitespace() {
        assert_eq!(parse_parameters("   a    b\t c  "), vec!["a", "b", "c"]);
        assert!(parse_parameters("").is_empty());
        assert!(parse_parameters("  \"\"  ").is_empty());
    }

    #[test]
    fn test_quote_terminates_token() {
        assert_eq!(parse_parameters("ab\"cd ef\"gh"), vec!["ab", "cd ef", "gh"]);
    }

    #[test]
    fn test_unterminated_quote() {
        assert_eq!(parse_parameters("say \"hello there "), vec!["say", "hello there "]);
    }

    #[test]
    fn test_parameter_limit() {
        let line = (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let tokens = parse_parameters(&line);
        assert_eq!(tokens.len(), MAX_PARAMETERS);
        assert_eq!(tokens[MAX_PARAMETERS - 1], "127");
    }

    #[test]
    fn test_is_number() {
        assert!(is_number("5456"));
        assert!(is_number("0"));
        assert!(!is_number(""));
        assert!(!is_number("-1"));
        assert!(!is_number("12a"));
        assert!(!is_number("٣"));
    }
}
