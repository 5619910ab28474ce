//! Quote-aware field splitter for one delimited line.
//!
//! A field is quoted when its first character is the quote character.
//! Inside a quoted field the delimiter is literal and a doubled quote
//! decodes to a single quote. A quote appearing anywhere else is kept as
//! a literal character. An unterminated quote swallows the rest of the
//! line; malformed quoting never fails.
//!
//! Records spanning several physical lines are not supported.

/// Delimiter/quote pair used to split lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tokenizer {
    pub delimiter: char,
    pub quote: char,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
        }
    }
}

impl Tokenizer {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            ..Self::default()
        }
    }

    /// Split `line` into fields. An empty line yields no fields.
    pub fn parse_line(&self, line: &str) -> Vec<String> {
        if line.is_empty() {
            return Vec::new();
        }

        let mut fields = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut at_field_start = true;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if in_quotes {
                if c == self.quote {
                    if chars.peek() == Some(&self.quote) {
                        field.push(self.quote);
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else if c == self.delimiter {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
                continue;
            } else if c == self.quote && at_field_start {
                in_quotes = true;
            } else {
                field.push(c);
            }
            at_field_start = false;
        }

        fields.push(field);
        fields
    }
}

/// Split a comma-delimited, double-quoted line.
pub fn parse_line(line: &str) -> Vec<String> {
    Tokenizer::default().parse_line(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fields() {
        assert_eq!(parse_line("A,10,1,true"), vec!["A", "10", "1", "true"]);
    }

    #[test]
    fn test_quoted_delimiter_and_escaped_quote() {
        assert_eq!(
            parse_line(r#""a,b","c""d""#),
            vec!["a,b".to_string(), "c\"d".to_string()]
        );
    }

    #[test]
    fn test_empty_line_yields_nothing() {
        assert!(parse_line("").is_empty());
    }

    #[test]
    fn test_empty_fields_are_kept() {
        assert_eq!(parse_line(",,"), vec!["", "", ""]);
        assert_eq!(parse_line("a,"), vec!["a", ""]);
        assert_eq!(parse_line(r#""",x"#), vec!["", "x"]);
    }

    #[test]
    fn test_unterminated_quote_consumes_rest_of_line() {
        assert_eq!(parse_line(r#"x,"abc,def"#), vec!["x", "abc,def"]);
    }

    #[test]
    fn test_quote_inside_unquoted_field_is_literal() {
        assert_eq!(parse_line(r#"5'2" box,b"#), vec![r#"5'2" box"#, "b"]);
    }

    #[test]
    fn test_text_after_closing_quote_is_appended() {
        assert_eq!(parse_line(r#""ab"c,d"#), vec!["abc", "d"]);
    }

    #[test]
    fn test_whitespace_is_preserved() {
        assert_eq!(parse_line(" a , b "), vec![" a ", " b "]);
    }

    #[test]
    fn test_custom_delimiter() {
        let tok = Tokenizer::new(';');
        assert_eq!(tok.parse_line(r#"a;"b;c";d,e"#), vec!["a", "b;c", "d,e"]);
        let tab = Tokenizer::new('\t');
        assert_eq!(tab.parse_line("a\tb"), vec!["a", "b"]);
    }
}
