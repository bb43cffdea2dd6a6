//! Tokenizer for the snippet language.

use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub line: u32,
}

// Longest first so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "++", "--", "(", ")", "{", "}",
    "[", "]", ",", ";", ":", ".", "?", "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn starts_with(rest: &[char], punct: &str) -> bool {
    punct
        .chars()
        .enumerate()
        .all(|(i, c)| rest.get(i) == Some(&c))
}

pub fn tokenize(source: &str) -> Result<Vec<Lexeme>, SyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut line = 1u32;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            loop {
                match chars.get(i) {
                    None => return Err(SyntaxError::new(line, "unterminated comment")),
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        break;
                    }
                    Some('\n') => {
                        line += 1;
                        i += 1;
                    }
                    Some(_) => i += 1,
                }
            }
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if matches!(chars.get(i), Some('e') | Some('E')) {
                let mut j = i + 1;
                if matches!(chars.get(j), Some('+') | Some('-')) {
                    j += 1;
                }
                if chars.get(j).is_some_and(|d| d.is_ascii_digit()) {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| {
                SyntaxError::new(line, format!("invalid number literal '{text}'"))
            })?;
            out.push(Lexeme {
                token: Token::Number(value),
                line,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None | Some('\n') => {
                        return Err(SyntaxError::new(start_line, "unterminated string literal"))
                    }
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = match chars.get(i + 1) {
                            Some('n') => '\n',
                            Some('t') => '\t',
                            Some('r') => '\r',
                            Some('0') => '\0',
                            Some(&other) => other,
                            None => {
                                return Err(SyntaxError::new(
                                    start_line,
                                    "unterminated string literal",
                                ))
                            }
                        };
                        text.push(escaped);
                        i += 2;
                    }
                    Some(&ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            out.push(Lexeme {
                token: Token::Str(text),
                line: start_line,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            out.push(Lexeme {
                token: Token::Ident(chars[start..i].iter().collect()),
                line,
            });
            continue;
        }

        match PUNCTUATORS.iter().find(|p| starts_with(&chars[i..], p)) {
            Some(&p) => {
                out.push(Lexeme {
                    token: Token::Punct(p),
                    line,
                });
                i += p.len();
            }
            None => {
                return Err(SyntaxError::new(line, format!("unexpected character '{c}'")));
            }
        }
    }

    out.push(Lexeme {
        token: Token::Eof,
        line,
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn test_return_expression() {
        assert_eq!(
            tokens("return 1+1"),
            vec![
                Token::Ident("return".into()),
                Token::Number(1.0),
                Token::Punct("+"),
                Token::Number(1.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_longest_punctuator_wins() {
        assert_eq!(
            tokens("a === b"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("==="),
                Token::Ident("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            tokens(r#"'it\'s' "a\nb""#),
            vec![
                Token::Str("it's".into()),
                Token::Str("a\nb".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let lexemes = tokenize("// first\n/* block\n */ x").unwrap();
        assert_eq!(lexemes[0].token, Token::Ident("x".into()));
        assert_eq!(lexemes[0].line, 3);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("3.5 .5 1e3"),
            vec![
                Token::Number(3.5),
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("'open").is_err());
        assert!(tokenize("/* open").is_err());
        let err = tokenize("a\n#").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
