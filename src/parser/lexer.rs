//! Tokenizer for rule source text.
//!
//! Pattern payloads (`"..."`, `{ hex }`, `/regex/`) are context dependent,
//! so the parser asks for them explicitly with [`Lexer::payload`] right
//! after the `=` of a pattern definition.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    /// `$name`, stored with the `$`.
    PatternId(String),
    /// `$name*`, stored as the prefix with the `$` and without the `*`.
    PatternWildcard(String),
    /// `#name`, stored as `$name` so it resolves like a reference.
    PatternCount(String),
    Str(Vec<u8>),
    Int(u64),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Comma,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    DotDot,
    Minus,
    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("'{s}'"),
            Self::PatternId(s) => format!("'{s}'"),
            Self::PatternWildcard(s) => format!("'{s}*'"),
            Self::PatternCount(s) => format!("'#{}'", s.trim_start_matches('$')),
            Self::Str(_) => "string literal".into(),
            Self::Int(n) => format!("'{n}'"),
            Self::LBrace => "'{'".into(),
            Self::RBrace => "'}'".into(),
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Colon => "':'".into(),
            Self::Comma => "','".into(),
            Self::Assign => "'='".into(),
            Self::Eq => "'=='".into(),
            Self::Ne => "'!='".into(),
            Self::Lt => "'<'".into(),
            Self::Le => "'<='".into(),
            Self::Gt => "'>'".into(),
            Self::Ge => "'>='".into(),
            Self::DotDot => "'..'".into(),
            Self::Minus => "'-'".into(),
            Self::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned<T> {
    pub value: T,
    pub line: usize,
    pub column: usize,
}

/// Raw pattern payload as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawPayload {
    Text(Vec<u8>),
    /// Body between `{` and `}`.
    Hex(String),
    Regex {
        source: String,
        case_insensitive: bool,
        dot_all: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct LexError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

type LexResult<T> = std::result::Result<T, LexError>;

pub(crate) struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_byte_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if b & 0xC0 != 0x80 {
            // Count characters, not UTF-8 continuation bytes.
            self.column += 1;
        }
        Some(b)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> LexError {
        LexError {
            line,
            column,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match (self.peek_byte(), self.peek_byte_at(1)) {
                (Some(b), _) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                (Some(b'/'), Some(b'/')) => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek_byte(), self.peek_byte_at(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(self.error(line, column, "unterminated block comment"))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn take_ident_chars(&mut self) -> String {
        let start = self.pos;
        while self.peek_byte().is_some_and(is_ident_char) {
            self.bump();
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    pub(crate) fn next_token(&mut self) -> LexResult<Spanned<Token>> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let spanned = |value| Spanned {
            value,
            line,
            column,
        };

        let Some(b) = self.peek_byte() else {
            return Ok(spanned(Token::Eof));
        };

        let token = match b {
            b'{' => self.single(Token::LBrace),
            b'}' => self.single(Token::RBrace),
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b':' => self.single(Token::Colon),
            b',' => self.single(Token::Comma),
            b'-' => self.single(Token::Minus),
            b'=' => {
                self.bump();
                if self.peek_byte() == Some(b'=') {
                    self.bump();
                    Token::Eq
                } else {
                    Token::Assign
                }
            }
            b'!' => {
                self.bump();
                if self.peek_byte() != Some(b'=') {
                    return Err(self.error(line, column, "expected '=' after '!'"));
                }
                self.bump();
                Token::Ne
            }
            b'<' | b'>' => {
                self.bump();
                let or_equal = self.peek_byte() == Some(b'=');
                if or_equal {
                    self.bump();
                }
                match (b, or_equal) {
                    (b'<', false) => Token::Lt,
                    (b'<', true) => Token::Le,
                    (_, false) => Token::Gt,
                    (_, true) => Token::Ge,
                }
            }
            b'.' => {
                self.bump();
                if self.peek_byte() != Some(b'.') {
                    return Err(self.error(line, column, "expected '..'"));
                }
                self.bump();
                Token::DotDot
            }
            b'$' => {
                self.bump();
                let name = format!("${}", self.take_ident_chars());
                if self.peek_byte() == Some(b'*') {
                    self.bump();
                    Token::PatternWildcard(name)
                } else {
                    Token::PatternId(name)
                }
            }
            b'#' => {
                self.bump();
                let name = self.take_ident_chars();
                if name.is_empty() {
                    return Err(self.error(line, column, "expected pattern name after '#'"));
                }
                Token::PatternCount(format!("${name}"))
            }
            b'"' => Token::Str(self.string_literal()?),
            b'0'..=b'9' => Token::Int(self.number()?),
            b if is_ident_start(b) => Token::Ident(self.take_ident_chars()),
            other => {
                let shown = if other.is_ascii_graphic() {
                    format!("'{}'", other as char)
                } else {
                    format!("byte 0x{other:02x}")
                };
                return Err(self.error(line, column, format!("unexpected character {shown}")));
            }
        };

        Ok(spanned(token))
    }

    fn single(&mut self, token: Token) -> Token {
        self.bump();
        token
    }

    fn number(&mut self) -> LexResult<u64> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        let radix = if self.peek_byte() == Some(b'0')
            && matches!(self.peek_byte_at(1), Some(b'x') | Some(b'X'))
        {
            self.bump();
            self.bump();
            16
        } else {
            10
        };
        let digits_start = self.pos;
        while self
            .peek_byte()
            .is_some_and(|b| (b as char).is_digit(radix))
        {
            self.bump();
        }
        let digits = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap_or_default();
        if digits.is_empty() {
            return Err(self.error(line, column, "expected digits"));
        }
        let value = u64::from_str_radix(digits, radix)
            .map_err(|_| self.error(line, column, "integer literal out of range"))?;

        let multiplier = match (self.peek_byte(), self.peek_byte_at(1)) {
            (Some(b'K'), Some(b'B')) => 1024,
            (Some(b'M'), Some(b'B')) => 1024 * 1024,
            _ => 1,
        };
        if multiplier > 1 {
            self.bump();
            self.bump();
        }
        if self.peek_byte().is_some_and(is_ident_char) {
            let text = String::from_utf8_lossy(&self.src[start..=self.pos]);
            return Err(self.error(line, column, format!("malformed number '{text}'")));
        }

        value
            .checked_mul(multiplier)
            .ok_or_else(|| self.error(line, column, "integer literal out of range"))
    }

    fn string_literal(&mut self) -> LexResult<Vec<u8>> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut out = Vec::new();
        loop {
            let Some(b) = self.bump() else {
                return Err(self.error(line, column, "unterminated string literal"));
            };
            match b {
                b'"' => return Ok(out),
                b'\n' => return Err(self.error(line, column, "unterminated string literal")),
                b'\\' => {
                    let (esc_line, esc_column) = (self.line, self.column);
                    match self.bump() {
                        Some(b'"') => out.push(b'"'),
                        Some(b'\\') => out.push(b'\\'),
                        Some(b't') => out.push(b'\t'),
                        Some(b'n') => out.push(b'\n'),
                        Some(b'r') => out.push(b'\r'),
                        Some(b'x') => {
                            let hi = self.bump().and_then(|c| (c as char).to_digit(16));
                            let lo = self.bump().and_then(|c| (c as char).to_digit(16));
                            match (hi, lo) {
                                (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                                _ => {
                                    return Err(self.error(
                                        esc_line,
                                        esc_column,
                                        "expected two hex digits after \\x",
                                    ))
                                }
                            }
                        }
                        _ => {
                            return Err(self.error(esc_line, esc_column, "unknown escape sequence"))
                        }
                    }
                }
                other => out.push(other),
            }
        }
    }

    /// Lex the payload that follows `$id =`.
    pub(crate) fn payload(&mut self) -> LexResult<Spanned<RawPayload>> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let value = match self.peek_byte() {
            Some(b'"') => RawPayload::Text(self.string_literal()?),
            Some(b'{') => RawPayload::Hex(self.hex_body()?),
            Some(b'/') => self.regex_literal()?,
            _ => {
                return Err(self.error(
                    line,
                    column,
                    "expected string literal, hex string or regular expression",
                ))
            }
        };
        Ok(Spanned {
            value,
            line,
            column,
        })
    }

    fn hex_body(&mut self) -> LexResult<String> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let start = self.pos;
        loop {
            match self.peek_byte() {
                Some(b'}') => {
                    let body = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                    self.bump();
                    return Ok(body);
                }
                Some(_) => {
                    self.bump();
                }
                None => return Err(self.error(line, column, "unterminated hex string")),
            }
        }
    }

    fn regex_literal(&mut self) -> LexResult<RawPayload> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut source = Vec::new();
        loop {
            match self.bump() {
                Some(b'/') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'/') => source.push(b'/'),
                    Some(b'\n') | None => {
                        return Err(self.error(line, column, "unterminated regular expression"))
                    }
                    Some(other) => {
                        source.push(b'\\');
                        source.push(other);
                    }
                },
                Some(b'\n') | None => {
                    return Err(self.error(line, column, "unterminated regular expression"))
                }
                Some(other) => source.push(other),
            }
        }

        let mut case_insensitive = false;
        let mut dot_all = false;
        while let Some(flag) = self.peek_byte().filter(|b| is_ident_char(*b)) {
            let (flag_line, flag_column) = (self.line, self.column);
            match flag {
                b'i' => case_insensitive = true,
                b's' => dot_all = true,
                _ => {
                    return Err(self.error(
                        flag_line,
                        flag_column,
                        format!("unknown regular expression flag '{}'", flag as char),
                    ))
                }
            }
            self.bump();
        }

        Ok(RawPayload::Regex {
            source: String::from_utf8_lossy(&source).into_owned(),
            case_insensitive,
            dot_all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap().value;
            if t == Token::Eof {
                return out;
            }
            out.push(t);
        }
    }

    #[test]
    fn skips_comments() {
        let toks = tokens("rule /* block\n comment */ a // line\n { }");
        assert_eq!(
            toks,
            vec![
                Token::Ident("rule".into()),
                Token::Ident("a".into()),
                Token::LBrace,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn pattern_tokens() {
        let toks = tokens("$string1 $string* #a $*");
        assert_eq!(
            toks,
            vec![
                Token::PatternId("$string1".into()),
                Token::PatternWildcard("$string".into()),
                Token::PatternCount("$a".into()),
                Token::PatternWildcard("$".into()),
            ]
        );
    }

    #[test]
    fn numbers_with_suffixes() {
        assert_eq!(
            tokens("10 0x1F 2KB 1MB"),
            vec![
                Token::Int(10),
                Token::Int(31),
                Token::Int(2048),
                Token::Int(1024 * 1024)
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            tokens(r#""a\"b\\c\x41\n""#),
            vec![Token::Str(b"a\"b\\cA\n".to_vec())]
        );
    }

    #[test]
    fn reports_position_of_bad_character() {
        let mut lexer = Lexer::new("rule a\n  @");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn regex_payload_with_flags() {
        let mut lexer = Lexer::new(r"/ab\/c\d+/is nocase");
        let payload = lexer.payload().unwrap().value;
        assert_eq!(
            payload,
            RawPayload::Regex {
                source: r"ab/c\d+".into(),
                case_insensitive: true,
                dot_all: true,
            }
        );
        assert_eq!(lexer.next_token().unwrap().value, Token::Ident("nocase".into()));
    }

    #[test]
    fn hex_payload_body() {
        let mut lexer = Lexer::new("{ 4D 5A ?? }");
        assert_eq!(
            lexer.payload().unwrap().value,
            RawPayload::Hex(" 4D 5A ?? ".into())
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut lexer = Lexer::new("\"abc\n\"");
        assert!(lexer.next_token().is_err());
    }
}
