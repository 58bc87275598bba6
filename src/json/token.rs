//! JSON token stream: a reader with save/restore positions and a writer.
//!
//! String escaping and number validation go through `serde_json`; the stream structure is
//! handled here so the coders can rewind and retry at token granularity.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    /// A string followed by `:`.
    Name(String),
    Str(String),
    /// Number text, already validated.
    Number(String),
    True,
    False,
    Null,
    Error,
    End,
}

#[derive(Debug, Clone)]
pub struct JsonReader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> JsonReader<'a> {
    pub fn new(src: &'a str) -> Self {
        JsonReader { src, pos: 0 }
    }

    pub fn buf_pos(&self) -> usize {
        self.pos
    }

    pub fn set_buf_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn skip_separators(&mut self) {
        while let Some(b) = self.bytes().get(self.pos) {
            if b.is_ascii_whitespace() || *b == b',' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.bytes().get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn literal(&mut self, text: &str, token: Token) -> Token {
        if self.src[self.pos..].starts_with(text) {
            self.pos += text.len();
            token
        } else {
            Token::Error
        }
    }

    fn string(&mut self) -> Token {
        let start = self.pos;
        let bytes = self.bytes();
        let mut i = start + 1;
        let mut escaped = false;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if !escaped => escaped = true,
                b'"' if !escaped => break,
                _ => escaped = false,
            }
            i += 1;
        }
        if i >= bytes.len() {
            return Token::Error;
        }
        let raw = &self.src[start..=i];
        let text = match serde_json::from_str::<String>(raw) {
            Ok(s) => s,
            Err(_) => return Token::Error,
        };
        self.pos = i + 1;
        let after = self.pos;
        self.skip_whitespace();
        if self.bytes().get(self.pos) == Some(&b':') {
            self.pos += 1;
            Token::Name(text)
        } else {
            self.pos = after;
            Token::Str(text)
        }
    }

    fn number(&mut self) -> Token {
        let start = self.pos;
        let bytes = self.bytes();
        let mut i = start;
        while i < bytes.len() && matches!(bytes[i], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
            i += 1;
        }
        let text = &self.src[start..i];
        match serde_json::from_str::<serde_json::Number>(text) {
            Ok(_) => {
                self.pos = i;
                Token::Number(text.to_string())
            }
            Err(_) => Token::Error,
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_separators();
        let b = match self.bytes().get(self.pos) {
            Some(b) => *b,
            None => return Token::End,
        };
        match b {
            b'{' => {
                self.pos += 1;
                Token::ObjectStart
            }
            b'}' => {
                self.pos += 1;
                Token::ObjectEnd
            }
            b'[' => {
                self.pos += 1;
                Token::ArrayStart
            }
            b']' => {
                self.pos += 1;
                Token::ArrayEnd
            }
            b'"' => self.string(),
            b'-' | b'0'..=b'9' => self.number(),
            b't' => self.literal("true", Token::True),
            b'f' => self.literal("false", Token::False),
            b'n' => self.literal("null", Token::Null),
            _ => Token::Error,
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek_token(&mut self) -> Token {
        let pos = self.pos;
        let t = self.next_token();
        self.pos = pos;
        t
    }
}

#[derive(Debug, Clone, Default)]
pub struct JsonWriter {
    out: String,
    pretty: bool,
    depth: usize,
    need_comma: bool,
    after_name: bool,
}

impl JsonWriter {
    pub fn new(pretty: bool) -> Self {
        JsonWriter {
            pretty,
            ..Default::default()
        }
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn separate(&mut self) {
        if self.after_name {
            self.after_name = false;
            return;
        }
        if self.need_comma {
            self.out.push(',');
        }
        if self.pretty && self.depth > 0 {
            self.newline();
        }
    }

    fn quoted(&mut self, s: &str) {
        self.out.push_str(&serde_json::Value::String(s.to_string()).to_string());
    }

    pub fn put(&mut self, token: Token) {
        match token {
            Token::ObjectStart | Token::ArrayStart => {
                self.separate();
                self.out.push(if token == Token::ObjectStart { '{' } else { '[' });
                self.depth += 1;
                self.need_comma = false;
            }
            Token::ObjectEnd | Token::ArrayEnd => {
                self.depth = self.depth.saturating_sub(1);
                if self.pretty && self.need_comma {
                    self.newline();
                }
                self.out.push(if token == Token::ObjectEnd { '}' } else { ']' });
                self.need_comma = true;
            }
            Token::Name(n) => {
                self.separate();
                self.quoted(&n);
                self.out.push_str(if self.pretty { ": " } else { ":" });
                self.after_name = true;
                self.need_comma = false;
            }
            Token::Str(s) => {
                self.separate();
                self.quoted(&s);
                self.need_comma = true;
            }
            Token::Number(n) => {
                self.separate();
                self.out.push_str(&n);
                self.need_comma = true;
            }
            Token::True | Token::False | Token::Null => {
                self.separate();
                self.out.push_str(match token {
                    Token::True => "true",
                    Token::False => "false",
                    _ => "null",
                });
                self.need_comma = true;
            }
            Token::Error | Token::End => {}
        }
    }

    pub fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_strings_followed_by_colon() {
        let mut r = JsonReader::new(r#"{ "a" : 1, "b": "x\"y", "c": [true, null] }"#);
        assert_eq!(r.next_token(), Token::ObjectStart);
        assert_eq!(r.next_token(), Token::Name("a".into()));
        assert_eq!(r.next_token(), Token::Number("1".into()));
        assert_eq!(r.next_token(), Token::Name("b".into()));
        assert_eq!(r.next_token(), Token::Str("x\"y".into()));
        assert_eq!(r.next_token(), Token::Name("c".into()));
        assert_eq!(r.next_token(), Token::ArrayStart);
        assert_eq!(r.next_token(), Token::True);
        let saved = r.buf_pos();
        assert_eq!(r.next_token(), Token::Null);
        r.set_buf_pos(saved);
        assert_eq!(r.peek_token(), Token::Null);
        assert_eq!(r.next_token(), Token::Null);
        assert_eq!(r.next_token(), Token::ArrayEnd);
        assert_eq!(r.next_token(), Token::ObjectEnd);
        assert_eq!(r.next_token(), Token::End);
    }

    #[test]
    fn malformed_input_is_an_error_token() {
        assert_eq!(JsonReader::new("\"open").next_token(), Token::Error);
        assert_eq!(JsonReader::new("nul").next_token(), Token::Error);
        assert_eq!(JsonReader::new("-").next_token(), Token::Error);
        assert_eq!(JsonReader::new("@").next_token(), Token::Error);
    }

    #[test]
    fn writer_separates_members() {
        let mut w = JsonWriter::new(false);
        for t in [
            Token::ObjectStart,
            Token::Name("a".into()),
            Token::Number("1".into()),
            Token::Name("b".into()),
            Token::ArrayStart,
            Token::Str("x".into()),
            Token::Null,
            Token::ArrayEnd,
            Token::ObjectEnd,
        ] {
            w.put(t);
        }
        assert_eq!(w.finish(), r#"{"a":1,"b":["x",null]}"#);
    }
}
