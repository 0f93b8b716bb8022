//! Tokenizer. Whitespace-delimited, parenthesized, no comments.

use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Error,
    Eof,
    Define,
    Set,
    Lambda,
    If,
    Cond,
    Begin,
    Open,
    Close,
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Eq,
    And,
    Or,
    Not,
    Box,
    Unbox,
    SetBox,
    Nil,
    Symbol,
    Integer,
    Space,
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub offset: usize,
}

fn reserved_word(word: &str) -> Option<TokenKind> {
    Some(match word {
        "define" => TokenKind::Define,
        "set!" => TokenKind::Set,
        "lambda" => TokenKind::Lambda,
        "if" => TokenKind::If,
        "cond" => TokenKind::Cond,
        "begin" => TokenKind::Begin,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "box" => TokenKind::Box,
        "unbox" => TokenKind::Unbox,
        "setbox" => TokenKind::SetBox,
        "nil" => TokenKind::Nil,
        _ => return None,
    })
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '!' || c == '-' || c == '?'
}

/// Lazily tokenizes `source`, skipping whitespace tokens internally so
/// callers only ever see meaningful tokens, ending in an unbounded run of
/// `Eof`.
pub struct TokenStream<'a> {
    source: &'a str,
    chars: std::iter::Peekable<CharIndices<'a>>,
    peeked: Option<Token>,
}

impl<'a> TokenStream<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            peeked: None,
        }
    }

    pub fn peek(&mut self) -> &Token {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex_one());
        }
        self.peeked.as_ref().unwrap()
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(tok) = self.peeked.take() {
            return tok;
        }
        self.lex_one()
    }

    fn lex_one(&mut self) -> Token {
        loop {
            let tok = self.lex_raw();
            if matches!(tok.kind, TokenKind::Space | TokenKind::Newline) {
                continue;
            }
            return tok;
        }
    }

    fn lex_raw(&mut self) -> Token {
        let (offset, c) = match self.chars.peek().copied() {
            None => {
                return Token {
                    kind: TokenKind::Eof,
                    literal: String::new(),
                    offset: self.source.len(),
                }
            }
            Some(x) => x,
        };

        if c == '\n' {
            self.chars.next();
            return Token {
                kind: TokenKind::Newline,
                literal: String::new(),
                offset,
            };
        }
        if c.is_whitespace() {
            self.chars.next();
            return Token {
                kind: TokenKind::Space,
                literal: String::new(),
                offset,
            };
        }
        if c == '(' {
            self.chars.next();
            return Token {
                kind: TokenKind::Open,
                literal: String::new(),
                offset,
            };
        }
        if c == ')' {
            self.chars.next();
            return Token {
                kind: TokenKind::Close,
                literal: String::new(),
                offset,
            };
        }
        if "+-*/><=".contains(c) {
            self.chars.next();
            // A `-` directly followed by a digit is the start of a signed
            // integer literal, not the subtraction operator.
            if c == '-' {
                if let Some(&(_, d)) = self.chars.peek() {
                    if d.is_ascii_digit() {
                        return self.lex_integer(offset, true);
                    }
                }
            }
            let kind = match c {
                '+' => TokenKind::Add,
                '-' => TokenKind::Sub,
                '*' => TokenKind::Mul,
                '/' => TokenKind::Div,
                '>' => TokenKind::Gt,
                '<' => TokenKind::Lt,
                '=' => TokenKind::Eq,
                _ => unreachable!(),
            };
            return Token {
                kind,
                literal: c.to_string(),
                offset,
            };
        }
        if c.is_ascii_digit() {
            return self.lex_integer(offset, false);
        }
        if is_ident_start(c) {
            let mut lit = String::new();
            while let Some(&(_, d)) = self.chars.peek() {
                if is_ident_continue(d) {
                    lit.push(d);
                    self.chars.next();
                } else {
                    break;
                }
            }
            let kind = reserved_word(&lit).unwrap_or(TokenKind::Symbol);
            return Token {
                kind,
                literal: lit,
                offset,
            };
        }

        self.chars.next();
        Token {
            kind: TokenKind::Error,
            literal: c.to_string(),
            offset,
        }
    }

    fn lex_integer(&mut self, offset: usize, negative: bool) -> Token {
        let mut lit = String::new();
        if negative {
            lit.push('-');
        }
        while let Some(&(_, d)) = self.chars.peek() {
            if d.is_ascii_digit() {
                lit.push(d);
                self.chars.next();
            } else {
                break;
            }
        }
        Token {
            kind: TokenKind::Integer,
            literal: lit,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut ts = TokenStream::new(src);
        let mut out = Vec::new();
        loop {
            let tok = ts.next_token();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn tokenizes_a_simple_define() {
        assert_eq!(
            kinds("(define (square x) (* x x))"),
            vec![
                TokenKind::Open,
                TokenKind::Define,
                TokenKind::Open,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Close,
                TokenKind::Open,
                TokenKind::Mul,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::Close,
                TokenKind::Close,
            ]
        );
    }

    #[test]
    fn whitespace_and_newlines_are_skipped() {
        assert_eq!(kinds("(  +\n 1  2 )"), vec![
            TokenKind::Open,
            TokenKind::Add,
            TokenKind::Integer,
            TokenKind::Integer,
            TokenKind::Close,
        ]);
    }

    #[test]
    fn reserved_words_are_distinguished_from_symbols() {
        assert_eq!(kinds("set! setx"), vec![TokenKind::Set, TokenKind::Symbol]);
    }

    #[test]
    fn negative_integer_literal_vs_subtraction_operator() {
        let mut ts = TokenStream::new("-5 - x");
        assert_eq!(ts.next_token().kind, TokenKind::Integer);
        assert_eq!(ts.next_token().kind, TokenKind::Sub);
        assert_eq!(ts.next_token().kind, TokenKind::Symbol);
    }

    #[test]
    fn identifier_may_contain_bang_dash_question_mark() {
        let mut ts = TokenStream::new("make-adder?");
        let tok = ts.next_token();
        assert_eq!(tok.kind, TokenKind::Symbol);
        assert_eq!(tok.literal, "make-adder?");
    }
}
