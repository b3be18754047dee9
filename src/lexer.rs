use std::iter::Peekable;
use std::os::unix::io::RawFd;
use std::str::Chars;

use crate::word::{Word, WordPart};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Operator(Operator),
    /// Descriptor number written directly in front of a redirection operator.
    IoNumber(RawFd),
    HereDoc(HereDoc),
    NewLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Pipe,        // |
    PipeAnd,     // |&
    And,         // &&
    Or,          // ||
    Background,  // &
    Semicolon,   // ;
    LeftParen,   // (
    RightParen,  // )
    Output,      // >
    Clobber,     // >|
    Append,      // >>
    Input,       // <
    ReadWrite,   // <>
    DupOutput,   // >&
    DupInput,    // <&
    AndOutput,   // &>
    AndAppend,   // &>>
    HereString,  // <<<
}

impl Operator {
    pub fn is_redirection(self) -> bool {
        !matches!(
            self,
            Operator::Pipe
                | Operator::PipeAnd
                | Operator::And
                | Operator::Or
                | Operator::Background
                | Operator::Semicolon
                | Operator::LeftParen
                | Operator::RightParen
        )
    }

    pub fn text(self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::PipeAnd => "|&",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Background => "&",
            Operator::Semicolon => ";",
            Operator::LeftParen => "(",
            Operator::RightParen => ")",
            Operator::Output => ">",
            Operator::Clobber => ">|",
            Operator::Append => ">>",
            Operator::Input => "<",
            Operator::ReadWrite => "<>",
            Operator::DupOutput => ">&",
            Operator::DupInput => "<&",
            Operator::AndOutput => "&>",
            Operator::AndAppend => "&>>",
            Operator::HereString => "<<<",
        }
    }
}

/// `<<` or `<<-`. The body is filled in once the lexer reaches the end of
/// the line the operator appeared on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HereDoc {
    pub delimiter: String,
    /// Any part of the delimiter was quoted: the body is not expanded.
    pub quoted: bool,
    pub strip_tabs: bool,
    pub body: String,
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    current: Option<char>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut chars = input.chars().peekable();
        let current = chars.next();
        Self { input: chars, current }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.consume_blanks();
        let c = self.current?;
        match c {
            '\n' => {
                self.advance();
                Some(Token::NewLine)
            }
            '#' => {
                while !matches!(self.current, None | Some('\n')) {
                    self.advance();
                }
                self.next_token()
            }
            '0'..='9' => {
                let word = self.read_word();
                match (word.unquoted().parse::<RawFd>(), self.current) {
                    (Ok(fd), Some('<' | '>')) if !word.is_quoted() => Some(Token::IoNumber(fd)),
                    _ => Some(Token::Word(word)),
                }
            }
            '<' if self.input.peek() == Some(&'<') => Some(self.read_here_operator()),
            '|' | '&' | '>' | '<' | ';' | '(' | ')' => Some(Token::Operator(self.read_operator())),
            _ => Some(Token::Word(self.read_word())),
        }
    }

    fn read_word(&mut self) -> Word {
        let mut word = Word::new();
        let mut plain = String::new();
        while let Some(c) = self.current {
            match c {
                ' ' | '\t' | '\n' | '|' | '&' | '>' | '<' | ';' | '(' | ')' => break,
                '\\' => {
                    self.advance();
                    match self.current {
                        // Line continuation.
                        Some('\n') => self.advance(),
                        Some(escaped) => {
                            flush_plain(&mut word, &mut plain);
                            word.add_part(WordPart::Escaped(escaped));
                            self.advance();
                        }
                        None => plain.push('\\'),
                    }
                }
                '\'' => {
                    flush_plain(&mut word, &mut plain);
                    self.advance();
                    let mut quoted = String::new();
                    while let Some(q) = self.current {
                        self.advance();
                        if q == '\'' {
                            break;
                        }
                        quoted.push(q);
                    }
                    word.add_part(WordPart::SingleQuoted(quoted));
                }
                '"' => {
                    flush_plain(&mut word, &mut plain);
                    self.advance();
                    let quoted = self.read_double_quoted();
                    word.add_part(WordPart::DoubleQuoted(quoted));
                }
                '$' if self.input.peek() == Some(&'{') => {
                    // `${...}` may hold characters that would otherwise end the word.
                    while let Some(b) = self.current {
                        plain.push(b);
                        self.advance();
                        if b == '}' {
                            break;
                        }
                    }
                }
                _ => {
                    plain.push(c);
                    self.advance();
                }
            }
        }
        flush_plain(&mut word, &mut plain);
        word
    }

    /// Text up to the closing quote with backslashes kept; the expander
    /// decides which of them escape.
    fn read_double_quoted(&mut self) -> String {
        let mut quoted = String::new();
        while let Some(c) = self.current {
            self.advance();
            match c {
                '"' => break,
                '\\' => {
                    quoted.push('\\');
                    if let Some(next) = self.current {
                        quoted.push(next);
                        self.advance();
                    }
                }
                _ => quoted.push(c),
            }
        }
        quoted
    }

    fn read_operator(&mut self) -> Operator {
        let first = self.current.unwrap_or(';');
        self.advance();
        let take = |lexer: &mut Self, next: char| {
            if lexer.current == Some(next) {
                lexer.advance();
                true
            } else {
                false
            }
        };
        match first {
            '|' if take(self, '|') => Operator::Or,
            '|' if take(self, '&') => Operator::PipeAnd,
            '|' => Operator::Pipe,
            '&' if take(self, '&') => Operator::And,
            '&' if take(self, '>') => {
                if take(self, '>') {
                    Operator::AndAppend
                } else {
                    Operator::AndOutput
                }
            }
            '&' => Operator::Background,
            '>' if take(self, '>') => Operator::Append,
            '>' if take(self, '&') => Operator::DupOutput,
            '>' if take(self, '|') => Operator::Clobber,
            '>' => Operator::Output,
            '<' if take(self, '&') => Operator::DupInput,
            '<' if take(self, '>') => Operator::ReadWrite,
            '<' => Operator::Input,
            '(' => Operator::LeftParen,
            ')' => Operator::RightParen,
            _ => Operator::Semicolon,
        }
    }

    /// `<<`, `<<-` (with the delimiter word) or `<<<`.
    fn read_here_operator(&mut self) -> Token {
        self.advance();
        self.advance();
        if self.current == Some('<') {
            self.advance();
            return Token::Operator(Operator::HereString);
        }
        let strip_tabs = self.current == Some('-');
        if strip_tabs {
            self.advance();
        }
        self.consume_blanks();
        let delimiter = self.read_word();
        Token::HereDoc(HereDoc {
            delimiter: delimiter.unquoted(),
            quoted: delimiter.is_quoted(),
            strip_tabs,
            body: String::new(),
        })
    }

    /// Consume body lines up to a line equal to `delimiter` (or the end of
    /// input).
    fn read_here_body(&mut self, doc: &mut HereDoc) {
        while self.current.is_some() {
            let mut line = String::new();
            while let Some(c) = self.current {
                self.advance();
                if c == '\n' {
                    break;
                }
                line.push(c);
            }
            let line = if doc.strip_tabs {
                line.trim_start_matches('\t').to_string()
            } else {
                line
            };
            if line == doc.delimiter {
                return;
            }
            doc.body.push_str(&line);
            doc.body.push('\n');
        }
    }

    fn consume_blanks(&mut self) {
        while let Some(c) = self.current {
            match c {
                ' ' | '\t' => self.advance(),
                '\\' if self.input.peek() == Some(&'\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn advance(&mut self) {
        self.current = self.input.next();
    }
}

fn flush_plain(word: &mut Word, plain: &mut String) {
    if !plain.is_empty() {
        word.add_part(WordPart::Simple(std::mem::take(plain)));
    }
}

/// Split `input` into tokens. Here-document bodies are read from the lines
/// following the operator's line and attached to their tokens.
pub fn lex(input: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    let mut pending = Vec::new();
    loop {
        let token = lexer.next_token();
        let at_line_end = matches!(token, None | Some(Token::NewLine));
        if at_line_end {
            for index in pending.drain(..) {
                if let Some(Token::HereDoc(doc)) = tokens.get_mut(index) {
                    lexer.read_here_body(doc);
                }
            }
        }
        match token {
            Some(Token::HereDoc(doc)) => {
                pending.push(tokens.len());
                tokens.push(Token::HereDoc(doc));
            }
            Some(token) => tokens.push(token),
            None => break,
        }
    }
    tokens
}
