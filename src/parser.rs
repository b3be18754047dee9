use std::os::unix::io::RawFd;

use crate::ast::{
    Assignment, Command, CommandFlags, CommandKind, Connector, RedirInstruction, Redirectee, Redirection,
    SimpleCommand,
};
use crate::lexer::{HereDoc, Operator, Token};
use crate::types::ShellError;
use crate::word::Word;

/// Build a command tree from `tokens`. An empty input yields an empty
/// simple command, which does nothing when executed.
pub fn parse(tokens: &[Token]) -> Result<Command, ShellError> {
    let mut parser = Parser { tokens, pos: 0, line: 1 };
    parser.skip_newlines();
    if parser.peek().is_none() {
        return Ok(Command::new(CommandKind::Simple(SimpleCommand::default())));
    }
    let ast = parser.parse_sequence()?;
    match parser.peek() {
        None => Ok(ast),
        Some(token) => Err(unexpected(Some(token))),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(word) => word.to_string(),
        Token::Operator(op) => op.text().to_string(),
        Token::IoNumber(fd) => fd.to_string(),
        Token::HereDoc(doc) => format!("<<{}", doc.delimiter),
        Token::NewLine => "newline".to_string(),
    }
}

fn unexpected(token: Option<&Token>) -> ShellError {
    ShellError::Syntax(token.map_or_else(|| "end of input".to_string(), describe))
}

/// The word as a reserved word, if it is written without any quoting.
fn reserved(token: Option<&Token>) -> Option<String> {
    match token {
        Some(Token::Word(word)) if !word.is_quoted() => Some(word.unquoted()),
        _ => None,
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        if matches!(token, Some(Token::NewLine)) {
            self.line += 1;
        }
        token
    }

    fn eat(&mut self, op: Operator) -> bool {
        if self.peek() == Some(&Token::Operator(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::NewLine)) {
            self.advance();
        }
    }

    fn expect_reserved(&mut self, word: &str) -> Result<(), ShellError> {
        if reserved(self.peek()).as_deref() == Some(word) {
            self.advance();
            Ok(())
        } else {
            Err(unexpected(self.peek()))
        }
    }

    /// Whether a command can start here, as opposed to the end of an
    /// enclosing group or subshell.
    fn at_command_start(&self) -> bool {
        match self.peek() {
            None | Some(Token::Operator(Operator::RightParen)) => false,
            Some(Token::Operator(op)) => op.is_redirection() || *op == Operator::LeftParen,
            Some(Token::NewLine) => false,
            token => reserved(token).as_deref() != Some("}"),
        }
    }

    /// `a ; b & c` and newline-separated lists, left-associated.
    fn parse_sequence(&mut self) -> Result<Command, ShellError> {
        let mut left = self.parse_logical()?;
        loop {
            let connector = match self.peek() {
                Some(Token::Operator(Operator::Semicolon)) | Some(Token::NewLine) => Connector::Sequence,
                Some(Token::Operator(Operator::Background)) => Connector::Background,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            if !self.at_command_start() {
                if connector == Connector::Background {
                    left = Command::connect(left, connector, None);
                }
                break;
            }
            let right = self.parse_logical()?;
            left = Command::connect(left, connector, Some(right));
        }
        Ok(left)
    }

    fn parse_logical(&mut self) -> Result<Command, ShellError> {
        let mut left = self.parse_pipeline()?;
        loop {
            let connector = match self.peek() {
                Some(Token::Operator(Operator::And)) => Connector::And,
                Some(Token::Operator(Operator::Or)) => Connector::Or,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            let right = self.parse_pipeline()?;
            left = Command::connect(left, connector, Some(right));
        }
        Ok(left)
    }

    /// `[time [-p]] [!] cmd | cmd |& cmd ...`
    fn parse_pipeline(&mut self) -> Result<Command, ShellError> {
        let mut flags = CommandFlags::empty();
        if reserved(self.peek()).as_deref() == Some("time") {
            self.advance();
            flags |= CommandFlags::TIME_EXECUTION;
            if reserved(self.peek()).as_deref() == Some("-p") {
                self.advance();
                flags |= CommandFlags::TIME_POSIX;
            }
        }
        while reserved(self.peek()).as_deref() == Some("!") {
            self.advance();
            flags.toggle(CommandFlags::INVERT_RESULT);
        }

        let mut left = self.parse_command_with_redirects()?;
        loop {
            let stderr_too = match self.peek() {
                Some(Token::Operator(Operator::Pipe)) => false,
                Some(Token::Operator(Operator::PipeAnd)) => true,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            if stderr_too {
                left = left.with_redirect(Redirection::dup(2, RedirInstruction::DuplicatingOutput, 1));
            }
            let right = self.parse_command_with_redirects()?;
            left = Command::connect(left, Connector::Pipe, Some(right));
        }
        Ok(left.with_flags(flags))
    }

    fn parse_command_with_redirects(&mut self) -> Result<Command, ShellError> {
        let line = self.line;
        if !self.at_command_start() {
            return Err(unexpected(self.peek()));
        }
        let mut command = match (self.peek(), self.peek_at(1), self.peek_at(2)) {
            (Some(Token::Operator(Operator::LeftParen)), _, _) => {
                self.advance();
                let inner = self.parse_compound_list()?;
                if !self.eat(Operator::RightParen) {
                    return Err(unexpected(self.peek()));
                }
                Command::subshell(inner)
            }
            (token, _, _) if reserved(token).as_deref() == Some("{") => self.parse_group()?,
            (
                Some(Token::Word(name)),
                Some(Token::Operator(Operator::LeftParen)),
                Some(Token::Operator(Operator::RightParen)),
            ) => {
                self.pos += 3;
                self.skip_newlines();
                let body = self.parse_command_with_redirects()?;
                if body.is_simple() {
                    return Err(ShellError::Syntax(body.describe()));
                }
                return Ok(Command::function(&name.unquoted(), body).at_line(line));
            }
            _ => return self.parse_command(),
        };
        while let Some(redirect) = self.parse_redirect()? {
            command = command.with_redirect(redirect);
        }
        Ok(command.at_line(line))
    }

    fn parse_group(&mut self) -> Result<Command, ShellError> {
        self.expect_reserved("{")?;
        let inner = self.parse_compound_list()?;
        self.expect_reserved("}")?;
        Ok(Command::group(inner))
    }

    fn parse_compound_list(&mut self) -> Result<Command, ShellError> {
        self.skip_newlines();
        let list = self.parse_sequence()?;
        self.skip_newlines();
        Ok(list)
    }

    /// Assignments, words and redirections of one simple command.
    fn parse_command(&mut self) -> Result<Command, ShellError> {
        let line = self.line;
        let mut simple = SimpleCommand::default();
        let mut redirects = Vec::new();
        loop {
            if let Some(redirect) = self.parse_redirect()? {
                redirects.push(redirect);
                continue;
            }
            let Some(Token::Word(word)) = self.peek() else {
                break;
            };
            self.advance();
            match word.split_assignment() {
                Some((name, value)) if simple.words.is_empty() => {
                    simple.assignments.push(Assignment { name, value })
                }
                _ => simple.words.push(word.clone()),
            }
        }
        if simple.words.is_empty() && simple.assignments.is_empty() && redirects.is_empty() {
            return Err(unexpected(self.peek()));
        }
        let mut command = Command::new(CommandKind::Simple(simple)).at_line(line);
        command.redirects = redirects;
        Ok(command)
    }

    fn parse_redirect(&mut self) -> Result<Option<Redirection>, ShellError> {
        let (fd, offset) = match self.peek() {
            Some(Token::IoNumber(fd)) => (Some(*fd), 1),
            _ => (None, 0),
        };
        let redirect = match self.peek_at(offset) {
            Some(Token::HereDoc(doc)) => {
                self.pos += offset + 1;
                here_document(fd.unwrap_or(0), doc)
            }
            Some(Token::Operator(op)) if op.is_redirection() => {
                self.pos += offset + 1;
                let Some(Token::Word(target)) = self.advance() else {
                    return Err(unexpected(self.tokens.get(self.pos - 1)));
                };
                redirection(fd, *op, target)
            }
            _ => return Ok(None),
        };
        Ok(Some(redirect))
    }
}

fn here_document(fd: RawFd, doc: &HereDoc) -> Redirection {
    Redirection::new(
        fd,
        RedirInstruction::HereDocument { quoted: doc.quoted },
        Redirectee::Word(Word::literal(&doc.body)),
    )
}

fn redirection(fd: Option<RawFd>, op: Operator, target: &Word) -> Redirection {
    let instruction = match op {
        Operator::Output => RedirInstruction::Output,
        Operator::Clobber => RedirInstruction::OutputForce,
        Operator::Append => RedirInstruction::Append,
        Operator::Input => RedirInstruction::Input,
        Operator::ReadWrite => RedirInstruction::InputOutput,
        Operator::AndOutput => RedirInstruction::ErrAndOut,
        Operator::AndAppend => RedirInstruction::AppendErrAndOut,
        Operator::HereString => RedirInstruction::HereString,
        Operator::DupInput | Operator::DupOutput => return duplication(fd, op, target),
        _ => unreachable!("not a redirection operator"),
    };
    let redirector = fd.unwrap_or_else(|| instruction.default_fd());
    Redirection::new(redirector, instruction, Redirectee::Word(target.clone()))
}

/// `N>&M`, `N<&M-` and `N>&-` are resolved here; anything else is left to
/// expansion at run time.
fn duplication(fd: Option<RawFd>, op: Operator, target: &Word) -> Redirection {
    let input = op == Operator::DupInput;
    let (dup, mv) = if input {
        (RedirInstruction::DuplicatingInput, RedirInstruction::MoveInput)
    } else {
        (RedirInstruction::DuplicatingOutput, RedirInstruction::MoveOutput)
    };
    let redirector = fd.unwrap_or_else(|| dup.default_fd());
    if target.is_quoted() {
        return Redirection::new(redirector, dup, Redirectee::Word(target.clone()));
    }
    let text = target.unquoted();
    if text == "-" {
        return Redirection::close(redirector);
    }
    let (digits, moving) = match text.strip_suffix('-') {
        Some(digits) => (digits, true),
        None => (text.as_str(), false),
    };
    match digits.parse::<RawFd>() {
        Ok(source) if moving => Redirection::dup(redirector, mv, source),
        Ok(source) => Redirection::dup(redirector, dup, source),
        Err(_) => Redirection::new(redirector, dup, Redirectee::Word(target.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn tree(input: &str) -> Command {
        parse(&lex(input)).unwrap()
    }

    #[test]
    fn lists_and_pipes() {
        let cmd = tree("a | b && c; d &");
        assert_eq!(cmd.describe(), "a | b && c ; d &");
        let CommandKind::Connection(outer) = &cmd.kind else {
            panic!("expected a connection");
        };
        assert_eq!(outer.connector, Connector::Sequence);
    }

    #[test]
    fn redirections_and_io_numbers() {
        let cmd = tree("cmd 2>&1 >out <in 3<&0- 4>&- >|force &>both");
        let got: Vec<_> = cmd.redirects.iter().map(|r| (r.redirector, r.instruction)).collect();
        assert_eq!(
            got,
            vec![
                (2, RedirInstruction::DuplicatingOutput),
                (1, RedirInstruction::Output),
                (0, RedirInstruction::Input),
                (3, RedirInstruction::MoveInput),
                (4, RedirInstruction::Close),
                (1, RedirInstruction::OutputForce),
                (1, RedirInstruction::ErrAndOut),
            ]
        );
        assert_eq!(cmd.redirects[0].redirectee, Redirectee::Fd(1));
    }

    #[test]
    fn here_documents_collect_their_bodies() {
        let cmd = tree("cat <<EOF; cat <<-'END'\nhello $x\nEOF\n\tliteral\n\tEND\n");
        let CommandKind::Connection(conn) = &cmd.kind else {
            panic!("expected a connection");
        };
        let first = &conn.first.redirects[0];
        assert_eq!(first.instruction, RedirInstruction::HereDocument { quoted: false });
        assert_eq!(first.redirectee, Redirectee::Word(Word::literal("hello $x\n")));
        let second = &conn.second.as_ref().unwrap().redirects[0];
        assert_eq!(second.instruction, RedirInstruction::HereDocument { quoted: true });
        assert_eq!(second.redirectee, Redirectee::Word(Word::literal("literal\n")));
    }

    #[test]
    fn compound_commands() {
        let cmd = tree("time -p ! { a; b; } > f");
        assert!(cmd.flags.contains(CommandFlags::INVERT_RESULT | CommandFlags::TIME_POSIX));
        assert!(matches!(cmd.kind, CommandKind::Group(_)));
        assert_eq!(cmd.redirects.len(), 1);

        let cmd = tree("greet() { echo hi; }");
        let CommandKind::FunctionDef(def) = &cmd.kind else {
            panic!("expected a function definition");
        };
        assert_eq!(def.name, "greet");

        let cmd = tree("(cd /tmp && ls) | wc -l");
        let CommandKind::Connection(conn) = &cmd.kind else {
            panic!("expected a pipe");
        };
        assert!(matches!(conn.first.kind, CommandKind::Subshell(_)));
    }

    #[test]
    fn assignment_prefixes() {
        let cmd = tree("A=1 B='two words' env x=y");
        let CommandKind::Simple(simple) = &cmd.kind else {
            panic!("expected a simple command");
        };
        let names: Vec<_> = simple.assignments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(simple.words.len(), 2);
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(parse(&lex("echo hello |")), Err(ShellError::Syntax(_))));
        assert!(matches!(parse(&lex("| echo hello")), Err(ShellError::Syntax(_))));
        assert!(matches!(parse(&lex("( echo")), Err(ShellError::Syntax(_))));
        assert!(matches!(parse(&lex("echo >")), Err(ShellError::Syntax(_))));
        assert!(parse(&lex("   ")).is_ok());
    }
}
