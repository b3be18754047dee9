use std::os::unix::io::RawFd;
use std::rc::Rc;

use bitflags::bitflags;

use crate::word::Word;

bitflags! {
    /// Per-node execution flags. The dispatcher ORs extra flags in for one
    /// call without touching the tree.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CommandFlags: u16 {
        const RUN_IN_SUBSHELL   = 1 << 0;
        const FORCE_SUBSHELL    = 1 << 1;
        const INVERT_RESULT     = 1 << 2;
        const IGNORE_RESULT     = 1 << 3;
        const SKIP_FORK         = 1 << 4;
        const BACKGROUND        = 1 << 5;
        const STDIN_FROM_NULL   = 1 << 6;
        const TIME_EXECUTION    = 1 << 7;
        const TIME_POSIX        = 1 << 8;
        const NO_FUNCTION_LOOKUP = 1 << 9;
        const INHIBIT_EXPANSION = 1 << 10;
        /// The node's own redirections were already performed by the caller.
        const REDIRECTS_APPLIED = 1 << 11;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub redirects: Vec<Redirection>,
    pub flags: CommandFlags,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Simple(SimpleCommand),
    Connection(Connection),
    For(ForCommand),
    ArithFor(ArithForCommand),
    Select(SelectCommand),
    Case(CaseCommand),
    While(LoopCommand),
    Until(LoopCommand),
    If(IfCommand),
    Group(Box<Command>),
    Subshell(Box<Command>),
    Arith(ArithCommand),
    Cond(CondExpr),
    FunctionDef(FunctionDef),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    Sequence,   // ;
    Background, // &
    And,        // &&
    Or,         // ||
    Pipe,       // |
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub first: Box<Command>,
    pub second: Option<Box<Command>>,
    pub connector: Connector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForCommand {
    pub name: String,
    /// `None` iterates over the positional parameters.
    pub words: Option<Vec<Word>>,
    pub body: Box<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithForCommand {
    pub init: Word,
    pub test: Word,
    pub step: Word,
    pub body: Box<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCommand {
    pub name: String,
    pub words: Option<Vec<Word>>,
    pub body: Box<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseTerminator {
    #[default]
    Break,       // ;;
    FallThrough, // ;&
    TestNext,    // ;;&
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseClause {
    pub patterns: Vec<Word>,
    pub body: Option<Command>,
    pub terminator: CaseTerminator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseCommand {
    pub word: Word,
    pub clauses: Vec<CaseClause>,
}

/// Body of both `while` and `until`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCommand {
    pub test: Box<Command>,
    pub body: Box<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfCommand {
    pub test: Box<Command>,
    pub then_branch: Option<Box<Command>>,
    pub else_branch: Option<Box<Command>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithCommand {
    pub expression: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CondExpr {
    And(Box<CondExpr>, Box<CondExpr>),
    Or(Box<CondExpr>, Box<CondExpr>),
    Not(Box<CondExpr>),
    Unary { op: String, arg: Word },
    Binary { op: String, left: Word, right: Word },
    Term(Word),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Rc<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirInstruction {
    Output,          // >
    OutputForce,     // >|
    Append,          // >>
    Input,           // <
    InputOutput,     // <>
    ErrAndOut,       // &>
    AppendErrAndOut, // &>>
    DuplicatingInput,  // <&N, <&word
    DuplicatingOutput, // >&N, >&word
    MoveInput,       // <&N-
    MoveOutput,      // >&N-
    HereDocument { quoted: bool }, // <<, <<-
    HereString,      // <<<
    Close,           // <&-, >&-
}

impl RedirInstruction {
    pub fn default_fd(self) -> RawFd {
        match self {
            RedirInstruction::Input
            | RedirInstruction::InputOutput
            | RedirInstruction::DuplicatingInput
            | RedirInstruction::MoveInput
            | RedirInstruction::HereDocument { .. }
            | RedirInstruction::HereString => 0,
            _ => 1,
        }
    }

    pub fn operator(self) -> &'static str {
        match self {
            RedirInstruction::Output => ">",
            RedirInstruction::OutputForce => ">|",
            RedirInstruction::Append => ">>",
            RedirInstruction::Input => "<",
            RedirInstruction::InputOutput => "<>",
            RedirInstruction::ErrAndOut => "&>",
            RedirInstruction::AppendErrAndOut => "&>>",
            RedirInstruction::DuplicatingInput | RedirInstruction::MoveInput => "<&",
            RedirInstruction::DuplicatingOutput | RedirInstruction::MoveOutput => ">&",
            RedirInstruction::HereDocument { .. } => "<<",
            RedirInstruction::HereString => "<<<",
            RedirInstruction::Close => ">&-",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Redirectee {
    Fd(RawFd),
    Word(Word),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirection {
    pub redirector: RawFd,
    pub instruction: RedirInstruction,
    pub redirectee: Redirectee,
}

impl Redirection {
    pub fn new(redirector: RawFd, instruction: RedirInstruction, redirectee: Redirectee) -> Self {
        Self {
            redirector,
            instruction,
            redirectee,
        }
    }

    pub fn to_file(redirector: RawFd, instruction: RedirInstruction, target: &str) -> Self {
        Self::new(redirector, instruction, Redirectee::Word(Word::from(target)))
    }

    pub fn dup(redirector: RawFd, instruction: RedirInstruction, fd: RawFd) -> Self {
        Self::new(redirector, instruction, Redirectee::Fd(fd))
    }

    pub fn close(redirector: RawFd) -> Self {
        Self::new(redirector, RedirInstruction::Close, Redirectee::Fd(redirector))
    }

    /// Whether applying this redirection replaces standard input.
    pub fn reads_stdin(&self) -> bool {
        self.redirector == 0
    }
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            redirects: Vec::new(),
            flags: CommandFlags::empty(),
            line: 0,
        }
    }

    pub fn simple<S: AsRef<str>>(words: &[S]) -> Self {
        Self::new(CommandKind::Simple(SimpleCommand {
            assignments: Vec::new(),
            words: words.iter().map(|w| Word::from(w.as_ref())).collect(),
        }))
    }

    pub fn connect(first: Command, connector: Connector, second: Option<Command>) -> Self {
        Self::new(CommandKind::Connection(Connection {
            first: Box::new(first),
            second: second.map(Box::new),
            connector,
        }))
    }

    /// Left-associated `a | b | c`.
    pub fn pipeline(stages: Vec<Command>) -> Option<Self> {
        let mut stages = stages.into_iter();
        let first = stages.next()?;
        Some(stages.fold(first, |left, right| {
            Command::connect(left, Connector::Pipe, Some(right))
        }))
    }

    pub fn subshell(inner: Command) -> Self {
        Self::new(CommandKind::Subshell(Box::new(inner)))
    }

    pub fn group(inner: Command) -> Self {
        Self::new(CommandKind::Group(Box::new(inner)))
    }

    pub fn for_loop(name: &str, words: Option<Vec<Word>>, body: Command) -> Self {
        Self::new(CommandKind::For(ForCommand {
            name: name.to_string(),
            words,
            body: Box::new(body),
        }))
    }

    pub fn while_loop(test: Command, body: Command) -> Self {
        Self::new(CommandKind::While(LoopCommand {
            test: Box::new(test),
            body: Box::new(body),
        }))
    }

    pub fn until_loop(test: Command, body: Command) -> Self {
        Self::new(CommandKind::Until(LoopCommand {
            test: Box::new(test),
            body: Box::new(body),
        }))
    }

    pub fn if_then(test: Command, then_branch: Option<Command>, else_branch: Option<Command>) -> Self {
        Self::new(CommandKind::If(IfCommand {
            test: Box::new(test),
            then_branch: then_branch.map(Box::new),
            else_branch: else_branch.map(Box::new),
        }))
    }

    pub fn function(name: &str, body: Command) -> Self {
        Self::new(CommandKind::FunctionDef(FunctionDef {
            name: name.to_string(),
            body: Rc::new(body),
        }))
    }

    pub fn with_redirect(mut self, redirect: Redirection) -> Self {
        self.redirects.push(redirect);
        self
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    /// Compound commands that must run in a child when piped or backgrounded.
    pub fn is_control_structure(&self) -> bool {
        !self.is_simple()
            && !matches!(
                &self.kind,
                CommandKind::Connection(Connection {
                    connector: Connector::Pipe,
                    ..
                })
            )
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.kind, CommandKind::Simple(_))
    }

    /// Short text for diagnostics and job bookkeeping.
    pub fn describe(&self) -> String {
        match &self.kind {
            CommandKind::Simple(simple) => simple
                .words
                .iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            CommandKind::Connection(conn) => {
                let op = match conn.connector {
                    Connector::Sequence => ";",
                    Connector::Background => "&",
                    Connector::And => "&&",
                    Connector::Or => "||",
                    Connector::Pipe => "|",
                };
                match &conn.second {
                    Some(second) => format!("{} {} {}", conn.first.describe(), op, second.describe()),
                    None => format!("{} {}", conn.first.describe(), op),
                }
            }
            CommandKind::For(f) => format!("for {}", f.name),
            CommandKind::ArithFor(_) => "for ((...))".to_string(),
            CommandKind::Select(s) => format!("select {}", s.name),
            CommandKind::Case(c) => format!("case {}", c.word),
            CommandKind::While(_) => "while".to_string(),
            CommandKind::Until(_) => "until".to_string(),
            CommandKind::If(_) => "if".to_string(),
            CommandKind::Group(inner) => format!("{{ {}; }}", inner.describe()),
            CommandKind::Subshell(inner) => format!("( {} )", inner.describe()),
            CommandKind::Arith(_) => "((...))".to_string(),
            CommandKind::Cond(_) => "[[ ... ]]".to_string(),
            CommandKind::FunctionDef(def) => format!("{} ()", def.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_is_left_associated() {
        let tree = Command::pipeline(vec![
            Command::simple(&["a"]),
            Command::simple(&["b"]),
            Command::simple(&["c"]),
        ])
        .unwrap();
        let CommandKind::Connection(outer) = &tree.kind else {
            panic!("expected connection");
        };
        assert_eq!(outer.connector, Connector::Pipe);
        assert!(matches!(outer.first.kind, CommandKind::Connection(_)));
        assert_eq!(tree.describe(), "a | b | c");
    }

    #[test]
    fn control_structures() {
        assert!(Command::group(Command::simple(&["a"])).is_control_structure());
        assert!(!Command::simple(&["a"]).is_control_structure());
        let and = Command::connect(Command::simple(&["a"]), Connector::And, Some(Command::simple(&["b"])));
        assert!(and.is_control_structure());
    }
}
