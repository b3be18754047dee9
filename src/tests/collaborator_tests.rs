use std::cell::RefCell;
use std::rc::Rc;

use nix::unistd::Pid;
use tempfile::NamedTempFile;

use super::{in_forked_shell, read};
use crate::ast::{ArithCommand, Command, CommandKind};
use crate::eval::{Evaluator, StdEvaluator};
use crate::expand::{Expander, StdExpander};
use crate::jobs::{JobControl, JobTable};
use crate::lexer::lex;
use crate::parser::parse;
use crate::shell::Shell;
use crate::types::{ExitStatus, ShellError};
use crate::word::Word;

/// Job table that also remembers the size of every pipeline handed to it.
struct Recording {
    inner: JobTable,
    sizes: Rc<RefCell<Vec<(usize, bool)>>>,
}

impl JobControl for Recording {
    fn register_pipeline(&mut self, pids: &[Pid], background: bool) {
        self.sizes.borrow_mut().push((pids.len(), background));
        self.inner.register_pipeline(pids, background);
    }

    fn wait_for(&mut self, pid: Pid) -> Result<ExitStatus, ShellError> {
        self.inner.wait_for(pid)
    }

    fn stop_current_pipeline(&mut self) {
        self.inner.stop_current_pipeline();
    }

    fn forget_jobs(&mut self) {
        self.inner.forget_jobs();
    }

    fn reap(&mut self) {
        self.inner.reap();
    }

    fn last_statuses(&self) -> &[ExitStatus] {
        self.inner.last_statuses()
    }
}

/// Upper-cases every argument after the command name.
struct Shouting;

impl Expander for Shouting {
    fn expand_words(&self, shell: &Shell, words: &[Word]) -> Result<Vec<String>, ShellError> {
        let words = StdExpander.expand_words(shell, words)?;
        Ok(words
            .into_iter()
            .enumerate()
            .map(|(i, w)| if i == 0 { w } else { w.to_uppercase() })
            .collect())
    }

    fn expand_string(&self, shell: &Shell, word: &Word) -> Result<String, ShellError> {
        StdExpander.expand_string(shell, word)
    }

    fn expand_pattern(&self, shell: &Shell, word: &Word) -> Result<String, ShellError> {
        StdExpander.expand_pattern(shell, word)
    }

    fn expand_here_document(&self, shell: &Shell, body: &str) -> Result<String, ShellError> {
        StdExpander.expand_here_document(shell, body)
    }
}

/// Every arithmetic expression is zero.
struct Zero;

impl Evaluator for Zero {
    fn arith(&self, _shell: &mut Shell, _expr: &str) -> Result<i64, ShellError> {
        Ok(0)
    }

    fn unary_test(&self, shell: &Shell, op: &str, arg: &str) -> Result<bool, ShellError> {
        StdEvaluator.unary_test(shell, op, arg)
    }

    fn binary_test(&self, shell: &mut Shell, op: &str, left: &str, right: &str) -> Result<bool, ShellError> {
        StdEvaluator.binary_test(shell, op, left, right)
    }
}

#[test]
fn test_injected_job_control_sees_each_pipeline() {
    let tree = parse(&lex("true | true | true\ntrue &\n(true)")).unwrap();
    let status = in_forked_shell(move |_| {
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let mut shell = Shell::new().with_job_control(Box::new(Recording {
            inner: JobTable::new(),
            sizes: Rc::clone(&sizes),
        }));
        shell.execute_top_level(&tree);
        let seen = sizes.borrow().clone();
        ExitStatus::from_bool(seen == [(3, false), (1, true), (1, false)])
    });
    assert_eq!(status, ExitStatus::SUCCESS);
}

#[test]
fn test_injected_expander_and_evaluator() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();

    let tree = parse(&lex(&format!("echo quiet > {}", path))).unwrap();
    in_forked_shell(move |_| {
        let mut shell = Shell::new().with_expander(Rc::new(Shouting));
        shell.execute_top_level(&tree)
    });
    assert_eq!(read(temp_file.path()), "QUIET\n");

    let arith = Command::new(CommandKind::Arith(ArithCommand {
        expression: vec![Word::from("6 * 7")],
    }));
    let status = in_forked_shell(move |_| {
        let mut shell = Shell::new().with_evaluator(Rc::new(Zero));
        shell.execute_top_level(&arith)
    });
    assert_eq!(status, ExitStatus::FAILURE);
}
