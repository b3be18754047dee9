use std::rc::Rc;

use nix::sys::stat::fstat;
use tempfile::NamedTempFile;

use super::{in_forked_shell, read, run};
use crate::ast::{
    ArithCommand, Command, CommandKind, CondExpr, Connector, RedirInstruction, Redirection, SelectCommand,
};
use crate::lexer::lex;
use crate::parser::parse;
use crate::shell::{TrapAction, TrapCondition};
use crate::types::ExitStatus;
use crate::word::Word;

fn seq(first: Command, second: Command) -> Command {
    Command::connect(first, Connector::Sequence, Some(second))
}

fn equals(left: &str, right: &str) -> Command {
    Command::new(CommandKind::Cond(CondExpr::Binary {
        op: "==".to_string(),
        left: Word::from(left),
        right: Word::from(right),
    }))
}

fn arith(expression: &str) -> Command {
    Command::new(CommandKind::Arith(ArithCommand {
        expression: vec![Word::from(expression)],
    }))
}

fn append_to(cmd: Command, path: &str) -> Command {
    cmd.with_redirect(Redirection::to_file(1, RedirInstruction::Append, path))
}

fn run_tree(tree: Command) -> ExitStatus {
    in_forked_shell(move |shell| shell.execute_top_level(&tree))
}

#[test]
fn test_and_or_lists() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("{{ false && echo A || echo B; }} > {}", path));
    assert_eq!(read(temp_file.path()), "B\n");

    run(&format!("{{ true && echo A || echo B; }} > {}", path));
    assert_eq!(read(temp_file.path()), "A\n");
}

#[test]
fn test_for_loop_break() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let body = seq(
        append_to(Command::simple(&["echo", "$x"]), path),
        Command::if_then(equals("$x", "b"), Some(Command::simple(&["break"])), None),
    );
    let words = ["a", "b", "c"].iter().map(|w| Word::from(*w)).collect();
    let status = run_tree(Command::for_loop("x", Some(words), body));
    assert_eq!(status, ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "a\nb\n");
}

#[test]
fn test_nested_loops_continue_outer() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let inner_body = seq(
        Command::if_then(equals("$j", "y"), Some(Command::simple(&["continue", "2"])), None),
        append_to(Command::simple(&["echo", "$i$j"]), path),
    );
    let inner = Command::for_loop("j", Some(vec![Word::from("x"), Word::from("y"), Word::from("z")]), inner_body);
    let outer = Command::for_loop("i", Some(vec![Word::from("1"), Word::from("2")]), inner);
    assert_eq!(run_tree(outer), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "1x\n2x\n");
}

#[test]
fn test_while_loop_with_arithmetic() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let body = seq(arith("i++"), append_to(Command::simple(&["echo", "$i"]), path));
    assert_eq!(run_tree(Command::while_loop(arith("i < 3"), body)), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "1\n2\n3\n");

    let until = Command::until_loop(arith("i == 0"), seq(arith("i--"), Command::simple(&["true"])));
    assert_eq!(run_tree(until), ExitStatus::SUCCESS);
}

#[test]
fn test_select_reads_reply() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let body = seq(
        append_to(Command::simple(&["echo", "$REPLY:$choice"]), path),
        Command::simple(&["break"]),
    );
    let select = Command::new(CommandKind::Select(SelectCommand {
        name: "choice".to_string(),
        words: Some(vec![Word::from("a"), Word::from("b"), Word::from("c")]),
        body: Box::new(body),
    }))
    .with_redirect(Redirection::to_file(0, RedirInstruction::HereString, "2"))
    .with_redirect(Redirection::to_file(2, RedirInstruction::Output, "/dev/null"));
    assert_eq!(run_tree(select), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "2:b\n");
}

#[test]
fn test_function_return() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("f() {{ return 3; echo no; }}; f; echo $? > {}", path));
    assert_eq!(read(temp_file.path()), "3\n");

    run(&format!("f() {{ local v=inner; echo $1-$v; }}; v=outer; f arg > {}; echo $v >> {}", path, path));
    assert_eq!(read(temp_file.path()), "arg-inner\nouter\n");
}

#[test]
fn test_subshell_isolation() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    assert_eq!(run("(exit 5)"), ExitStatus(5));
    run(&format!("(exit 3); echo $? > {}", path));
    assert_eq!(read(temp_file.path()), "3\n");

    run(&format!("X=parent; (X=child; cd /); echo $X > {}", path));
    assert_eq!(read(temp_file.path()), "parent\n");
}

#[test]
fn test_exit_stops_the_shell() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    assert_eq!(run(&format!("echo a > {}; exit 4; echo b >> {}", path, path)), ExitStatus(4));
    assert_eq!(read(temp_file.path()), "a\n");
}

#[test]
fn test_errexit() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    assert_eq!(run(&format!("set -e; false; echo no > {}", path)), ExitStatus::FAILURE);
    assert_eq!(read(temp_file.path()), "");

    assert_eq!(
        run(&format!("set -e; false || true; ! false; false && true; echo yes > {}", path)),
        ExitStatus::SUCCESS
    );
    assert_eq!(read(temp_file.path()), "yes\n");
}

#[test]
fn test_command_not_found_handler() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let script = format!(
        "command_not_found_handle() {{ echo \"missing $1\" > {}; return 9; }}; nosuchcmd-shexec",
        path
    );
    assert_eq!(run(&script), ExitStatus(9));
    assert_eq!(read(temp_file.path()), "missing nosuchcmd-shexec\n");
    assert_eq!(run("nosuchcmd-shexec 2>/dev/null"), ExitStatus::NOT_FOUND);
}

#[test]
fn test_assignment_prefixes_reach_only_the_child() {
    let env_out = NamedTempFile::new().unwrap();
    let echo_out = NamedTempFile::new().unwrap();
    run(&format!(
        "GREETING=hi env > {}; echo \"[$GREETING]\" > {}",
        env_out.path().display(),
        echo_out.path().display()
    ));
    assert!(read(env_out.path()).lines().any(|line| line == "GREETING=hi"));
    assert_eq!(read(echo_out.path()), "[]\n");
}

#[test]
fn test_background_sets_last_async_pid() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("true & echo $! > {}", path));
    let pid: i32 = read(temp_file.path()).trim().parse().unwrap();
    assert!(pid > 0);
}

#[test]
fn test_xtrace_and_time_report_on_stderr() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("exec 2> {}; set -x; echo 'a b' > /dev/null", path));
    assert!(read(temp_file.path()).contains("+ echo 'a b'"));

    run(&format!("exec 2> {}; TIMEFORMAT='%0R real'; time true", path));
    assert_eq!(read(temp_file.path()), "0 real\n");
}

#[test]
fn test_exit_trap_not_inherited_by_subshell() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();

    let tree = parse(&lex(&format!("(echo sub >> {})", path))).unwrap();
    let handler = append_to(Command::simple(&["echo", "bye"]), &path);
    let status = in_forked_shell(move |shell| {
        shell.traps.set(TrapCondition::Exit, TrapAction::Run(Rc::new(handler)));
        let status = shell.execute_top_level(&tree);
        shell.run_exit_trap();
        status
    });
    assert_eq!(status, ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "sub\nbye\n");
}

#[test]
fn test_builtin_leaves_descriptors_as_found() {
    let tree = parse(&lex("echo hi > /dev/null 2>&1; : 47</dev/null")).unwrap();
    let status = in_forked_shell(move |shell| {
        let before = (fstat(1).ok().map(|s| (s.st_dev, s.st_ino)), fstat(2).ok().map(|s| (s.st_dev, s.st_ino)));
        shell.execute_top_level(&tree);
        let after = (fstat(1).ok().map(|s| (s.st_dev, s.st_ino)), fstat(2).ok().map(|s| (s.st_dev, s.st_ino)));
        ExitStatus::from_bool(before == after && fstat(47).is_err())
    });
    assert_eq!(status, ExitStatus::SUCCESS);
}

#[test]
fn test_trap_builtin_installs_exit_and_err_traps() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let script = format!(
        "trap 'echo failed >> {p}' ERR; trap 'echo bye >> {p}' EXIT; false; echo body >> {p}",
        p = path
    );
    assert_eq!(run(&script), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "failed\nbody\nbye\n");
}

#[test]
fn test_errexit_suspended_inside_function_used_as_condition() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let script = format!(
        "set -e; f() {{ false; echo after >> {p}; }}; f || echo x >> {p}; echo end >> {p}",
        p = path
    );
    assert_eq!(run(&script), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "after\nend\n");

    // Called on its own the same function still stops the shell.
    let plain_call = NamedTempFile::new().unwrap();
    let script = format!(
        "set -e; f() {{ false; echo after >> {p}; }}; f; echo end >> {p}",
        p = plain_call.path().display()
    );
    assert_eq!(run(&script), ExitStatus::FAILURE);
    assert_eq!(read(plain_call.path()), "");
}

#[test]
fn test_errexit_on_compound_redirection_failure() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let script = format!(
        "exec 2>/dev/null; set -e; {{ true; }} > /nonexistent-shexec/dir/x; echo after >> {}",
        path
    );
    assert_eq!(run(&script), ExitStatus::FAILURE);
    assert_eq!(read(temp_file.path()), "");

    let script = format!(
        "exec 2>/dev/null; set -e; ! {{ true; }} > /nonexistent-shexec/dir/x; echo after >> {}",
        path
    );
    assert_eq!(run(&script), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "after\n");
}

#[test]
fn test_err_trap_skips_inverted_pipelines() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    let script = format!(
        "trap 'echo ERR >> {p}' ERR; ! true | false; echo end >> {p}; false",
        p = path
    );
    run(&script);
    assert_eq!(read(temp_file.path()), "end\nERR\n");
}
