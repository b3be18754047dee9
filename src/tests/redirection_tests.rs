use std::fs;

use tempfile::NamedTempFile;

use super::{read, run};
use crate::types::ExitStatus;

#[test]
fn test_basic_redirection() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    // Test output redirection
    run(&format!("echo hello > {}", path));
    assert_eq!(read(temp_file.path()).trim(), "hello");

    // Input redirection feeds a program
    let temp_file2 = NamedTempFile::new().unwrap();
    let path2 = temp_file2.path().to_str().unwrap();
    run(&format!("tr a-z A-Z < {} > {}", path, path2));
    assert_eq!(read(temp_file2.path()).trim(), "HELLO");
}

#[test]
fn test_stdout_redirection() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    // Redirection with spaces
    run(&format!("echo    hello    >     {}", path));
    assert_eq!(read(temp_file.path()).trim(), "hello");

    // Multiple redirections (last one wins, both are created)
    let temp_file2 = NamedTempFile::new().unwrap();
    let path2 = temp_file2.path().to_str().unwrap();
    run(&format!("echo hello > {} > {}", path, path2));
    assert_eq!(read(temp_file.path()), "");
    assert_eq!(read(temp_file2.path()).trim(), "hello");
}

#[test]
fn test_append_mode() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("echo first > {}", path));
    run(&format!("echo second >> {}", path));
    // Append with stderr
    run(&format!("ls /nonexistent 2>> {}", path));

    let content = read(temp_file.path());
    assert!(content.starts_with("first\nsecond\n"));
    assert!(content.contains("No such file"));
}

#[test]
fn test_file_descriptor_duplication() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    // Redirect both stdout and stderr to the same file
    run(&format!("ls /nonexistent > {} 2>&1", path));
    assert!(read(temp_file.path()).contains("No such file or directory"));

    run(&format!("ls /nonexistent &> {}", path));
    assert!(read(temp_file.path()).contains("No such file or directory"));
}

#[test]
fn test_here_document() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("cat << EOF > {}\nline1\nline2\nEOF", path));
    assert_eq!(read(temp_file.path()), "line1\nline2\n");

    run(&format!("NAME=world; cat <<EOF > {}\nhello $NAME\nEOF", path));
    assert_eq!(read(temp_file.path()), "hello world\n");

    run(&format!("NAME=world; cat <<'EOF' > {}\nhello $NAME\nEOF", path));
    assert_eq!(read(temp_file.path()), "hello $NAME\n");

    run(&format!("NAME=there; cat <<< \"hi $NAME\" > {}", path));
    assert_eq!(read(temp_file.path()), "hi there\n");
}

#[test]
fn test_builtin_redirections_are_undone() {
    let inner = NamedTempFile::new().unwrap();
    let outer = NamedTempFile::new().unwrap();
    let script = format!(
        "{{ echo one > {}; echo two; }} > {}",
        inner.path().display(),
        outer.path().display()
    );
    assert_eq!(run(&script), ExitStatus::SUCCESS);
    assert_eq!(read(inner.path()), "one\n");
    assert_eq!(read(outer.path()), "two\n");
}

#[test]
fn test_exec_keeps_redirections() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    run(&format!("exec > {}; echo persisted; echo again", path));
    assert_eq!(read(temp_file.path()), "persisted\nagain\n");

    run(&format!("exec 4> {}; echo via4 >&4; exec 4>&-; echo gone >&4", path));
    assert_eq!(read(temp_file.path()), "via4\n");
}

#[test]
fn test_noclobber() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();
    fs::write(temp_file.path(), "keep\n").unwrap();

    assert_eq!(run(&format!("set -C; echo lost > {} 2>/dev/null", path)), ExitStatus::FAILURE);
    assert_eq!(read(temp_file.path()), "keep\n");

    assert_eq!(run(&format!("set -C; echo forced >| {}", path)), ExitStatus::SUCCESS);
    assert_eq!(read(temp_file.path()), "forced\n");
}

#[test]
fn test_redirection_errors() {
    // Permission denied (try to write to /dev/null/file)
    assert_eq!(run("echo hello > /dev/null/file 2>/dev/null"), ExitStatus::FAILURE);

    // Duplicating a descriptor that is not open
    assert_eq!(run("exec 2>/dev/null; echo hello >&57"), ExitStatus::FAILURE);

    // A target expanding to two words
    assert_eq!(run("exec 2>/dev/null; X='a b'; echo hello > $X"), ExitStatus::FAILURE);

    // A failed redirection skips the command but not the rest of the line
    assert_eq!(run("cat < /nonexistent-shexec 2>/dev/null; true"), ExitStatus::SUCCESS);
}
