use std::fs;
use std::path::{Path, PathBuf};

use rustyline::completion::{Completer as RustylineCompleter, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper, Result};

use crate::shell::Shell;
use crate::utils::is_executable;

/// Tab completion for the interactive loop: command names in the first
/// word, file names after it.
pub struct Completer {
    commands: Vec<String>,
}

impl Completer {
    /// Snapshot of the builtins, functions and `PATH` programs `shell` can
    /// run right now.
    pub fn for_shell(shell: &Shell) -> Self {
        let mut commands: Vec<String> = shell.registry.names().map(str::to_string).collect();
        if let Some(path) = shell.var("PATH") {
            commands.extend(path.split(':').flat_map(programs_in));
        }
        commands.sort();
        commands.dedup();
        Self { commands }
    }

    pub fn complete(&self, line: &str) -> Vec<String> {
        let first_word = !line.trim_end().contains(char::is_whitespace) && !line.ends_with(' ');
        let prefix = line.rsplit(char::is_whitespace).next().unwrap_or("");
        if first_word {
            self.commands
                .iter()
                .filter(|cmd| cmd.starts_with(prefix))
                .cloned()
                .collect()
        } else {
            complete_path(prefix)
        }
    }
}

fn programs_in(dir: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file() && is_executable(&entry.path()))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect()
}

fn complete_path(prefix: &str) -> Vec<String> {
    let (dir, stem) = match prefix.rfind('/') {
        Some(slash) => (PathBuf::from(&prefix[..=slash]), &prefix[slash + 1..]),
        None => (PathBuf::from("."), prefix),
    };
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };
    let shown = |name: &str| {
        if prefix.contains('/') {
            dir.join(name).to_string_lossy().into_owned()
        } else {
            name.to_string()
        }
    };
    let mut completions: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if !name.starts_with(stem) || (name.starts_with('.') && !stem.starts_with('.')) {
                return None;
            }
            let mut text = shown(&name);
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                text.push('/');
            }
            Some(text)
        })
        .collect();
    completions.sort();
    completions
}

impl Helper for Completer {}

impl RustylineCompleter for Completer {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>)> {
        let start = line[..pos].rfind(char::is_whitespace).map_or(0, |i| i + 1);
        let pairs = self
            .complete(&line[..pos])
            .into_iter()
            .map(|text| {
                let display = Path::new(text.trim_end_matches('/'))
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| text.clone());
                Pair {
                    display,
                    replacement: text,
                }
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Highlighter for Completer {}

impl Hinter for Completer {
    type Hint = String;
}

impl Validator for Completer {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn first_word_completes_builtins_and_functions() {
        let mut shell = Shell::new();
        shell.vars.set("PATH", "").unwrap();
        shell
            .registry
            .bind_function("greet", std::rc::Rc::new(crate::ast::Command::simple(&["echo"])));
        let completer = Completer::for_shell(&shell);
        assert_eq!(completer.complete("ex"), ["exec", "exit", "export"]);
        assert_eq!(completer.complete("gr"), ["greet"]);
    }

    #[test]
    fn later_words_complete_paths() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        let completer = Completer { commands: Vec::new() };
        let base = dir.path().to_string_lossy();
        let got = completer.complete(&format!("cat {}/n", base));
        assert_eq!(got, [format!("{}/nested/", base), format!("{}/notes.txt", base)]);
    }
}
