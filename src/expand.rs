//! Word expansion as seen by the engine: argv building, redirection
//! targets, case patterns and here-document bodies.

use std::iter::Peekable;
use std::str::Chars;

use glob::{glob_with, MatchOptions, Pattern};

use crate::shell::Shell;
use crate::types::ShellError;
use crate::word::{Word, WordPart};

pub trait Expander {
    /// Full expansion with field splitting and pathname expansion.
    fn expand_words(&self, shell: &Shell, words: &[Word]) -> Result<Vec<String>, ShellError>;

    /// Expansion to a single string: no splitting, no globbing.
    fn expand_string(&self, shell: &Shell, word: &Word) -> Result<String, ShellError>;

    /// Like [`Expander::expand_string`] but quoted characters come back
    /// escaped so they match literally.
    fn expand_pattern(&self, shell: &Shell, word: &Word) -> Result<String, ShellError>;

    /// Parameter expansion over raw here-document text.
    fn expand_here_document(&self, shell: &Shell, body: &str) -> Result<String, ShellError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdExpander;

pub(crate) fn pattern_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

/// Shell pattern match; an invalid pattern only matches itself.
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(text, pattern_options()),
        Err(_) => pattern == text,
    }
}

#[derive(Debug, Default)]
struct Field {
    text: String,
    pattern: String,
    has_glob: bool,
    quoted: bool,
}

impl Field {
    fn push_literal(&mut self, s: &str) {
        self.text.push_str(s);
        self.pattern.push_str(&Pattern::escape(s));
    }

    fn push_unquoted(&mut self, s: &str) {
        self.text.push_str(s);
        self.pattern.push_str(s);
        if s.contains(['*', '?', '[']) {
            self.has_glob = true;
        }
    }
}

struct FieldBuilder<'a> {
    ifs: &'a str,
    fields: Vec<Field>,
}

impl<'a> FieldBuilder<'a> {
    fn new(ifs: &'a str) -> Self {
        Self {
            ifs,
            fields: vec![Field::default()],
        }
    }

    fn current(&mut self) -> &mut Field {
        if self.fields.is_empty() {
            self.fields.push(Field::default());
        }
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    fn start_field(&mut self) {
        self.fields.push(Field::default());
    }

    /// Text produced by an unquoted expansion: subject to splitting.
    fn push_split(&mut self, value: &str) {
        let mut pending_break = false;
        let mut piece = String::new();
        for c in value.chars() {
            if self.ifs.contains(c) {
                if !piece.is_empty() {
                    if pending_break {
                        self.start_field();
                    }
                    self.current().push_unquoted(&piece);
                    piece.clear();
                    pending_break = false;
                }
                pending_break = true;
                if !c.is_whitespace() {
                    // A non-whitespace separator delimits even empty fields.
                    self.start_field();
                    pending_break = false;
                }
            } else {
                piece.push(c);
            }
        }
        if !piece.is_empty() {
            if pending_break {
                self.start_field();
            }
            self.current().push_unquoted(&piece);
        } else if pending_break {
            self.start_field();
        }
    }

    fn finish(self) -> Vec<Field> {
        self.fields
            .into_iter()
            .filter(|f| f.quoted || !f.text.is_empty())
            .collect()
    }
}

/// Reads the parameter name after a `$`, consuming it. `None` when the `$`
/// is literal.
fn read_parameter(chars: &mut Peekable<Chars<'_>>) -> Option<Parameter> {
    match chars.peek().copied()? {
        '{' => {
            chars.next();
            let mut inner = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                inner.push(c);
            }
            Some(Parameter::braced(&inner))
        }
        c @ ('?' | '$' | '!' | '#' | '@' | '*' | '0'..='9' | '-') => {
            chars.next();
            Some(Parameter::plain(c.to_string()))
        }
        c if c == '_' || c.is_ascii_alphabetic() => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '_' || c.is_ascii_alphanumeric() {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            Some(Parameter::plain(name))
        }
        _ => None,
    }
}

#[derive(Debug)]
struct Parameter {
    name: String,
    /// `${name:-word}` (colon) or `${name-word}`.
    default: Option<(bool, String)>,
}

impl Parameter {
    fn plain(name: String) -> Self {
        Self { name, default: None }
    }

    fn braced(inner: &str) -> Self {
        if let Some(pos) = inner.find(":-") {
            return Self {
                name: inner[..pos].to_string(),
                default: Some((true, inner[pos + 2..].to_string())),
            };
        }
        match inner.find('-') {
            Some(pos) if pos > 0 => Self {
                name: inner[..pos].to_string(),
                default: Some((false, inner[pos + 1..].to_string())),
            },
            _ => Self::plain(inner.to_string()),
        }
    }

    fn is_all_positional(&self) -> bool {
        self.name == "@"
    }

    fn lookup(&self, shell: &Shell) -> Option<String> {
        let value = match self.name.as_str() {
            "?" => Some(shell.last_status.to_string()),
            "$" => Some(shell.shell_pid().to_string()),
            "!" => shell.last_async_pid.map(|p| p.to_string()),
            "#" => Some(shell.vars.positional().len().to_string()),
            "@" | "*" => Some(shell.vars.positional().join(" ")),
            "-" => Some(option_letters(shell)),
            "0" => Some(shell.name.clone()),
            name if name.chars().all(|c| c.is_ascii_digit()) => name
                .parse::<usize>()
                .ok()
                .and_then(|n| shell.vars.positional().get(n - 1).cloned()),
            name => shell.vars.get(name).map(str::to_string),
        };
        match (&self.default, value) {
            (Some((true, default)), Some(v)) if v.is_empty() => Some(default.clone()),
            (Some(_), None) => self.default.as_ref().map(|(_, d)| d.clone()),
            (_, value) => value,
        }
    }
}

fn option_letters(shell: &Shell) -> String {
    let o = &shell.options;
    [
        (o.errexit, 'e'),
        (o.noclobber, 'C'),
        (o.noexec, 'n'),
        (o.xtrace, 'x'),
        (o.interactive, 'i'),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, c)| *c)
    .collect()
}

fn expand_tilde(shell: &Shell, text: &str) -> Option<String> {
    let rest = text.strip_prefix('~')?;
    let (prefix, tail) = match rest.find('/') {
        Some(pos) => rest.split_at(pos),
        None => (rest, ""),
    };
    let base = match prefix {
        "" => shell.vars.get("HOME")?.to_string(),
        "+" => shell.vars.get("PWD")?.to_string(),
        "-" => shell.vars.get("OLDPWD")?.to_string(),
        _ => return None,
    };
    Some(format!("{}{}", base, tail))
}

impl StdExpander {
    fn expand_fields(&self, shell: &Shell, word: &Word, split: bool) -> Result<Vec<Field>, ShellError> {
        let ifs = shell.vars.get("IFS").unwrap_or(" \t\n");
        let mut builder = FieldBuilder::new(ifs);
        for (index, part) in word.parts().iter().enumerate() {
            match part {
                WordPart::Simple(s) => {
                    let text = if index == 0 {
                        match expand_tilde(shell, s) {
                            Some(expanded) => {
                                builder.current().push_literal(&expanded);
                                let consumed = s.find('/').unwrap_or(s.len());
                                s[consumed..].to_string()
                            }
                            None => s.clone(),
                        }
                    } else {
                        s.clone()
                    };
                    self.expand_unquoted(shell, &text, split, &mut builder)?;
                }
                WordPart::SingleQuoted(s) => {
                    let field = builder.current();
                    field.quoted = true;
                    field.push_literal(s);
                }
                WordPart::Escaped(c) => {
                    let field = builder.current();
                    field.quoted = true;
                    field.push_literal(&c.to_string());
                }
                WordPart::DoubleQuoted(s) => {
                    // "$@" with no parameters produces no field at all.
                    if !(s == "$@" && shell.vars.positional().is_empty()) {
                        builder.current().quoted = true;
                    }
                    self.expand_double_quoted(shell, s, &mut builder)?;
                }
            }
        }
        Ok(builder.finish())
    }

    fn expand_unquoted(
        &self,
        shell: &Shell,
        text: &str,
        split: bool,
        builder: &mut FieldBuilder<'_>,
    ) -> Result<(), ShellError> {
        let mut chars = text.chars().peekable();
        let mut literal = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if !literal.is_empty() {
                        builder.current().push_unquoted(&literal);
                        literal.clear();
                    }
                    if let Some(next) = chars.next() {
                        builder.current().quoted = true;
                        builder.current().push_literal(&next.to_string());
                    }
                }
                '$' => match read_parameter(&mut chars) {
                    Some(param) => {
                        if !literal.is_empty() {
                            builder.current().push_unquoted(&literal);
                            literal.clear();
                        }
                        let value = param.lookup(shell).unwrap_or_default();
                        if split {
                            builder.push_split(&value);
                        } else {
                            builder.current().push_unquoted(&value);
                        }
                    }
                    None => literal.push('$'),
                },
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            builder.current().push_unquoted(&literal);
        }
        Ok(())
    }

    fn expand_double_quoted(
        &self,
        shell: &Shell,
        text: &str,
        builder: &mut FieldBuilder<'_>,
    ) -> Result<(), ShellError> {
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some(&next @ ('"' | '\\' | '$' | '`')) => {
                        chars.next();
                        builder.current().push_literal(&next.to_string());
                    }
                    _ => builder.current().push_literal("\\"),
                },
                '$' => match read_parameter(&mut chars) {
                    Some(param) if param.is_all_positional() => {
                        // "$@": one field per positional parameter.
                        let args = shell.vars.positional();
                        for (i, arg) in args.iter().enumerate() {
                            if i > 0 {
                                builder.start_field();
                                builder.current().quoted = true;
                            }
                            builder.current().push_literal(arg);
                        }
                    }
                    Some(param) => {
                        let value = param.lookup(shell).unwrap_or_default();
                        builder.current().push_literal(&value);
                    }
                    None => builder.current().push_literal("$"),
                },
                _ => builder.current().push_literal(&c.to_string()),
            }
        }
        Ok(())
    }

    fn glob_field(field: Field) -> Result<Vec<String>, ShellError> {
        if !field.has_glob {
            return Ok(vec![field.text]);
        }
        let paths = match glob_with(&field.pattern, pattern_options()) {
            Ok(paths) => paths,
            Err(_) => return Ok(vec![field.text]),
        };
        let mut matches: Vec<String> = paths
            .filter_map(Result::ok)
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if matches.is_empty() {
            return Ok(vec![field.text]);
        }
        matches.sort();
        Ok(matches)
    }
}

impl Expander for StdExpander {
    fn expand_words(&self, shell: &Shell, words: &[Word]) -> Result<Vec<String>, ShellError> {
        let mut out = Vec::new();
        for word in words {
            for field in self.expand_fields(shell, word, true)? {
                out.extend(Self::glob_field(field)?);
            }
        }
        Ok(out)
    }

    fn expand_string(&self, shell: &Shell, word: &Word) -> Result<String, ShellError> {
        let fields = self.expand_fields(shell, word, false)?;
        Ok(fields
            .into_iter()
            .map(|f| f.text)
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn expand_pattern(&self, shell: &Shell, word: &Word) -> Result<String, ShellError> {
        let fields = self.expand_fields(shell, word, false)?;
        Ok(fields
            .into_iter()
            .map(|f| f.pattern)
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn expand_here_document(&self, shell: &Shell, body: &str) -> Result<String, ShellError> {
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some(&next @ ('\\' | '$' | '`')) => {
                        chars.next();
                        out.push(next);
                    }
                    Some('\n') => {
                        chars.next();
                    }
                    _ => out.push('\\'),
                },
                '$' => match read_parameter(&mut chars) {
                    Some(param) => out.push_str(&param.lookup(shell).unwrap_or_default()),
                    None => out.push('$'),
                },
                _ => out.push(c),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> Shell {
        let mut shell = Shell::new();
        shell.vars.set("x", "a b").unwrap();
        shell.vars.set("HOME", "/home/me").unwrap();
        shell.vars.set_positional(vec!["one".into(), "two words".into()]);
        shell
    }

    fn word(parts: Vec<WordPart>) -> Word {
        let mut w = Word::new();
        for p in parts {
            w.add_part(p);
        }
        w
    }

    #[test]
    fn unquoted_expansion_splits() {
        let shell = shell();
        let out = StdExpander.expand_words(&shell, &[Word::from("$x")]).unwrap();
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn double_quotes_keep_one_field() {
        let shell = shell();
        let w = word(vec![WordPart::DoubleQuoted("$x".into())]);
        assert_eq!(StdExpander.expand_words(&shell, &[w]).unwrap(), vec!["a b"]);
    }

    #[test]
    fn quoted_at_yields_one_field_per_parameter() {
        let shell = shell();
        let w = word(vec![WordPart::DoubleQuoted("$@".into())]);
        assert_eq!(
            StdExpander.expand_words(&shell, &[w]).unwrap(),
            vec!["one", "two words"]
        );
    }

    #[test]
    fn empty_unquoted_expansion_vanishes() {
        let shell = shell();
        let out = StdExpander
            .expand_words(&shell, &[Word::from("$nothing"), Word::literal("")])
            .unwrap();
        assert_eq!(out, vec![""]);
    }

    #[test]
    fn tilde_and_defaults() {
        let shell = shell();
        assert_eq!(
            StdExpander.expand_string(&shell, &Word::from("~/bin")).unwrap(),
            "/home/me/bin"
        );
        assert_eq!(
            StdExpander.expand_string(&shell, &Word::from("${unset:-fallback}")).unwrap(),
            "fallback"
        );
        assert_eq!(StdExpander.expand_string(&shell, &Word::from("$#")).unwrap(), "2");
    }

    #[test]
    fn quoted_pattern_characters_are_escaped() {
        let shell = shell();
        let w = word(vec![WordPart::SingleQuoted("*".into()), WordPart::Simple("*".into())]);
        let pattern = StdExpander.expand_pattern(&shell, &w).unwrap();
        assert!(pattern_matches(&pattern, "*abc"));
        assert!(!pattern_matches(&pattern, "abc"));
    }

    #[test]
    fn here_document_expands_parameters_only() {
        let shell = shell();
        let body = "x is $x\n\"quoted\" \\$x\n";
        assert_eq!(
            StdExpander.expand_here_document(&shell, body).unwrap(),
            "x is a b\n\"quoted\" $x\n"
        );
    }
}
