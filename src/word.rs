use std::fmt;

/// One lexical piece of an unexpanded word. Quoting is kept so the expander
/// knows which characters are subject to splitting and globbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    Simple(String),
    SingleQuoted(String),
    DoubleQuoted(String),
    Escaped(char),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    parts: Vec<WordPart>,
}

impl Word {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// A word that expands to exactly `text`, whatever it contains.
    pub fn literal(text: &str) -> Self {
        Self {
            parts: vec![WordPart::SingleQuoted(text.to_string())],
        }
    }

    pub fn add_part(&mut self, part: WordPart) {
        self.parts.push(part);
    }

    pub fn parts(&self) -> &[WordPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// True when any part was quoted or escaped in the source.
    pub fn is_quoted(&self) -> bool {
        self.parts.iter().any(|p| !matches!(p, WordPart::Simple(_)))
    }

    /// The word with quotes removed and nothing expanded.
    pub fn unquoted(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                WordPart::Simple(s) => s.clone(),
                WordPart::SingleQuoted(s) => s.clone(),
                WordPart::DoubleQuoted(s) => {
                    let mut result = String::new();
                    let mut chars = s.chars().peekable();
                    while let Some(c) = chars.next() {
                        match c {
                            '\\' => match chars.peek() {
                                Some(&next @ ('"' | '\\' | '$' | '`')) => {
                                    chars.next();
                                    result.push(next);
                                }
                                _ => result.push(c),
                            },
                            _ => result.push(c),
                        }
                    }
                    result
                }
                WordPart::Escaped(c) => c.to_string(),
            })
            .collect()
    }

    /// If the whole word is an unquoted `name=value`, the name and the rest of
    /// the word as the value.
    pub fn split_assignment(&self) -> Option<(String, Word)> {
        let WordPart::Simple(first) = self.parts.first()? else {
            return None;
        };
        let eq = first.find('=')?;
        let name = &first[..eq];
        if !crate::vars::is_identifier(name) {
            return None;
        }
        let mut value = Word::new();
        let rest = &first[eq + 1..];
        if !rest.is_empty() {
            value.add_part(WordPart::Simple(rest.to_string()));
        }
        for part in &self.parts[1..] {
            value.add_part(part.clone());
        }
        Some((name.to_string(), value))
    }

    pub fn push_str(&mut self, s: &str) {
        if let Some(WordPart::Simple(last)) = self.parts.last_mut() {
            last.push_str(s);
        } else {
            self.add_part(WordPart::Simple(s.to_string()));
        }
    }
}

impl From<&str> for Word {
    fn from(s: &str) -> Self {
        let mut word = Word::new();
        word.push_str(s);
        word
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                WordPart::Simple(s) => write!(f, "{}", s)?,
                WordPart::SingleQuoted(s) => write!(f, "'{}'", s)?,
                WordPart::DoubleQuoted(s) => write!(f, "\"{}\"", s)?,
                WordPart::Escaped(c) => write!(f, "\\{}", c)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquoted_handles_double_quote_escapes() {
        let mut word = Word::new();
        word.add_part(WordPart::DoubleQuoted(r#"a\"b\\c\d"#.to_string()));
        assert_eq!(word.unquoted(), r#"a"b\c\d"#);
    }

    #[test]
    fn assignment_split() {
        let (name, value) = Word::from("x=1").split_assignment().unwrap();
        assert_eq!(name, "x");
        assert_eq!(value.unquoted(), "1");
        assert!(Word::from("1x=1").split_assignment().is_none());
        assert!(Word::literal("x=1").split_assignment().is_none());
    }
}
