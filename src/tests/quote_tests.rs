use tempfile::NamedTempFile;

use super::{read, run};
use crate::lexer::{lex, Token};
use crate::word::{Word, WordPart};

#[test]
fn test_quoting_rules() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    // Single quotes preserve everything literally
    run(&format!("echo '  $HOME  \"  \\n  \\t  ' > {}", path));
    assert_eq!(read(temp_file.path()).trim_end_matches('\n'), "  $HOME  \"  \\n  \\t  ");

    // Double quotes allow variable expansion and some escapes
    run(&format!("TESTVAR=value; echo \"$TESTVAR \\\"quoted\\\" \\$x\" > {}", path));
    assert_eq!(read(temp_file.path()).trim(), "value \"quoted\" $x");

    // Mixed quotes
    run(&format!("TESTVAR=value; echo '\"$TESTVAR\"' \"'literal'\" > {}", path));
    assert_eq!(read(temp_file.path()).trim(), "\"$TESTVAR\" 'literal'");
}

#[test]
fn test_escape_sequences() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap();

    // Escape special characters
    run(&format!("echo a\\ b\\>c > {}", path));
    assert_eq!(read(temp_file.path()).trim(), "a b>c");

    // Escape sequences in single quotes (preserved literally)
    run(&format!("echo '\\n\\t\\\\' > {}", path));
    assert_eq!(read(temp_file.path()).trim(), "\\n\\t\\\\");

    // Quoted words are not split
    run(&format!("X='a   b'; echo \"$X\" $X > {}", path));
    assert_eq!(read(temp_file.path()).trim(), "a   b a b");
}

#[test]
fn test_word_parts() {
    let tokens = lex("pre'single'\"double\"\\!post");
    let [Token::Word(word)] = tokens.as_slice() else {
        panic!("expected one word, got {:?}", tokens);
    };
    assert_eq!(
        word.parts(),
        [
            WordPart::Simple("pre".to_string()),
            WordPart::SingleQuoted("single".to_string()),
            WordPart::DoubleQuoted("double".to_string()),
            WordPart::Escaped('!'),
            WordPart::Simple("post".to_string()),
        ]
    );
    assert_eq!(word.unquoted(), "presingledouble!post");
    assert!(word.is_quoted());
    assert!(!Word::from("plain").is_quoted());
}

#[test]
fn test_comments_and_continuations() {
    let tokens = lex("echo a \\\n  b # trailing comment");
    let words: Vec<String> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Word(w) => Some(w.unquoted()),
            _ => None,
        })
        .collect();
    assert_eq!(words, ["echo", "a", "b"]);
}
