//! Decoder command line.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while splitting a command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandLineError {
    /// Nothing to run.
    #[error("command line is empty")]
    Empty,

    /// A quote was opened but never closed.
    #[error("unterminated {0} quote in command line")]
    UnterminatedQuote(char),

    /// The command line ends in a lone backslash.
    #[error("command line ends with a dangling backslash")]
    TrailingBackslash,
}

/// A program and its arguments, split the way a POSIX shell would split them
/// (without any expansion).
///
/// # Example
///
/// ```
/// use ws90_exporter::source::CommandLine;
///
/// let cmd: CommandLine = r#"rtl_433 -F json -M "time:iso" "#.parse().unwrap();
/// assert_eq!(cmd.program(), "rtl_433");
/// assert_eq!(cmd.args(), ["-F", "json", "-M", "time:iso"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Build from already separated parts.
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split `line` into words.
    ///
    /// Whitespace separates words. Single quotes keep everything literally.
    /// Double quotes group words and honour `\"`, `\\`, `` \` `` and `\$`.
    /// Outside quotes a backslash escapes the next character.
    pub fn parse(line: &str) -> Result<Self, CommandLineError> {
        let mut words = split(line)?.into_iter();
        let program = words.next().ok_or(CommandLineError::Empty)?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Program to execute.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl FromStr for CommandLine {
    type Err = CommandLineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Bare,
    Single,
    Double,
}

fn split(line: &str) -> Result<Vec<String>, CommandLineError> {
    let mut words = Vec::new();
    let mut word = String::new();
    // Distinguishes `""` (an empty argument) from no word at all.
    let mut in_word = false;
    let mut mode = Mode::Bare;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Bare => match c {
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                '\'' => {
                    mode = Mode::Single;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::Double;
                    in_word = true;
                }
                '\\' => {
                    let escaped = chars.next().ok_or(CommandLineError::TrailingBackslash)?;
                    word.push(escaped);
                    in_word = true;
                }
                c => {
                    word.push(c);
                    in_word = true;
                }
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Bare,
                c => word.push(c),
            },
            Mode::Double => match c {
                '"' => mode = Mode::Bare,
                '\\' => match chars.next() {
                    Some(e @ ('"' | '\\' | '`' | '$')) => word.push(e),
                    Some(other) => {
                        word.push('\\');
                        word.push(other);
                    }
                    None => return Err(CommandLineError::UnterminatedQuote('"')),
                },
                c => word.push(c),
            },
        }
    }

    match mode {
        Mode::Single => Err(CommandLineError::UnterminatedQuote('\'')),
        Mode::Double => Err(CommandLineError::UnterminatedQuote('"')),
        Mode::Bare => {
            if in_word {
                words.push(word);
            }
            Ok(words)
        }
    }
}

fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        split(line).unwrap()
    }

    #[test]
    fn splits_default_command() {
        let cmd = CommandLine::parse("rtl_433 -Y minmax -f 868.3M -F json").unwrap();
        assert_eq!(cmd.program(), "rtl_433");
        assert_eq!(cmd.args(), ["-Y", "minmax", "-f", "868.3M", "-F", "json"]);
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(words("  a \t b\n c  "), ["a", "b", "c"]);
    }

    #[test]
    fn quotes_group_words() {
        assert_eq!(words(r#"sh -c 'echo "hi there"'"#), ["sh", "-c", r#"echo "hi there""#]);
        assert_eq!(words(r#"a "b c" d"#), ["a", "b c", "d"]);
        assert_eq!(words(r#"pre"fix"'ed'"#), ["prefixed"]);
    }

    #[test]
    fn empty_quotes_are_an_argument() {
        assert_eq!(words(r#"cmd "" ''"#), ["cmd", "", ""]);
    }

    #[test]
    fn backslash_escapes() {
        assert_eq!(words(r"a\ b"), ["a b"]);
        assert_eq!(words(r#""say \"hi\"""#), [r#"say "hi""#]);
        assert_eq!(words(r#""keep \n""#), [r"keep \n"]);
        assert_eq!(words(r"'no \escape'"), [r"no \escape"]);
    }

    #[test]
    fn errors() {
        assert_eq!(CommandLine::parse(""), Err(CommandLineError::Empty));
        assert_eq!(CommandLine::parse("   "), Err(CommandLineError::Empty));
        assert_eq!(
            CommandLine::parse("rtl_433 'oops"),
            Err(CommandLineError::UnterminatedQuote('\''))
        );
        assert_eq!(
            CommandLine::parse(r#"rtl_433 "oops"#),
            Err(CommandLineError::UnterminatedQuote('"'))
        );
        assert_eq!(
            CommandLine::parse(r"rtl_433 \"),
            Err(CommandLineError::TrailingBackslash)
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let cmd = CommandLine::new("sh", ["-c", "echo 'it''s' \"x\"", ""]);
        let shown = cmd.to_string();
        assert_eq!(CommandLine::parse(&shown).unwrap(), cmd);

        let plain = CommandLine::parse("rtl_433 -f 868.3M -F json").unwrap();
        assert_eq!(plain.to_string(), "rtl_433 -f 868.3M -F json");
    }
}
