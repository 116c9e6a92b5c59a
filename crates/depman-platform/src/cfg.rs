use std::fmt;
use std::str::{self, FromStr};

use crate::error::{ParseError, ParseErrorKind};

/// A single atomic predicate inside a build-constraint expression, e.g. the
/// `unix` in `cfg(unix)` or the `target_os = "linux"` in
/// `cfg(target_os = "linux")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cfg {
    /// A bare identifier, e.g. `unix`, `test`, `windows`.
    Name(String),
    /// A key/value pair, e.g. `target_os = "macos"`.
    KeyPair(String, String),
}

impl FromStr for Cfg {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Cfg, ParseError> {
        let mut parts = s.splitn(2, '=');
        let name = parts.next().unwrap().trim();
        let value = match parts.next() {
            Some(value) => value,
            None => return Ok(Cfg::Name(name.to_string())),
        };
        let value = value.trim();
        if !value.starts_with('"') || !value.ends_with('"') {
            return Err(ParseError::new(s, ParseErrorKind::UnterminatedString));
        }
        Ok(Cfg::KeyPair(
            name.to_string(),
            value[1..value.len() - 1].to_string(),
        ))
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cfg::Name(s) => s.fmt(f),
            Cfg::KeyPair(k, v) => write!(f, "{k} = \"{v}\""),
        }
    }
}

/// A build-constraint expression, parsed from strings like
/// `cfg(any(target_os = "macos", all(unix, not(target_os = "linux"))))`.
///
/// This is the predicate language used by the package tree walker's
/// build-tag exclusions: a source file carries one of these, and it is kept
/// only if the expression is satisfiable by at least one platform in the
/// known platform table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgExpr {
    Not(Box<CfgExpr>),
    All(Vec<CfgExpr>),
    Any(Vec<CfgExpr>),
    Value(Cfg),
}

impl CfgExpr {
    /// Evaluate this expression against a fixed set of cfg atoms believed to
    /// hold true for one particular platform.
    pub fn matches(&self, cfgs: &[Cfg]) -> bool {
        match self {
            CfgExpr::Not(e) => !e.matches(cfgs),
            CfgExpr::All(e) => e.iter().all(|e| e.matches(cfgs)),
            CfgExpr::Any(e) => e.iter().any(|e| e.matches(cfgs)),
            CfgExpr::Value(e) => cfgs.contains(e),
        }
    }
}

impl FromStr for CfgExpr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<CfgExpr, ParseError> {
        let mut p = Parser::new(s);
        let e = p.expr()?;
        if p.tokens.next().is_some() {
            return Err(ParseError::new(
                s,
                ParseErrorKind::UnterminatedExpression(s.to_string()),
            ));
        }
        Ok(e)
    }
}

impl fmt::Display for CfgExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgExpr::Not(e) => write!(f, "not({e})"),
            CfgExpr::All(e) => write!(f, "all({})", CommaSep(e)),
            CfgExpr::Any(e) => write!(f, "any({})", CommaSep(e)),
            CfgExpr::Value(e) => write!(f, "{e}"),
        }
    }
}

struct CommaSep<'a, T>(&'a [T]);

impl<T: fmt::Display> fmt::Display for CommaSep<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Token<'a> {
    Ident(&'a str),
    Comma,
    Equals,
    LeftParen,
    RightParen,
    String(&'a str),
}

struct Tokenizer<'a> {
    s: &'a str,
    orig: &'a str,
}

struct Parser<'a> {
    tokens: std::iter::Peekable<Tokenizer<'a>>,
    orig: &'a str,
}

impl<'a> Parser<'a> {
    fn new(s: &'a str) -> Parser<'a> {
        Parser {
            tokens: Tokenizer { orig: s, s }.peekable(),
            orig: s,
        }
    }

    fn expr(&mut self) -> Result<CfgExpr, ParseError> {
        match self.tokens.peek() {
            Some(&Ok(Token::Ident(op @ "all"))) | Some(&Ok(Token::Ident(op @ "any"))) => {
                self.tokens.next();
                let mut e = Vec::new();
                self.eat(Token::LeftParen)?;
                while !self.r#try(Token::RightParen) {
                    e.push(self.expr()?);
                    if !self.r#try(Token::Comma) {
                        self.eat(Token::RightParen)?;
                        break;
                    }
                }
                if op == "all" {
                    Ok(CfgExpr::All(e))
                } else {
                    Ok(CfgExpr::Any(e))
                }
            }
            Some(&Ok(Token::Ident("not"))) => {
                self.tokens.next();
                self.eat(Token::LeftParen)?;
                let e = self.expr()?;
                self.eat(Token::RightParen)?;
                Ok(CfgExpr::Not(Box::new(e)))
            }
            Some(&Ok(..)) => self.cfg().map(CfgExpr::Value),
            Some(&Err(..)) => Err(self.tokens.next().unwrap().err().unwrap()),
            None => Err(ParseError::new(self.orig, ParseErrorKind::UnexpectedEof)),
        }
    }

    fn cfg(&mut self) -> Result<Cfg, ParseError> {
        match self.tokens.next() {
            Some(Ok(Token::Ident(name))) => {
                if self.r#try(Token::Equals) {
                    match self.tokens.next() {
                        Some(Ok(Token::String(s))) => Ok(Cfg::KeyPair(name.to_string(), s.to_string())),
                        Some(Ok(t)) => Err(ParseError::new(
                            self.orig,
                            ParseErrorKind::UnexpectedToken {
                                expected: "a string",
                                found: t.classify(),
                            },
                        )),
                        Some(Err(e)) => Err(e),
                        None => Err(ParseError::new(self.orig, ParseErrorKind::UnexpectedEof)),
                    }
                } else {
                    Ok(Cfg::Name(name.to_string()))
                }
            }
            Some(Ok(t)) => Err(ParseError::new(
                self.orig,
                ParseErrorKind::UnexpectedToken {
                    expected: "an identifier",
                    found: t.classify(),
                },
            )),
            Some(Err(e)) => Err(e),
            None => Err(ParseError::new(self.orig, ParseErrorKind::UnexpectedEof)),
        }
    }

    fn r#try(&mut self, token: Token<'a>) -> bool {
        match self.tokens.peek() {
            Some(&Ok(t)) if t == token => {}
            _ => return false,
        }
        self.tokens.next();
        true
    }

    fn eat(&mut self, token: Token<'a>) -> Result<(), ParseError> {
        if self.r#try(token) {
            Ok(())
        } else {
            match self.tokens.next() {
                Some(Ok(t)) => Err(ParseError::new(
                    self.orig,
                    ParseErrorKind::UnexpectedToken {
                        expected: token.classify(),
                        found: t.classify(),
                    },
                )),
                Some(Err(e)) => Err(e),
                None => Err(ParseError::new(self.orig, ParseErrorKind::UnexpectedEof)),
            }
        }
    }
}

impl<'a> Token<'a> {
    fn classify(&self) -> &'static str {
        match self {
            Token::Ident(..) => "an identifier",
            Token::Comma => "`,`",
            Token::Equals => "`=`",
            Token::LeftParen => "`(`",
            Token::RightParen => "`)`",
            Token::String(..) => "a string",
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>, ParseError>;

    fn next(&mut self) -> Option<Result<Token<'a>, ParseError>> {
        loop {
            if self.s.starts_with(' ') {
                self.s = &self.s[1..];
                continue;
            }
            if self.s.is_empty() {
                return None;
            }
            break;
        }
        let byte = self.s.as_bytes()[0];
        match byte {
            b'(' => {
                self.s = &self.s[1..];
                Some(Ok(Token::LeftParen))
            }
            b')' => {
                self.s = &self.s[1..];
                Some(Ok(Token::RightParen))
            }
            b',' => {
                self.s = &self.s[1..];
                Some(Ok(Token::Comma))
            }
            b'=' => {
                self.s = &self.s[1..];
                Some(Ok(Token::Equals))
            }
            b'"' => {
                let end = self.s[1..]
                    .find('"')
                    .map(|i| i + 2)
                    .unwrap_or(self.s.len());
                if end == self.s.len() {
                    self.s = "";
                    return Some(Err(ParseError::new(
                        self.orig,
                        ParseErrorKind::UnterminatedString,
                    )));
                }
                let s = &self.s[1..end - 1];
                self.s = &self.s[end..];
                Some(Ok(Token::String(s)))
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let end = self.s[1..]
                    .find(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
                    .map(|i| i + 1)
                    .unwrap_or(self.s.len());
                let ret = &self.s[..end];
                self.s = &self.s[end..];
                Some(Ok(Token::Ident(ret)))
            }
            c => Some(Err(ParseError::new(
                self.orig,
                ParseErrorKind::UnexpectedChar(c as char),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_name() {
        assert_eq!(Cfg::from_str("unix").unwrap(), Cfg::Name("unix".into()));
    }

    #[test]
    fn key_pair() {
        assert_eq!(
            Cfg::from_str("target_os = \"linux\"").unwrap(),
            Cfg::KeyPair("target_os".into(), "linux".into())
        );
    }

    #[test]
    fn nested_any_all_not() {
        let e: CfgExpr = "any(target_os = \"macos\", all(unix, not(target_os = \"linux\")))"
            .parse()
            .unwrap();
        let macos = [Cfg::KeyPair("target_os".into(), "macos".into())];
        assert!(e.matches(&macos));
        let linux = [
            Cfg::Name("unix".into()),
            Cfg::KeyPair("target_os".into(), "linux".into()),
        ];
        assert!(!e.matches(&linux));
        let freebsd = [
            Cfg::Name("unix".into()),
            Cfg::KeyPair("target_os".into(), "freebsd".into()),
        ];
        assert!(e.matches(&freebsd));
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        assert!("unix extra".parse::<CfgExpr>().is_err());
    }
}
