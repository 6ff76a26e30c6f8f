//! Strict parser for generic signature attributes
//!
//! Obfuscators like to corrupt `Signature` attributes because most tooling
//! only reads them lazily. The sanitation pass parses every signature under
//! the full grammar from JVMS §4.7.9.1 and clears the attribute when parsing
//! fails, so that nothing downstream trips over garbage.
//!
//! Only validation is needed - no syntax tree is built.

use std::error;
use std::fmt;

/// Failure to parse a signature, with the byte position that broke the grammar
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureError {
    pub position: usize,
    pub message: &'static str,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl error::Error for SignatureError {}

/// Validate a class signature: `TypeParams? Superclass Superinterface*`
pub fn validate_class_signature(signature: &str) -> Result<(), SignatureError> {
    let mut parser = Parser::new(signature);
    parser.type_parameters_opt()?;
    parser.class_type_signature()?;
    while !parser.at_end() {
        parser.class_type_signature()?;
    }
    Ok(())
}

/// Validate a method signature: `TypeParams? (Param*) Result Throws*`
pub fn validate_method_signature(signature: &str) -> Result<(), SignatureError> {
    let mut parser = Parser::new(signature);
    parser.type_parameters_opt()?;
    parser.expect('(')?;
    while !parser.eat(')') {
        if parser.at_end() {
            return Err(parser.error("unterminated parameter list"));
        }
        parser.java_type_signature()?;
    }
    if !parser.eat('V') {
        parser.java_type_signature()?;
    }
    while parser.eat('^') {
        match parser.peek() {
            Some('T') => parser.type_variable_signature()?,
            _ => parser.class_type_signature()?,
        }
    }
    parser.expect_end()
}

/// Validate a field (or local variable) signature: a reference type signature
pub fn validate_field_signature(signature: &str) -> Result<(), SignatureError> {
    let mut parser = Parser::new(signature);
    parser.reference_type_signature()?;
    parser.expect_end()
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Parser<'a> {
        Parser {
            chars: source.char_indices().peekable(),
            len: source.len(),
            position: 0,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let (idx, c) = self.chars.next()?;
        self.position = idx + c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SignatureError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error("unexpected character"))
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn expect_end(&mut self) -> Result<(), SignatureError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("leftover input"))
        }
    }

    fn error(&self, message: &'static str) -> SignatureError {
        SignatureError {
            position: self.position.min(self.len),
            message,
        }
    }

    /// `Identifier`: one or more characters outside the JVMS exclusion set
    fn identifier(&mut self) -> Result<(), SignatureError> {
        let mut seen = false;
        while let Some(c) = self.peek() {
            if matches!(c, '.' | ';' | '[' | '/' | '<' | '>' | ':') {
                break;
            }
            self.bump();
            seen = true;
        }
        if seen {
            Ok(())
        } else {
            Err(self.error("expected identifier"))
        }
    }

    /// `TypeParams`: `< TypeParameter+ >`, if present
    fn type_parameters_opt(&mut self) -> Result<(), SignatureError> {
        if !self.eat('<') {
            return Ok(());
        }
        let mut seen = false;
        while !self.eat('>') {
            if self.at_end() {
                return Err(self.error("unterminated type parameters"));
            }
            self.type_parameter()?;
            seen = true;
        }
        if seen {
            Ok(())
        } else {
            Err(self.error("empty type parameter list"))
        }
    }

    /// `TypeParameter`: `Identifier ClassBound InterfaceBound*`
    fn type_parameter(&mut self) -> Result<(), SignatureError> {
        self.identifier()?;
        self.expect(':')?;
        // The class bound may be empty
        if matches!(self.peek(), Some('L') | Some('[') | Some('T')) {
            self.reference_type_signature()?;
        }
        while self.eat(':') {
            self.reference_type_signature()?;
        }
        Ok(())
    }

    /// `JavaTypeSignature`: a reference type signature or a base type
    fn java_type_signature(&mut self) -> Result<(), SignatureError> {
        match self.peek() {
            Some('L') | Some('[') | Some('T') => self.reference_type_signature(),
            Some('B') | Some('C') | Some('D') | Some('F') | Some('I') | Some('J') | Some('S')
            | Some('Z') => {
                self.bump();
                Ok(())
            }
            _ => Err(self.error("expected type signature")),
        }
    }

    fn reference_type_signature(&mut self) -> Result<(), SignatureError> {
        match self.peek() {
            Some('L') => self.class_type_signature(),
            Some('T') => self.type_variable_signature(),
            Some('[') => {
                self.bump();
                self.java_type_signature()
            }
            _ => Err(self.error("expected reference type signature")),
        }
    }

    /// `ClassTypeSignature`: `L Package? Simple Suffix* ;` with type arguments
    fn class_type_signature(&mut self) -> Result<(), SignatureError> {
        self.expect('L')?;
        self.identifier()?;
        // Package segments and the simple name are indistinguishable until the
        // separator shows up
        while self.eat('/') {
            self.identifier()?;
        }
        self.type_arguments_opt()?;
        while self.eat('.') {
            self.identifier()?;
            self.type_arguments_opt()?;
        }
        self.expect(';')
    }

    fn type_variable_signature(&mut self) -> Result<(), SignatureError> {
        self.expect('T')?;
        self.identifier()?;
        self.expect(';')
    }

    /// `TypeArguments`: `< TypeArgument+ >`, if present
    fn type_arguments_opt(&mut self) -> Result<(), SignatureError> {
        if !self.eat('<') {
            return Ok(());
        }
        let mut seen = false;
        while !self.eat('>') {
            if self.at_end() {
                return Err(self.error("unterminated type arguments"));
            }
            self.type_argument()?;
            seen = true;
        }
        if seen {
            Ok(())
        } else {
            Err(self.error("empty type argument list"))
        }
    }

    /// `TypeArgument`: `*` or an optionally-bounded reference type signature
    fn type_argument(&mut self) -> Result<(), SignatureError> {
        if self.eat('*') {
            return Ok(());
        }
        if self.peek() == Some('+') || self.peek() == Some('-') {
            self.bump();
        }
        self.reference_type_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_real_class_signatures() {
        for signature in [
            "Ljava/lang/Object;",
            "<T:Ljava/lang/Object;>Ljava/lang/Object;Ljava/lang/Comparable<TT;>;",
            "<K:Ljava/lang/Object;V:Ljava/lang/Object;>Ljava/util/AbstractMap<TK;TV;>;",
        ] {
            assert_eq!(validate_class_signature(signature), Ok(()), "{}", signature);
        }
    }

    #[test]
    fn accepts_real_method_signatures() {
        for signature in [
            "()V",
            "(TT;)TT;",
            "<T:Ljava/lang/Object;>(Ljava/util/List<+TT;>;I)TT;^Ljava/io/IOException;",
            "(Ljava/util/Map<Ljava/lang/String;[I>;)V",
        ] {
            assert_eq!(validate_method_signature(signature), Ok(()), "{}", signature);
        }
    }

    #[test]
    fn accepts_real_field_signatures() {
        for signature in [
            "Ljava/util/List<Ljava/lang/String;>;",
            "TT;",
            "[Ljava/util/List<*>;",
        ] {
            assert_eq!(validate_field_signature(signature), Ok(()), "{}", signature);
        }
    }

    #[test]
    fn rejects_corrupted_signatures() {
        assert!(validate_class_signature("").is_err());
        assert!(validate_class_signature("Ljava/lang/Object").is_err());
        assert!(validate_class_signature("<>Ljava/lang/Object;").is_err());
        assert!(validate_method_signature("(Ljava/lang/String;").is_err());
        assert!(validate_method_signature("()").is_err());
        assert!(validate_field_signature("Qjava/lang/String;").is_err());
        assert!(validate_field_signature("Ljava/util/List<>;").is_err());
        assert!(validate_field_signature("Ljava/lang/String;;").is_err());
    }
}
