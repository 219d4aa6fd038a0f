//! Type-token decomposition of JVM descriptors and generic signatures.
//!
//! Only the internal names inside a descriptor are handed to
//! [`RuleSet::rewrite`]; everything else is copied through untouched.

use crate::RuleSet;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("malformed descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("malformed signature: {0}")]
    InvalidSignature(String),
}

impl RuleSet {
    /// Rewrites the operand of a `CONSTANT_Class`, which is either an
    /// internal name or an array descriptor.
    pub fn rewrite_internal_name<'a>(&self, name: &'a str) -> Result<Cow<'a, str>, NameError> {
        if name.starts_with('[') {
            self.rewrite_descriptor(name)
        } else {
            Ok(self.rewrite(name))
        }
    }

    /// Rewrites a field or method descriptor.
    pub fn rewrite_descriptor<'a>(&self, descriptor: &'a str) -> Result<Cow<'a, str>, NameError> {
        if self.is_empty() {
            return Ok(Cow::Borrowed(descriptor));
        }

        let mut remapper = Remapper::new(self, descriptor, Grammar::Descriptor);
        if remapper.peek() == Some(b'(') {
            remapper.method_descriptor()?;
        } else {
            remapper.field_type()?;
        }
        remapper.finish()
    }

    /// Rewrites a class, method or field generic signature.
    pub fn rewrite_signature<'a>(&self, signature: &'a str) -> Result<Cow<'a, str>, NameError> {
        if self.is_empty() {
            return Ok(Cow::Borrowed(signature));
        }

        let mut remapper = Remapper::new(self, signature, Grammar::Signature);
        if remapper.peek() == Some(b'<') {
            remapper.formal_type_parameters()?;
        }
        if remapper.peek() == Some(b'(') {
            remapper.method_signature()?;
        } else {
            if remapper.remaining() == 0 {
                return Err(remapper.error());
            }
            while remapper.remaining() > 0 {
                remapper.java_type_signature()?;
            }
        }
        remapper.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Descriptor,
    Signature,
}

struct Remapper<'r, 'a> {
    rules: &'r RuleSet,
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    out: String,
    changed: bool,
    grammar: Grammar,
}

impl<'r, 'a> Remapper<'r, 'a> {
    fn new(rules: &'r RuleSet, source: &'a str, grammar: Grammar) -> Self {
        Self {
            rules,
            source,
            bytes: source.as_bytes(),
            pos: 0,
            out: String::with_capacity(source.len()),
            changed: false,
            grammar,
        }
    }

    fn finish(self) -> Result<Cow<'a, str>, NameError> {
        if self.remaining() != 0 {
            return Err(self.error());
        }
        if self.changed {
            Ok(Cow::Owned(self.out))
        } else {
            Ok(Cow::Borrowed(self.source))
        }
    }

    fn error(&self) -> NameError {
        match self.grammar {
            Grammar::Descriptor => NameError::InvalidDescriptor(self.source.to_string()),
            Grammar::Signature => NameError::InvalidSignature(self.source.to_string()),
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), NameError> {
        if self.peek() != Some(byte) {
            return Err(self.error());
        }
        self.copy(1);
        Ok(())
    }

    fn copy(&mut self, len: usize) {
        self.out.push_str(&self.source[self.pos..self.pos + len]);
        self.pos += len;
    }

    /// Consumes bytes up to (not including) the first of `stops`.
    fn take_until(&mut self, stops: &[u8]) -> Result<&'a str, NameError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if stops.contains(&byte) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start || self.peek().is_none() {
            return Err(self.error());
        }
        let source = self.source;
        Ok(&source[start..self.pos])
    }

    fn push_class_name(&mut self, name: &str) {
        let relocated = self.rules.rewrite(name);
        if relocated != name {
            self.changed = true;
        }
        self.out.push_str(&relocated);
    }

    fn method_descriptor(&mut self) -> Result<(), NameError> {
        self.expect(b'(')?;
        while self.peek() != Some(b')') {
            if self.remaining() == 0 {
                return Err(self.error());
            }
            self.field_type()?;
        }
        self.expect(b')')?;
        if self.peek() == Some(b'V') {
            self.copy(1);
            Ok(())
        } else {
            self.field_type()
        }
    }

    fn field_type(&mut self) -> Result<(), NameError> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
                self.copy(1);
                Ok(())
            }
            Some(b'L') => {
                self.copy(1);
                let name = self.take_until(b";")?;
                self.push_class_name(name);
                self.expect(b';')
            }
            Some(b'[') => {
                self.copy(1);
                self.field_type()
            }
            _ => Err(self.error()),
        }
    }

    fn formal_type_parameters(&mut self) -> Result<(), NameError> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            let identifier = self.take_until(b":")?;
            self.out.push_str(identifier);
            self.expect(b':')?;
            // Class bound may be empty when only interface bounds follow.
            if !matches!(self.peek(), Some(b':') | Some(b'>')) {
                self.reference_type_signature()?;
            }
            while self.peek() == Some(b':') {
                self.copy(1);
                self.reference_type_signature()?;
            }
            if self.remaining() == 0 {
                return Err(self.error());
            }
        }
        self.expect(b'>')
    }

    fn method_signature(&mut self) -> Result<(), NameError> {
        self.expect(b'(')?;
        while self.peek() != Some(b')') {
            if self.remaining() == 0 {
                return Err(self.error());
            }
            self.java_type_signature()?;
        }
        self.expect(b')')?;
        if self.peek() == Some(b'V') {
            self.copy(1);
        } else {
            self.java_type_signature()?;
        }
        while self.peek() == Some(b'^') {
            self.copy(1);
            self.reference_type_signature()?;
        }
        Ok(())
    }

    fn java_type_signature(&mut self) -> Result<(), NameError> {
        match self.peek() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
                self.copy(1);
                Ok(())
            }
            _ => self.reference_type_signature(),
        }
    }

    fn reference_type_signature(&mut self) -> Result<(), NameError> {
        match self.peek() {
            Some(b'L') => self.class_type_signature(),
            Some(b'T') => {
                self.copy(1);
                let variable = self.take_until(b";")?;
                self.out.push_str(variable);
                self.expect(b';')
            }
            Some(b'[') => {
                self.copy(1);
                self.java_type_signature()
            }
            _ => Err(self.error()),
        }
    }

    fn class_type_signature(&mut self) -> Result<(), NameError> {
        self.expect(b'L')?;
        let name = self.take_until(b"<.;")?;
        self.push_class_name(name);
        if self.peek() == Some(b'<') {
            self.type_arguments()?;
        }
        // Inner class suffixes are simple names and never relocated.
        while self.peek() == Some(b'.') {
            self.copy(1);
            let simple = self.take_until(b"<.;")?;
            self.out.push_str(simple);
            if self.peek() == Some(b'<') {
                self.type_arguments()?;
            }
        }
        self.expect(b';')
    }

    fn type_arguments(&mut self) -> Result<(), NameError> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            match self.peek() {
                Some(b'*') => self.copy(1),
                Some(b'+' | b'-') => {
                    self.copy(1);
                    self.reference_type_signature()?;
                }
                Some(_) => self.reference_type_signature()?,
                None => return Err(self.error()),
            }
        }
        self.expect(b'>')
    }
}
