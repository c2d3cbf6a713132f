//! ISO 10303-21 ("STEP Part 21") exchange file reader.
//!
//! Only the instance graph of the DATA section is kept; header entities are
//! parsed for syntax and discarded.

use crate::KernelError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Ref(u64),
    Number(f64),
    Str(String),
    Enum(String),
    List(Vec<Param>),
    Typed(String, Vec<Param>),
    Unset,
    Derived,
}

impl Param {
    pub fn as_ref_id(&self) -> Option<u64> {
        match self {
            Param::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Param::Number(n) => Some(*n),
            Param::Typed(_, inner) => inner.first().and_then(Param::as_f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Param]> {
        match self {
            Param::List(items) => Some(items),
            _ => None,
        }
    }

    /// `.T.` / `.F.`; anything else (including `.U.`) is `None`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Param::Enum(e) if e == "T" => Some(true),
            Param::Enum(e) if e == "F" => Some(false),
            _ => None,
        }
    }
}

/// One `NAME(params)` record. Simple instances have one, complex instances several.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub name: String,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub records: Vec<Record>,
}

impl Instance {
    pub fn is_complex(&self) -> bool {
        self.records.len() > 1
    }

    /// Name of a simple instance; complex instances have none.
    pub fn simple_name(&self) -> Option<&str> {
        match self.records.as_slice() {
            [only] => Some(only.name.as_str()),
            _ => None,
        }
    }

    pub fn record(&self, name: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.record(name).is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub instances: BTreeMap<u64, Instance>,
}

impl Exchange {
    pub fn get(&self, id: u64) -> Result<&Instance, KernelError> {
        self.instances.get(&id).ok_or(KernelError::UnknownEntity(id))
    }

    /// Ids of simple instances with the given entity name, ascending.
    pub fn ids_of(&self, name: &str) -> Vec<u64> {
        self.instances
            .iter()
            .filter(|(_, inst)| inst.simple_name() == Some(name))
            .map(|(id, _)| *id)
            .collect()
    }
}

pub fn parse(text: &str) -> Result<Exchange, KernelError> {
    let mut cur = Cursor {
        bytes: text.as_bytes(),
        pos: 0,
    };
    cur.skip_ws();
    let magic = cur.keyword();
    if magic != "ISO-10303-21" {
        return Err(cur.error("missing ISO-10303-21 magic"));
    }
    cur.expect(b';')?;

    let mut exchange = Exchange::default();
    let mut in_data = false;
    loop {
        cur.skip_ws();
        match cur.peek() {
            None => return Err(cur.error("unexpected end of file")),
            Some(b'#') => {
                if !in_data {
                    return Err(cur.error("instance outside DATA section"));
                }
                let (id, instance) = cur.instance()?;
                exchange.instances.insert(id, instance);
            }
            Some(_) => {
                let kw = cur.keyword();
                match kw.as_str() {
                    "END-ISO-10303-21" => {
                        cur.expect(b';')?;
                        break;
                    }
                    "HEADER" => cur.expect(b';')?,
                    "ENDSEC" => {
                        in_data = false;
                        cur.expect(b';')?;
                    }
                    "DATA" => {
                        in_data = true;
                        cur.skip_ws();
                        if cur.peek() == Some(b'(') {
                            cur.params()?;
                        }
                        cur.expect(b';')?;
                    }
                    "" => return Err(cur.error("expected keyword or instance")),
                    _ => {
                        // header entity
                        cur.params()?;
                        cur.expect(b';')?;
                    }
                }
            }
        }
    }
    Ok(exchange)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn error(&self, message: &str) -> KernelError {
        KernelError::Parse {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    self.pos += 2;
                    while self.pos < self.bytes.len()
                        && !(self.bytes[self.pos] == b'*'
                            && self.bytes.get(self.pos + 1) == Some(&b'/'))
                    {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.bytes.len());
                }
                _ => break,
            }
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), KernelError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn keyword(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'!' {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).to_ascii_uppercase()
    }

    fn digits(&mut self) -> Result<u64, KernelError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("expected instance number"))
    }

    fn instance(&mut self) -> Result<(u64, Instance), KernelError> {
        self.expect(b'#')?;
        let id = self.digits()?;
        self.expect(b'=')?;
        self.skip_ws();
        let mut records = Vec::new();
        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                self.skip_ws();
                if self.peek() == Some(b')') {
                    self.pos += 1;
                    break;
                }
                let name = self.keyword();
                if name.is_empty() {
                    return Err(self.error("expected record name in complex instance"));
                }
                let params = self.params()?;
                records.push(Record { name, params });
            }
        } else {
            let name = self.keyword();
            if name.is_empty() {
                return Err(self.error("expected entity name"));
            }
            let params = self.params()?;
            records.push(Record { name, params });
        }
        self.expect(b';')?;
        Ok((id, Instance { records }))
    }

    fn params(&mut self) -> Result<Vec<Param>, KernelError> {
        self.expect(b'(')?;
        let mut out = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(out);
        }
        loop {
            out.push(self.param()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    return Ok(out);
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn param(&mut self) -> Result<Param, KernelError> {
        self.skip_ws();
        match self.peek() {
            Some(b'#') => {
                self.pos += 1;
                Ok(Param::Ref(self.digits()?))
            }
            Some(b'\'') => self.string(),
            Some(b'"') => {
                self.pos += 1;
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c != b'"') {
                    self.pos += 1;
                }
                let raw = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                self.expect(b'"')?;
                Ok(Param::Str(raw))
            }
            Some(b'$') => {
                self.pos += 1;
                Ok(Param::Unset)
            }
            Some(b'*') => {
                self.pos += 1;
                Ok(Param::Derived)
            }
            Some(b'(') => Ok(Param::List(self.params()?)),
            Some(b'.') if self.enum_follows() => {
                self.pos += 1;
                let name = self.keyword();
                self.expect(b'.')?;
                Ok(Param::Enum(name))
            }
            Some(c) if c.is_ascii_digit() || c == b'-' || c == b'+' || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => {
                let name = self.keyword();
                let inner = self.params()?;
                Ok(Param::Typed(name, inner))
            }
            _ => Err(self.error("unexpected character in parameter list")),
        }
    }

    fn enum_follows(&self) -> bool {
        matches!(self.bytes.get(self.pos + 1), Some(c) if c.is_ascii_alphabetic() || *c == b'_')
    }

    fn string(&mut self) -> Result<Param, KernelError> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'\'') if self.bytes.get(self.pos + 1) == Some(&b'\'') => {
                    out.push(b'\'');
                    self.pos += 2;
                }
                Some(b'\'') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Param::Str(String::from_utf8_lossy(&out).into_owned()))
    }

    fn number(&mut self) -> Result<Param, KernelError> {
        let start = self.pos;
        while self.peek().is_some_and(is_number_byte) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Param::Number)
            .ok_or_else(|| self.error("malformed number"))
    }
}

fn is_number_byte(c: u8) -> bool {
    c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'E' | b'e')
}
