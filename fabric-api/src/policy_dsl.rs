//! Endorsement policy DSL.
//!
//! Parses expressions such as `AND('Org1.peer', OR('Org2.member', 'Org3.admin'))`
//! or `OutOf(2, 'Org1.member', 'Org2.member', 'Org3.member')` into a signature
//! policy envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MspRole {
    Member,
    Admin,
    Client,
    Peer,
    Orderer,
}

impl FromStr for MspRole {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(MspRole::Member),
            "admin" => Ok(MspRole::Admin),
            "client" => Ok(MspRole::Client),
            "peer" => Ok(MspRole::Peer),
            "orderer" => Ok(MspRole::Orderer),
            other => Err(ApiError::InvalidPolicy(format!("unknown role {:?}", other))),
        }
    }
}

impl fmt::Display for MspRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MspRole::Member => "member",
            MspRole::Admin => "admin",
            MspRole::Client => "client",
            MspRole::Peer => "peer",
            MspRole::Orderer => "orderer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MspPrincipal {
    pub msp_id: String,
    pub role: MspRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignaturePolicy {
    /// Index into the envelope's identities.
    SignedBy(usize),
    NOutOf { n: usize, rules: Vec<SignaturePolicy> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePolicyEnvelope {
    pub version: i32,
    pub rule: SignaturePolicy,
    pub identities: Vec<MspPrincipal>,
}

impl SignaturePolicyEnvelope {
    /// Distinct MSP identifiers referenced by the policy.
    pub fn msp_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for p in &self.identities {
            if !ids.contains(&p.msp_id.as_str()) {
                ids.push(&p.msp_id);
            }
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(usize),
    Str(String),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ApiError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(ApiError::InvalidPolicy(format!("unterminated string at {}", pos)));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let mut value = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    value.push(d);
                    chars.next();
                }
                let n = value
                    .parse()
                    .map_err(|_| ApiError::InvalidPolicy(format!("bad number {:?}", value)))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() => {
                let mut value = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_alphanumeric() {
                        break;
                    }
                    value.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(value));
            }
            other => {
                return Err(ApiError::InvalidPolicy(format!(
                    "unexpected character {:?} at {}",
                    other, pos
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    identities: Vec<MspPrincipal>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, want: Token) -> Result<(), ApiError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(ApiError::InvalidPolicy(format!("expected {:?}, found {:?}", want, t))),
            None => Err(ApiError::InvalidPolicy(format!("expected {:?}, found end of input", want))),
        }
    }

    fn principal(&mut self, raw: &str) -> Result<SignaturePolicy, ApiError> {
        let (msp_id, role) = raw
            .rsplit_once('.')
            .ok_or_else(|| ApiError::InvalidPolicy(format!("principal {:?} lacks a role", raw)))?;
        if msp_id.is_empty() {
            return Err(ApiError::InvalidPolicy(format!("principal {:?} lacks an MSP id", raw)));
        }
        let principal = MspPrincipal {
            msp_id: msp_id.to_string(),
            role: role.parse()?,
        };
        let index = match self.identities.iter().position(|p| p == &principal) {
            Some(i) => i,
            None => {
                self.identities.push(principal);
                self.identities.len() - 1
            }
        };
        Ok(SignaturePolicy::SignedBy(index))
    }

    fn expr(&mut self) -> Result<SignaturePolicy, ApiError> {
        match self.next() {
            Some(Token::Str(raw)) => self.principal(&raw),
            Some(Token::Ident(op)) => {
                self.expect(Token::LParen)?;
                let op = op.to_ascii_lowercase();
                let threshold = if op == "outof" {
                    let n = match self.next() {
                        Some(Token::Number(n)) => n,
                        other => {
                            return Err(ApiError::InvalidPolicy(format!(
                                "OutOf expects a threshold, found {:?}",
                                other
                            )))
                        }
                    };
                    self.expect(Token::Comma)?;
                    Some(n)
                } else if op == "and" || op == "or" {
                    None
                } else {
                    return Err(ApiError::InvalidPolicy(format!("unknown operator {:?}", op)));
                };

                let mut rules = vec![self.expr()?];
                while self.peek() == Some(&Token::Comma) {
                    self.next();
                    rules.push(self.expr()?);
                }
                self.expect(Token::RParen)?;

                let n = match (op.as_str(), threshold) {
                    ("and", _) => rules.len(),
                    ("or", _) => 1,
                    (_, Some(n)) => n,
                    _ => unreachable!("operator validated above"),
                };
                if n == 0 || n > rules.len() {
                    return Err(ApiError::InvalidPolicy(format!(
                        "threshold {} out of range for {} rules",
                        n,
                        rules.len()
                    )));
                }
                Ok(SignaturePolicy::NOutOf { n, rules })
            }
            Some(t) => Err(ApiError::InvalidPolicy(format!("unexpected token {:?}", t))),
            None => Err(ApiError::InvalidPolicy("empty policy".to_string())),
        }
    }
}

/// Parse a policy expression into a signature-policy envelope.
pub fn parse(input: &str) -> Result<SignaturePolicyEnvelope, ApiError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
        identities: Vec::new(),
    };
    let rule = parser.expr()?;
    if let Some(t) = parser.peek() {
        return Err(ApiError::InvalidPolicy(format!("trailing input at {:?}", t)));
    }
    Ok(SignaturePolicyEnvelope {
        version: 0,
        rule,
        identities: parser.identities,
    })
}
