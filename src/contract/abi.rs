//! Minimal Solidity ABI codec
//!
//! Covers what a dashboard needs to talk to ordinary contracts: JSON ABI
//! parsing for `function` entries, keccak-256 selectors, and head/tail
//! encoding of the elementary types (`address`, `bool`, `uintN`, `intN`,
//! `bytesN`, `bytes`, `string`). Arrays and tuples are not supported; ABI
//! entries that use them are skipped when the interface is loaded.

use std::fmt;
use std::path::Path;

use lazy_static::lazy_static;
use primitive_types::U256;
use regex::Regex;
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tracing::warn;

/// `Error(string)`
const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)`
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

const WORD: usize = 32;

lazy_static! {
    static ref ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbiError {
    #[error("Invalid ABI JSON: {0}")]
    Json(String),

    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("{0}")]
    UnknownMethod(String),

    #[error("{name} expects {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Cannot decode return data: {0}")]
    Decode(String),
}

/// Elementary Solidity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Bool,
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Bytes,
    String,
}

impl ParamType {
    pub fn parse(raw: &str) -> Result<Self, AbiError> {
        let unsupported = || AbiError::UnsupportedType(raw.to_string());
        let kind = match raw.trim() {
            "address" => ParamType::Address,
            "bool" => ParamType::Bool,
            "string" => ParamType::String,
            "bytes" => ParamType::Bytes,
            "uint" => ParamType::Uint(256),
            "int" => ParamType::Int(256),
            other => {
                if let Some(bits) = other.strip_prefix("uint") {
                    ParamType::Uint(int_width(bits).ok_or_else(unsupported)?)
                } else if let Some(bits) = other.strip_prefix("int") {
                    ParamType::Int(int_width(bits).ok_or_else(unsupported)?)
                } else if let Some(len) = other.strip_prefix("bytes") {
                    match len.parse::<usize>() {
                        Ok(n) if (1..=32).contains(&n) => ParamType::FixedBytes(n),
                        _ => return Err(unsupported()),
                    }
                } else {
                    return Err(unsupported());
                }
            }
        };
        Ok(kind)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ParamType::Bytes | ParamType::String)
    }
}

fn int_width(bits: &str) -> Option<usize> {
    match bits.parse::<usize>() {
        Ok(n) if n % 8 == 0 && (8..=256).contains(&n) => Some(n),
        _ => None,
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Address => write!(f, "address"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::Uint(bits) => write!(f, "uint{}", bits),
            ParamType::Int(bits) => write!(f, "int{}", bits),
            ParamType::FixedBytes(n) => write!(f, "bytes{}", n),
            ParamType::Bytes => write!(f, "bytes"),
            ParamType::String => write!(f, "string"),
        }
    }
}

/// ABI value
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Address([u8; 20]),
    Bool(bool),
    Uint(U256),
    Int(i128),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
}

impl Token {
    /// Parse user input for a parameter of type `kind`
    pub fn parse(kind: &ParamType, text: &str) -> Result<Self, AbiError> {
        let text = text.trim();
        let invalid = |what: &str| AbiError::InvalidArgument(format!("{:?} is not {}", text, what));

        let token = match kind {
            ParamType::Address => Token::Address(parse_address(text)?),
            ParamType::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Token::Bool(true),
                "false" | "0" => Token::Bool(false),
                _ => return Err(invalid("a bool")),
            },
            ParamType::Uint(_) => {
                let value = match text.strip_prefix("0x") {
                    Some(hex) => U256::from_str_radix(hex, 16).map_err(|_| invalid("a uint"))?,
                    None => U256::from_dec_str(text).map_err(|_| invalid("a uint"))?,
                };
                Token::Uint(value)
            }
            ParamType::Int(_) => Token::Int(text.parse().map_err(|_| invalid("an int"))?),
            ParamType::FixedBytes(n) => {
                let bytes = decode_hex(text).ok_or_else(|| invalid("hex bytes"))?;
                if bytes.len() != *n {
                    return Err(invalid(&format!("{} bytes", n)));
                }
                Token::FixedBytes(bytes)
            }
            ParamType::Bytes => Token::Bytes(decode_hex(text).ok_or_else(|| invalid("hex bytes"))?),
            ParamType::String => Token::String(text.to_string()),
        };
        token.check(kind)?;
        Ok(token)
    }

    /// Verify the token fits `kind`
    fn check(&self, kind: &ParamType) -> Result<(), AbiError> {
        let fits = match (self, kind) {
            (Token::Address(_), ParamType::Address)
            | (Token::Bool(_), ParamType::Bool)
            | (Token::Bytes(_), ParamType::Bytes)
            | (Token::String(_), ParamType::String) => true,
            (Token::Uint(v), ParamType::Uint(bits)) => *bits == 256 || v.bits() <= *bits,
            (Token::Int(v), ParamType::Int(bits)) => {
                *bits >= 128 || (*v >= -(1i128 << (bits - 1)) && *v < (1i128 << (bits - 1)))
            }
            (Token::FixedBytes(b), ParamType::FixedBytes(n)) => b.len() == *n,
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(AbiError::InvalidArgument(format!("{} does not fit {}", self, kind)))
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Address(a) => write!(f, "0x{}", hex::encode(a)),
            Token::Bool(b) => write!(f, "{}", b),
            Token::Uint(v) => write!(f, "{}", v),
            Token::Int(v) => write!(f, "{}", v),
            Token::FixedBytes(b) | Token::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Token::String(s) => write!(f, "{}", s),
        }
    }
}

/// Validate and decode a `0x`-prefixed 20-byte address
pub fn parse_address(text: &str) -> Result<[u8; 20], AbiError> {
    if !ADDRESS_RE.is_match(text) {
        return Err(AbiError::InvalidArgument(format!(
            "{:?} is not a 0x-prefixed 20-byte address",
            text
        )));
    }
    let mut out = [0u8; 20];
    hex::decode_to_slice(&text[2..], &mut out)
        .map_err(|e| AbiError::InvalidArgument(format!("Bad address {}: {}", text, e)))?;
    Ok(out)
}

pub fn is_address(text: &str) -> bool {
    ADDRESS_RE.is_match(text)
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    hex::decode(text.strip_prefix("0x").unwrap_or(text)).ok()
}

/// Head/tail encode a list of tokens
pub fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = WORD * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match token {
            Token::Bytes(data) => {
                head.extend_from_slice(&usize_word(head_len + tail.len()));
                tail.extend(encode_dynamic(data));
            }
            Token::String(s) => {
                head.extend_from_slice(&usize_word(head_len + tail.len()));
                tail.extend(encode_dynamic(s.as_bytes()));
            }
            other => head.extend_from_slice(&static_word(other)),
        }
    }

    head.extend(tail);
    head
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    U256::from(value).to_big_endian(&mut word);
    word
}

fn encode_dynamic(data: &[u8]) -> Vec<u8> {
    let padded = data.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend_from_slice(&usize_word(data.len()));
    out.extend_from_slice(data);
    out.resize(WORD + padded, 0);
    out
}

fn static_word(token: &Token) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    match token {
        Token::Address(a) => word[12..].copy_from_slice(a),
        Token::Bool(b) => word[31] = *b as u8,
        Token::Uint(v) => v.to_big_endian(&mut word),
        Token::Int(v) => {
            if *v < 0 {
                word[..16].fill(0xff);
            }
            word[16..].copy_from_slice(&v.to_be_bytes());
        }
        Token::FixedBytes(b) => word[..b.len()].copy_from_slice(b),
        // Dynamic types never reach the head encoder
        Token::Bytes(_) | Token::String(_) => {}
    }
    word
}

/// Decode return data for the given output types
pub fn decode_tokens(kinds: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            let word = read_word(data, i * WORD)?;
            if kind.is_dynamic() {
                let offset = word_to_usize(word)?;
                let len = word_to_usize(read_word(data, offset)?)?;
                let start = offset + WORD;
                let bytes = data
                    .get(start..start + len)
                    .ok_or_else(|| AbiError::Decode(format!("{} runs past end of data", kind)))?;
                Ok(match kind {
                    ParamType::String => Token::String(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| AbiError::Decode(e.to_string()))?,
                    ),
                    _ => Token::Bytes(bytes.to_vec()),
                })
            } else {
                decode_static(kind, word)
            }
        })
        .collect()
}

fn read_word(data: &[u8], at: usize) -> Result<&[u8], AbiError> {
    data.get(at..at + WORD)
        .ok_or_else(|| AbiError::Decode(format!("expected a word at byte {}", at)))
}

fn word_to_usize(word: &[u8]) -> Result<usize, AbiError> {
    let value = U256::from_big_endian(word);
    if value > U256::from(u32::MAX) {
        return Err(AbiError::Decode(format!("offset {} out of range", value)));
    }
    Ok(value.as_usize())
}

fn decode_static(kind: &ParamType, word: &[u8]) -> Result<Token, AbiError> {
    let token = match kind {
        ParamType::Address => {
            let mut out = [0u8; 20];
            out.copy_from_slice(&word[12..]);
            Token::Address(out)
        }
        ParamType::Bool => Token::Bool(word[31] != 0),
        ParamType::Uint(_) => Token::Uint(U256::from_big_endian(word)),
        ParamType::Int(_) => {
            let negative = word[0] & 0x80 != 0;
            let fill = if negative { 0xff } else { 0x00 };
            if word[..16].iter().any(|b| *b != fill) {
                return Err(AbiError::Decode("int value exceeds 128 bits".to_string()));
            }
            let mut low = [0u8; 16];
            low.copy_from_slice(&word[16..]);
            Token::Int(i128::from_be_bytes(low))
        }
        ParamType::FixedBytes(n) => Token::FixedBytes(word[..*n].to_vec()),
        ParamType::Bytes | ParamType::String => {
            return Err(AbiError::Decode(format!("{} is not a static type", kind)))
        }
    };
    Ok(token)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    Pure,
    View,
    NonPayable,
    Payable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamType,
}

/// One callable contract function
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    pub state_mutability: StateMutability,
}

impl Function {
    /// Canonical signature, e.g. `transfer(address,uint256)`
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.inputs.iter().map(|p| p.kind.to_string()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let mut hasher = Keccak256::new();
        hasher.update(self.signature().as_bytes());
        let hash = hasher.finalize();
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// View and pure functions are answered by `eth_call`
    pub fn is_read_only(&self) -> bool {
        matches!(
            self.state_mutability,
            StateMutability::View | StateMutability::Pure
        )
    }

    pub fn encode_call(&self, args: &[Token]) -> Result<Vec<u8>, AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::ArgumentCount {
                name: self.signature(),
                expected: self.inputs.len(),
                got: args.len(),
            });
        }
        for (arg, param) in args.iter().zip(&self.inputs) {
            arg.check(&param.kind)?;
        }

        let mut data = self.selector().to_vec();
        data.extend(encode_tokens(args));
        Ok(data)
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, AbiError> {
        let kinds: Vec<ParamType> = self.outputs.iter().map(|p| p.kind).collect();
        decode_tokens(&kinds, data)
    }

    /// Parse textual arguments against the input types
    pub fn parse_args<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<Token>, AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::ArgumentCount {
                name: self.signature(),
                expected: self.inputs.len(),
                got: args.len(),
            });
        }
        args.iter()
            .zip(&self.inputs)
            .map(|(arg, param)| Token::parse(&param.kind, arg.as_ref()))
            .collect()
    }
}

#[derive(Deserialize)]
struct RawParam {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    outputs: Vec<RawParam>,
    #[serde(rename = "stateMutability")]
    state_mutability: Option<StateMutability>,
    /// Pre-0.5 compilers
    #[serde(default)]
    constant: bool,
    #[serde(default)]
    payable: bool,
}

fn default_entry_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AbiDocument {
    Entries(Vec<RawEntry>),
    /// Build artifact with the ABI under `abi`
    Artifact { abi: Vec<RawEntry> },
}

fn convert_params(raw: Vec<RawParam>) -> Result<Vec<Param>, AbiError> {
    raw.into_iter()
        .map(|p| {
            Ok(Param {
                name: p.name,
                kind: ParamType::parse(&p.kind)?,
            })
        })
        .collect()
}

/// Parsed contract interface
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractInterface {
    functions: Vec<Function>,
}

impl ContractInterface {
    pub fn new(functions: Vec<Function>) -> Self {
        Self { functions }
    }

    /// Load from JSON ABI text, either a bare entry list or a build artifact
    pub fn from_json(text: &str) -> Result<Self, AbiError> {
        let entries = match serde_json::from_str::<AbiDocument>(text)
            .map_err(|e| AbiError::Json(e.to_string()))?
        {
            AbiDocument::Entries(entries) => entries,
            AbiDocument::Artifact { abi } => abi,
        };

        let mut functions = Vec::new();
        for entry in entries.into_iter().filter(|e| e.kind == "function") {
            let state_mutability = entry.state_mutability.unwrap_or(if entry.constant {
                StateMutability::View
            } else if entry.payable {
                StateMutability::Payable
            } else {
                StateMutability::NonPayable
            });

            let params = convert_params(entry.inputs)
                .and_then(|inputs| Ok((inputs, convert_params(entry.outputs)?)));
            match params {
                Ok((inputs, outputs)) => functions.push(Function {
                    name: entry.name,
                    inputs,
                    outputs,
                    state_mutability,
                }),
                Err(e) => warn!("Skipping ABI function {}: {}", entry.name, e),
            }
        }

        Ok(Self { functions })
    }

    /// Load a JSON ABI or build artifact from disk
    pub async fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| {
                crate::Error::Io(format!("Cannot read ABI file {}: {}", path.display(), e))
            })?;
        Ok(Self::from_json(&text)?)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Resolve `name` (or a full signature) for `argc` arguments
    pub fn function(&self, name: &str, argc: usize) -> Result<&Function, AbiError> {
        if name.contains('(') {
            return self
                .functions
                .iter()
                .find(|f| f.signature() == name)
                .ok_or_else(|| AbiError::UnknownMethod(name.to_string()));
        }

        let mut candidates = self.functions.iter().filter(|f| f.name == name).peekable();
        if candidates.peek().is_none() {
            return Err(AbiError::UnknownMethod(name.to_string()));
        }
        let matching: Vec<&Function> = candidates.filter(|f| f.inputs.len() == argc).collect();
        match matching.as_slice() {
            [single] => Ok(single),
            [] => Err(AbiError::InvalidArgument(format!(
                "no overload of {} takes {} arguments",
                name, argc
            ))),
            _ => Err(AbiError::InvalidArgument(format!(
                "{} is ambiguous with {} arguments; use the full signature",
                name, argc
            ))),
        }
    }
}

/// Extract a human-readable reason from revert data
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, body) = data.split_at(4);
    if selector == ERROR_SELECTOR {
        match decode_tokens(&[ParamType::String], body).ok()?.pop()? {
            Token::String(reason) => Some(reason),
            _ => None,
        }
    } else if selector == PANIC_SELECTOR {
        let code = U256::from_big_endian(read_word(body, 0).ok()?);
        Some(format!("panic code 0x{:x}", code))
    } else {
        None
    }
}

/// Hex form used on the wire
pub fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    decode_hex(text)
}
