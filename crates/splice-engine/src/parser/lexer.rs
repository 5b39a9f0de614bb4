//! Lexer for the textual IR format, built on logos.

use logos::Logos;

use super::ParseError;

/// Token produced by the lexer.
#[allow(missing_docs)] // keyword and punctuation variants are self-describing
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    // Keywords
    #[token("module")]
    Module,
    #[token("extern")]
    Extern,
    #[token("fn")]
    Fn,
    #[token("data")]
    Data,
    #[token("dtor")]
    Dtor,

    // Types
    #[token("i32")]
    TyI32,
    #[token("i64")]
    TyI64,
    #[token("ptr")]
    TyPtr,

    // Instructions
    #[token("const")]
    Const,
    #[token("iadd")]
    Iadd,
    #[token("isub")]
    Isub,
    #[token("imul")]
    Imul,
    #[token("icmp")]
    Icmp,
    #[token("call")]
    Call,
    #[token("addr")]
    Addr,

    // Terminators
    #[token("ret")]
    Ret,
    #[token("jmp")]
    Jmp,
    #[token("br")]
    Br,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("->")]
    Arrow,

    /// Virtual register, e.g. `r2`.
    #[regex(r"r[0-9]+", |lex| lex.slice()[1..].parse::<u32>().ok(), priority = 10)]
    Reg(u32),

    /// Integer literal, decimal or `0x` hexadecimal, optionally negative.
    #[regex(r"-?(0x[0-9a-fA-F]+|[0-9]+)", parse_int)]
    Int(i64),

    /// Quoted byte string with `\"`, `\\`, `\n`, `\t`, `\0`, `\xNN` escapes.
    #[regex(r#""([^"\\\n]|\\.)*""#, unescape)]
    Str(Vec<u8>),

    /// Identifier: labels, names, mangled symbols.
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    let s = lex.slice();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = match s.strip_prefix("0x") {
        // Hex literals may use the full 64-bit range
        Some(hex) => u64::from_str_radix(hex, 16).ok()? as i64,
        None => s.parse::<i64>().ok()?,
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

fn unescape(lex: &mut logos::Lexer<'_, Token>) -> Option<Vec<u8>> {
    let raw = lex.slice();
    let inner = &raw[1..raw.len() - 1];
    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes();

    while let Some(b) = chars.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match chars.next()? {
            b'"' => bytes.push(b'"'),
            b'\\' => bytes.push(b'\\'),
            b'n' => bytes.push(b'\n'),
            b't' => bytes.push(b'\t'),
            b'0' => bytes.push(0),
            b'x' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let hex = [hi, lo];
                let s = std::str::from_utf8(&hex).ok()?;
                bytes.push(u8::from_str_radix(s, 16).ok()?);
            }
            _ => return None,
        }
    }

    Some(bytes)
}

/// Tokenize a source document into `(token, line)` pairs.
pub fn lex(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut scanned = 0;

    for (result, span) in Token::lexer(source).spanned() {
        line += source[scanned..span.start].bytes().filter(|&b| b == b'\n').count();
        scanned = span.start;

        match result {
            Ok(token) => tokens.push((token, line)),
            Err(()) => return Err(ParseError::Lex { line }),
        }
    }

    Ok(tokens)
}
