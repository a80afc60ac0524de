//! Hex strings: `{ 4D 5A ?? 00 [2-4] ( 01 | 02 ) }`.
//!
//! A hex string made only of whole bytes is a literal and is searched by the
//! shared automaton. Anything with wildcards, jumps or alternations is
//! lowered to an equivalent byte regex.

use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexPattern {
    Literal(Vec<u8>),
    /// Regex source for a `dot_all`, non-Unicode byte regex, and the
    /// longest byte length the pattern can match.
    Regex { source: String, span: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HexNode {
    Byte(u8),
    /// Byte with unknown nibbles; `mask` selects the known bits.
    Masked { value: u8, mask: u8 },
    Jump { min: u32, max: Option<u32> },
    Alternation(Vec<Vec<HexNode>>),
}

struct HexParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

pub fn parse_hex(body: &str) -> Result<HexPattern, String> {
    let mut parser = HexParser {
        chars: body.chars().peekable(),
    };
    let nodes = parser.sequence()?;
    if let Some(c) = parser.peek() {
        return Err(format!("unexpected '{c}' in hex string"));
    }
    if nodes.is_empty() {
        return Err("empty hex string".into());
    }
    if matches!(nodes.first(), Some(HexNode::Jump { .. }))
        || matches!(nodes.last(), Some(HexNode::Jump { .. }))
    {
        return Err("hex string cannot start or end with a jump".into());
    }

    if nodes.iter().all(|n| matches!(n, HexNode::Byte(_))) {
        let bytes = nodes
            .iter()
            .filter_map(|n| match n {
                HexNode::Byte(b) => Some(*b),
                _ => None,
            })
            .collect();
        return Ok(HexPattern::Literal(bytes));
    }

    let mut source = String::new();
    write_sequence(&nodes, &mut source);
    Ok(HexPattern::Regex {
        source,
        span: span(&nodes),
    })
}

/// Longest byte length a sequence can match. Unbounded jumps count their
/// minimum.
fn span(nodes: &[HexNode]) -> usize {
    nodes
        .iter()
        .map(|node| match node {
            HexNode::Byte(_) | HexNode::Masked { .. } => 1,
            HexNode::Jump { min, max } => max.unwrap_or(*min) as usize,
            HexNode::Alternation(branches) => branches.iter().map(|b| span(b)).max().unwrap_or(0),
        })
        .fold(0usize, usize::saturating_add)
}

impl HexParser<'_> {
    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().copied()
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn sequence(&mut self) -> Result<Vec<HexNode>, String> {
        let mut nodes = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '|' | ')' => break,
                '(' => {
                    self.chars.next();
                    nodes.push(self.alternation()?);
                }
                '[' => {
                    self.chars.next();
                    nodes.push(self.jump()?);
                }
                _ => nodes.push(self.byte()?),
            }
        }
        Ok(nodes)
    }

    fn alternation(&mut self) -> Result<HexNode, String> {
        let mut branches = Vec::new();
        loop {
            let branch = self.sequence()?;
            if branch.is_empty() {
                return Err("empty alternative in hex string".into());
            }
            branches.push(branch);
            match self.chars.next() {
                Some('|') => continue,
                Some(')') => break,
                _ => return Err("unterminated alternation in hex string".into()),
            }
        }
        Ok(HexNode::Alternation(branches))
    }

    fn jump(&mut self) -> Result<HexNode, String> {
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some(']') => break,
                Some(c) if c.is_ascii_digit() || c == '-' => text.push(c),
                Some(c) if c.is_whitespace() => {}
                Some(c) => return Err(format!("unexpected '{c}' in jump")),
                None => return Err("unterminated jump in hex string".into()),
            }
        }

        let parse = |s: &str| -> Result<Option<u32>, String> {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<u32>()
                    .map(Some)
                    .map_err(|_| format!("invalid jump bound '{s}'"))
            }
        };

        let (min, max) = match text.split_once('-') {
            Some((lo, hi)) => (parse(lo)?.unwrap_or(0), parse(hi)?),
            None => {
                let n = parse(&text)?.ok_or("empty jump")?;
                (n, Some(n))
            }
        };
        if max.is_some_and(|max| max < min) {
            return Err(format!("jump range [{min}-{}] is inverted", max.unwrap_or(0)));
        }
        Ok(HexNode::Jump { min, max })
    }

    fn byte(&mut self) -> Result<HexNode, String> {
        let hi = self.chars.next().ok_or("truncated hex byte")?;
        let lo = self
            .chars
            .next()
            .filter(|c| !c.is_whitespace())
            .ok_or("hex bytes must have two digits")?;

        let nibble = |c: char| -> Result<Option<u8>, String> {
            match c {
                '?' => Ok(None),
                c => c
                    .to_digit(16)
                    .map(|d| Some(d as u8))
                    .ok_or_else(|| format!("invalid hex digit '{c}'")),
            }
        };

        match (nibble(hi)?, nibble(lo)?) {
            (Some(h), Some(l)) => Ok(HexNode::Byte(h << 4 | l)),
            (Some(h), None) => Ok(HexNode::Masked {
                value: h << 4,
                mask: 0xF0,
            }),
            (None, Some(l)) => Ok(HexNode::Masked {
                value: l,
                mask: 0x0F,
            }),
            (None, None) => Ok(HexNode::Masked { value: 0, mask: 0 }),
        }
    }
}

fn write_sequence(nodes: &[HexNode], out: &mut String) {
    for node in nodes {
        match node {
            HexNode::Byte(b) => {
                let _ = write!(out, "\\x{b:02X}");
            }
            HexNode::Masked { mask: 0, .. } => out.push('.'),
            HexNode::Masked { value, mask: 0xF0 } => {
                let _ = write!(out, "[\\x{:02X}-\\x{:02X}]", value, value | 0x0F);
            }
            HexNode::Masked { value, mask } => {
                out.push('[');
                for high in 0..16u8 {
                    let b = (high << 4) | (value & mask);
                    let _ = write!(out, "\\x{b:02X}");
                }
                out.push(']');
            }
            HexNode::Jump { min, max } => {
                let _ = match max {
                    Some(max) if max == min => write!(out, ".{{{min}}}"),
                    Some(max) => write!(out, ".{{{min},{max}}}?"),
                    None => write!(out, ".{{{min},}}?"),
                };
            }
            HexNode::Alternation(branches) => {
                out.push_str("(?:");
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    write_sequence(branch, out);
                }
                out.push(')');
            }
        }
    }
}
