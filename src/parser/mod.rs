//! Rule source parser.
//!
//! Turns rule text into typed [`Rule`] values. Parsing is pure: pattern
//! references in conditions, including `$prefix*` groups and `them`, are
//! resolved here into pattern indices so evaluation never looks at names.

pub mod hex;
mod lexer;

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::error::{EngineError, Result};
use crate::rules::{
    Comparator, ConditionExpr, MetaValue, Modifiers, PatternDef, PatternPayload, Quantifier,
    Rule, SourceLocation,
};
use self::hex::HexPattern;
use self::lexer::{LexError, Lexer, RawPayload, Spanned, Token};

/// Words that cannot name a rule or tag.
static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "rule",
        "meta",
        "strings",
        "condition",
        "include",
        "import",
        "private",
        "global",
        "and",
        "or",
        "not",
        "any",
        "all",
        "none",
        "of",
        "them",
        "at",
        "in",
        "filesize",
        "count",
        "true",
        "false",
        "nocase",
        "wide",
        "ascii",
        "fullword",
    ]
    .into_iter()
    .collect()
});

/// Result of parsing one source text.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    /// `include "..."` directives, in order.
    pub includes: Vec<IncludeDirective>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub path: String,
    pub line: usize,
    pub column: usize,
}

/// Parse a source that must not contain `include` directives.
pub fn parse_rules(source_name: &str, text: &str) -> Result<Vec<Rule>> {
    let parsed = parse_source(source_name, text)?;
    if let Some(include) = parsed.includes.first() {
        return Err(EngineError::Syntax {
            source_name: source_name.to_string(),
            line: include.line,
            column: include.column,
            message: "include directives are only allowed in rule files".into(),
        });
    }
    Ok(parsed.rules)
}

/// Parse a source, collecting `include` directives for the caller to
/// resolve.
pub fn parse_source(source_name: &str, text: &str) -> Result<ParsedSource> {
    let mut parser = Parser {
        lexer: Lexer::new(text),
        source_name,
        peeked: None,
    };
    let mut parsed = ParsedSource::default();

    loop {
        if parser.peek_is(&Token::Eof)? {
            break;
        }
        if parser.peek_keyword("include")? {
            parser.next()?;
            let path = parser.next()?;
            match path.value {
                Token::Str(bytes) => parsed.includes.push(IncludeDirective {
                    path: String::from_utf8_lossy(&bytes).into_owned(),
                    line: path.line,
                    column: path.column,
                }),
                other => {
                    return Err(parser.unexpected(&other, path.line, path.column, "include path"))
                }
            }
        } else if parser.peek_keyword("rule")? {
            let rule = parser.rule()?;
            parsed.rules.push(rule);
        } else {
            let tok = parser.next()?;
            return Err(parser.unexpected(&tok.value, tok.line, tok.column, "'rule'"));
        }
    }

    Ok(parsed)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    source_name: &'a str,
    peeked: Option<Spanned<Token>>,
}

impl<'a> Parser<'a> {
    fn syntax(&self, line: usize, column: usize, message: impl Into<String>) -> EngineError {
        EngineError::Syntax {
            source_name: self.source_name.to_string(),
            line,
            column,
            message: message.into(),
        }
    }

    fn lex_error(&self, e: LexError) -> EngineError {
        self.syntax(e.line, e.column, e.message)
    }

    fn unexpected(&self, tok: &Token, line: usize, column: usize, expected: &str) -> EngineError {
        self.syntax(
            line,
            column,
            format!("expected {expected}, found {}", tok.describe()),
        )
    }

    fn peek(&mut self) -> Result<&Spanned<Token>> {
        if self.peeked.is_none() {
            let tok = self.lexer.next_token().map_err(|e| self.lex_error(e))?;
            self.peeked = Some(tok);
        }
        match self.peeked.as_ref() {
            Some(tok) => Ok(tok),
            None => unreachable!("peeked token was just filled"),
        }
    }

    fn next(&mut self) -> Result<Spanned<Token>> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.lexer.next_token().map_err(|e| self.lex_error(e)),
        }
    }

    fn peek_is(&mut self, expected: &Token) -> Result<bool> {
        Ok(&self.peek()?.value == expected)
    }

    fn peek_keyword(&mut self, keyword: &str) -> Result<bool> {
        Ok(matches!(&self.peek()?.value, Token::Ident(w) if w == keyword))
    }

    fn expect(&mut self, expected: Token) -> Result<Spanned<Token>> {
        let tok = self.next()?;
        if tok.value != expected {
            return Err(self.unexpected(&tok.value, tok.line, tok.column, &expected.describe()));
        }
        Ok(tok)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let tok = self.next()?;
        match &tok.value {
            Token::Ident(w) if w == keyword => Ok(()),
            other => Err(self.unexpected(other, tok.line, tok.column, &format!("'{keyword}'"))),
        }
    }

    fn expect_int(&mut self) -> Result<u64> {
        let tok = self.next()?;
        match tok.value {
            Token::Int(n) => Ok(n),
            other => Err(self.unexpected(&other, tok.line, tok.column, "integer")),
        }
    }

    fn identifier(&mut self, what: &str) -> Result<Spanned<String>> {
        let tok = self.next()?;
        match tok.value {
            Token::Ident(name) if !RESERVED.contains(name.as_str()) => Ok(Spanned {
                value: name,
                line: tok.line,
                column: tok.column,
            }),
            Token::Ident(name) => Err(self.syntax(
                tok.line,
                tok.column,
                format!("'{name}' is a reserved word and cannot be used as {what}"),
            )),
            other => Err(self.unexpected(&other, tok.line, tok.column, what)),
        }
    }

    fn rule(&mut self) -> Result<Rule> {
        let start = self.next()?;
        let name = self.identifier("a rule name")?;

        let mut tags: Vec<String> = Vec::new();
        if self.peek_is(&Token::Colon)? {
            self.next()?;
            while matches!(self.peek()?.value, Token::Ident(_)) {
                let tag = self.identifier("a tag")?;
                if tags.contains(&tag.value) {
                    return Err(self.syntax(
                        tag.line,
                        tag.column,
                        format!("duplicate tag '{}'", tag.value),
                    ));
                }
                tags.push(tag.value);
            }
            if tags.is_empty() {
                let tok = self.next()?;
                return Err(self.unexpected(&tok.value, tok.line, tok.column, "tag"));
            }
        }

        self.expect(Token::LBrace)?;

        let mut metadata = Vec::new();
        let mut patterns = Vec::new();

        if self.peek_keyword("meta")? {
            self.next()?;
            self.expect(Token::Colon)?;
            metadata = self.meta_entries()?;
        }
        if self.peek_keyword("strings")? {
            let section = self.next()?;
            self.expect(Token::Colon)?;
            patterns = self.pattern_defs(&name.value)?;
            if patterns.is_empty() {
                return Err(self.syntax(section.line, section.column, "empty strings section"));
            }
        }
        if !self.peek_keyword("condition")? {
            let tok = self.next()?;
            let expected = if tok.value == Token::RBrace {
                "'condition' section before '}'"
            } else {
                "'meta', 'strings' or 'condition'"
            };
            return Err(self.unexpected(&tok.value, tok.line, tok.column, expected));
        }
        self.next()?;
        self.expect(Token::Colon)?;

        let scope = RuleScope {
            rule: &name.value,
            patterns: &patterns,
        };
        let condition = self.or_expr(&scope)?;
        self.expect(Token::RBrace)?;

        warn_unreferenced(&name.value, &patterns, &condition);

        Ok(Rule {
            name: name.value,
            tags,
            metadata,
            patterns,
            condition,
            location: SourceLocation {
                source_name: self.source_name.to_string(),
                line: start.line,
                column: start.column,
            },
        })
    }

    fn meta_entries(&mut self) -> Result<Vec<(String, MetaValue)>> {
        let mut entries: Vec<(String, MetaValue)> = Vec::new();
        loop {
            let is_key = matches!(
                &self.peek()?.value,
                Token::Ident(w) if w != "strings" && w != "condition"
            );
            if !is_key {
                return Ok(entries);
            }
            let key = self.next()?;
            let Token::Ident(key_name) = key.value else {
                unreachable!("peeked an identifier")
            };
            if entries.iter().any(|(k, _)| *k == key_name) {
                return Err(self.syntax(
                    key.line,
                    key.column,
                    format!("duplicate metadata key '{key_name}'"),
                ));
            }
            self.expect(Token::Assign)?;

            let tok = self.next()?;
            let value = match tok.value {
                Token::Str(bytes) => match String::from_utf8(bytes) {
                    Ok(s) => MetaValue::String(s),
                    Err(_) => {
                        return Err(self.syntax(
                            tok.line,
                            tok.column,
                            "metadata strings must be valid UTF-8",
                        ))
                    }
                },
                Token::Int(n) => {
                    MetaValue::Integer(self.to_i64(i128::from(n), tok.line, tok.column)?)
                }
                Token::Minus => {
                    let n = self.expect_int()?;
                    MetaValue::Integer(self.to_i64(-i128::from(n), tok.line, tok.column)?)
                }
                Token::Ident(w) if w == "true" => MetaValue::Boolean(true),
                Token::Ident(w) if w == "false" => MetaValue::Boolean(false),
                other => {
                    return Err(self.unexpected(&other, tok.line, tok.column, "metadata value"))
                }
            };
            entries.push((key_name, value));
        }
    }

    fn to_i64(&self, n: i128, line: usize, column: usize) -> Result<i64> {
        i64::try_from(n).map_err(|_| self.syntax(line, column, "metadata integer out of range"))
    }

    fn pattern_defs(&mut self, rule: &str) -> Result<Vec<PatternDef>> {
        let mut patterns: Vec<PatternDef> = Vec::new();
        while matches!(self.peek()?.value, Token::PatternId(_)) {
            let tok = self.next()?;
            let Token::PatternId(identifier) = tok.value else {
                unreachable!("peeked a pattern identifier")
            };
            if identifier == "$" {
                return Err(self.syntax(
                    tok.line,
                    tok.column,
                    "anonymous patterns are not supported; give the pattern a name",
                ));
            }
            if patterns.iter().any(|p| p.identifier == identifier) {
                return Err(EngineError::DuplicateIdentifier {
                    source_name: self.source_name.to_string(),
                    rule: rule.to_string(),
                    identifier,
                    line: tok.line,
                    column: tok.column,
                });
            }
            self.expect(Token::Assign)?;

            // `peeked` is empty after `expect`, so the lexer sits right
            // before the payload.
            let raw = self.lexer.payload().map_err(|e| self.lex_error(e))?;
            let payload = match raw.value {
                RawPayload::Text(bytes) => PatternPayload::Text { bytes },
                RawPayload::Hex(body) => match self::hex::parse_hex(&body) {
                    Ok(HexPattern::Literal(bytes)) => PatternPayload::Bytes { bytes },
                    Ok(HexPattern::Regex { source, span }) => {
                        PatternPayload::HexRegex { source, span }
                    }
                    Err(message) => return Err(self.syntax(raw.line, raw.column, message)),
                },
                RawPayload::Regex {
                    source,
                    case_insensitive,
                    dot_all,
                } => PatternPayload::Regex {
                    source,
                    case_insensitive,
                    dot_all,
                },
            };

            let modifiers = self.modifiers(&payload)?;
            patterns.push(PatternDef {
                identifier,
                payload,
                modifiers,
                line: tok.line,
                column: tok.column,
            });
        }
        Ok(patterns)
    }

    fn modifiers(&mut self, payload: &PatternPayload) -> Result<Modifiers> {
        let mut modifiers = Modifiers::default();
        loop {
            let name = match &self.peek()?.value {
                Token::Ident(w)
                    if matches!(
                        w.as_str(),
                        "nocase" | "wide" | "ascii" | "fullword" | "private"
                    ) =>
                {
                    w.clone()
                }
                _ => return Ok(modifiers),
            };
            let tok = self.next()?;

            let hex = matches!(
                payload,
                PatternPayload::Bytes { .. } | PatternPayload::HexRegex { .. }
            );
            if hex && name != "private" {
                return Err(self.syntax(
                    tok.line,
                    tok.column,
                    format!("modifier '{name}' is not allowed on hex strings"),
                ));
            }

            let slot = match name.as_str() {
                "nocase" => &mut modifiers.nocase,
                "wide" => &mut modifiers.wide,
                "ascii" => &mut modifiers.ascii,
                "fullword" => &mut modifiers.fullword,
                _ => &mut modifiers.private,
            };
            if *slot {
                return Err(self.syntax(
                    tok.line,
                    tok.column,
                    format!("duplicate modifier '{name}'"),
                ));
            }
            *slot = true;
        }
    }

    fn or_expr(&mut self, scope: &RuleScope<'_>) -> Result<ConditionExpr> {
        let mut lhs = self.and_expr(scope)?;
        while self.peek_keyword("or")? {
            self.next()?;
            let rhs = self.and_expr(scope)?;
            lhs = ConditionExpr::or(lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self, scope: &RuleScope<'_>) -> Result<ConditionExpr> {
        let mut lhs = self.not_expr(scope)?;
        while self.peek_keyword("and")? {
            self.next()?;
            let rhs = self.not_expr(scope)?;
            lhs = ConditionExpr::and(lhs, rhs);
        }
        Ok(lhs)
    }

    fn not_expr(&mut self, scope: &RuleScope<'_>) -> Result<ConditionExpr> {
        if self.peek_keyword("not")? {
            self.next()?;
            let inner = self.not_expr(scope)?;
            return Ok(ConditionExpr::not(inner));
        }
        self.primary(scope)
    }

    fn comparator(&mut self) -> Result<Comparator> {
        let tok = self.next()?;
        Ok(match tok.value {
            Token::Eq | Token::Assign => Comparator::Eq,
            Token::Ne => Comparator::Ne,
            Token::Gt => Comparator::Gt,
            Token::Ge => Comparator::Ge,
            Token::Lt => Comparator::Lt,
            Token::Le => Comparator::Le,
            other => return Err(self.unexpected(&other, tok.line, tok.column, "comparison operator")),
        })
    }

    fn primary(&mut self, scope: &RuleScope<'_>) -> Result<ConditionExpr> {
        let tok = self.next()?;
        let (line, column) = (tok.line, tok.column);
        match tok.value {
            Token::LParen => {
                let inner = self.or_expr(scope)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::PatternId(id) => {
                let index = scope.resolve(self.source_name, &id, line, column)?;
                if self.peek_keyword("at")? {
                    self.next()?;
                    let offset = self.expect_int()?;
                    Ok(ConditionExpr::At { index, offset })
                } else if self.peek_keyword("in")? {
                    self.next()?;
                    self.expect(Token::LParen)?;
                    let start = self.expect_int()?;
                    self.expect(Token::DotDot)?;
                    let end = self.expect_int()?;
                    self.expect(Token::RParen)?;
                    if end < start {
                        return Err(self.syntax(line, column, "range upper bound is below lower bound"));
                    }
                    Ok(ConditionExpr::In { index, start, end })
                } else {
                    Ok(ConditionExpr::Pattern { index })
                }
            }
            Token::PatternWildcard(prefix) => {
                let members = scope.resolve_group(self.source_name, &prefix, line, column)?;
                Ok(ConditionExpr::Group { prefix, members })
            }
            Token::PatternCount(id) => {
                let index = scope.resolve(self.source_name, &id, line, column)?;
                let op = self.comparator()?;
                let value = self.expect_int()?;
                Ok(ConditionExpr::Count {
                    patterns: vec![index],
                    op,
                    value,
                })
            }
            Token::Int(n) => {
                self.expect_keyword("of")?;
                let set = self.pattern_set(scope)?;
                if n > set.len() as u64 {
                    return Err(self.syntax(
                        line,
                        column,
                        format!("{n} of a set with only {} patterns can never match", set.len()),
                    ));
                }
                Ok(ConditionExpr::Of {
                    quantifier: Quantifier::AtLeast(n),
                    set,
                })
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(ConditionExpr::Bool { value: true }),
                "false" => Ok(ConditionExpr::Bool { value: false }),
                "filesize" => {
                    let op = self.comparator()?;
                    let value = self.expect_int()?;
                    Ok(ConditionExpr::Filesize { op, value })
                }
                "count" => {
                    self.expect(Token::LParen)?;
                    let target = self.next()?;
                    let patterns = match target.value {
                        Token::PatternId(id) => {
                            vec![scope.resolve(self.source_name, &id, target.line, target.column)?]
                        }
                        Token::PatternWildcard(prefix) => scope.resolve_group(
                            self.source_name,
                            &prefix,
                            target.line,
                            target.column,
                        )?,
                        other => {
                            return Err(self.unexpected(
                                &other,
                                target.line,
                                target.column,
                                "pattern reference",
                            ))
                        }
                    };
                    self.expect(Token::RParen)?;
                    let op = self.comparator()?;
                    let value = self.expect_int()?;
                    Ok(ConditionExpr::Count {
                        patterns,
                        op,
                        value,
                    })
                }
                "any" | "all" | "none" => {
                    let quantifier = match word.as_str() {
                        "any" => Quantifier::Any,
                        "all" => Quantifier::All,
                        _ => Quantifier::None,
                    };
                    self.expect_keyword("of")?;
                    let set = self.pattern_set(scope)?;
                    Ok(ConditionExpr::Of { quantifier, set })
                }
                _ => Err(self.syntax(
                    line,
                    column,
                    format!("expected condition expression, found '{word}'"),
                )),
            },
            other => Err(self.unexpected(&other, line, column, "condition expression")),
        }
    }

    /// `them` or `( $a, $b*, ... )`, deduplicated in first-seen order.
    fn pattern_set(&mut self, scope: &RuleScope<'_>) -> Result<Vec<usize>> {
        let tok = self.next()?;
        match tok.value {
            Token::Ident(w) if w == "them" => {
                if scope.patterns.is_empty() {
                    return Err(scope.unresolved(self.source_name, "them", tok.line, tok.column));
                }
                Ok((0..scope.patterns.len()).collect())
            }
            Token::LParen => {
                let mut set: Vec<usize> = Vec::new();
                loop {
                    let item = self.next()?;
                    let members = match item.value {
                        Token::PatternId(id) => {
                            vec![scope.resolve(self.source_name, &id, item.line, item.column)?]
                        }
                        Token::PatternWildcard(prefix) => {
                            scope.resolve_group(self.source_name, &prefix, item.line, item.column)?
                        }
                        other => {
                            return Err(self.unexpected(
                                &other,
                                item.line,
                                item.column,
                                "pattern reference",
                            ))
                        }
                    };
                    for m in members {
                        if !set.contains(&m) {
                            set.push(m);
                        }
                    }
                    let sep = self.next()?;
                    match sep.value {
                        Token::Comma => continue,
                        Token::RParen => break,
                        other => {
                            return Err(self.unexpected(&other, sep.line, sep.column, "',' or ')'"))
                        }
                    }
                }
                Ok(set)
            }
            other => Err(self.unexpected(&other, tok.line, tok.column, "'them' or '('")),
        }
    }
}

/// Patterns visible to a rule's condition.
struct RuleScope<'a> {
    rule: &'a str,
    patterns: &'a [PatternDef],
}

impl RuleScope<'_> {
    fn resolve(&self, source_name: &str, id: &str, line: usize, column: usize) -> Result<usize> {
        self.patterns
            .iter()
            .position(|p| p.identifier == id)
            .ok_or_else(|| self.unresolved(source_name, id, line, column))
    }

    fn resolve_group(
        &self,
        source_name: &str,
        prefix: &str,
        line: usize,
        column: usize,
    ) -> Result<Vec<usize>> {
        let members: Vec<usize> = self
            .patterns
            .iter()
            .enumerate()
            .filter(|(_, p)| p.identifier.starts_with(prefix))
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return Err(self.unresolved(source_name, &format!("{prefix}*"), line, column));
        }
        Ok(members)
    }

    fn unresolved(&self, source_name: &str, id: &str, line: usize, column: usize) -> EngineError {
        let hint = self
            .patterns
            .iter()
            .map(|p| (levenshtein::levenshtein(id, &p.identifier), &p.identifier))
            .filter(|(distance, _)| *distance <= 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| format!("; did you mean {candidate}?"))
            .unwrap_or_default();

        EngineError::UnresolvedReference {
            source_name: source_name.to_string(),
            rule: self.rule.to_string(),
            identifier: id.to_string(),
            line,
            column,
            hint,
        }
    }
}

fn warn_unreferenced(rule: &str, patterns: &[PatternDef], condition: &ConditionExpr) {
    let mut used = vec![false; patterns.len()];
    condition.mark_referenced(&mut used);
    for (pattern, used) in patterns.iter().zip(used) {
        if !used {
            tracing::warn!(
                rule = %rule,
                pattern = %pattern.identifier,
                "pattern is never referenced by the condition"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LGPL: &str = r#"
rule lgpl21_or_later : license lgpl
{
    meta:
        description = "LGPL 2.1 or later"
        weight = 10
        offset = -1
        enabled = true

    strings:
        $string1 = "LGPL-2.1-or-later"
        $string2 = "LGPL-2.1+"
        $string3 = "License LGPLv2.1+: GNU Lesser GPL version 2.1 or later <https://gnu.org/licenses/lgpl.html>"

    condition:
        any of ($string*)
}
"#;

    fn parse_one(src: &str) -> Rule {
        let mut rules = parse_rules("test.yara", src).unwrap();
        assert_eq!(rules.len(), 1);
        rules.remove(0)
    }

    #[test]
    fn metadata_integers_cover_the_i64_range() {
        let rule = parse_one(
            "rule r { meta: lo = -9223372036854775808 hi = 9223372036854775807 condition: true }",
        );
        assert_eq!(
            rule.metadata,
            vec![
                ("lo".to_string(), MetaValue::Integer(i64::MIN)),
                ("hi".to_string(), MetaValue::Integer(i64::MAX)),
            ]
        );

        for text in [
            "rule r { meta: lo = -9223372036854775809 condition: true }",
            "rule r { meta: hi = 9223372036854775808 condition: true }",
        ] {
            let err = parse_rules("test.yara", text).unwrap_err();
            assert!(matches!(err, EngineError::Syntax { .. }), "{text}");
        }
    }

    #[test]
    fn parses_sample_license_rule() {
        let rule = parse_one(LGPL);
        assert_eq!(rule.name, "lgpl21_or_later");
        assert_eq!(rule.tags, vec!["license", "lgpl"]);
        assert_eq!(
            rule.metadata,
            vec![
                (
                    "description".to_string(),
                    MetaValue::String("LGPL 2.1 or later".into())
                ),
                ("weight".to_string(), MetaValue::Integer(10)),
                ("offset".to_string(), MetaValue::Integer(-1)),
                ("enabled".to_string(), MetaValue::Boolean(true)),
            ]
        );
        assert_eq!(rule.patterns.len(), 3);
        assert_eq!(
            rule.patterns[1].payload,
            PatternPayload::Text {
                bytes: b"LGPL-2.1+".to_vec()
            }
        );
        assert_eq!(
            rule.condition,
            ConditionExpr::Of {
                quantifier: Quantifier::Any,
                set: vec![0, 1, 2],
            }
        );
        assert_eq!(rule.location.line, 2);
    }

    #[test]
    fn bare_wildcard_group_is_materialized() {
        let rule = parse_one(
            r#"rule r { strings: $string1 = "a" $other = "b" $string2 = "c" condition: $string* }"#,
        );
        assert_eq!(
            rule.condition,
            ConditionExpr::Group {
                prefix: "$string".into(),
                members: vec![0, 2],
            }
        );
    }

    #[test]
    fn operator_precedence() {
        let rule = parse_one(
            r#"rule r { strings: $a = "a" $b = "b" $c = "c" condition: $a or $b and not $c }"#,
        );
        let expected = ConditionExpr::or(
            ConditionExpr::Pattern { index: 0 },
            ConditionExpr::and(
                ConditionExpr::Pattern { index: 1 },
                ConditionExpr::not(ConditionExpr::Pattern { index: 2 }),
            ),
        );
        assert_eq!(rule.condition, expected);
    }

    #[test]
    fn counts_offsets_and_filesize() {
        let rule = parse_one(
            r#"rule r {
                strings: $a = "a" $b = "b"
                condition: #a >= 2 and count($b) == 1 and $a at 0 and $b in (10..20) and filesize < 1KB
            }"#,
        );
        let mut used = vec![false; 2];
        rule.condition.mark_referenced(&mut used);
        assert_eq!(used, vec![true, true]);
        let text = serde_json::to_string(&rule.condition).unwrap();
        assert!(text.contains("\"filesize\""));
        assert!(text.contains("1024"));
    }

    #[test]
    fn modifiers_and_payload_kinds() {
        let rule = parse_one(
            r#"rule r {
                strings:
                    $t = "MZ" nocase wide ascii fullword
                    $h = { 4D 5A 90 00 } private
                    $w = { 4D ?? 90 }
                    $r = /GPL-[23]\.0/i
                condition: all of them
            }"#,
        );
        let t = &rule.patterns[0].modifiers;
        assert!(t.nocase && t.wide && t.ascii && t.fullword && !t.private);
        assert_eq!(
            rule.patterns[1].payload,
            PatternPayload::Bytes {
                bytes: vec![0x4D, 0x5A, 0x90, 0x00]
            }
        );
        assert!(rule.patterns[1].modifiers.private);
        assert!(matches!(
            rule.patterns[2].payload,
            PatternPayload::HexRegex { .. }
        ));
        assert_eq!(
            rule.patterns[3].payload,
            PatternPayload::Regex {
                source: r"GPL-[23]\.0".into(),
                case_insensitive: true,
                dot_all: false,
            }
        );
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let err = parse_rules(
            "dup.yara",
            "rule r {\n strings:\n  $a = \"x\"\n  $a = \"y\"\n condition: $a }",
        )
        .unwrap_err();
        match err {
            EngineError::DuplicateIdentifier {
                rule,
                identifier,
                line,
                ..
            } => {
                assert_eq!(rule, "r");
                assert_eq!(identifier, "$a");
                assert_eq!(line, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unresolved_reference_suggests_closest_name() {
        let err = parse_rules(
            "t.yara",
            r#"rule r { strings: $string1 = "x" condition: $strin1 }"#,
        )
        .unwrap_err();
        match err {
            EngineError::UnresolvedReference {
                identifier, hint, ..
            } => {
                assert_eq!(identifier, "$strin1");
                assert!(hint.contains("$string1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unresolved_group_is_rejected() {
        let err = parse_rules(
            "t.yara",
            r#"rule r { strings: $a = "x" condition: any of ($string*) }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnresolvedReference { ref identifier, .. } if identifier == "$string*"
        ));
    }

    #[test]
    fn them_without_patterns_is_rejected() {
        let err = parse_rules("t.yara", "rule r { condition: any of them }").unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedReference { .. }));
    }

    #[test]
    fn syntax_errors_carry_location() {
        let err = parse_rules("bad.yara", "rule r {\n  condition:\n    $a and\n}").unwrap_err();
        // `$a` is resolved before the dangling `and` is noticed.
        assert!(matches!(err, EngineError::UnresolvedReference { line: 3, .. }));

        let err = parse_rules("bad.yara", "rule r {\n  condition:\n    true and\n}").unwrap_err();
        match err {
            EngineError::Syntax {
                source_name,
                line,
                column,
                ..
            } => {
                assert_eq!(source_name, "bad.yara");
                assert_eq!((line, column), (4, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_condition_is_a_syntax_error() {
        let err = parse_rules("t.yara", r#"rule r { strings: $a = "x" }"#).unwrap_err();
        assert!(matches!(err, EngineError::Syntax { .. }));
    }

    #[test]
    fn reserved_words_cannot_name_rules() {
        assert!(parse_rules("t.yara", "rule condition { condition: true }").is_err());
    }

    #[test]
    fn hex_modifiers_are_limited_to_private() {
        let err = parse_rules(
            "t.yara",
            "rule r { strings: $h = { 00 01 } nocase condition: $h }",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Syntax { .. }));
    }

    #[test]
    fn quantifier_larger_than_set_is_rejected() {
        let err = parse_rules(
            "t.yara",
            r#"rule r { strings: $a = "x" $b = "y" condition: 3 of ($a, $b) }"#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Syntax { .. }));
    }

    #[test]
    fn includes_are_collected() {
        let parsed = parse_source(
            "main.yara",
            "include \"common.yara\"\nrule r { condition: true }",
        )
        .unwrap();
        assert_eq!(
            parsed.includes,
            vec![IncludeDirective {
                path: "common.yara".into(),
                line: 1,
                column: 9,
            }]
        );
        assert_eq!(parsed.rules.len(), 1);
        assert!(parse_rules("main.yara", "include \"x.yara\"").is_err());
    }

    #[test]
    fn set_members_are_deduplicated() {
        let rule = parse_one(
            r#"rule r { strings: $a1 = "x" $a2 = "y" condition: all of ($a1, $a*, $a2) }"#,
        );
        assert_eq!(
            rule.condition,
            ConditionExpr::Of {
                quantifier: Quantifier::All,
                set: vec![0, 1],
            }
        );
    }
}
