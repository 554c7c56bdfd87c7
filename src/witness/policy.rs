// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation

//! Witness quorum policy.
//!
//! Grammar (`AND` binds tighter than `OR`, keywords are case-insensitive):
//!
//! ```text
//! expr   := term ("OR" term)*
//! term   := factor ("AND" factor)*
//! factor := "(" expr ")"
//!         | "MinPercent" "(" number "," category ")"
//!         | "OutOf" "(" number "," category ")"
//! category := "batch" | "system"
//! ```
//!
//! An empty policy requires every selected witness to respond.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use super::{WitnessProof, WitnessSet, WitnessType};
use crate::clock::Clock;
use crate::store::KeyValueStore;

/// Key holding the policy text in the durable config store
pub const POLICY_KEY: &str = "config:witness-policy";

/// Witness policy errors
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid witness policy '{policy}': {reason}")]
    Parse { policy: String, reason: String },

    #[error("Witness policy cannot be satisfied: {0}")]
    Unsatisfiable(String),

    #[error("Policy store error: {0}")]
    Store(String),
}

/// Result of evaluating a policy against the proofs received so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Quorum reached
    Satisfied,
    /// More proofs may still satisfy the policy
    Pending,
    /// No set of proofs from the selected witnesses can satisfy the policy
    Unsatisfiable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    MinPercent(u32, WitnessType),
    OutOf(usize, WitnessType),
    And(Box<Rule>, Box<Rule>),
    Or(Box<Rule>, Box<Rule>),
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::MinPercent(p, t) => write!(f, "MinPercent({},{})", p, t),
            Rule::OutOf(n, t) => write!(f, "OutOf({},{})", n, t),
            Rule::And(l, r) => write!(f, "({} AND {})", l, r),
            Rule::Or(l, r) => write!(f, "({} OR {})", l, r),
        }
    }
}

/// Parsed witness policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessPolicy {
    rule: Option<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(u64),
    Open,
    Close,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let number = digits
                    .parse::<u64>()
                    .map_err(|e| format!("bad number '{}': {}", digits, e))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(format!("expected {:?}, found {:?}", expected, t)),
            None => Err(format!("expected {:?}, found end of policy", expected)),
        }
    }

    fn keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(i)) if i.eq_ignore_ascii_case(word))
    }

    fn expr(&mut self) -> Result<Rule, String> {
        let mut rule = self.term()?;
        while self.keyword("OR") {
            self.next();
            rule = Rule::Or(Box::new(rule), Box::new(self.term()?));
        }
        Ok(rule)
    }

    fn term(&mut self) -> Result<Rule, String> {
        let mut rule = self.factor()?;
        while self.keyword("AND") {
            self.next();
            rule = Rule::And(Box::new(rule), Box::new(self.factor()?));
        }
        Ok(rule)
    }

    fn factor(&mut self) -> Result<Rule, String> {
        match self.next() {
            Some(Token::Open) => {
                let rule = self.expr()?;
                self.expect(Token::Close)?;
                Ok(rule)
            }
            Some(Token::Ident(name)) => {
                self.expect(Token::Open)?;
                let number = match self.next() {
                    Some(Token::Number(n)) => n,
                    other => return Err(format!("expected number in {}, found {:?}", name, other)),
                };
                self.expect(Token::Comma)?;
                let witness_type = match self.next() {
                    Some(Token::Ident(t)) if t.eq_ignore_ascii_case("batch") => WitnessType::Batch,
                    Some(Token::Ident(t)) if t.eq_ignore_ascii_case("system") => WitnessType::System,
                    other => return Err(format!("expected batch or system, found {:?}", other)),
                };
                self.expect(Token::Close)?;

                if name.eq_ignore_ascii_case("MinPercent") {
                    if number > 100 {
                        return Err(format!("percentage {} is above 100", number));
                    }
                    Ok(Rule::MinPercent(number as u32, witness_type))
                } else if name.eq_ignore_ascii_case("OutOf") {
                    Ok(Rule::OutOf(number as usize, witness_type))
                } else {
                    Err(format!("unknown rule '{}'", name))
                }
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of policy".to_string()),
        }
    }
}

struct Tally {
    selected: usize,
    received: usize,
}

impl Rule {
    fn outcome(&self, tally: &dyn Fn(WitnessType) -> Tally) -> PolicyOutcome {
        match self {
            Rule::MinPercent(percent, witness_type) => {
                if *percent == 0 {
                    return PolicyOutcome::Satisfied;
                }
                let t = tally(*witness_type);
                if t.selected == 0 {
                    return PolicyOutcome::Unsatisfiable(format!(
                        "no {} witnesses selected for {}",
                        witness_type, self
                    ));
                }
                if t.received * 100 >= *percent as usize * t.selected {
                    PolicyOutcome::Satisfied
                } else {
                    PolicyOutcome::Pending
                }
            }
            Rule::OutOf(count, witness_type) => {
                if *count == 0 {
                    return PolicyOutcome::Satisfied;
                }
                let t = tally(*witness_type);
                if t.selected < *count {
                    return PolicyOutcome::Unsatisfiable(format!(
                        "only {} {} witnesses selected for {}",
                        t.selected, witness_type, self
                    ));
                }
                if t.received >= *count {
                    PolicyOutcome::Satisfied
                } else {
                    PolicyOutcome::Pending
                }
            }
            Rule::And(left, right) => match (left.outcome(tally), right.outcome(tally)) {
                (PolicyOutcome::Unsatisfiable(reason), _) | (_, PolicyOutcome::Unsatisfiable(reason)) => {
                    PolicyOutcome::Unsatisfiable(reason)
                }
                (PolicyOutcome::Satisfied, PolicyOutcome::Satisfied) => PolicyOutcome::Satisfied,
                _ => PolicyOutcome::Pending,
            },
            Rule::Or(left, right) => match (left.outcome(tally), right.outcome(tally)) {
                (PolicyOutcome::Satisfied, _) | (_, PolicyOutcome::Satisfied) => PolicyOutcome::Satisfied,
                (PolicyOutcome::Unsatisfiable(l), PolicyOutcome::Unsatisfiable(r)) => {
                    PolicyOutcome::Unsatisfiable(format!("{}; {}", l, r))
                }
                _ => PolicyOutcome::Pending,
            },
        }
    }
}

impl WitnessPolicy {
    /// Parse policy text
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let parse_error = |reason: String| PolicyError::Parse {
            policy: text.to_string(),
            reason,
        };

        if text.trim().is_empty() {
            return Ok(Self { rule: None });
        }

        let tokens = tokenize(text).map_err(parse_error)?;
        let mut parser = Parser { tokens, pos: 0 };
        let rule = parser.expr().map_err(parse_error)?;

        if let Some(extra) = parser.peek() {
            return Err(parse_error(format!("unexpected trailing {:?}", extra)));
        }

        Ok(Self { rule: Some(rule) })
    }

    /// Classify the proofs received so far. Only proofs for the selected
    /// witnesses count, and each witness counts once.
    pub fn outcome(&self, proofs: &[WitnessProof], selected: &WitnessSet) -> PolicyOutcome {
        let responded: HashSet<&str> = proofs
            .iter()
            .filter(|p| selected.contains(&p.witness))
            .map(|p| p.witness.as_str())
            .collect();

        match &self.rule {
            None => {
                if selected.is_empty() {
                    PolicyOutcome::Unsatisfiable("no witnesses selected".to_string())
                } else if responded.len() == selected.len() {
                    PolicyOutcome::Satisfied
                } else {
                    PolicyOutcome::Pending
                }
            }
            Some(rule) => {
                let tally = |witness_type: WitnessType| Tally {
                    selected: selected.count(witness_type),
                    received: selected
                        .of_type(witness_type)
                        .filter(|w| responded.contains(w.id.as_str()))
                        .count(),
                };
                rule.outcome(&tally)
            }
        }
    }

    /// Whether the proofs satisfy the policy; an unsatisfiable selection is
    /// an error rather than `false`
    pub fn evaluate(&self, proofs: &[WitnessProof], selected: &WitnessSet) -> Result<bool, PolicyError> {
        match self.outcome(proofs, selected) {
            PolicyOutcome::Satisfied => Ok(true),
            PolicyOutcome::Pending => Ok(false),
            PolicyOutcome::Unsatisfiable(reason) => Err(PolicyError::Unsatisfiable(reason)),
        }
    }
}

impl fmt::Display for WitnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "{}", rule),
            None => write!(f, "<all witnesses>"),
        }
    }
}

/// Loads the policy from the config store and caches the parsed form for a
/// bounded lifetime
pub struct PolicyProvider {
    store: Arc<dyn KeyValueStore>,
    default_policy: String,
    cache_ttl: Duration,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<(Arc<WitnessPolicy>, DateTime<Utc>)>>,
}

impl PolicyProvider {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        default_policy: &str,
        cache_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            default_policy: default_policy.to_string(),
            cache_ttl,
            clock,
            cached: RwLock::new(None),
        }
    }

    /// Current policy. Parse errors are returned, never replaced by a default.
    pub async fn policy(&self) -> Result<Arc<WitnessPolicy>, PolicyError> {
        let now = self.clock.now();
        let cached = self.cached.read().clone();
        if let Some((policy, loaded_at)) = cached {
            if now - loaded_at < self.cache_ttl {
                return Ok(policy);
            }
        }

        let text = match self.store.get(POLICY_KEY).await {
            Ok(Some(versioned)) => String::from_utf8(versioned.value)
                .map_err(|e| PolicyError::Store(format!("policy is not UTF-8: {}", e)))?,
            Ok(None) => self.default_policy.clone(),
            Err(e) => return Err(PolicyError::Store(e.to_string())),
        };

        let policy = Arc::new(WitnessPolicy::parse(&text)?);
        debug!("Loaded witness policy: {}", policy);

        *self.cached.write() = Some((policy.clone(), now));
        Ok(policy)
    }

    /// Validate and persist new policy text
    pub async fn set_policy(&self, text: &str) -> Result<(), PolicyError> {
        let policy = Arc::new(WitnessPolicy::parse(text)?);

        self.store
            .put(POLICY_KEY, text.as_bytes().to_vec())
            .await
            .map_err(|e| PolicyError::Store(e.to_string()))?;

        info!("Witness policy updated: {}", policy);
        *self.cached.write() = Some((policy, self.clock.now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::ContentHash;
    use crate::clock::{secs, ManualClock};
    use crate::store::MemoryStore;
    use crate::witness::Witness;

    fn proof(witness: &str) -> WitnessProof {
        WitnessProof {
            anchor_id: ContentHash::compute(b"h1"),
            witness: witness.to_string(),
            signature: String::new(),
            created: Utc::now(),
        }
    }

    fn selection() -> WitnessSet {
        WitnessSet::new(vec![
            Witness::batch("https://b1"),
            Witness::batch("https://b2"),
            Witness::system("https://s1"),
        ])
    }

    #[test]
    fn test_parse_precedence() {
        let policy = WitnessPolicy::parse("MinPercent(50,batch) OR OutOf(1,system) AND MinPercent(100,batch)").unwrap();
        assert_eq!(
            policy.to_string(),
            "(MinPercent(50,batch) OR (OutOf(1,system) AND MinPercent(100,batch)))"
        );

        let policy = WitnessPolicy::parse("(minpercent(50, batch) or outof(1, system)) and MinPercent(100,system)").unwrap();
        assert_eq!(
            policy.to_string(),
            "((MinPercent(50,batch) OR OutOf(1,system)) AND MinPercent(100,system))"
        );
    }

    #[test]
    fn test_parse_errors() {
        for text in [
            "MinPercent(150,batch)",
            "MinPercent(50,other)",
            "MinPercent(50 batch)",
            "MinPercent(50,batch) AND",
            "MinPercent(50,batch))",
            "Majority(1,batch)",
            "MinPercent(50,batch) & OutOf(1,system)",
        ] {
            assert!(
                matches!(WitnessPolicy::parse(text), Err(PolicyError::Parse { .. })),
                "{} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_min_percent() {
        let policy = WitnessPolicy::parse("MinPercent(50,batch) AND MinPercent(100,system)").unwrap();
        let selected = selection();

        assert!(!policy.evaluate(&[proof("https://b1")], &selected).unwrap());
        assert!(policy
            .evaluate(&[proof("https://b1"), proof("https://s1")], &selected)
            .unwrap());
    }

    #[test]
    fn test_unsolicited_and_duplicate_proofs_do_not_count() {
        let policy = WitnessPolicy::parse("OutOf(2,batch)").unwrap();
        let selected = selection();

        let proofs = vec![proof("https://b1"), proof("https://b1"), proof("https://stranger")];
        assert!(!policy.evaluate(&proofs, &selected).unwrap());
    }

    #[test]
    fn test_empty_required_category_is_unsatisfiable() {
        let policy = WitnessPolicy::parse("MinPercent(100,system)").unwrap();
        let selected = WitnessSet::new(vec![Witness::batch("https://b1")]);

        let err = policy.evaluate(&[proof("https://b1")], &selected).unwrap_err();
        assert!(matches!(err, PolicyError::Unsatisfiable(_)));

        // A disjunction with a satisfiable branch is still decidable
        let policy = WitnessPolicy::parse("MinPercent(100,system) OR OutOf(1,batch)").unwrap();
        assert!(policy.evaluate(&[proof("https://b1")], &selected).unwrap());
    }

    #[test]
    fn test_order_independent() {
        let policy = WitnessPolicy::parse("MinPercent(100,batch)").unwrap();
        let selected = selection();
        let forward = vec![proof("https://b1"), proof("https://b2")];
        let reverse = vec![proof("https://b2"), proof("https://b1")];

        assert_eq!(policy.outcome(&forward, &selected), policy.outcome(&reverse, &selected));
        assert_eq!(policy.outcome(&forward, &selected), PolicyOutcome::Satisfied);
    }

    #[test]
    fn test_empty_policy_requires_all() {
        let policy = WitnessPolicy::parse("  ").unwrap();
        let selected = selection();

        assert_eq!(
            policy.outcome(&[proof("https://b1"), proof("https://b2")], &selected),
            PolicyOutcome::Pending
        );
        assert_eq!(
            policy.outcome(
                &[proof("https://b1"), proof("https://b2"), proof("https://s1")],
                &selected
            ),
            PolicyOutcome::Satisfied
        );
        assert!(matches!(
            policy.outcome(&[], &WitnessSet::default()),
            PolicyOutcome::Unsatisfiable(_)
        ));
    }

    #[tokio::test]
    async fn test_provider_caches_until_expiry() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let provider = PolicyProvider::new(store.clone(), "OutOf(1,batch)", secs(60), clock.clone());

        assert_eq!(provider.policy().await.unwrap().to_string(), "OutOf(1,batch)");

        // Changed behind the provider's back
        store.put(POLICY_KEY, b"OutOf(2,batch)".to_vec()).await.unwrap();
        assert_eq!(provider.policy().await.unwrap().to_string(), "OutOf(1,batch)");

        clock.advance(secs(61));
        assert_eq!(provider.policy().await.unwrap().to_string(), "OutOf(2,batch)");

        // Bad text in the store surfaces instead of defaulting
        store.put(POLICY_KEY, b"OutOf(x,batch)".to_vec()).await.unwrap();
        clock.advance(secs(61));
        assert!(matches!(provider.policy().await, Err(PolicyError::Parse { .. })));
    }
}
